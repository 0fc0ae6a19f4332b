//! Driving ports (Inbound API)

use crate::domain::{Checkpoint, Commit, NewView, PrePrepare, Prepare, ViewChange};
use crate::error::ReplicaResult;
use pbft_types::{Request, RequestKey};
use std::time::Duration;

/// Protocol entry points of a replica.
///
/// Every method takes `&self` and may be called concurrently for the same
/// or different slots. Invalid messages are dropped, not reported.
pub trait ReplicaApi: Send + Sync {
    type Operation;

    fn recv_request(&self, request: Request<Self::Operation>) -> ReplicaResult<()>;

    fn recv_pre_prepare(&self, message: PrePrepare<Self::Operation>) -> ReplicaResult<()>;

    fn recv_prepare(&self, message: Prepare) -> ReplicaResult<()>;

    fn recv_commit(&self, message: Commit) -> ReplicaResult<()>;

    fn recv_checkpoint(&self, message: Checkpoint) -> ReplicaResult<()>;

    fn recv_view_change(&self, message: ViewChange<Self::Operation>) -> ReplicaResult<()>;

    fn recv_new_view(&self, message: NewView<Self::Operation>) -> ReplicaResult<()>;

    /// Check the timer of one request.
    ///
    /// Returns `None` when no timer is running for `key`, otherwise how long
    /// to wait before checking again.
    fn check_timeout(&self, key: &RequestKey) -> ReplicaResult<Option<Duration>>;

    /// Check every timer that is due. Returns how long until the next one.
    fn poll_timeouts(&self) -> ReplicaResult<Option<Duration>>;
}
