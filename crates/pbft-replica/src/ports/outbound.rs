//! Driven ports (Outbound dependencies)

use crate::domain::{Checkpoint, Commit, NewView, PrePrepare, Prepare, ViewChange};
use crate::error::ReplicaResult;
use pbft_types::{Digest, ReplicaId, Reply, Request};

/// The replicated service.
///
/// Every correct replica runs the same deterministic state machine, so equal
/// operation sequences produce equal results and equal state digests.
pub trait StateMachine: Send + Sync {
    type Operation: Clone + PartialEq + Send + Sync;
    type Output: Clone + Send + Sync;

    /// Apply an operation and return its result
    fn compute(&self, operation: &Self::Operation) -> Self::Output;

    /// Digest of the current state, carried by CHECKPOINT messages
    fn state_digest(&self) -> Digest;
}

/// Content digest of requests.
///
/// Must be deterministic across replicas. May be a no-op when
/// authentication is not required.
pub trait Digester<O>: Send + Sync {
    fn digest(&self, request: &Request<O>) -> Digest;
}

/// Wire encoding, one method per message kind.
pub trait Encoder<O, R>: Send + Sync {
    fn encode_request(&self, request: &Request<O>) -> ReplicaResult<Vec<u8>>;

    fn encode_pre_prepare(&self, message: &PrePrepare<O>) -> ReplicaResult<Vec<u8>>;

    fn encode_prepare(&self, message: &Prepare) -> ReplicaResult<Vec<u8>>;

    fn encode_commit(&self, message: &Commit) -> ReplicaResult<Vec<u8>>;

    fn encode_checkpoint(&self, message: &Checkpoint) -> ReplicaResult<Vec<u8>>;

    fn encode_view_change(&self, message: &ViewChange<O>) -> ReplicaResult<Vec<u8>>;

    fn encode_new_view(&self, message: &NewView<O>) -> ReplicaResult<Vec<u8>>;

    fn encode_reply(&self, reply: &Reply<R>) -> ReplicaResult<Vec<u8>>;
}

/// Message delivery.
///
/// Sends are fire-and-forget: no ordering, delivery or deduplication is
/// assumed. Errors are reported so the caller can log them.
pub trait Transport: Send + Sync {
    fn known_replica_ids(&self) -> Vec<ReplicaId>;

    fn count_known_replicas(&self) -> usize {
        self.known_replica_ids().len()
    }

    fn send_message(&self, replica_id: ReplicaId, data: Vec<u8>) -> Result<(), String>;

    /// Send to every known replica except those in `ignored`
    fn multicast(&self, data: Vec<u8>, ignored: &[ReplicaId]) -> Result<(), String>;

    fn send_reply(&self, client_id: &str, data: Vec<u8>) -> Result<(), String>;
}

/// Millisecond clock for timers
pub trait TimeSource: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Default time source using system time
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}
