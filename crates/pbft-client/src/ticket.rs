//! Client-side ticket: one outstanding request and the replies it gathered.

use parking_lot::RwLock;
use pbft_types::{matching_value, reply_quorum, ReplicaId, Request};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

/// An outstanding request.
///
/// The result is accepted once `f + 1` distinct replicas reported the same
/// value, so at least one of them is correct.
pub struct ClientTicket<O, R> {
    request: Request<O>,
    dispatch_ms: AtomicU64,
    replies: RwLock<HashMap<ReplicaId, R>>,
    result: watch::Sender<Option<R>>,
}

impl<O, R> ClientTicket<O, R>
where
    R: Clone + PartialEq,
{
    pub fn new(request: Request<O>, dispatch_ms: u64) -> Self {
        let (result, _) = watch::channel(None);
        Self {
            request,
            dispatch_ms: AtomicU64::new(dispatch_ms),
            replies: RwLock::new(HashMap::new()),
            result,
        }
    }

    pub fn request(&self) -> &Request<O> {
        &self.request
    }

    pub fn timestamp(&self) -> u64 {
        self.request.timestamp
    }

    pub fn dispatch_ms(&self) -> u64 {
        self.dispatch_ms.load(Ordering::Acquire)
    }

    pub fn update_dispatch(&self, now_ms: u64) {
        self.dispatch_ms.store(now_ms, Ordering::Release);
    }

    /// Record `replica_id`'s reply and settle the result if `f + 1`
    /// replicas now agree. A later reply from the same replica replaces its
    /// earlier one. Returns whether the ticket is settled.
    pub fn recv_result(&self, replica_id: ReplicaId, result: R, f: usize) -> bool {
        if self.is_done() {
            return true;
        }

        let agreed = {
            let mut replies = self.replies.write();
            replies.insert(replica_id, result);
            matching_value(replies.values(), reply_quorum(f)).cloned()
        };

        match agreed {
            Some(value) => {
                // First settled value wins
                self.result.send_if_modified(|slot| {
                    if slot.is_none() {
                        *slot = Some(value);
                        true
                    } else {
                        false
                    }
                });
                true
            }
            None => false,
        }
    }

    pub fn reply_count(&self) -> usize {
        self.replies.read().len()
    }

    pub fn is_done(&self) -> bool {
        self.result.borrow().is_some()
    }

    /// The accepted result, if settled
    pub fn result(&self) -> Option<R> {
        self.result.borrow().clone()
    }

    /// Wait until the result is settled.
    pub async fn wait(&self) -> Option<R> {
        let mut rx = self.result.subscribe();
        let settled = rx.wait_for(Option::is_some).await.ok()?;
        (*settled).clone()
    }
}
