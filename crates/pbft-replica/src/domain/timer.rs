//! Per-request timers.
//!
//! Each request the replica is waiting on has a deadline. When it passes
//! without the request committing, the replica suspects the primary and
//! votes for a view change. Deadlines are plain millisecond timestamps from
//! the replica's time source, so the table is deterministic under a manual
//! clock.

use dashmap::DashMap;
use pbft_types::{RequestKey, ViewNumber};
use std::sync::atomic::{AtomicU64, Ordering};

/// Wait before giving up on view `target` when currently in `current`.
///
/// Linear backoff: each further view waited for adds one request timeout.
pub fn backoff_wait(request_timeout_ms: u64, current: ViewNumber, target: ViewNumber) -> u64 {
    let steps = u64::from(target.saturating_sub(current)).max(1);
    request_timeout_ms.saturating_mul(steps)
}

/// Deadline for a request or vote started at `now_ms`.
pub fn deadline_after(now_ms: u64, wait_ms: u64) -> u64 {
    now_ms.saturating_add(wait_ms)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTimer {
    pub deadline_ms: u64,
    /// How many times the deadline has been pushed back
    pub attempts: u32,
}

impl RequestTimer {
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.deadline_ms
    }

    pub fn remaining_ms(&self, now_ms: u64) -> u64 {
        self.deadline_ms.saturating_sub(now_ms)
    }
}

/// Statistics for the timer table
#[derive(Debug, Default)]
pub struct TimerStats {
    pub total_started: AtomicU64,
    pub total_cancelled: AtomicU64,
    pub total_expired: AtomicU64,
}

/// Timers keyed by request.
#[derive(Debug, Default)]
pub struct TimerTable {
    timers: DashMap<RequestKey, RequestTimer>,
    stats: TimerStats,
}

impl TimerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a timer for `key` unless one is already running.
    ///
    /// Returns whether a new timer was started.
    pub fn start(&self, key: RequestKey, deadline_ms: u64) -> bool {
        let mut started = false;
        self.timers.entry(key).or_insert_with(|| {
            started = true;
            RequestTimer {
                deadline_ms,
                attempts: 0,
            }
        });
        if started {
            self.stats.total_started.fetch_add(1, Ordering::Relaxed);
        }
        started
    }

    /// Push an existing timer's deadline to `deadline_ms`.
    pub fn rearm(&self, key: &RequestKey, deadline_ms: u64) -> Option<RequestTimer> {
        self.timers.get_mut(key).map(|mut timer| {
            timer.deadline_ms = deadline_ms;
            timer.attempts = timer.attempts.saturating_add(1);
            *timer
        })
    }

    /// Re-arm every running timer to `deadline_ms`.
    pub fn rearm_all(&self, deadline_ms: u64) {
        for mut timer in self.timers.iter_mut() {
            timer.deadline_ms = deadline_ms;
            timer.attempts = timer.attempts.saturating_add(1);
        }
    }

    pub fn cancel(&self, key: &RequestKey) -> bool {
        let removed = self.timers.remove(key).is_some();
        if removed {
            self.stats.total_cancelled.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }

    pub fn get(&self, key: &RequestKey) -> Option<RequestTimer> {
        self.timers.get(key).map(|t| *t)
    }

    /// Keys whose deadline has passed.
    pub fn expired(&self, now_ms: u64) -> Vec<RequestKey> {
        let keys: Vec<RequestKey> = self
            .timers
            .iter()
            .filter(|entry| entry.value().is_expired(now_ms))
            .map(|entry| entry.key().clone())
            .collect();
        self.stats
            .total_expired
            .fetch_add(keys.len() as u64, Ordering::Relaxed);
        keys
    }

    /// Earliest deadline among running timers.
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.iter().map(|entry| entry.deadline_ms).min()
    }

    pub fn clear(&self) {
        self.timers.clear();
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    pub fn stats(&self) -> &TimerStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(ts: u64) -> RequestKey {
        RequestKey::new("client", ts)
    }

    #[test]
    fn test_backoff_is_linear_in_views_ahead() {
        assert_eq!(backoff_wait(1_000, 0, 1), 1_000);
        assert_eq!(backoff_wait(1_000, 0, 2), 2_000);
        assert_eq!(backoff_wait(1_000, 3, 6), 3_000);
    }

    #[test]
    fn test_backoff_never_below_one_timeout() {
        assert_eq!(backoff_wait(500, 4, 4), 500);
        assert_eq!(backoff_wait(500, 5, 2), 500);
    }

    #[test]
    fn test_start_is_idempotent() {
        let table = TimerTable::new();
        assert!(table.start(key(1), 100));
        assert!(!table.start(key(1), 500));
        assert_eq!(table.get(&key(1)).map(|t| t.deadline_ms), Some(100));
        assert_eq!(table.stats().total_started.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_expired_and_rearm() {
        let table = TimerTable::new();
        table.start(key(1), 100);
        table.start(key(2), 300);

        assert!(table.expired(99).is_empty());
        assert_eq!(table.expired(100), vec![key(1)]);

        let rearmed = table.rearm(&key(1), 400).expect("timer exists");
        assert_eq!(rearmed.attempts, 1);
        assert_eq!(table.next_deadline(), Some(300));
    }

    #[test]
    fn test_cancel_and_clear() {
        let table = TimerTable::new();
        table.start(key(1), 100);
        table.start(key(2), 100);
        assert!(table.cancel(&key(1)));
        assert!(!table.cancel(&key(1)));
        assert_eq!(table.len(), 1);

        table.clear();
        assert!(table.is_empty());
        assert_eq!(table.next_deadline(), None);
    }

    #[test]
    fn test_remaining() {
        let timer = RequestTimer {
            deadline_ms: 150,
            attempts: 0,
        };
        assert_eq!(timer.remaining_ms(100), 50);
        assert_eq!(timer.remaining_ms(200), 0);
        assert!(timer.is_expired(150));
    }
}
