//! Background timeout polling

use crate::ports::ReplicaApi;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Poll the replica's request timers every `period` until `shutdown`
/// becomes `true` or its sender is dropped.
pub async fn timeout_task<R>(
    replica: Arc<R>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) where
    R: ReplicaApi + ?Sized,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match replica.poll_timeouts() {
                    Ok(Some(next)) => {
                        debug!(next_ms = next.as_millis() as u64, "Polled request timers");
                    }
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Timeout poll failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Timeout task stopped");
                    return;
                }
            }
        }
    }
}
