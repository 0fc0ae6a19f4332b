//! # Replica Metrics
//!
//! Prometheus metrics for monitoring agreement progress.
//!
//! ## Usage
//!
//! Enable with the `metrics` feature:
//! ```toml
//! pbft-replica = { path = "...", features = ["metrics"] }
//! ```
//!
//! ## Metrics Exported
//!
//! - `pbft_requests_received_total` - Counter of client requests received
//! - `pbft_messages_dropped_total` - Counter of dropped messages (by reason)
//! - `pbft_requests_committed_total` - Counter of requests executed after commit
//! - `pbft_checkpoints_stable_total` - Counter of checkpoints that became stable
//! - `pbft_view_changes_started_total` - Counter of VIEW-CHANGE votes cast
//! - `pbft_current_view` - Gauge of the view this replica is in

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter,
    IntCounterVec, IntGauge,
};

#[cfg(feature = "metrics")]
lazy_static! {
    /// Total client requests received
    pub static ref REQUESTS_RECEIVED: IntCounter = register_int_counter!(
        "pbft_requests_received_total",
        "Total number of client requests received"
    )
    .expect("Failed to create REQUESTS_RECEIVED metric");

    /// Total messages dropped, labeled by reason
    pub static ref MESSAGES_DROPPED: IntCounterVec = register_int_counter_vec!(
        "pbft_messages_dropped_total",
        "Total number of protocol messages dropped",
        &["reason"]
    )
    .expect("Failed to create MESSAGES_DROPPED metric");

    /// Total requests executed
    pub static ref REQUESTS_COMMITTED: IntCounter = register_int_counter!(
        "pbft_requests_committed_total",
        "Total number of requests executed after reaching committed-local"
    )
    .expect("Failed to create REQUESTS_COMMITTED metric");

    /// Total stable checkpoints
    pub static ref CHECKPOINTS_STABLE: IntCounter = register_int_counter!(
        "pbft_checkpoints_stable_total",
        "Total number of checkpoints that became stable"
    )
    .expect("Failed to create CHECKPOINTS_STABLE metric");

    /// Total view change votes cast by this process
    pub static ref VIEW_CHANGES_STARTED: IntCounter = register_int_counter!(
        "pbft_view_changes_started_total",
        "Total number of VIEW-CHANGE votes cast"
    )
    .expect("Failed to create VIEW_CHANGES_STARTED metric");

    /// Current view
    pub static ref CURRENT_VIEW: IntGauge = register_int_gauge!(
        "pbft_current_view",
        "View the replica is currently in"
    )
    .expect("Failed to create CURRENT_VIEW metric");
}

#[cfg(feature = "metrics")]
pub fn record_request_received() {
    REQUESTS_RECEIVED.inc();
}

/// Record a dropped message with reason
#[cfg(feature = "metrics")]
pub fn record_message_dropped(reason: &str) {
    MESSAGES_DROPPED.with_label_values(&[reason]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_request_committed() {
    REQUESTS_COMMITTED.inc();
}

#[cfg(feature = "metrics")]
pub fn record_checkpoint_stable() {
    CHECKPOINTS_STABLE.inc();
}

#[cfg(feature = "metrics")]
pub fn record_view_change_started() {
    VIEW_CHANGES_STARTED.inc();
}

/// Record the view the replica entered
#[cfg(feature = "metrics")]
pub fn record_view_entered(view: u32) {
    CURRENT_VIEW.set(i64::from(view));
}

// No-op implementations when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
pub fn record_request_received() {}

#[cfg(not(feature = "metrics"))]
pub fn record_message_dropped(_reason: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_request_committed() {}

#[cfg(not(feature = "metrics"))]
pub fn record_checkpoint_stable() {}

#[cfg(not(feature = "metrics"))]
pub fn record_view_change_started() {}

#[cfg(not(feature = "metrics"))]
pub fn record_view_entered(_view: u32) {}
