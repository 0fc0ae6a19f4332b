//! Error types for the replica
//!
//! Two kinds of failure exist. Invalid or Byzantine input is dropped and
//! only recorded as a [`RejectReason`]; it never reaches the caller.
//! Violations of the replica's own contracts surface as [`ReplicaError`].

use pbft_types::{SeqNumber, ViewNumber};

/// Replica error types
#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    #[error("Committed ticket ({view}, {seq}) has no request attached")]
    MissingRequest { view: ViewNumber, seq: SeqNumber },

    #[error("Failed to encode {kind}: {reason}")]
    Encode { kind: &'static str, reason: String },

    #[error("Failed to decode message: {0}")]
    Decode(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for replica operations
pub type ReplicaResult<T> = Result<T, ReplicaError>;

/// Configuration errors
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("checkpoint_interval ({checkpoint}) must not exceed watermark_interval ({watermark})")]
    CheckpointBeyondWindow { checkpoint: u64, watermark: u64 },
}

/// Why an inbound message was dropped.
///
/// The string form doubles as the `reason` label of the drop counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Disgruntled,
    ViewMismatch,
    OutsideWatermarks,
    DigestMismatch,
    ConflictingPrePrepare,
    StaleCheckpoint,
    StaleViewChange,
    InvalidViewChange,
    InvalidNewView,
    NotPrimary,
    AlreadyExecuted,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disgruntled => "disgruntled",
            Self::ViewMismatch => "view_mismatch",
            Self::OutsideWatermarks => "outside_watermarks",
            Self::DigestMismatch => "digest_mismatch",
            Self::ConflictingPrePrepare => "conflicting_pre_prepare",
            Self::StaleCheckpoint => "stale_checkpoint",
            Self::StaleViewChange => "stale_view_change",
            Self::InvalidViewChange => "invalid_view_change",
            Self::InvalidNewView => "invalid_new_view",
            Self::NotPrimary => "not_primary",
            Self::AlreadyExecuted => "already_executed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_converts() {
        let err: ReplicaError = ConfigError::Zero { field: "tolerance" }.into();
        assert!(matches!(err, ReplicaError::Config(_)));
        assert_eq!(
            err.to_string(),
            "Invalid configuration: tolerance must be greater than zero"
        );
    }

    #[test]
    fn test_reject_reason_labels_are_snake_case() {
        assert_eq!(RejectReason::OutsideWatermarks.as_str(), "outside_watermarks");
        assert_eq!(RejectReason::Disgruntled.as_str(), "disgruntled");
    }
}
