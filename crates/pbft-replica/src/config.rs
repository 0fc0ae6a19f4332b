//! Replica configuration.

use crate::error::ConfigError;
use pbft_types::{replica_count, ReplicaId};
use std::env;
use std::time::Duration;

/// Configuration for one replica.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaConfig {
    /// This replica's id, `0..N`
    pub replica_id: ReplicaId,

    /// Number of Byzantine faults tolerated (`f`)
    pub tolerance: usize,

    /// Base request timeout before voting for a view change
    pub request_timeout_ms: u64,

    /// Live tickets at or above which new requests are buffered
    pub buffer_threshold: usize,

    /// A checkpoint is taken every `checkpoint_interval` sequence numbers
    pub checkpoint_interval: u64,

    /// Width of the `[low, high]` sequence window
    pub watermark_interval: u64,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            replica_id: 0,
            tolerance: 1,
            request_timeout_ms: 1_000,
            buffer_threshold: 1_000,
            checkpoint_interval: 100,
            watermark_interval: 200,
        }
    }
}

impl ReplicaConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PBFT_REPLICA_ID` (default: 0)
    /// - `PBFT_TOLERANCE` (default: 1)
    /// - `PBFT_REQUEST_TIMEOUT_MS` (default: 1000)
    /// - `PBFT_BUFFER_THRESHOLD` (default: 1000)
    /// - `PBFT_CHECKPOINT_INTERVAL` (default: 100)
    /// - `PBFT_WATERMARK_INTERVAL` (default: 200)
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            replica_id: env_or("PBFT_REPLICA_ID", defaults.replica_id),
            tolerance: env_or("PBFT_TOLERANCE", defaults.tolerance),
            request_timeout_ms: env_or("PBFT_REQUEST_TIMEOUT_MS", defaults.request_timeout_ms),
            buffer_threshold: env_or("PBFT_BUFFER_THRESHOLD", defaults.buffer_threshold),
            checkpoint_interval: env_or("PBFT_CHECKPOINT_INTERVAL", defaults.checkpoint_interval),
            watermark_interval: env_or("PBFT_WATERMARK_INTERVAL", defaults.watermark_interval),
        }
    }

    /// Configuration for replica `replica_id` with all other values default.
    pub fn for_replica(replica_id: ReplicaId) -> Self {
        Self {
            replica_id,
            ..Self::default()
        }
    }

    /// Check the values are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Zero {
                field: "request_timeout_ms",
            });
        }
        if self.buffer_threshold == 0 {
            return Err(ConfigError::Zero {
                field: "buffer_threshold",
            });
        }
        if self.checkpoint_interval == 0 {
            return Err(ConfigError::Zero {
                field: "checkpoint_interval",
            });
        }
        if self.watermark_interval == 0 {
            return Err(ConfigError::Zero {
                field: "watermark_interval",
            });
        }
        // Without a checkpoint inside the window the watermarks never move
        if self.checkpoint_interval > self.watermark_interval {
            return Err(ConfigError::CheckpointBeyondWindow {
                checkpoint: self.checkpoint_interval,
                watermark: self.watermark_interval,
            });
        }
        Ok(())
    }

    /// Group size `3f + 1`.
    pub fn replica_count(&self) -> usize {
        replica_count(self.tolerance)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn env_or<T: std::str::FromStr>(var: &str, default: T) -> T {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
