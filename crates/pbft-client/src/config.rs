//! Client configuration.

use crate::error::{ClientError, ClientResult};
use std::env;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Identifies this client's requests and reply channel
    pub client_id: String,

    /// Number of Byzantine replicas tolerated (`f`)
    pub tolerance: usize,

    /// Wait before re-broadcasting an unanswered request
    pub timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: "client-0".to_string(),
            tolerance: 1,
            timeout_ms: 1_000,
        }
    }
}

impl ClientConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    /// Create configuration from environment variables.
    ///
    /// - `PBFT_CLIENT_ID` (default: client-0)
    /// - `PBFT_TOLERANCE` (default: 1)
    /// - `PBFT_CLIENT_TIMEOUT_MS` (default: 1000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            client_id: env::var("PBFT_CLIENT_ID").unwrap_or(defaults.client_id),
            tolerance: env::var("PBFT_TOLERANCE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.tolerance),
            timeout_ms: env::var("PBFT_CLIENT_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.timeout_ms),
        }
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.client_id.is_empty() {
            return Err(ClientError::Config("client_id must not be empty".into()));
        }
        if self.tolerance == 0 {
            return Err(ClientError::Config("tolerance must be greater than zero".into()));
        }
        if self.timeout_ms == 0 {
            return Err(ClientError::Config("timeout_ms must be greater than zero".into()));
        }
        Ok(())
    }
}
