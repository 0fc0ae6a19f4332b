//! # PBFT Telemetry
//!
//! Structured logging for replicas and clients. Protocol crates only emit
//! `tracing` events; the process that hosts them calls [`init_logging`]
//! once at startup.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pbft_telemetry::{init_logging, TelemetryConfig};
//!
//! init_logging(&TelemetryConfig::for_replica(0))?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PBFT_SERVICE_NAME` | `pbft` | Service name in log events |
//! | `PBFT_LOG_LEVEL` / `RUST_LOG` | `info` | `EnvFilter` directive |
//! | `PBFT_CONSOLE_OUTPUT` | `true` | Print events to stdout |
//! | `PBFT_JSON_LOGS` | `false` | JSON instead of human-readable lines |

mod config;
mod logging;

pub use config::TelemetryConfig;
pub use logging::init_logging;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("Global subscriber already installed: {0}")]
    AlreadyInitialized(String),
}
