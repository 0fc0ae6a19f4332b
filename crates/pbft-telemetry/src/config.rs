//! Telemetry configuration from environment variables.

use std::env;

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// Service name attached to every event
    pub service_name: String,

    /// Log level filter directive (trace, debug, info, warn, error, or a
    /// full `EnvFilter` directive such as `pbft_replica=debug`)
    pub log_level: String,

    /// Whether to enable console output
    pub console_output: bool,

    /// Whether to emit JSON formatted logs
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "pbft".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PBFT_SERVICE_NAME`: Service name (default: pbft)
    /// - `PBFT_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `PBFT_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `PBFT_JSON_LOGS`: Enable JSON logs (default: false)
    pub fn from_env() -> Self {
        Self {
            service_name: env::var("PBFT_SERVICE_NAME").unwrap_or_else(|_| "pbft".to_string()),

            log_level: env::var("PBFT_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            console_output: env::var("PBFT_CONSOLE_OUTPUT")
                .map(|v| parse_flag(&v, true))
                .unwrap_or(true),

            json_logs: env::var("PBFT_JSON_LOGS")
                .map(|v| parse_flag(&v, false))
                .unwrap_or(false),
        }
    }

    /// Configuration for one replica process.
    pub fn for_replica(replica_id: u32) -> Self {
        Self {
            service_name: format!("pbft-replica-{replica_id}"),
            ..Self::from_env()
        }
    }
}

fn parse_flag(value: &str, default: bool) -> bool {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => true,
        "false" | "0" | "no" => false,
        _ => default,
    }
}
