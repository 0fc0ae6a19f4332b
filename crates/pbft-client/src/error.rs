//! Client error types

use pbft_types::ReplicaId;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Failed to encode request: {0}")]
    Encode(String),

    #[error("Failed to send request to replica {target}: {reason}")]
    Send { target: ReplicaId, reason: String },

    #[error("Failed to multicast request: {0}")]
    Multicast(String),

    #[error("Invalid client configuration: {0}")]
    Config(String),
}

pub type ClientResult<T> = Result<T, ClientError>;
