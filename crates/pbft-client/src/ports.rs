//! Outbound ports for the client

use crate::error::ClientResult;
use pbft_types::{ReplicaId, Request};

/// Serializes requests into the replicas' wire format.
pub trait RequestEncoder<O>: Send + Sync {
    fn encode_request(&self, request: &Request<O>) -> ClientResult<Vec<u8>>;
}

/// Delivery of requests to replicas.
pub trait ClientTransport: Send + Sync {
    fn count_known_replicas(&self) -> usize;

    fn send_request(&self, replica_id: ReplicaId, data: Vec<u8>) -> Result<(), String>;

    fn multicast_request(&self, data: Vec<u8>) -> Result<(), String>;
}

/// Millisecond clock for retry timers
pub trait TimeSource: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Default time source using system time
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_ms(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}
