//! Client requests and replica replies.

use crate::{ReplicaId, ViewNumber};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Content digest of a request.
///
/// The empty digest is reserved for no-op requests.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest(pub Vec<u8>);

impl Digest {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// The digest carried by no-op pre-prepares.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("<empty>");
        }
        // First 8 bytes are enough to tell digests apart in logs
        for byte in self.0.iter().take(8) {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// De-duplication key of a request: `(client_id, timestamp)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestKey {
    pub client_id: String,
    pub timestamp: u64,
}

impl RequestKey {
    pub fn new(client_id: impl Into<String>, timestamp: u64) -> Self {
        Self {
            client_id: client_id.into(),
            timestamp,
        }
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.client_id, self.timestamp)
    }
}

/// A client request.
///
/// `operation` is `None` for the no-op sentinel used to fill sequence gaps
/// in a NEW-VIEW.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request<O> {
    pub operation: Option<O>,
    pub timestamp: u64,
    pub client_id: String,
}

impl<O> Request<O> {
    pub fn new(operation: O, timestamp: u64, client_id: impl Into<String>) -> Self {
        Self {
            operation: Some(operation),
            timestamp,
            client_id: client_id.into(),
        }
    }

    /// The placeholder request of a no-op pre-prepare.
    pub fn noop() -> Self {
        Self {
            operation: None,
            timestamp: 0,
            client_id: String::new(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.operation.is_none()
    }

    pub fn key(&self) -> RequestKey {
        RequestKey::new(self.client_id.clone(), self.timestamp)
    }
}

/// Reply sent by one replica to the client once a request commits locally.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply<R> {
    pub view: ViewNumber,
    pub timestamp: u64,
    pub client_id: String,
    pub replica_id: ReplicaId,
    pub result: R,
}

impl<R> Reply<R> {
    pub fn key(&self) -> RequestKey {
        RequestKey::new(self.client_id.clone(), self.timestamp)
    }
}
