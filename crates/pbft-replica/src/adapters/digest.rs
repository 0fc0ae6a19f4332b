//! Digester adapters

use crate::ports::Digester;
use pbft_types::{Digest, Request};
use serde::Serialize;
use sha2::{Digest as _, Sha256};

/// SHA-256 over the bincode encoding of the request.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Digester;

impl<O> Digester<O> for Sha256Digester
where
    O: Serialize + Send + Sync,
{
    fn digest(&self, request: &Request<O>) -> Digest {
        let bytes = bincode::serialize(request).unwrap_or_default();
        Digest::new(Sha256::digest(&bytes).to_vec())
    }
}

/// Digester for deployments without request authentication.
///
/// Every request gets the empty digest, so digest checks always pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDigester;

impl<O> Digester<O> for NoopDigester
where
    O: Send + Sync,
{
    fn digest(&self, _request: &Request<O>) -> Digest {
        Digest::empty()
    }
}
