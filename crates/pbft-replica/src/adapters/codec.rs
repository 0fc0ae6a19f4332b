//! Bincode wire codec
//!
//! Replica-bound messages are framed as one [`ReplicaMessage`] enum so a
//! receiver can decode without knowing the kind in advance. Encoding goes
//! through a borrowed mirror of that enum; bincode lays both out as
//! `variant index, fields`, so they are wire-compatible.

use crate::domain::{Checkpoint, Commit, NewView, PrePrepare, Prepare, ReplicaMessage, ViewChange};
use crate::error::{ReplicaError, ReplicaResult};
use crate::ports::Encoder;
use pbft_types::{Reply, Request};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Must list variants in the same order as [`ReplicaMessage`].
#[derive(Serialize)]
enum WireRef<'a, O> {
    Request(&'a Request<O>),
    PrePrepare(&'a PrePrepare<O>),
    Prepare(&'a Prepare),
    Commit(&'a Commit),
    Checkpoint(&'a Checkpoint),
    ViewChange(&'a ViewChange<O>),
    NewView(&'a NewView<O>),
}

fn encode<T: Serialize>(kind: &'static str, value: &T) -> ReplicaResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| ReplicaError::Encode {
        kind,
        reason: e.to_string(),
    })
}

/// Decode a message sent to a replica.
pub fn decode_message<O: DeserializeOwned>(data: &[u8]) -> ReplicaResult<ReplicaMessage<O>> {
    bincode::deserialize(data).map_err(|e| ReplicaError::Decode(e.to_string()))
}

/// Decode a reply sent to a client.
pub fn decode_reply<R: DeserializeOwned>(data: &[u8]) -> ReplicaResult<Reply<R>> {
    bincode::deserialize(data).map_err(|e| ReplicaError::Decode(e.to_string()))
}

/// [`Encoder`] backed by bincode.
pub struct BincodeEncoder<O, R> {
    _marker: PhantomData<fn() -> (O, R)>,
}

impl<O, R> BincodeEncoder<O, R> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<O, R> Default for BincodeEncoder<O, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O, R> Encoder<O, R> for BincodeEncoder<O, R>
where
    O: Serialize,
    R: Serialize,
{
    fn encode_request(&self, request: &Request<O>) -> ReplicaResult<Vec<u8>> {
        encode("request", &WireRef::Request(request))
    }

    fn encode_pre_prepare(&self, message: &PrePrepare<O>) -> ReplicaResult<Vec<u8>> {
        encode("pre-prepare", &WireRef::PrePrepare(message))
    }

    fn encode_prepare(&self, message: &Prepare) -> ReplicaResult<Vec<u8>> {
        encode("prepare", &WireRef::<O>::Prepare(message))
    }

    fn encode_commit(&self, message: &Commit) -> ReplicaResult<Vec<u8>> {
        encode("commit", &WireRef::<O>::Commit(message))
    }

    fn encode_checkpoint(&self, message: &Checkpoint) -> ReplicaResult<Vec<u8>> {
        encode("checkpoint", &WireRef::<O>::Checkpoint(message))
    }

    fn encode_view_change(&self, message: &ViewChange<O>) -> ReplicaResult<Vec<u8>> {
        encode("view-change", &WireRef::ViewChange(message))
    }

    fn encode_new_view(&self, message: &NewView<O>) -> ReplicaResult<Vec<u8>> {
        encode("new-view", &WireRef::NewView(message))
    }

    fn encode_reply(&self, reply: &Reply<R>) -> ReplicaResult<Vec<u8>> {
        encode("reply", reply)
    }
}
