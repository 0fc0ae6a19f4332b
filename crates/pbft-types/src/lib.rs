//! # PBFT Types Crate
//!
//! Types exchanged between clients and replicas, plus the quorum arithmetic
//! both sides agree on.
//!
//! ## Design Principles
//!
//! - **One request identity**: a request is identified by its
//!   `(client_id, timestamp)` pair ([`RequestKey`]). Replicas deduplicate on
//!   it and clients match replies against it.
//! - **No-op sentinel**: a request without an operation is the placeholder
//!   used to fill sequence gaps after a view change. It carries an empty
//!   [`Digest`].
//! - **Pure tallies**: counting matching values until a threshold is reached
//!   is a pure function of the collected values ([`quorum`]), independent of
//!   how completion is signalled.

pub mod quorum;
pub mod request;

pub use quorum::{
    bandwagon_quorum, commit_quorum, matching_value, new_view_quorum, prepare_quorum,
    reply_quorum, replica_count, stable_quorum,
};
pub use request::{Digest, Reply, Request, RequestKey};

/// View number. The primary of view `v` is replica `v mod N`.
pub type ViewNumber = u32;

/// Sequence number assigned by the primary.
pub type SeqNumber = u64;

/// Replica identifier, `0..N`.
pub type ReplicaId = u32;

/// Compute the primary for a view in a group of `replica_count` replicas.
///
/// Returns replica 0 for an empty group so callers never divide by zero.
pub fn primary_of(view: ViewNumber, replica_count: usize) -> ReplicaId {
    if replica_count == 0 {
        return 0;
    }
    (view as usize % replica_count) as ReplicaId
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_rotates_with_view() {
        assert_eq!(primary_of(0, 4), 0);
        assert_eq!(primary_of(1, 4), 1);
        assert_eq!(primary_of(5, 4), 1);
    }

    #[test]
    fn test_primary_of_empty_group() {
        assert_eq!(primary_of(7, 0), 0);
    }
}
