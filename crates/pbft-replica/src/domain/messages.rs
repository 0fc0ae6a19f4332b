//! Protocol messages exchanged between replicas.

use pbft_types::{Digest, ReplicaId, Request, SeqNumber, ViewNumber};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Primary's proposal binding a request to `(view, seq)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrePrepare<O> {
    pub view: ViewNumber,
    pub seq: SeqNumber,
    pub digest: Digest,
    pub request: Request<O>,
}

impl<O> PrePrepare<O> {
    /// Placeholder filling a sequence gap in a NEW-VIEW.
    pub fn noop(view: ViewNumber, seq: SeqNumber) -> Self {
        Self {
            view,
            seq,
            digest: Digest::empty(),
            request: Request::noop(),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.request.is_noop()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Prepare {
    pub view: ViewNumber,
    pub seq: SeqNumber,
    pub digest: Digest,
    pub replica_id: ReplicaId,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Commit {
    pub view: ViewNumber,
    pub seq: SeqNumber,
    pub digest: Digest,
    pub replica_id: ReplicaId,
}

/// State digest announcement after executing `last_seq`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_seq: SeqNumber,
    pub state_digest: Digest,
    pub replica_id: ReplicaId,
}

/// A three-phase message tagged by kind.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseMessage<O> {
    PrePrepare(PrePrepare<O>),
    Prepare(Prepare),
    Commit(Commit),
}

impl<O> PhaseMessage<O> {
    pub fn view(&self) -> ViewNumber {
        match self {
            Self::PrePrepare(m) => m.view,
            Self::Prepare(m) => m.view,
            Self::Commit(m) => m.view,
        }
    }

    pub fn seq(&self) -> SeqNumber {
        match self {
            Self::PrePrepare(m) => m.seq,
            Self::Prepare(m) => m.seq,
            Self::Commit(m) => m.seq,
        }
    }

    pub fn digest(&self) -> &Digest {
        match self {
            Self::PrePrepare(m) => &m.digest,
            Self::Prepare(m) => &m.digest,
            Self::Commit(m) => &m.digest,
        }
    }

    pub fn as_pre_prepare(&self) -> Option<&PrePrepare<O>> {
        match self {
            Self::PrePrepare(m) => Some(m),
            _ => None,
        }
    }
}

/// Vote to move to `new_view`, carrying what this replica can prove.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewChange<O> {
    pub new_view: ViewNumber,
    pub last_stable_seq: SeqNumber,
    /// The `2f + 1` checkpoints proving `last_stable_seq`
    pub checkpoint_proofs: Vec<Checkpoint>,
    /// For each prepared sequence above `last_stable_seq`: the PRE-PREPARE
    /// followed by `2f` matching PREPAREs
    pub prepared_proofs: BTreeMap<SeqNumber, Vec<PhaseMessage<O>>>,
    pub replica_id: ReplicaId,
}

impl<O> ViewChange<O> {
    /// The PRE-PREPARE proven for `seq`, if any.
    pub fn proven_pre_prepare(&self, seq: SeqNumber) -> Option<&PrePrepare<O>> {
        self.prepared_proofs
            .get(&seq)
            .and_then(|proof| proof.iter().find_map(PhaseMessage::as_pre_prepare))
    }

    /// Highest sequence number this vote proves anything about.
    pub fn max_proven_seq(&self) -> SeqNumber {
        let prepared = self.prepared_proofs.keys().next_back().copied();
        let checkpointed = self.checkpoint_proofs.iter().map(|c| c.last_seq).max();
        prepared
            .into_iter()
            .chain(checkpointed)
            .max()
            .unwrap_or(self.last_stable_seq)
            .max(self.last_stable_seq)
    }
}

/// New primary's announcement of `new_view`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewView<O> {
    pub new_view: ViewNumber,
    pub view_change_proofs: Vec<ViewChange<O>>,
    /// Re-issued PRE-PREPAREs in `new_view`, no-ops for gaps
    pub prepared_proofs: Vec<PrePrepare<O>>,
}

/// Any message a replica receives from a client or another replica.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaMessage<O> {
    Request(Request<O>),
    PrePrepare(PrePrepare<O>),
    Prepare(Prepare),
    Commit(Commit),
    Checkpoint(Checkpoint),
    ViewChange(ViewChange<O>),
    NewView(NewView<O>),
}

impl<O> ReplicaMessage<O> {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::PrePrepare(_) => "pre-prepare",
            Self::Prepare(_) => "prepare",
            Self::Commit(_) => "commit",
            Self::Checkpoint(_) => "checkpoint",
            Self::ViewChange(_) => "view-change",
            Self::NewView(_) => "new-view",
        }
    }
}
