//! Per-slot agreement state.
//!
//! A [`Ticket`] collects every three-phase message for one `(view, seq)`
//! slot. Quorum predicates are recomputed from the collected messages on
//! every call and count distinct senders, so duplicated delivery is
//! harmless. The phase only moves forward, through compare-and-set, which
//! is what makes the COMMIT multicast and the reply happen exactly once.

use super::messages::{PhaseMessage, PrePrepare};
use parking_lot::RwLock;
use pbft_types::{
    commit_quorum, prepare_quorum, Digest, ReplicaId, Request, SeqNumber, ViewNumber,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};

/// Phase of a ticket. Ordered; never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum TicketPhase {
    /// Waiting for the prepared certificate
    PrePrepare = 0,
    /// Prepared; own COMMIT sent
    Prepare = 1,
    /// Committed-local; executed and replied
    Commit = 2,
}

impl TicketPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::PrePrepare,
            1 => Self::Prepare,
            _ => Self::Commit,
        }
    }
}

/// Outcome of offering a PRE-PREPARE to a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrePrepareOutcome {
    Accepted,
    /// Same digest already held
    Duplicate,
    /// A different digest is already bound to the slot
    Conflicting,
}

pub struct Ticket<O, R> {
    view: ViewNumber,
    seq: SeqNumber,
    messages: RwLock<Vec<PhaseMessage<O>>>,
    request: RwLock<Option<Request<O>>>,
    phase: AtomicU8,
    result: RwLock<Option<R>>,
}

impl<O, R> Ticket<O, R>
where
    O: Clone,
    R: Clone,
{
    pub fn new(view: ViewNumber, seq: SeqNumber) -> Self {
        Self {
            view,
            seq,
            messages: RwLock::new(Vec::new()),
            request: RwLock::new(None),
            phase: AtomicU8::new(TicketPhase::PrePrepare as u8),
            result: RwLock::new(None),
        }
    }

    pub fn view(&self) -> ViewNumber {
        self.view
    }

    pub fn seq(&self) -> SeqNumber {
        self.seq
    }

    /// Add a message. PRE-PREPAREs go through [`Self::append_pre_prepare`];
    /// an identical PREPARE or COMMIT is stored once.
    pub fn append(&self, message: PhaseMessage<O>) {
        if let PhaseMessage::PrePrepare(pp) = message {
            self.append_pre_prepare(pp);
            return;
        }

        let mut messages = self.messages.write();
        let duplicate = messages.iter().any(|held| match (held, &message) {
            (PhaseMessage::Prepare(a), PhaseMessage::Prepare(b)) => a == b,
            (PhaseMessage::Commit(a), PhaseMessage::Commit(b)) => a == b,
            _ => false,
        });
        if !duplicate {
            messages.push(message);
        }
    }

    /// Bind a PRE-PREPARE to the slot unless a different digest is already
    /// bound. The embedded request becomes the ticket's request if none is
    /// attached yet.
    pub fn append_pre_prepare(&self, pre_prepare: PrePrepare<O>) -> PrePrepareOutcome {
        let mut messages = self.messages.write();
        if let Some(held) = messages.iter().find_map(PhaseMessage::as_pre_prepare) {
            return if held.digest == pre_prepare.digest {
                PrePrepareOutcome::Duplicate
            } else {
                PrePrepareOutcome::Conflicting
            };
        }

        if !pre_prepare.is_noop() {
            self.attach_request(pre_prepare.request.clone());
        }
        messages.push(PhaseMessage::PrePrepare(pre_prepare));
        PrePrepareOutcome::Accepted
    }

    /// Attach the request if none is attached. Returns whether it was attached.
    pub fn attach_request(&self, request: Request<O>) -> bool {
        let mut slot = self.request.write();
        if slot.is_some() {
            return false;
        }
        *slot = Some(request);
        true
    }

    pub fn request(&self) -> Option<Request<O>> {
        self.request.read().clone()
    }

    pub fn pre_prepare(&self) -> Option<PrePrepare<O>> {
        self.messages
            .read()
            .iter()
            .find_map(PhaseMessage::as_pre_prepare)
            .cloned()
    }

    /// Digest bound by the PRE-PREPARE, if one is held.
    pub fn digest(&self) -> Option<Digest> {
        self.messages
            .read()
            .iter()
            .find_map(PhaseMessage::as_pre_prepare)
            .map(|pp| pp.digest.clone())
    }

    /// A PRE-PREPARE and PREPAREs from `2f` distinct replicas with its digest.
    pub fn is_prepared(&self, f: usize) -> bool {
        let messages = self.messages.read();
        Self::prepared_in(&messages, f)
    }

    /// Prepared, plus COMMITs from `2f + 1` distinct replicas with the
    /// PRE-PREPARE's digest.
    pub fn is_committed_local(&self, f: usize) -> bool {
        let messages = self.messages.read();
        if !Self::prepared_in(&messages, f) {
            return false;
        }
        let Some(digest) = Self::bound_digest(&messages) else {
            return false;
        };
        let committers: HashSet<ReplicaId> = messages
            .iter()
            .filter_map(|m| match m {
                PhaseMessage::Commit(c) if &c.digest == digest => Some(c.replica_id),
                _ => None,
            })
            .collect();
        committers.len() >= commit_quorum(f)
    }

    fn bound_digest(messages: &[PhaseMessage<O>]) -> Option<&Digest> {
        messages
            .iter()
            .find_map(PhaseMessage::as_pre_prepare)
            .map(|pp| &pp.digest)
    }

    fn prepared_in(messages: &[PhaseMessage<O>], f: usize) -> bool {
        let Some(digest) = Self::bound_digest(messages) else {
            return false;
        };
        let preparers: HashSet<ReplicaId> = messages
            .iter()
            .filter_map(|m| match m {
                PhaseMessage::Prepare(p) if &p.digest == digest => Some(p.replica_id),
                _ => None,
            })
            .collect();
        preparers.len() >= prepare_quorum(f)
    }

    /// The PRE-PREPARE followed by `2f` matching PREPAREs from distinct
    /// replicas, or `None` if the slot is not prepared.
    pub fn prepared_proof(&self, f: usize) -> Option<Vec<PhaseMessage<O>>> {
        let messages = self.messages.read();
        if !Self::prepared_in(&messages, f) {
            return None;
        }
        let pre_prepare = messages.iter().find_map(PhaseMessage::as_pre_prepare)?;

        let mut proof = vec![PhaseMessage::PrePrepare(pre_prepare.clone())];
        let mut seen = HashSet::new();
        for message in messages.iter() {
            if proof.len() > prepare_quorum(f) {
                break;
            }
            if let PhaseMessage::Prepare(p) = message {
                if p.digest == pre_prepare.digest && seen.insert(p.replica_id) {
                    proof.push(message.clone());
                }
            }
        }
        Some(proof)
    }

    pub fn phase(&self) -> TicketPhase {
        TicketPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`. Exactly one caller wins a given transition.
    pub fn try_advance(&self, from: TicketPhase, to: TicketPhase) -> bool {
        if to <= from {
            return false;
        }
        self.phase
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Store the execution result. The first result wins.
    pub fn set_result(&self, result: R) -> bool {
        let mut slot = self.result.write();
        if slot.is_some() {
            return false;
        }
        *slot = Some(result);
        true
    }

    pub fn result(&self) -> Option<R> {
        self.result.read().clone()
    }
}
