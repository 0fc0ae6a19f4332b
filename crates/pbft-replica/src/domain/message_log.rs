//! # Message Log
//!
//! Everything a replica remembers about agreement:
//!
//! - live tickets keyed by `(view, seq)`, and the slots already executed
//! - completed tickets keyed by [`RequestKey`], for answering retransmits
//! - checkpoint votes and the last stable checkpoint with its proof
//! - the `[low, high]` watermark window
//! - VIEW-CHANGE votes, and NEW-VIEW assembly from them
//! - the admission buffer and in-flight request tracking
//!
//! ## Concurrency
//!
//! Maps are sharded (`DashMap`) so unrelated slots never contend. Garbage
//! collection after a stable checkpoint is a batch over several maps; it
//! runs under the write side of `gc_lock`, while completion and certificate
//! assembly take the read side so they never observe a half-pruned log.
//! The low watermark only moves forward.

use super::messages::{Checkpoint, NewView, PhaseMessage, ViewChange};
use super::ticket::Ticket;
use super::view_change::{
    bandwagon_target, is_valid_view_change, lowest_stable, reissue_pre_prepares,
    ViewChangeResult,
};
use crate::config::ReplicaConfig;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use pbft_types::{
    commit_quorum, matching_value, new_view_quorum, stable_quorum, ReplicaId, Request,
    RequestKey, SeqNumber, ViewNumber,
};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Sizing of the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogConfig {
    pub buffer_threshold: usize,
    pub checkpoint_interval: u64,
    pub watermark_interval: u64,
}

impl From<&ReplicaConfig> for LogConfig {
    fn from(config: &ReplicaConfig) -> Self {
        Self {
            buffer_threshold: config.buffer_threshold,
            checkpoint_interval: config.checkpoint_interval,
            watermark_interval: config.watermark_interval,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::from(&ReplicaConfig::default())
    }
}

/// Last stable checkpoint and the votes proving it.
#[derive(Debug, Clone, Default)]
pub struct StableCheckpoint {
    pub seq: SeqNumber,
    pub proofs: Vec<Checkpoint>,
}

type TicketKey = (ViewNumber, SeqNumber);

pub struct MessageLog<O, R> {
    config: LogConfig,
    tickets: DashMap<TicketKey, Arc<Ticket<O, R>>>,
    executed: DashSet<TicketKey>,
    completed: DashMap<RequestKey, Arc<Ticket<O, R>>>,
    checkpoints: DashMap<SeqNumber, HashMap<ReplicaId, Checkpoint>>,
    stable: RwLock<StableCheckpoint>,
    low_water_mark: AtomicU64,
    view_changes: DashMap<ViewNumber, HashMap<ReplicaId, ViewChange<O>>>,
    gc_lock: RwLock<()>,
    buffer: Mutex<VecDeque<Request<O>>>,
    in_flight: DashMap<RequestKey, TicketKey>,
}

impl<O, R> MessageLog<O, R>
where
    O: Clone,
    R: Clone,
{
    pub fn new(config: LogConfig) -> Self {
        Self {
            config,
            tickets: DashMap::new(),
            executed: DashSet::new(),
            completed: DashMap::new(),
            checkpoints: DashMap::new(),
            stable: RwLock::new(StableCheckpoint::default()),
            low_water_mark: AtomicU64::new(0),
            view_changes: DashMap::new(),
            gc_lock: RwLock::new(()),
            buffer: Mutex::new(VecDeque::new()),
            in_flight: DashMap::new(),
        }
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    // =========================================================================
    // Tickets
    // =========================================================================

    /// Fetch the ticket for `(view, seq)`, creating it if absent.
    pub fn new_ticket(&self, view: ViewNumber, seq: SeqNumber) -> Arc<Ticket<O, R>> {
        let entry = self
            .tickets
            .entry((view, seq))
            .or_insert_with(|| Arc::new(Ticket::new(view, seq)));
        Arc::clone(entry.value())
    }

    /// Ticket for a phase message, or `None` when the slot already executed.
    ///
    /// Late messages for an executed slot must not bring back a ticket that
    /// would then sit in the live table until the next stable checkpoint.
    pub fn open_ticket(&self, view: ViewNumber, seq: SeqNumber) -> Option<Arc<Ticket<O, R>>> {
        if self.is_executed(view, seq) {
            return None;
        }
        let (ticket, created) = match self.tickets.entry((view, seq)) {
            MapEntry::Occupied(entry) => (Arc::clone(entry.get()), false),
            MapEntry::Vacant(slot) => {
                let ticket = Arc::new(Ticket::new(view, seq));
                slot.insert(Arc::clone(&ticket));
                (ticket, true)
            }
        };
        // Completion marks the slot before removing its ticket, so a ticket
        // created after that removal is caught here
        if created && self.is_executed(view, seq) {
            self.tickets
                .remove_if(&(view, seq), |_, held| Arc::ptr_eq(held, &ticket));
            return None;
        }
        Some(ticket)
    }

    pub fn is_executed(&self, view: ViewNumber, seq: SeqNumber) -> bool {
        self.executed.contains(&(view, seq))
    }

    pub fn get_ticket(&self, view: ViewNumber, seq: SeqNumber) -> Option<Arc<Ticket<O, R>>> {
        self.tickets.get(&(view, seq)).map(|t| Arc::clone(t.value()))
    }

    pub fn get_ticket_from_cache(&self, key: &RequestKey) -> Option<Arc<Ticket<O, R>>> {
        self.completed.get(key).map(|t| Arc::clone(t.value()))
    }

    /// Move a committed ticket from the live table into the completed cache.
    ///
    /// Slots at or below the low watermark were already collected and are
    /// not cached again. Returns whether the ticket was cached.
    pub fn complete_ticket(&self, key: RequestKey, view: ViewNumber, seq: SeqNumber) -> bool {
        let _gc = self.gc_lock.read();
        if seq > self.low_water_mark() {
            self.executed.insert((view, seq));
        }
        let ticket = self.tickets.remove(&(view, seq)).map(|(_, t)| t);

        // Cache before releasing the in-flight entry so a retransmit never
        // finds neither
        let cached = match ticket {
            Some(ticket) if seq > self.low_water_mark() => {
                self.completed.insert(key.clone(), ticket);
                true
            }
            _ => false,
        };
        self.in_flight.remove(&key);
        cached
    }

    pub fn live_tickets(&self) -> usize {
        self.tickets.len()
    }

    pub fn cached_tickets(&self) -> usize {
        self.completed.len()
    }

    // =========================================================================
    // Admission buffer and in-flight tracking
    // =========================================================================

    pub fn should_buffer(&self) -> bool {
        self.tickets.len() >= self.config.buffer_threshold
    }

    pub fn buffer(&self, request: Request<O>) {
        self.buffer.lock().push_back(request);
    }

    pub fn pop_buffer(&self) -> Option<Request<O>> {
        self.buffer.lock().pop_front()
    }

    /// Put back a request popped from the buffer that still cannot be admitted.
    pub fn requeue_front(&self, request: Request<O>) {
        self.buffer.lock().push_front(request);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn track_in_flight(&self, key: RequestKey, view: ViewNumber, seq: SeqNumber) {
        self.in_flight.insert(key, (view, seq));
    }

    /// Assign a sequence number to `key` unless it already has one.
    ///
    /// `assign` runs at most once, while the key's shard is locked, so
    /// concurrent callers for the same request cannot both assign.
    pub fn reserve_in_flight<F>(
        &self,
        key: RequestKey,
        view: ViewNumber,
        assign: F,
    ) -> Option<SeqNumber>
    where
        F: FnOnce() -> SeqNumber,
    {
        match self.in_flight.entry(key) {
            MapEntry::Occupied(_) => None,
            MapEntry::Vacant(slot) => {
                let seq = assign();
                slot.insert((view, seq));
                Some(seq)
            }
        }
    }

    pub fn in_flight(&self, key: &RequestKey) -> bool {
        self.in_flight.contains_key(key)
    }

    // =========================================================================
    // Watermarks and checkpoints
    // =========================================================================

    pub fn low_water_mark(&self) -> SeqNumber {
        self.low_water_mark.load(Ordering::Acquire)
    }

    pub fn high_water_mark(&self) -> SeqNumber {
        self.low_water_mark()
            .saturating_add(self.config.watermark_interval)
    }

    pub fn is_between_water_marks(&self, seq: SeqNumber) -> bool {
        let low = self.low_water_mark();
        low <= seq && seq <= low.saturating_add(self.config.watermark_interval)
    }

    pub fn stable_checkpoint(&self) -> StableCheckpoint {
        self.stable.read().clone()
    }

    /// Whether executing `seq` completes a checkpoint interval.
    pub fn is_checkpoint_seq(&self, seq: SeqNumber) -> bool {
        seq > 0 && seq % self.config.checkpoint_interval == 0
    }

    /// Record a checkpoint vote.
    ///
    /// Returns the sequence number if this vote made it stable.
    pub fn append_checkpoint(&self, checkpoint: Checkpoint, f: usize) -> Option<SeqNumber> {
        let seq = checkpoint.last_seq;
        if seq <= self.low_water_mark() {
            return None;
        }

        let proofs: Vec<Checkpoint> = {
            let mut votes = self.checkpoints.entry(seq).or_default();
            votes.entry(checkpoint.replica_id).or_insert(checkpoint);
            let digests = votes.values().map(|c| &c.state_digest);
            let agreed = matching_value(digests, stable_quorum(f))?.clone();
            votes
                .values()
                .filter(|c| c.state_digest == agreed)
                .cloned()
                .collect()
        };

        if self.advance_stable(seq, proofs) {
            Some(seq)
        } else {
            None
        }
    }

    /// Make `seq` the stable checkpoint and collect everything at or below it.
    fn advance_stable(&self, seq: SeqNumber, proofs: Vec<Checkpoint>) -> bool {
        let _gc = self.gc_lock.write();
        if seq <= self.low_water_mark() {
            return false;
        }

        self.low_water_mark.store(seq, Ordering::Release);
        *self.stable.write() = StableCheckpoint { seq, proofs };

        self.completed.retain(|_, t| t.seq() > seq);
        self.checkpoints.retain(|s, _| *s > seq);
        self.tickets.retain(|(_, s), _| *s > seq);
        self.executed.retain(|(_, s)| *s > seq);
        self.in_flight.retain(|_, (_, s)| *s > seq);

        info!(
            stable_seq = seq,
            high_water_mark = seq.saturating_add(self.config.watermark_interval),
            "Checkpoint became stable"
        );
        true
    }

    // =========================================================================
    // View change
    // =========================================================================

    /// Build this replica's VIEW-CHANGE vote for `new_view` and record it.
    pub fn produce_view_change(
        &self,
        new_view: ViewNumber,
        replica_id: ReplicaId,
        f: usize,
    ) -> ViewChange<O> {
        let vote = {
            let _gc = self.gc_lock.read();
            let stable = self.stable_checkpoint();

            let candidates: Vec<Arc<Ticket<O, R>>> = self
                .tickets
                .iter()
                .map(|e| Arc::clone(e.value()))
                .chain(self.completed.iter().map(|e| Arc::clone(e.value())))
                .filter(|t| t.seq() > stable.seq)
                .collect();

            let mut prepared: BTreeMap<SeqNumber, (ViewNumber, Vec<PhaseMessage<O>>)> =
                BTreeMap::new();
            for ticket in candidates {
                let Some(proof) = ticket.prepared_proof(f) else {
                    continue;
                };
                let replace = prepared
                    .get(&ticket.seq())
                    .map_or(true, |(view, _)| ticket.view() > *view);
                if replace {
                    prepared.insert(ticket.seq(), (ticket.view(), proof));
                }
            }

            ViewChange {
                new_view,
                last_stable_seq: stable.seq,
                checkpoint_proofs: stable.proofs,
                prepared_proofs: prepared
                    .into_iter()
                    .map(|(seq, (_, proof))| (seq, proof))
                    .collect(),
                replica_id,
            }
        };

        self.view_changes
            .entry(new_view)
            .or_default()
            .entry(replica_id)
            .or_insert_with(|| vote.clone());

        debug!(
            new_view = new_view,
            last_stable_seq = vote.last_stable_seq,
            prepared = vote.prepared_proofs.len(),
            "Produced view change"
        );
        vote
    }

    /// Whether `vote` carries well-formed checkpoint and prepared proofs
    /// within one watermark window of its stable checkpoint.
    pub fn is_valid_view_change(&self, vote: &ViewChange<O>, f: usize) -> bool {
        is_valid_view_change(vote, f, self.config.watermark_interval)
    }

    /// Record a VIEW-CHANGE vote from another replica.
    ///
    /// Votes with malformed certificates are not recorded.
    pub fn accept_view_change(
        &self,
        vote: ViewChange<O>,
        self_id: ReplicaId,
        current_view: ViewNumber,
        f: usize,
    ) -> ViewChangeResult {
        let target = vote.new_view;
        if target <= current_view || !self.is_valid_view_change(&vote, f) {
            return ViewChangeResult::default();
        }

        let begin_next_timer = {
            let mut votes = self.view_changes.entry(target).or_default();
            let fresh = match votes.entry(vote.replica_id) {
                Entry::Vacant(slot) => {
                    slot.insert(vote);
                    true
                }
                Entry::Occupied(_) => false,
            };
            fresh && votes.len() == commit_quorum(f)
        };

        let mut result = ViewChangeResult {
            begin_next_timer,
            ..ViewChangeResult::default()
        };
        if let Some(view) = bandwagon_target(self.vote_pairs(), self_id, current_view, f) {
            if !self.has_voted(view, self_id) {
                result.should_bandwagon = true;
                result.bandwagon_view = view;
            }
        }
        result
    }

    fn vote_pairs(&self) -> Vec<(ViewNumber, ReplicaId)> {
        self.view_changes
            .iter()
            .flat_map(|entry| {
                let view = *entry.key();
                entry
                    .value()
                    .keys()
                    .map(|id| (view, *id))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn has_voted(&self, view: ViewNumber, replica_id: ReplicaId) -> bool {
        self.view_changes
            .get(&view)
            .map_or(false, |votes| votes.contains_key(&replica_id))
    }

    pub fn vote_count(&self, view: ViewNumber) -> usize {
        self.view_changes.get(&view).map_or(0, |votes| votes.len())
    }

    /// Assemble NEW-VIEW once `2f` replicas other than `replica_id` voted
    /// for `new_view`. The new primary's own vote is added if missing.
    pub fn produce_new_view(
        &self,
        new_view: ViewNumber,
        replica_id: ReplicaId,
        f: usize,
    ) -> Option<NewView<O>> {
        let others = self.view_changes.get(&new_view).map_or(0, |votes| {
            votes.keys().filter(|id| **id != replica_id).count()
        });
        if others < new_view_quorum(f) {
            return None;
        }

        if !self.has_voted(new_view, replica_id) {
            self.produce_view_change(new_view, replica_id, f);
        }

        let mut votes: Vec<ViewChange<O>> = self
            .view_changes
            .get(&new_view)
            .map(|votes| votes.values().cloned().collect())
            .unwrap_or_default();
        votes.sort_by_key(|vc| vc.replica_id);

        let prepared_proofs =
            reissue_pre_prepares(&votes, new_view, self.config.watermark_interval);
        if let Some(lowest) = lowest_stable(&votes) {
            self.advance_stable(lowest.last_stable_seq, lowest.checkpoint_proofs.clone());
        }

        info!(
            new_view = new_view,
            votes = votes.len(),
            reissued = prepared_proofs.len(),
            "Produced new view"
        );
        Some(NewView {
            new_view,
            view_change_proofs: votes,
            prepared_proofs,
        })
    }

    /// Validate a NEW-VIEW and adopt its checkpoint.
    ///
    /// Valid when every vote targets the announced view and carries
    /// well-formed certificates, the votes come from `2f + 1` distinct
    /// replicas, and the re-issued PRE-PREPAREs are exactly those the votes
    /// imply.
    pub fn accept_new_view(&self, new_view: &NewView<O>, f: usize) -> bool
    where
        O: PartialEq,
    {
        let target = new_view.new_view;
        if new_view
            .view_change_proofs
            .iter()
            .any(|vc| vc.new_view != target || !self.is_valid_view_change(vc, f))
        {
            return false;
        }

        let voters: HashSet<ReplicaId> = new_view
            .view_change_proofs
            .iter()
            .map(|vc| vc.replica_id)
            .collect();
        if voters.len() < commit_quorum(f) {
            return false;
        }

        let expected = reissue_pre_prepares(
            &new_view.view_change_proofs,
            target,
            self.config.watermark_interval,
        );
        if expected != new_view.prepared_proofs {
            return false;
        }

        if let Some(lowest) = lowest_stable(&new_view.view_change_proofs) {
            self.advance_stable(lowest.last_stable_seq, lowest.checkpoint_proofs.clone());
        }
        self.view_changes.retain(|view, _| *view > target);
        true
    }

    /// Discard state belonging to views older than `view`.
    pub fn enter_view(&self, view: ViewNumber) {
        self.tickets.retain(|(v, _), _| *v >= view);
        self.executed.retain(|(v, _)| *v >= view);
        self.in_flight.retain(|_, (v, _)| *v >= view);
        self.view_changes.retain(|v, _| *v > view);
    }
}
