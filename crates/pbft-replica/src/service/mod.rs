//! Replica Service - Core protocol logic
//!
//! # Architecture
//! - Admission control in front of the three-phase protocol
//! - Phase transitions guarded by ticket compare-and-set, so COMMIT
//!   multicast and reply happen exactly once per slot
//! - Timeout-driven view changes (see `view_change.rs`)
//!
//! Every entry point takes `&self`; the replica is shared across threads
//! behind an `Arc`.

mod view_change;

use crate::config::ReplicaConfig;
use crate::domain::{
    deadline_after, decide, Admission, AdmissionInput, Checkpoint, Commit, LogConfig, MessageLog,
    NewView, PhaseMessage, PrePrepare, PrePrepareOutcome, Prepare, ReplicaMessage, Ticket,
    TicketPhase, TimerTable, ViewChange,
};
use crate::error::{RejectReason, ReplicaError, ReplicaResult};
use crate::metrics;
use crate::ports::{
    Digester, Encoder, ReplicaApi, StateMachine, SystemTimeSource, TimeSource, Transport,
};
use parking_lot::Mutex;
use pbft_types::{primary_of, ReplicaId, Reply, Request, RequestKey, SeqNumber, ViewNumber};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type Op<M> = <M as StateMachine>::Operation;
type Out<M> = <M as StateMachine>::Output;

/// View-change vote state. Held under one mutex so that voting, entering
/// a view and producing NEW-VIEW never interleave.
#[derive(Debug, Default)]
struct VoteState {
    /// Highest view this replica has voted for (or is waiting on)
    voted_view: Option<ViewNumber>,
    /// When to give up on `voted_view` and vote one view further
    deadline_ms: Option<u64>,
}

/// PBFT replica
pub struct Replica<M, D, E, T>
where
    M: StateMachine,
    D: Digester<Op<M>>,
    E: Encoder<Op<M>, Out<M>>,
    T: Transport,
{
    state_machine: Arc<M>,
    digester: Arc<D>,
    encoder: Arc<E>,
    transport: Arc<T>,
    config: ReplicaConfig,
    log: MessageLog<Op<M>, Out<M>>,
    view: AtomicU32,
    disgruntled: AtomicBool,
    /// Last assigned sequence number
    seq_counter: AtomicU64,
    timers: TimerTable,
    vote: Mutex<VoteState>,
    time_source: Box<dyn TimeSource>,
}

/// Dependencies for Replica
pub struct ReplicaDependencies<M, D, E, T> {
    pub state_machine: Arc<M>,
    pub digester: Arc<D>,
    pub encoder: Arc<E>,
    pub transport: Arc<T>,
    pub config: ReplicaConfig,
}

impl<M, D, E, T> Replica<M, D, E, T>
where
    M: StateMachine,
    D: Digester<Op<M>>,
    E: Encoder<Op<M>, Out<M>>,
    T: Transport,
{
    /// Create a replica in view 0
    pub fn new(deps: ReplicaDependencies<M, D, E, T>) -> ReplicaResult<Self> {
        deps.config.validate()?;
        Ok(Self {
            state_machine: deps.state_machine,
            digester: deps.digester,
            encoder: deps.encoder,
            transport: deps.transport,
            log: MessageLog::new(LogConfig::from(&deps.config)),
            config: deps.config,
            view: AtomicU32::new(0),
            disgruntled: AtomicBool::new(false),
            seq_counter: AtomicU64::new(0),
            timers: TimerTable::new(),
            vote: Mutex::new(VoteState::default()),
            time_source: Box::new(SystemTimeSource),
        })
    }

    /// Set custom time source (for testing)
    pub fn with_time_source(mut self, time_source: Box<dyn TimeSource>) -> Self {
        self.time_source = time_source;
        self
    }

    // === ACCESSORS ===

    pub fn replica_id(&self) -> ReplicaId {
        self.config.replica_id
    }

    pub fn view(&self) -> ViewNumber {
        self.view.load(Ordering::Acquire)
    }

    pub fn is_disgruntled(&self) -> bool {
        self.disgruntled.load(Ordering::Acquire)
    }

    pub fn primary(&self) -> ReplicaId {
        self.primary_of(self.view())
    }

    pub fn is_primary(&self) -> bool {
        self.primary() == self.replica_id()
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    pub fn log(&self) -> &MessageLog<Op<M>, Out<M>> {
        &self.log
    }

    pub fn timers(&self) -> &TimerTable {
        &self.timers
    }

    /// Last sequence number this replica assigned or adopted
    pub fn last_seq(&self) -> SeqNumber {
        self.seq_counter.load(Ordering::Acquire)
    }

    fn primary_of(&self, view: ViewNumber) -> ReplicaId {
        primary_of(view, self.transport.count_known_replicas())
    }

    fn tolerance(&self) -> usize {
        self.config.tolerance
    }

    fn now_ms(&self) -> u64 {
        self.time_source.now_ms()
    }

    /// Decode-side entry point: route a message to its handler.
    pub fn handle(&self, message: ReplicaMessage<Op<M>>) -> ReplicaResult<()> {
        match message {
            ReplicaMessage::Request(m) => self.recv_request(m),
            ReplicaMessage::PrePrepare(m) => self.recv_pre_prepare(m),
            ReplicaMessage::Prepare(m) => self.recv_prepare(m),
            ReplicaMessage::Commit(m) => self.recv_commit(m),
            ReplicaMessage::Checkpoint(m) => self.recv_checkpoint(m),
            ReplicaMessage::ViewChange(m) => self.recv_view_change(m),
            ReplicaMessage::NewView(m) => self.recv_new_view(m),
        }
    }

    // === SENDING ===

    fn multicast(&self, kind: &'static str, data: Vec<u8>) {
        if let Err(e) = self.transport.multicast(data, &[self.replica_id()]) {
            warn!(kind = kind, error = %e, "Multicast failed");
        }
    }

    fn send_to(&self, kind: &'static str, replica_id: ReplicaId, data: Vec<u8>) {
        if let Err(e) = self.transport.send_message(replica_id, data) {
            warn!(kind = kind, target = replica_id, error = %e, "Send failed");
        }
    }

    fn send_reply(&self, request: &Request<Op<M>>, result: Out<M>) -> ReplicaResult<()> {
        let reply = Reply {
            view: self.view(),
            timestamp: request.timestamp,
            client_id: request.client_id.clone(),
            replica_id: self.replica_id(),
            result,
        };
        let data = self.encoder.encode_reply(&reply)?;
        if let Err(e) = self.transport.send_reply(&request.client_id, data) {
            warn!(client = %request.client_id, error = %e, "Reply failed");
        }
        Ok(())
    }

    fn reject(&self, reason: RejectReason, kind: &'static str, view: ViewNumber, seq: SeqNumber) {
        debug!(
            replica = self.replica_id(),
            kind = kind,
            view = view,
            seq = seq,
            reason = reason.as_str(),
            "Dropped message"
        );
        metrics::record_message_dropped(reason.as_str());
    }

    /// Validity checks shared by every three-phase message.
    fn check_phase_message(
        &self,
        kind: &'static str,
        view: ViewNumber,
        seq: SeqNumber,
    ) -> Result<(), RejectReason> {
        let reason = if self.is_disgruntled() {
            RejectReason::Disgruntled
        } else if view != self.view() {
            RejectReason::ViewMismatch
        } else if !self.log.is_between_water_marks(seq) {
            RejectReason::OutsideWatermarks
        } else {
            return Ok(());
        };
        self.reject(reason, kind, view, seq);
        Err(reason)
    }

    /// Ticket for an incoming phase message unless its slot already executed.
    fn open_ticket(
        &self,
        kind: &'static str,
        view: ViewNumber,
        seq: SeqNumber,
    ) -> Option<Arc<Ticket<Op<M>, Out<M>>>> {
        let ticket = self.log.open_ticket(view, seq);
        if ticket.is_none() {
            self.reject(RejectReason::AlreadyExecuted, kind, view, seq);
        }
        ticket
    }

    // === ADMISSION ===

    fn admission_input(&self, key: &RequestKey, cached: bool) -> AdmissionInput {
        let next_seq = self.last_seq().saturating_add(1);
        AdmissionInput {
            disgruntled: self.is_disgruntled(),
            in_flight: self.log.in_flight(key),
            cached,
            is_primary: self.is_primary(),
            log_full: self.log.should_buffer(),
            window_exhausted: next_seq > self.log.high_water_mark(),
        }
    }

    fn start_timer(&self, key: &RequestKey) {
        let deadline = deadline_after(self.now_ms(), self.config.request_timeout_ms);
        self.timers.start(key.clone(), deadline);
    }

    /// Run a request through admission control. Returns the decision taken.
    fn admit(&self, request: Request<Op<M>>, from_buffer: bool) -> ReplicaResult<Admission> {
        let key = request.key();
        let cached = self.log.get_ticket_from_cache(&key);
        let decision = decide(self.admission_input(&key, cached.is_some()));

        match decision {
            Admission::Ignore => {
                debug!(request = %key, "Ignored request");
            }
            Admission::ResendCached => {
                if let Some(result) = cached.and_then(|t| t.result()) {
                    debug!(request = %key, "Re-sending cached reply");
                    self.send_reply(&request, result)?;
                }
            }
            Admission::Forward => {
                self.start_timer(&key);
                let data = self.encoder.encode_request(&request)?;
                self.send_to("request", self.primary(), data);
            }
            Admission::Buffer => {
                self.start_timer(&key);
                if from_buffer {
                    self.log.requeue_front(request);
                } else {
                    debug!(request = %key, buffered = self.log.buffered() + 1, "Buffered request");
                    self.log.buffer(request);
                }
            }
            Admission::Accept => {
                self.start_timer(&key);
                self.order(request)?;
            }
        }
        Ok(decision)
    }

    /// Assign the next sequence number and multicast PRE-PREPARE.
    fn order(&self, request: Request<Op<M>>) -> ReplicaResult<()> {
        let view = self.view();
        let Some(seq) = self.log.reserve_in_flight(request.key(), view, || {
            self.seq_counter.fetch_add(1, Ordering::AcqRel) + 1
        }) else {
            return Ok(());
        };

        let digest = self.digester.digest(&request);
        let ticket = self.log.new_ticket(view, seq);
        ticket.attach_request(request.clone());

        let pre_prepare = PrePrepare {
            view,
            seq,
            digest,
            request,
        };
        let data = self.encoder.encode_pre_prepare(&pre_prepare)?;
        self.multicast("pre-prepare", data);
        ticket.append_pre_prepare(pre_prepare);

        debug!(replica = self.replica_id(), view = view, seq = seq, "Ordered request");
        self.try_advance(&ticket)
    }

    /// Admit up to `limit` buffered requests, stopping at the first that
    /// must stay buffered.
    fn drain_buffer(&self, limit: usize) -> ReplicaResult<()> {
        for _ in 0..limit {
            let Some(request) = self.log.pop_buffer() else {
                break;
            };
            if self.admit(request, true)? == Admission::Buffer {
                break;
            }
        }
        Ok(())
    }

    // === PHASES ===

    /// Advance the ticket as far as its messages allow.
    fn try_advance(&self, ticket: &Ticket<Op<M>, Out<M>>) -> ReplicaResult<()> {
        let f = self.tolerance();

        if ticket.phase() == TicketPhase::PrePrepare
            && ticket.is_prepared(f)
            && ticket.try_advance(TicketPhase::PrePrepare, TicketPhase::Prepare)
        {
            if let Some(digest) = ticket.digest() {
                let commit = Commit {
                    view: ticket.view(),
                    seq: ticket.seq(),
                    digest,
                    replica_id: self.replica_id(),
                };
                let data = self.encoder.encode_commit(&commit)?;
                self.multicast("commit", data);
                ticket.append(PhaseMessage::Commit(commit));
            }
        }

        if ticket.phase() == TicketPhase::Prepare
            && ticket.is_committed_local(f)
            && ticket.try_advance(TicketPhase::Prepare, TicketPhase::Commit)
        {
            self.execute(ticket)?;
        }
        Ok(())
    }

    /// Run a committed ticket: compute, reply, cache, checkpoint.
    fn execute(&self, ticket: &Ticket<Op<M>, Out<M>>) -> ReplicaResult<()> {
        let (view, seq) = (ticket.view(), ticket.seq());
        let noop = ticket.pre_prepare().map_or(true, |pp| pp.is_noop());

        if !noop {
            let request = ticket
                .request()
                .ok_or(ReplicaError::MissingRequest { view, seq })?;
            let key = request.key();

            if let Some(operation) = request.operation.as_ref() {
                // A request re-ordered by a view change is not applied twice
                let result = match self.log.get_ticket_from_cache(&key).and_then(|t| t.result()) {
                    Some(result) => result,
                    None => self.state_machine.compute(operation),
                };
                ticket.set_result(result.clone());
                self.send_reply(&request, result)?;
            }

            self.log.complete_ticket(key.clone(), view, seq);
            self.timers.cancel(&key);
            metrics::record_request_committed();
            debug!(
                replica = self.replica_id(),
                view = view,
                seq = seq,
                request = %key,
                "Executed request"
            );

            self.drain_buffer(1)?;
        }

        if self.log.is_checkpoint_seq(seq) {
            self.emit_checkpoint(seq)?;
        }
        Ok(())
    }

    fn emit_checkpoint(&self, seq: SeqNumber) -> ReplicaResult<()> {
        let checkpoint = Checkpoint {
            last_seq: seq,
            state_digest: self.state_machine.state_digest(),
            replica_id: self.replica_id(),
        };
        let data = self.encoder.encode_checkpoint(&checkpoint)?;
        self.multicast("checkpoint", data);
        self.record_checkpoint(checkpoint)
    }

    fn record_checkpoint(&self, checkpoint: Checkpoint) -> ReplicaResult<()> {
        if self
            .log
            .append_checkpoint(checkpoint, self.tolerance())
            .is_some()
        {
            metrics::record_checkpoint_stable();
            self.drain_buffer(usize::MAX)?;
        }
        Ok(())
    }
}

impl<M, D, E, T> ReplicaApi for Replica<M, D, E, T>
where
    M: StateMachine,
    D: Digester<Op<M>>,
    E: Encoder<Op<M>, Out<M>>,
    T: Transport,
{
    type Operation = Op<M>;

    fn recv_request(&self, request: Request<Op<M>>) -> ReplicaResult<()> {
        metrics::record_request_received();
        self.admit(request, false).map(|_| ())
    }

    fn recv_pre_prepare(&self, message: PrePrepare<Op<M>>) -> ReplicaResult<()> {
        let (view, seq) = (message.view, message.seq);
        if self.check_phase_message("pre-prepare", view, seq).is_err() {
            return Ok(());
        }
        // The primary never receives its own PRE-PREPARE
        if self.is_primary() {
            self.reject(RejectReason::NotPrimary, "pre-prepare", view, seq);
            return Ok(());
        }
        if self.digester.digest(&message.request) != message.digest {
            self.reject(RejectReason::DigestMismatch, "pre-prepare", view, seq);
            return Ok(());
        }

        let digest = message.digest.clone();
        let Some(ticket) = self.open_ticket("pre-prepare", view, seq) else {
            return Ok(());
        };
        match ticket.append_pre_prepare(message) {
            PrePrepareOutcome::Conflicting => {
                self.reject(RejectReason::ConflictingPrePrepare, "pre-prepare", view, seq);
                return Ok(());
            }
            PrePrepareOutcome::Duplicate => return self.try_advance(&ticket),
            PrePrepareOutcome::Accepted => {}
        }

        let prepare = Prepare {
            view,
            seq,
            digest,
            replica_id: self.replica_id(),
        };
        let data = self.encoder.encode_prepare(&prepare)?;
        self.multicast("prepare", data);
        ticket.append(PhaseMessage::Prepare(prepare));
        self.try_advance(&ticket)
    }

    fn recv_prepare(&self, message: Prepare) -> ReplicaResult<()> {
        if self
            .check_phase_message("prepare", message.view, message.seq)
            .is_err()
        {
            return Ok(());
        }
        let Some(ticket) = self.open_ticket("prepare", message.view, message.seq) else {
            return Ok(());
        };
        ticket.append(PhaseMessage::Prepare(message));
        self.try_advance(&ticket)
    }

    fn recv_commit(&self, message: Commit) -> ReplicaResult<()> {
        if self
            .check_phase_message("commit", message.view, message.seq)
            .is_err()
        {
            return Ok(());
        }
        let Some(ticket) = self.open_ticket("commit", message.view, message.seq) else {
            return Ok(());
        };
        ticket.append(PhaseMessage::Commit(message));
        self.try_advance(&ticket)
    }

    fn recv_checkpoint(&self, message: Checkpoint) -> ReplicaResult<()> {
        if message.last_seq <= self.log.low_water_mark() {
            self.reject(
                RejectReason::StaleCheckpoint,
                "checkpoint",
                self.view(),
                message.last_seq,
            );
            return Ok(());
        }
        self.record_checkpoint(message)
    }

    fn recv_view_change(&self, message: ViewChange<Op<M>>) -> ReplicaResult<()> {
        self.on_view_change(message)
    }

    fn recv_new_view(&self, message: NewView<Op<M>>) -> ReplicaResult<()> {
        self.on_new_view(message)
    }

    fn check_timeout(&self, key: &RequestKey) -> ReplicaResult<Option<Duration>> {
        self.on_check_timeout(key)
    }

    fn poll_timeouts(&self) -> ReplicaResult<Option<Duration>> {
        for key in self.timers.expired(self.now_ms()) {
            self.on_check_timeout(&key)?;
        }
        let now = self.now_ms();
        Ok(self
            .timers
            .next_deadline()
            .map(|deadline| Duration::from_millis(deadline.saturating_sub(now))))
    }
}
