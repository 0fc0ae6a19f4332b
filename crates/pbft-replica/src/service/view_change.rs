//! Timeouts, VIEW-CHANGE and NEW-VIEW handling.
//!
//! A replica that waits too long on a request becomes *disgruntled*: it
//! stops taking part in the three-phase protocol and votes for the next
//! view. If that view does not start in time it votes one view further,
//! waiting one more request timeout per view skipped.

use super::{Op, Replica, VoteState};
use crate::domain::{
    backoff_wait, deadline_after, NewView, PhaseMessage, Prepare, PrePrepareOutcome, ViewChange,
};
use crate::error::{RejectReason, ReplicaResult};
use crate::metrics;
use crate::ports::{Digester, Encoder, StateMachine, Transport};
use pbft_types::{RequestKey, ViewNumber};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{debug, info};

impl<M, D, E, T> Replica<M, D, E, T>
where
    M: StateMachine,
    D: Digester<Op<M>>,
    E: Encoder<Op<M>, M::Output>,
    T: Transport,
{
    pub(super) fn on_check_timeout(&self, key: &RequestKey) -> ReplicaResult<Option<Duration>> {
        let Some(timer) = self.timers.get(key) else {
            return Ok(None);
        };
        let now = self.now_ms();
        if !timer.is_expired(now) {
            return Ok(Some(Duration::from_millis(timer.remaining_ms(now))));
        }

        let target = {
            let mut vote = self.vote.lock();

            // Still waiting on an earlier vote: follow its deadline
            if let Some(deadline) = vote.deadline_ms.filter(|d| now < *d) {
                self.timers.rearm(key, deadline);
                return Ok(Some(Duration::from_millis(deadline - now)));
            }

            let current = self.view();
            let target = match vote.voted_view {
                Some(voted) if voted > current => voted + 1,
                _ => current + 1,
            };
            let wait = backoff_wait(self.config.request_timeout_ms, current, target);
            let deadline = deadline_after(now, wait);
            vote.voted_view = Some(target);
            vote.deadline_ms = Some(deadline);
            self.disgruntled.store(true, Ordering::Release);
            self.timers.rearm(key, deadline);

            info!(
                replica = self.replica_id(),
                view = current,
                target = target,
                request = %key,
                wait_ms = wait,
                "Request timed out, voting for view change"
            );
            target
        };

        self.cast_vote(target)?;
        self.try_produce_new_view(target)?;
        Ok(self
            .timers
            .get(key)
            .map(|t| Duration::from_millis(t.remaining_ms(now))))
    }

    /// Produce, record and multicast this replica's VIEW-CHANGE vote.
    fn cast_vote(&self, target: ViewNumber) -> ReplicaResult<()> {
        let vote = self
            .log
            .produce_view_change(target, self.replica_id(), self.tolerance());
        let data = self.encoder.encode_view_change(&vote)?;
        self.multicast("view-change", data);
        metrics::record_view_change_started();
        Ok(())
    }

    pub(super) fn on_view_change(&self, message: ViewChange<Op<M>>) -> ReplicaResult<()> {
        let current = self.view();
        let new_view = message.new_view;
        if new_view <= current {
            self.reject(RejectReason::StaleViewChange, "view-change", new_view, 0);
            return Ok(());
        }
        if !self.log.is_valid_view_change(&message, self.tolerance()) {
            self.reject(RejectReason::InvalidViewChange, "view-change", new_view, 0);
            return Ok(());
        }

        let result =
            self.log
                .accept_view_change(message, self.replica_id(), current, self.tolerance());

        if result.should_bandwagon {
            let target = result.bandwagon_view;
            let join = {
                let mut vote = self.vote.lock();
                let join = vote.voted_view.map_or(true, |voted| target > voted);
                if join {
                    let wait = backoff_wait(self.config.request_timeout_ms, current, target);
                    vote.voted_view = Some(target);
                    vote.deadline_ms = Some(deadline_after(self.now_ms(), wait));
                    self.disgruntled.store(true, Ordering::Release);
                }
                join
            };
            if join {
                info!(
                    replica = self.replica_id(),
                    view = current,
                    target = target,
                    "Joining view change"
                );
                self.cast_vote(target)?;
                self.try_produce_new_view(target)?;
            }
        }

        if result.begin_next_timer {
            let mut vote = self.vote.lock();
            let wait = backoff_wait(self.config.request_timeout_ms, current, new_view + 1);
            let deadline = deadline_after(self.now_ms(), wait);
            vote.voted_view = Some(vote.voted_view.map_or(new_view, |v| v.max(new_view)));
            vote.deadline_ms = Some(deadline);
            self.timers.rearm_all(deadline);
            debug!(
                replica = self.replica_id(),
                new_view = new_view,
                deadline_ms = deadline,
                "View change quorum reached, waiting for new view"
            );
        }

        self.try_produce_new_view(new_view)
    }

    /// As primary of `new_view`, announce NEW-VIEW once enough votes exist.
    fn try_produce_new_view(&self, new_view: ViewNumber) -> ReplicaResult<()> {
        if self.primary_of(new_view) != self.replica_id() {
            return Ok(());
        }

        let new_view_message = {
            let mut vote = self.vote.lock();
            if self.view() >= new_view {
                return Ok(());
            }
            let Some(message) =
                self.log
                    .produce_new_view(new_view, self.replica_id(), self.tolerance())
            else {
                return Ok(());
            };

            self.fast_forward_sequence(&message);
            self.enter_view(&mut vote, new_view);
            message
        };

        let data = self.encoder.encode_new_view(&new_view_message)?;
        self.multicast("new-view", data);

        for pre_prepare in new_view_message
            .prepared_proofs
            .into_iter()
            .filter(|pp| !pp.is_noop())
        {
            self.log
                .track_in_flight(pre_prepare.request.key(), new_view, pre_prepare.seq);
            let ticket = self.log.new_ticket(new_view, pre_prepare.seq);
            ticket.append_pre_prepare(pre_prepare);
            self.try_advance(&ticket)?;
        }
        self.drain_buffer(usize::MAX)
    }

    pub(super) fn on_new_view(&self, message: NewView<Op<M>>) -> ReplicaResult<()> {
        let new_view = message.new_view;
        {
            let mut vote = self.vote.lock();
            if new_view <= self.view() {
                self.reject(RejectReason::ViewMismatch, "new-view", new_view, 0);
                return Ok(());
            }
            if !self.log.accept_new_view(&message, self.tolerance()) {
                self.reject(RejectReason::InvalidNewView, "new-view", new_view, 0);
                return Ok(());
            }
            self.fast_forward_sequence(&message);
            self.enter_view(&mut vote, new_view);
        }

        let is_primary = self.primary_of(new_view) == self.replica_id();
        for pre_prepare in message.prepared_proofs {
            if pre_prepare.is_noop() {
                continue;
            }
            let seq = pre_prepare.seq;
            if self.digester.digest(&pre_prepare.request) != pre_prepare.digest {
                self.reject(RejectReason::DigestMismatch, "new-view", new_view, seq);
                continue;
            }
            if !self.log.is_between_water_marks(seq) {
                self.reject(RejectReason::OutsideWatermarks, "new-view", new_view, seq);
                continue;
            }

            let digest = pre_prepare.digest.clone();
            let ticket = self.log.new_ticket(new_view, seq);
            if ticket.append_pre_prepare(pre_prepare) == PrePrepareOutcome::Conflicting {
                self.reject(RejectReason::ConflictingPrePrepare, "new-view", new_view, seq);
                continue;
            }

            if !is_primary {
                let prepare = Prepare {
                    view: new_view,
                    seq,
                    digest,
                    replica_id: self.replica_id(),
                };
                let data = self.encoder.encode_prepare(&prepare)?;
                self.multicast("prepare", data);
                ticket.append(PhaseMessage::Prepare(prepare));
            }
            self.try_advance(&ticket)?;
        }
        Ok(())
    }

    /// Never reuse a sequence number the new view re-issues.
    ///
    /// Only the re-issued range counts; it never reaches past one watermark
    /// window, so the counter stays inside the window.
    fn fast_forward_sequence(&self, message: &NewView<Op<M>>) {
        let reissued = message
            .prepared_proofs
            .iter()
            .map(|pp| pp.seq)
            .max()
            .unwrap_or(0);
        let floor = reissued.max(self.log.low_water_mark());
        self.seq_counter.fetch_max(floor, Ordering::AcqRel);
    }

    /// Switch to `view`. Caller holds the vote lock.
    fn enter_view(&self, vote: &mut VoteState, view: ViewNumber) {
        let previous = self.view.swap(view, Ordering::AcqRel);
        self.disgruntled.store(false, Ordering::Release);
        self.timers.clear();
        *vote = VoteState::default();
        self.log.enter_view(view);

        metrics::record_view_entered(view);
        info!(
            replica = self.replica_id(),
            from = previous,
            view = view,
            primary = self.primary_of(view),
            "Entered view"
        );
    }
}
