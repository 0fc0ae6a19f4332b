//! View-change certificate helpers.
//!
//! Pure functions over collected VIEW-CHANGE votes. The message log feeds
//! them its vote tables; nothing here touches shared state.

use super::messages::{PhaseMessage, PrePrepare, ViewChange};
use pbft_types::{
    bandwagon_quorum, matching_value, prepare_quorum, stable_quorum, ReplicaId, SeqNumber,
    ViewNumber,
};
use std::collections::{HashMap, HashSet};

/// What the replica should do after recording a VIEW-CHANGE vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewChangeResult {
    /// Join the other replicas by voting for `bandwagon_view`
    pub should_bandwagon: bool,
    pub bandwagon_view: ViewNumber,
    /// The vote's view just reached `2f + 1` votes; restart timers aimed
    /// one view further
    pub begin_next_timer: bool,
}

/// Smallest view beyond `current_view` that `f + 1` other replicas are
/// voting past, if they are.
///
/// `votes` lists `(view, voter)` pairs.
pub fn bandwagon_target<I>(
    votes: I,
    self_id: ReplicaId,
    current_view: ViewNumber,
    f: usize,
) -> Option<ViewNumber>
where
    I: IntoIterator<Item = (ViewNumber, ReplicaId)>,
{
    let mut voters = HashSet::new();
    let mut smallest: Option<ViewNumber> = None;
    for (view, voter) in votes {
        if voter == self_id || view <= current_view {
            continue;
        }
        voters.insert(voter);
        smallest = Some(smallest.map_or(view, |s| s.min(view)));
    }

    if voters.len() >= bandwagon_quorum(f) {
        smallest
    } else {
        None
    }
}

/// Whether a VIEW-CHANGE vote carries well-formed certificates.
///
/// A non-zero `last_stable_seq` needs `2f + 1` checkpoints from distinct
/// replicas agreeing on its state digest. Every prepared proof must lie in
/// `(last_stable_seq, last_stable_seq + watermark_interval]` and hold one
/// PRE-PREPARE from an earlier view plus `2f` PREPAREs from distinct
/// replicas matching it.
pub fn is_valid_view_change<O>(vote: &ViewChange<O>, f: usize, watermark_interval: u64) -> bool {
    let low = vote.last_stable_seq;
    if vote.checkpoint_proofs.iter().any(|c| c.last_seq != low) {
        return false;
    }
    if low > 0 {
        let mut voters = HashSet::new();
        let digests = vote
            .checkpoint_proofs
            .iter()
            .filter(|c| voters.insert(c.replica_id))
            .map(|c| &c.state_digest);
        if matching_value(digests, stable_quorum(f)).is_none() {
            return false;
        }
    }

    let high = low.saturating_add(watermark_interval);
    vote.prepared_proofs.iter().all(|(seq, proof)| {
        *seq > low && *seq <= high && is_prepared_certificate(*seq, proof, vote.new_view, f)
    })
}

/// One PRE-PREPARE for `seq` from a view before `new_view`, backed by `2f`
/// matching PREPAREs from distinct replicas. Anything else in the proof
/// invalidates it.
fn is_prepared_certificate<O>(
    seq: SeqNumber,
    proof: &[PhaseMessage<O>],
    new_view: ViewNumber,
    f: usize,
) -> bool {
    let mut pre_prepares = proof.iter().filter_map(PhaseMessage::as_pre_prepare);
    let (Some(pp), None) = (pre_prepares.next(), pre_prepares.next()) else {
        return false;
    };
    if pp.seq != seq || pp.view >= new_view || pp.is_noop() {
        return false;
    }

    let mut senders = HashSet::new();
    for message in proof {
        match message {
            PhaseMessage::PrePrepare(_) => {}
            PhaseMessage::Prepare(p)
                if p.view == pp.view && p.seq == seq && p.digest == pp.digest =>
            {
                senders.insert(p.replica_id);
            }
            _ => return false,
        }
    }
    senders.len() >= prepare_quorum(f)
}

/// The vote with the lowest stable checkpoint.
pub fn lowest_stable<'a, O, I>(votes: I) -> Option<&'a ViewChange<O>>
where
    O: 'a,
    I: IntoIterator<Item = &'a ViewChange<O>>,
{
    votes.into_iter().min_by_key(|vc| vc.last_stable_seq)
}

/// PRE-PREPAREs the new primary re-issues in `new_view`.
///
/// Every sequence number from the lowest stable checkpoint to the highest
/// proven sequence gets the PRE-PREPARE proven in the highest view, moved
/// into `new_view`, or a no-op when no vote proves anything for it. The
/// range never extends past one watermark window above the lowest stable
/// checkpoint.
pub fn reissue_pre_prepares<O: Clone>(
    votes: &[ViewChange<O>],
    new_view: ViewNumber,
    watermark_interval: u64,
) -> Vec<PrePrepare<O>> {
    let Some(min_s) = lowest_stable(votes).map(|vc| vc.last_stable_seq) else {
        return Vec::new();
    };
    let max_s = votes
        .iter()
        .map(ViewChange::max_proven_seq)
        .max()
        .unwrap_or(min_s)
        .min(min_s.saturating_add(watermark_interval));

    let mut best: HashMap<SeqNumber, &PrePrepare<O>> = HashMap::new();
    for vote in votes {
        for seq in vote.prepared_proofs.keys().filter(|s| **s <= max_s) {
            if let Some(pp) = vote.proven_pre_prepare(*seq) {
                best.entry(*seq)
                    .and_modify(|held| {
                        if pp.view > held.view {
                            *held = pp;
                        }
                    })
                    .or_insert(pp);
            }
        }
    }

    (min_s..=max_s)
        .map(|seq| match best.get(&seq) {
            Some(pp) => PrePrepare {
                view: new_view,
                seq,
                digest: pp.digest.clone(),
                request: pp.request.clone(),
            },
            None => PrePrepare::noop(new_view, seq),
        })
        .collect()
}
