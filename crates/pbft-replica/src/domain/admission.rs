//! Admission control for client requests.
//!
//! Decides what happens to a REQUEST before it reaches the three-phase
//! protocol. The decision is a pure function of a snapshot of replica
//! state; the service carries it out.

/// Snapshot of the replica state relevant to one request.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdmissionInput {
    pub disgruntled: bool,
    /// A sequence number is already assigned and not yet completed
    pub in_flight: bool,
    /// A completed result exists for the request
    pub cached: bool,
    pub is_primary: bool,
    /// Live tickets have reached the buffer threshold
    pub log_full: bool,
    /// The next sequence number would fall above the high watermark
    pub window_exhausted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Drop silently
    Ignore,
    /// Re-send the cached reply without ordering again
    ResendCached,
    /// Relay to the primary
    Forward,
    /// Queue until the log drains
    Buffer,
    /// Assign a sequence number and multicast PRE-PREPARE
    Accept,
}

/// Decide the fate of a request.
///
/// Stages are checked in order; the first that applies wins.
pub fn decide(input: AdmissionInput) -> Admission {
    if input.disgruntled || input.in_flight {
        return Admission::Ignore;
    }
    if input.cached {
        return Admission::ResendCached;
    }
    if !input.is_primary {
        return Admission::Forward;
    }
    if input.log_full || input.window_exhausted {
        return Admission::Buffer;
    }
    Admission::Accept
}
