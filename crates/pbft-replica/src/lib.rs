//! # PBFT Replica
//!
//! Replica-side core of Practical Byzantine Fault Tolerant state machine
//! replication. A group of `3f + 1` replicas agrees on a total order of
//! client operations while up to `f` of them behave arbitrarily.
//!
//! ## Protocol
//!
//! ```text
//! REQUEST ──► primary assigns seq ──► PRE-PREPARE ──► backups PREPARE
//!                                                         │
//!        reply ◄── execute ◄── committed-local ◄── COMMIT ◄┘ (prepared)
//! ```
//!
//! - Every `checkpoint_interval` sequence numbers replicas exchange
//!   CHECKPOINTs; `2f + 1` matching ones make it stable, collect the log
//!   below it and slide the `[low, high]` watermark window.
//! - A request that does not commit within the request timeout makes the
//!   replica *disgruntled*: it votes VIEW-CHANGE for the next view. The
//!   primary of that view announces NEW-VIEW once it holds `2f` other votes,
//!   re-issuing every request any vote proved prepared.
//!
//! ## Architecture
//!
//! - `domain`: tickets, the message log, view-change helpers, timers,
//!   admission control
//! - `ports`: [`ReplicaApi`] (inbound) and the outbound collaborators
//!   ([`StateMachine`], [`Digester`], [`Encoder`], [`Transport`],
//!   [`TimeSource`])
//! - `service`: [`Replica`], the orchestrator
//! - `adapters`: bincode codec, digesters, in-memory transport, manual
//!   clock, async timeout loop
//!
//! ## Usage
//!
//! ```ignore
//! let replica = Arc::new(Replica::new(ReplicaDependencies {
//!     state_machine: Arc::new(MyService::default()),
//!     digester: Arc::new(Sha256Digester),
//!     encoder: Arc::new(BincodeEncoder::new()),
//!     transport: Arc::new(my_transport),
//!     config: ReplicaConfig::from_env(),
//! })?);
//!
//! // For every datagram received
//! replica.handle(decode_message(&bytes)?)?;
//! ```

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod ports;
pub mod service;

pub use config::ReplicaConfig;
pub use domain::{
    Checkpoint, Commit, MessageLog, NewView, PhaseMessage, PrePrepare, Prepare, ReplicaMessage,
    Ticket, TicketPhase, ViewChange,
};
pub use error::{ConfigError, RejectReason, ReplicaError, ReplicaResult};
pub use ports::{
    Digester, Encoder, ReplicaApi, StateMachine, SystemTimeSource, TimeSource, Transport,
};
pub use service::{Replica, ReplicaDependencies};
