//! # PBFT Client
//!
//! Sends each request to the replica it believes is primary and waits for
//! `f + 1` replicas to reply with the same result. A request unanswered
//! within the client timeout is multicast to every replica, which forwards
//! it to the primary or exposes a faulty one through a view change.
//!
//! The primary is re-derived from the view carried by every reply.

pub mod client;
pub mod config;
pub mod error;
pub mod ports;
pub mod ticket;

pub use client::{Client, ClientDependencies};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};
pub use ports::{ClientTransport, RequestEncoder, SystemTimeSource, TimeSource};
pub use ticket::ClientTicket;
