//! Domain layer for the replica
//!
//! - messages: the protocol message kinds
//! - ticket: per-slot agreement state
//! - message_log: tickets, checkpoints, watermarks, view-change votes
//! - view_change: pure NEW-VIEW assembly helpers
//! - timer: per-request deadlines and backoff
//! - admission: what to do with an incoming request

mod admission;
mod message_log;
mod messages;
mod ticket;
mod timer;
mod view_change;

pub use admission::*;
pub use message_log::*;
pub use messages::*;
pub use ticket::*;
pub use timer::*;
pub use view_change::*;
