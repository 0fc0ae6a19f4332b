//! Adapters layer (Hexagonal Architecture)
//!
//! Reference implementations of the outbound ports plus the async timer
//! loop driving [`crate::ports::ReplicaApi::poll_timeouts`].

mod clock;
mod codec;
mod digest;
mod memory;
mod timer_loop;

pub use clock::*;
pub use codec::*;
pub use digest::*;
pub use memory::*;
pub use timer_loop::*;
