//! # PBFT Test Suite
//!
//! Cross-crate tests for the replica and client.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── harness.rs        # Simulated four-replica cluster
//! └── integration/      # End-to-end scenarios
//!
//! tests/benches/
//! └── replica_benchmarks.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p pbft-tests
//! cargo bench -p pbft-tests
//! ```

pub mod harness;
pub mod integration;
