//! # Integration Scenarios
//!
//! Replicas and client exercised together through [`crate::harness`].

pub mod scenarios;
