//! Shared building blocks for the sdrelay worker.
//!
//! Holds the task id cipher, the callback envelope types, and the
//! [`EnvelopeSink`](sink::EnvelopeSink) seam that the job pipeline writes
//! results through. This crate has no internal dependencies.

pub mod crypto;
pub mod envelope;
pub mod sink;
