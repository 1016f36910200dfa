//! Job relay worker.
//!
//! Takes queue messages describing Stable Diffusion jobs, runs each job
//! against the backend while polling its progress, and streams progress
//! and the final result to the main server over the shared callback
//! channel.
//!
//! The binary (`src/main.rs`) wires these pieces to stdin and the
//! environment; everything testable lives here.

pub mod config;
pub mod consumer;
pub mod logging;
pub mod processor;
pub mod progress;
pub mod source;
