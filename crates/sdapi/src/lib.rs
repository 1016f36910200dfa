//! Stable Diffusion web API client.
//!
//! [`api::SdApi`] issues the job call and the progress poll over HTTP.
//! [`api::SdBackend`] is the seam the worker pipeline is written against.

pub mod api;
pub mod progress;
