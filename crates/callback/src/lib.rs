//! Callback channel to the main server.
//!
//! Provides the WebSocket client, envelope frame encoding, the reader
//! task that services control frames, and [`manager::ChannelManager`],
//! which owns the one persistent connection results are streamed over.

pub mod client;
pub mod events;
pub mod frame;
pub mod manager;
mod reader;
