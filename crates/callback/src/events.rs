//! Lifecycle events emitted by the channel manager.
//!
//! Published on a [`tokio::sync::broadcast`] channel; subscribe with
//! [`ChannelManager::subscribe`](crate::manager::ChannelManager::subscribe).

use std::fmt;

/// A state change on the callback channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A new connection was established.
    Connected { connection_id: String },

    /// A keepalive ping arrived; the pong has been queued and the read
    /// deadline extended.
    PingReceived {
        connection_id: String,
        payload: Vec<u8>,
    },

    /// The listener sent a close frame.
    CloseReceived {
        connection_id: String,
        /// Close code from the listener's frame, if it carried one.
        code: Option<u16>,
    },

    /// The connection was torn down; the channel is absent again.
    Disconnected {
        connection_id: String,
        reason: DisconnectReason,
    },
}

/// Why a connection was torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The listener closed the connection with a close frame.
    ClosedByPeer,
    /// No ping arrived within the read timeout.
    ReadTimeout,
    /// Reading from the socket failed.
    ReadError(String),
    /// The stream ended without a close frame.
    StreamEnded,
    /// Writing an envelope failed.
    WriteError(String),
    /// The worker is shutting down.
    Shutdown,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClosedByPeer => f.write_str("closed by peer"),
            Self::ReadTimeout => f.write_str("read timeout"),
            Self::ReadError(e) => write!(f, "read error: {e}"),
            Self::StreamEnded => f.write_str("stream ended"),
            Self::WriteError(e) => write!(f, "write error: {e}"),
            Self::Shutdown => f.write_str("shutdown"),
        }
    }
}
