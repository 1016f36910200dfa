//! Background read loop for the callback connection.
//!
//! The listener never sends application data that the worker acts on.
//! The loop exists to drive protocol control frames: tungstenite queues
//! the pong for every ping (same payload), and it is flushed by the next
//! read or write on the connection. This loop keeps reading so that
//! happens, tracks the read deadline, and tears the connection down when
//! it ends.
//!
//! A peer close is answered with a normal-closure frame whatever code the
//! peer used. tungstenite queues an echo of the peer's frame instead; the
//! teardown writes the normal-closure frame directly to the socket and
//! drops the connection with the echo still unsent.

use std::io;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::frame::{CloseFrame, Frame};
use tokio_tungstenite::tungstenite::Message;

use crate::client::CallbackStream;
use crate::events::{ChannelEvent, DisconnectReason};
use crate::manager::SharedState;

/// Everything the reader needs to report back to its manager.
pub(crate) struct ReaderContext {
    pub(crate) state: SharedState,
    pub(crate) generation: u64,
    pub(crate) connection_id: String,
    pub(crate) read_timeout: Duration,
    pub(crate) event_tx: broadcast::Sender<ChannelEvent>,
}

/// Read until the connection closes, fails, or times out, then tear it
/// down.
///
/// Only pings extend the deadline. Data frames are discarded.
pub(crate) async fn read_control_frames(
    mut stream: SplitStream<CallbackStream>,
    ctx: ReaderContext,
) {
    let mut deadline = Instant::now() + ctx.read_timeout;

    let reason = loop {
        let next = match tokio::time::timeout_at(deadline, stream.next()).await {
            Ok(next) => next,
            Err(_) => break DisconnectReason::ReadTimeout,
        };

        match next {
            Some(Ok(Message::Ping(payload))) => {
                deadline = Instant::now() + ctx.read_timeout;
                tracing::trace!(connection_id = %ctx.connection_id, "Ping received, read deadline extended");
                let _ = ctx.event_tx.send(ChannelEvent::PingReceived {
                    connection_id: ctx.connection_id.clone(),
                    payload,
                });
            }
            Some(Ok(Message::Close(frame))) => {
                let code = frame.as_ref().map(|f| u16::from(f.code));
                tracing::info!(connection_id = %ctx.connection_id, ?frame, "Callback listener closed the channel");
                let _ = ctx.event_tx.send(ChannelEvent::CloseReceived {
                    connection_id: ctx.connection_id.clone(),
                    code,
                });
                break DisconnectReason::ClosedByPeer;
            }
            Some(Ok(Message::Pong(_))) => {}
            Some(Ok(_)) => {
                tracing::trace!(connection_id = %ctx.connection_id, "Discarding inbound data frame");
            }
            Some(Err(e)) => break DisconnectReason::ReadError(e.to_string()),
            None => break DisconnectReason::StreamEnded,
        }
    };

    teardown(stream, &ctx, reason).await;
}

/// Drop the connection this reader belongs to, unless it has already
/// been replaced or torn down by someone else.
async fn teardown(
    stream: SplitStream<CallbackStream>,
    ctx: &ReaderContext,
    reason: DisconnectReason,
) {
    let mut state = ctx.state.lock().await;

    let is_current = state
        .live
        .as_ref()
        .is_some_and(|live| live.generation == ctx.generation);
    if !is_current {
        tracing::debug!(connection_id = %ctx.connection_id, %reason, "Stale reader exiting");
        return;
    }

    let Some(live) = state.live.take() else {
        return;
    };

    if reason == DisconnectReason::ClosedByPeer {
        if let Err(e) = reply_normal_close(live.sink, stream).await {
            tracing::debug!(connection_id = %ctx.connection_id, error = %e, "Close reply not delivered");
        }
    }

    tracing::warn!(connection_id = %ctx.connection_id, %reason, "Callback channel torn down");
    let _ = ctx.event_tx.send(ChannelEvent::Disconnected {
        connection_id: ctx.connection_id.clone(),
        reason,
    });
}

/// Write one masked normal-closure frame straight to the socket.
///
/// Must only be called after the peer's close frame was read and before
/// anything else touched the connection, so the echo tungstenite queued
/// is still unsent. It is discarded when the stream is dropped here.
async fn reply_normal_close(
    sink: SplitSink<CallbackStream, Message>,
    stream: SplitStream<CallbackStream>,
) -> io::Result<()> {
    let mut ws = sink
        .reunite(stream)
        .map_err(|e| io::Error::other(e.to_string()))?;

    let mut bytes = Vec::new();
    normal_close_frame(rand::random())
        .format(&mut bytes)
        .map_err(|e| io::Error::other(e.to_string()))?;

    let socket = ws.get_mut();
    socket.write_all(&bytes).await?;
    socket.flush().await
}

/// A client-to-server close frame with code 1000 and no reason.
fn normal_close_frame(mask: [u8; 4]) -> Frame {
    let mut frame = Frame::close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    }));
    frame.header_mut().mask = Some(mask);
    frame
}
