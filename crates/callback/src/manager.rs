//! Callback channel manager.
//!
//! [`ChannelManager`] owns the single persistent WebSocket connection to
//! the callback listener and exposes one operation: send an envelope.
//! Connecting, keepalive and teardown happen behind that call:
//!
//! * The connection is opened lazily by the first `send` that finds the
//!   channel absent. A failed connect drops that envelope and leaves the
//!   channel absent; the next `send` tries again from scratch.
//! * A background reader task owns the read half and drives control
//!   frames. Pings are answered with a pong carrying the same payload and
//!   push the read deadline out by the read timeout. A close frame is
//!   answered with a normal-closure frame and the channel becomes absent.
//! * Any read error, read timeout, or write error tears the connection
//!   down. Nothing is retried; the next `send` reconnects.
//!
//! One async mutex guards the connection handle and every envelope write,
//! so envelopes never interleave on the wire. Pong replies are not written
//! under that mutex: the reader flushes them from its read poll. Both
//! halves of the split stream share a `BiLock`, so a pong still lands
//! between frames and never inside one. The close reply is written by the
//! reader's teardown, which does hold the mutex.
//!
//! Lifecycle changes are broadcast as [`ChannelEvent`]s. Call
//! [`ChannelManager::subscribe`] to receive them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use sdrelay_core::envelope::ResultEnvelope;
use sdrelay_core::sink::EnvelopeSink;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::client::{CallbackClient, CallbackClientError, CallbackStream};
use crate::events::{ChannelEvent, DisconnectReason};
use crate::frame::FrameEncoding;
use crate::reader::{read_control_frames, ReaderContext};

/// Default time the channel waits for a ping before declaring the
/// listener dead.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Broadcast channel capacity for lifecycle events.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Settings for a [`ChannelManager`].
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Full endpoint URL, e.g. `ws://main:8080/sd-callback`.
    pub url: String,
    /// Read deadline, extended by every ping.
    pub read_timeout: Duration,
    /// How envelopes are rendered into text frames.
    pub encoding: FrameEncoding,
}

impl ChannelConfig {
    /// Settings with the default read timeout and frame encoding.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            read_timeout: DEFAULT_READ_TIMEOUT,
            encoding: FrameEncoding::default(),
        }
    }

    /// Override the read timeout.
    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Override the frame encoding.
    pub fn with_encoding(mut self, encoding: FrameEncoding) -> Self {
        self.encoding = encoding;
        self
    }
}

/// Connection state guarded by the manager's mutex.
pub(crate) struct ChannelState {
    /// `None` while the channel is absent.
    pub(crate) live: Option<LiveChannel>,
    /// Bumped on every successful connect. Lets a reader task tell whether
    /// the connection it was spawned for is still the current one.
    generation: u64,
}

/// The write half and bookkeeping of an established connection.
pub(crate) struct LiveChannel {
    pub(crate) generation: u64,
    pub(crate) connection_id: String,
    pub(crate) sink: SplitSink<CallbackStream, Message>,
    reader: JoinHandle<()>,
}

pub(crate) type SharedState = Arc<Mutex<ChannelState>>;

/// Owns the persistent callback connection.
///
/// Construct once at startup and share via `Arc`.
pub struct ChannelManager {
    client: CallbackClient,
    encoding: FrameEncoding,
    read_timeout: Duration,
    state: SharedState,
    event_tx: broadcast::Sender<ChannelEvent>,
}

impl ChannelManager {
    /// Create a manager. No connection is opened until the first send.
    pub fn new(config: ChannelConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            client: CallbackClient::new(config.url),
            encoding: config.encoding,
            read_timeout: config.read_timeout,
            state: Arc::new(Mutex::new(ChannelState {
                live: None,
                generation: 0,
            })),
            event_tx,
        }
    }

    /// Subscribe to channel lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.event_tx.subscribe()
    }

    /// Callback endpoint URL (e.g. `ws://main:8080/sd-callback`).
    pub fn url(&self) -> &str {
        self.client.url()
    }

    /// Whether a connection is currently established.
    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.live.is_some()
    }

    /// Send one envelope as a single text frame.
    ///
    /// Connects first if the channel is absent. A connect failure is
    /// logged and the envelope dropped; that is not an error for the
    /// caller. An error is returned only when writing to an established
    /// connection fails, in which case the connection is torn down.
    pub async fn send(&self, envelope: &ResultEnvelope) -> Result<(), ChannelError> {
        let text = self
            .encoding
            .encode(envelope)
            .map_err(|e| ChannelError::Encode(e.to_string()))?;

        let mut state = self.state.lock().await;

        if state.live.is_none() {
            if let Err(e) = self.connect_locked(&mut state).await {
                tracing::error!(
                    error = %e,
                    api = %envelope.api,
                    task_id = %envelope.task_id,
                    "Callback channel unavailable, dropping envelope",
                );
                return Ok(());
            }
        }

        let Some(live) = state.live.as_mut() else {
            return Ok(());
        };

        match live.sink.send(Message::Text(text)).await {
            Ok(()) => {
                tracing::debug!(
                    connection_id = %live.connection_id,
                    api = %envelope.api,
                    task_id = %envelope.task_id,
                    status = envelope.status,
                    "Envelope sent",
                );
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(error = %message, "Failed to write envelope, closing callback channel");
                if let Some(live) = state.live.take() {
                    live.reader.abort();
                    let _ = self.event_tx.send(ChannelEvent::Disconnected {
                        connection_id: live.connection_id,
                        reason: DisconnectReason::WriteError(message.clone()),
                    });
                }
                Err(ChannelError::Write(message))
            }
        }
    }

    /// Close an open connection with a normal-closure frame.
    ///
    /// The manager stays usable; a later `send` reconnects.
    pub async fn shutdown(&self) {
        let Some(mut live) = self.state.lock().await.live.take() else {
            return;
        };

        tracing::info!(connection_id = %live.connection_id, "Closing callback channel");

        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        };
        if let Err(e) = live.sink.send(Message::Close(Some(frame))).await {
            tracing::debug!(error = %e, "Close frame not delivered");
        }
        live.reader.abort();

        let _ = self.event_tx.send(ChannelEvent::Disconnected {
            connection_id: live.connection_id,
            reason: DisconnectReason::Shutdown,
        });
    }

    // ---- private helpers ----

    /// Open a connection and spawn its reader. Caller holds the lock.
    async fn connect_locked(&self, state: &mut ChannelState) -> Result<(), CallbackClientError> {
        let conn = self.client.connect().await?;

        state.generation += 1;
        let generation = state.generation;
        let connection_id = conn.connection_id;
        let (sink, stream) = conn.ws_stream.split();

        let ctx = ReaderContext {
            state: Arc::clone(&self.state),
            generation,
            connection_id: connection_id.clone(),
            read_timeout: self.read_timeout,
            event_tx: self.event_tx.clone(),
        };
        let reader = tokio::spawn(read_control_frames(stream, ctx));

        state.live = Some(LiveChannel {
            generation,
            connection_id: connection_id.clone(),
            sink,
            reader,
        });

        let _ = self
            .event_tx
            .send(ChannelEvent::Connected { connection_id });

        Ok(())
    }
}

#[async_trait]
impl EnvelopeSink for ChannelManager {
    type Error = ChannelError;

    async fn send(&self, envelope: &ResultEnvelope) -> Result<(), ChannelError> {
        ChannelManager::send(self, envelope).await
    }
}

/// Errors returned by [`ChannelManager::send`].
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The envelope could not be serialized.
    #[error("Failed to encode envelope: {0}")]
    Encode(String),

    /// Writing the frame to an established connection failed.
    #[error("Failed to write envelope: {0}")]
    Write(String),
}
