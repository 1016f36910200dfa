//! WebSocket client for the callback listener.
//!
//! [`CallbackClient`] holds the endpoint URL. Call
//! [`CallbackClient::connect`] to perform the upgrade handshake and get a
//! live [`CallbackConnection`].

use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// The raw WebSocket stream type used for the callback channel.
pub type CallbackStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for the callback endpoint.
#[derive(Debug, Clone)]
pub struct CallbackClient {
    url: String,
}

/// A freshly established callback connection.
pub struct CallbackConnection {
    /// Random id used to correlate log lines and events for this connection.
    pub connection_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: CallbackStream,
}

impl CallbackClient {
    /// Create a client for the callback endpoint. No connection is made.
    ///
    /// * `url` - full endpoint URL, e.g. `ws://main:8080/sd-callback`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Callback endpoint URL (e.g. `ws://main:8080/sd-callback`).
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Connect to the callback endpoint.
    pub async fn connect(&self) -> Result<CallbackConnection, CallbackClientError> {
        let (ws_stream, _response) = connect_async(self.url.as_str()).await.map_err(|e| {
            CallbackClientError::Connection(format!(
                "Failed to connect to callback listener at {}: {e}",
                self.url
            ))
        })?;

        let connection_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(
            connection_id = %connection_id,
            "Connected to callback listener at {}",
            self.url,
        );

        Ok(CallbackConnection {
            connection_id,
            ws_stream,
        })
    }
}

/// Errors that can occur when establishing the callback connection.
#[derive(Debug, thiserror::Error)]
pub enum CallbackClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),
}
