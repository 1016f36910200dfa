//! Queue message handling.
//!
//! Each message body is a JSON object `{task_id, api, params}`. The task
//! id is encrypted before anything else happens and only the encrypted
//! form is logged or sent. Every message is reported as handled whatever
//! its outcome; failures are logged and never requeued.

use std::sync::Arc;

use sdrelay_core::crypto::{self, CryptoError};
use sdrelay_core::envelope::EncryptedTaskId;
use sdrelay_core::sink::EnvelopeSink;
use sdrelay_sdapi::api::SdBackend;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::processor::{TaskError, TaskOutcome, TaskProcessor};

/// One job as it arrives from the queue.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueueMessage {
    pub task_id: String,
    /// Backend API path, e.g. `sdapi/v1/txt2img`.
    pub api: String,
    /// Request body for the backend, as JSON text.
    ///
    /// Normally a string. Any other JSON value is accepted and kept as its
    /// compact JSON text; a missing field is empty.
    #[serde(default, deserialize_with = "params_as_text")]
    pub params: String,
}

impl QueueMessage {
    /// Parse one raw message body.
    pub fn decode(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

fn params_as_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Decodes queue messages and hands them to a [`TaskProcessor`].
pub struct QueueConsumer<B, S> {
    processor: TaskProcessor<B, S>,
    app_key: String,
}

impl<B, S> QueueConsumer<B, S>
where
    B: SdBackend + 'static,
    S: EnvelopeSink + 'static,
{
    /// * `app_key` - base64 AES key for task id encryption.
    pub fn new(processor: TaskProcessor<B, S>, app_key: impl Into<String>) -> Self {
        Self {
            processor,
            app_key: app_key.into(),
        }
    }

    /// Decode, encrypt and process one message body.
    pub async fn process_message(&self, body: &[u8]) -> Result<TaskOutcome, ConsumerError> {
        let message = QueueMessage::decode(body)?;
        let task_id = EncryptedTaskId::new(crypto::encrypt(&message.task_id, &self.app_key)?);

        tracing::info!(task_id = %task_id, api = %message.api, "Processing job");

        let outcome = self
            .processor
            .process(&message.api, &message.params, &task_id)
            .await?;
        Ok(outcome)
    }

    /// Process one message body and log the outcome. Never fails: the
    /// message always counts as handled.
    pub async fn handle_message(&self, body: &[u8]) {
        match self.process_message(body).await {
            Ok(outcome) => {
                tracing::info!(
                    status = outcome.status,
                    delivered = outcome.delivered,
                    "Job finished",
                );
            }
            Err(e) => {
                tracing::error!(error = %e, "Job failed");
            }
        }
    }

    /// Consume message bodies until the channel closes or `cancel` fires.
    ///
    /// Up to `max_in_flight` jobs run at once. Blank bodies are skipped.
    /// Jobs already started run to completion before this returns.
    pub async fn run(
        self: Arc<Self>,
        mut messages: mpsc::Receiver<Vec<u8>>,
        max_in_flight: usize,
        cancel: CancellationToken,
    ) {
        let permits = Arc::new(Semaphore::new(max_in_flight.max(1)));
        let mut jobs = JoinSet::new();

        loop {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let body = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                body = messages.recv() => match body {
                    Some(body) => body,
                    None => break,
                },
            };

            if body.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let consumer = Arc::clone(&self);
            jobs.spawn(async move {
                consumer.handle_message(&body).await;
                drop(permit);
            });

            // Reap finished jobs so the set does not grow unbounded.
            while let Some(joined) = jobs.try_join_next() {
                log_join_error(joined);
            }
        }

        if !jobs.is_empty() {
            tracing::info!(in_flight = jobs.len(), "Waiting for in-flight jobs");
        }
        while let Some(joined) = jobs.join_next().await {
            log_join_error(joined);
        }
        tracing::info!("Queue consumer stopped");
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "Job task panicked");
    }
}

/// Why a message could not be processed.
#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    /// The body is not a valid job message. Nothing was sent.
    #[error("Invalid queue message: {0}")]
    Decode(#[from] serde_json::Error),

    /// The task id could not be encrypted. Nothing was sent.
    #[error("Task id encryption failed: {0}")]
    Encrypt(#[from] CryptoError),

    #[error(transparent)]
    Task(#[from] TaskError),
}
