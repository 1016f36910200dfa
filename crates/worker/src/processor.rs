//! Single-job orchestration.
//!
//! [`TaskProcessor::process`] runs one backend call with a
//! [`ProgressReporter`] alongside it:
//!
//! 1. Start progress reporting under a fresh cancellation token.
//! 2. `POST` the job parameters to the backend and wait, unbounded.
//! 3. Cancel progress reporting and wait for the loop to exit, so a poll
//!    already in flight lands before the final envelope.
//! 4. Send the final envelope:
//!    * any HTTP status: that status and body, verbatim;
//!    * backend unreachable: status `509` with a fixed body, and the job
//!      fails;
//!    * request could not be built, or the body could not be read: no
//!      final envelope, and the job fails.
//!
//! A failed final send is logged and does not change the job's result.

use std::sync::Arc;
use std::time::Duration;

use sdrelay_core::envelope::{EncryptedTaskId, ResultEnvelope};
use sdrelay_core::sink::EnvelopeSink;
use sdrelay_sdapi::api::{SdApiError, SdBackend};
use tokio_util::sync::CancellationToken;

use crate::progress::ProgressReporter;

/// Result of a job whose backend call returned a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOutcome {
    /// HTTP status the backend answered with.
    pub status: u16,
    /// `false` when sending the final envelope returned an error.
    pub delivered: bool,
}

/// Runs jobs against one backend and reports through one sink.
pub struct TaskProcessor<B, S> {
    backend: Arc<B>,
    sink: Arc<S>,
    progress: ProgressReporter<B, S>,
}

impl<B, S> TaskProcessor<B, S>
where
    B: SdBackend + 'static,
    S: EnvelopeSink + 'static,
{
    pub fn new(backend: Arc<B>, sink: Arc<S>, progress_interval: Duration) -> Self {
        let progress =
            ProgressReporter::new(Arc::clone(&backend), Arc::clone(&sink), progress_interval);
        Self {
            backend,
            sink,
            progress,
        }
    }

    /// Process one job.
    pub async fn process(
        &self,
        api: &str,
        params: &str,
        task_id: &EncryptedTaskId,
    ) -> Result<TaskOutcome, TaskError> {
        let cancel = CancellationToken::new();
        let progress = self.progress.start(task_id.clone(), cancel.clone());

        let result = self.backend.submit(api, params).await;

        cancel.cancel();
        if let Err(e) = progress.await {
            tracing::error!(task_id = %task_id, error = %e, "Progress task panicked");
        }

        match result {
            Ok(response) => {
                tracing::info!(task_id = %task_id, api, status = response.status, "Backend call finished");
                let envelope =
                    ResultEnvelope::new(api, task_id.clone(), response.status, response.body);
                let delivered = self.send_final(&envelope).await;
                Ok(TaskOutcome {
                    status: response.status,
                    delivered,
                })
            }
            Err(SdApiError::Unreachable(e)) => {
                self.send_final(&ResultEnvelope::backend_unreachable(api, task_id.clone()))
                    .await;
                Err(TaskError::BackendUnreachable(e))
            }
            Err(SdApiError::InvalidRequest(e)) => Err(TaskError::Request(e)),
            Err(SdApiError::Body(e)) => Err(TaskError::ReadBody(e)),
        }
    }

    async fn send_final(&self, envelope: &ResultEnvelope) -> bool {
        match self.sink.send(envelope).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    task_id = %envelope.task_id,
                    api = %envelope.api,
                    status = envelope.status,
                    error = %e,
                    "Failed to send final envelope",
                );
                false
            }
        }
    }
}

/// Ways a job can fail.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// The backend could not be reached; a `509` envelope was sent.
    #[error("Stable Diffusion backend unreachable: {0}")]
    BackendUnreachable(String),

    /// The backend request could not be built; nothing was sent.
    #[error("Invalid backend request: {0}")]
    Request(String),

    /// The backend answered but its body could not be read; nothing was
    /// sent.
    #[error("Failed to read backend response: {0}")]
    ReadBody(String),
}
