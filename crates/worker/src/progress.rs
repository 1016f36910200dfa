//! Periodic progress reporting for a running job.

use std::sync::Arc;
use std::time::Duration;

use sdrelay_core::envelope::{EncryptedTaskId, ResultEnvelope};
use sdrelay_core::sink::EnvelopeSink;
use sdrelay_sdapi::api::SdBackend;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Default time between progress polls.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(1000);

/// Polls backend progress and forwards each reading as an envelope.
pub struct ProgressReporter<B, S> {
    backend: Arc<B>,
    sink: Arc<S>,
    interval: Duration,
}

impl<B, S> ProgressReporter<B, S>
where
    B: SdBackend + 'static,
    S: EnvelopeSink + 'static,
{
    pub fn new(backend: Arc<B>, sink: Arc<S>, interval: Duration) -> Self {
        Self {
            backend,
            sink,
            interval,
        }
    }

    /// Spawn the polling loop for one job.
    ///
    /// The first poll happens one interval after the call. Cancellation is
    /// observed between polls only; a poll already under way runs to
    /// completion, including its send. Polls that would have fallen due
    /// during a slow one are skipped.
    pub fn start(&self, task_id: EncryptedTaskId, cancel: CancellationToken) -> JoinHandle<()> {
        let backend = Arc::clone(&self.backend);
        let sink = Arc::clone(&self.sink);
        let period = self.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                poll_once(backend.as_ref(), sink.as_ref(), &task_id).await;
            }

            tracing::debug!(task_id = %task_id, "Progress reporting stopped");
        })
    }
}

async fn poll_once<B, S>(backend: &B, sink: &S, task_id: &EncryptedTaskId)
where
    B: SdBackend,
    S: EnvelopeSink,
{
    let snapshot = match backend.progress().await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            tracing::warn!(task_id = %task_id, error = %e, "Progress poll failed");
            return;
        }
    };

    let envelope = ResultEnvelope::progress(task_id.clone(), snapshot.status, snapshot.progress);
    if let Err(e) = sink.send(&envelope).await {
        tracing::warn!(task_id = %task_id, error = %e, "Failed to send progress envelope");
    }
}
