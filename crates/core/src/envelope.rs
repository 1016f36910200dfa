//! Result envelopes streamed to the callback listener.
//!
//! Every frame written to the callback channel is one [`ResultEnvelope`]:
//! one per progress tick and exactly one final envelope per job.

use std::fmt;

use serde::{Deserialize, Serialize};

/// API name used for progress envelopes.
pub const PROGRESS_API: &str = "sdapi/v1/progress";

/// Status reported when the backend could not be reached at all.
pub const BACKEND_UNREACHABLE_STATUS: u16 = 509;

/// Body reported alongside [`BACKEND_UNREACHABLE_STATUS`].
pub const BACKEND_UNREACHABLE_BODY: &str = "stable diffusion server error";

/// A task id after encryption.
///
/// This is the only form of the task id that is ever sent or logged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedTaskId(String);

impl EncryptedTaskId {
    /// Wrap an already-encrypted id. No validation is done.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The encrypted id as sent on the wire.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EncryptedTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One frame sent to the callback listener.
///
/// Field order is part of the wire format: `api`, `task_id`, `status`,
/// `body`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    /// Backend API the envelope reports on (e.g. `sdapi/v1/txt2img`).
    pub api: String,
    /// Encrypted id of the job this envelope belongs to.
    pub task_id: EncryptedTaskId,
    /// HTTP status from the backend, or [`BACKEND_UNREACHABLE_STATUS`].
    pub status: u16,
    /// Response body (final envelopes) or progress value (progress envelopes).
    pub body: String,
}

impl ResultEnvelope {
    /// Envelope with every field given explicitly.
    pub fn new(
        api: impl Into<String>,
        task_id: EncryptedTaskId,
        status: u16,
        body: impl Into<String>,
    ) -> Self {
        Self {
            api: api.into(),
            task_id,
            status,
            body: body.into(),
        }
    }

    /// Envelope for one progress tick.
    pub fn progress(task_id: EncryptedTaskId, status: u16, progress: impl Into<String>) -> Self {
        Self::new(PROGRESS_API, task_id, status, progress)
    }

    /// Final envelope for a job whose backend call never reached the backend.
    pub fn backend_unreachable(api: impl Into<String>, task_id: EncryptedTaskId) -> Self {
        Self::new(
            api,
            task_id,
            BACKEND_UNREACHABLE_STATUS,
            BACKEND_UNREACHABLE_BODY,
        )
    }

    /// Whether this is a progress tick rather than a final result.
    pub fn is_progress(&self) -> bool {
        self.api == PROGRESS_API
    }
}
