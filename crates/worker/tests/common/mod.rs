//! Shared fakes for the worker integration tests.
//!
//! [`FakeBackend`] answers in virtual time so tests can run under tokio's
//! paused clock; [`RecordingSink`] keeps every envelope with the instant
//! it was sent.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use sdrelay_core::envelope::ResultEnvelope;
use sdrelay_core::sink::EnvelopeSink;
use sdrelay_sdapi::api::{BackendResponse, SdApiError, SdBackend};
use sdrelay_sdapi::progress::ProgressSnapshot;
use tokio::time::Instant;

/// Base64 of the 16-byte key `0123456789abcdef`.
pub const KEY: &str = "MDEyMzQ1Njc4OWFiY2RlZg==";

/// What the fake backend does with a submitted job.
#[derive(Debug, Clone)]
pub enum SubmitBehavior {
    Respond { status: u16, body: String },
    Unreachable,
    BadBody,
}

pub struct FakeBackend {
    submit_delay: Duration,
    behavior: SubmitBehavior,
    progress_delay: Duration,
    failing_polls: HashSet<usize>,
    pub submits: Mutex<Vec<(String, String)>>,
    pub polls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeBackend {
    pub fn new(submit_delay: Duration, behavior: SubmitBehavior) -> Self {
        Self {
            submit_delay,
            behavior,
            progress_delay: Duration::ZERO,
            failing_polls: HashSet::new(),
            submits: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn responding(submit_delay: Duration, status: u16, body: &str) -> Self {
        Self::new(
            submit_delay,
            SubmitBehavior::Respond {
                status,
                body: body.to_string(),
            },
        )
    }

    pub fn with_progress_delay(mut self, delay: Duration) -> Self {
        self.progress_delay = delay;
        self
    }

    /// Make the given polls (1-based) fail.
    pub fn with_failing_polls(mut self, polls: &[usize]) -> Self {
        self.failing_polls = polls.iter().copied().collect();
        self
    }

    pub fn submits(&self) -> Vec<(String, String)> {
        self.submits.lock().unwrap().clone()
    }
}

#[async_trait]
impl SdBackend for FakeBackend {
    async fn submit(&self, api: &str, params: &str) -> Result<BackendResponse, SdApiError> {
        self.submits
            .lock()
            .unwrap()
            .push((api.to_string(), params.to_string()));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.submit_delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match &self.behavior {
            SubmitBehavior::Respond { status, body } => Ok(BackendResponse {
                status: *status,
                body: body.clone(),
            }),
            SubmitBehavior::Unreachable => {
                Err(SdApiError::Unreachable("connection refused".into()))
            }
            SubmitBehavior::BadBody => Err(SdApiError::Body("connection reset".into())),
        }
    }

    async fn progress(&self) -> Result<ProgressSnapshot, SdApiError> {
        let n = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.progress_delay).await;

        if self.failing_polls.contains(&n) {
            return Err(SdApiError::Unreachable("progress endpoint down".into()));
        }
        Ok(ProgressSnapshot {
            status: 200,
            progress: format!("0.{n}"),
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("sink rejected envelope")]
pub struct SinkRejected;

/// Records every envelope. Optionally rejects every send.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(Instant, ResultEnvelope)>>,
    reject: bool,
}

impl RecordingSink {
    pub fn rejecting() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            reject: true,
        }
    }

    pub fn envelopes(&self) -> Vec<ResultEnvelope> {
        self.sent.lock().unwrap().iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn timed(&self) -> Vec<(Instant, ResultEnvelope)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn progress_count(&self) -> usize {
        self.envelopes().iter().filter(|e| e.is_progress()).count()
    }
}

#[async_trait]
impl EnvelopeSink for RecordingSink {
    type Error = SinkRejected;

    async fn send(&self, envelope: &ResultEnvelope) -> Result<(), SinkRejected> {
        self.sent
            .lock()
            .unwrap()
            .push((Instant::now(), envelope.clone()));
        if self.reject {
            Err(SinkRejected)
        } else {
            Ok(())
        }
    }
}
