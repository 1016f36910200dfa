//! Queue consumer tests with in-memory fakes.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use common::{FakeBackend, RecordingSink, KEY};
use sdrelay_core::crypto;
use sdrelay_worker::consumer::{ConsumerError, QueueConsumer};
use sdrelay_worker::processor::{TaskError, TaskProcessor};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const SCENARIO: &[u8] =
    br#"{"task_id":"abc123","api":"sdapi/v1/txt2img","params":"{\"x\":1}"}"#;

fn consumer(
    backend: FakeBackend,
    key: &str,
) -> (
    QueueConsumer<FakeBackend, RecordingSink>,
    Arc<FakeBackend>,
    Arc<RecordingSink>,
) {
    let backend = Arc::new(backend);
    let sink = Arc::new(RecordingSink::default());
    let processor = TaskProcessor::new(
        Arc::clone(&backend),
        Arc::clone(&sink),
        Duration::from_secs(1),
    );
    (QueueConsumer::new(processor, key), backend, sink)
}

fn job(task_id: &str) -> Vec<u8> {
    format!(r#"{{"task_id":"{task_id}","api":"sdapi/v1/txt2img","params":"{{}}"}}"#).into_bytes()
}

// ---------------------------------------------------------------------------
// Test: a message is processed under its encrypted task id
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn message_is_processed_with_encrypted_task_id() {
    let (consumer, backend, sink) = consumer(
        FakeBackend::responding(Duration::from_millis(100), 200, r#"{"images":[]}"#),
        KEY,
    );

    let outcome = consumer.process_message(SCENARIO).await.unwrap();
    assert_eq!(outcome.status, 200);

    assert_eq!(
        backend.submits(),
        vec![("sdapi/v1/txt2img".to_string(), r#"{"x":1}"#.to_string())]
    );

    let envelopes = sink.envelopes();
    assert_eq!(envelopes.len(), 1);
    let envelope = &envelopes[0];
    assert_eq!(envelope.api, "sdapi/v1/txt2img");
    assert_eq!(envelope.status, 200);
    assert_eq!(envelope.body, r#"{"images":[]}"#);
    assert_ne!(envelope.task_id.as_str(), "abc123");
    assert_eq!(crypto::decrypt(envelope.task_id.as_str(), KEY).unwrap(), "abc123");
}

// ---------------------------------------------------------------------------
// Test: failures before the backend call send nothing
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn bad_key_drops_job_without_envelope() {
    let (consumer, backend, sink) = consumer(
        FakeBackend::responding(Duration::from_millis(10), 200, "{}"),
        "c2hvcnQ=",
    );

    let result = consumer.process_message(SCENARIO).await;

    assert_matches!(result, Err(ConsumerError::Encrypt(_)));
    assert!(backend.submits().is_empty());
    assert!(sink.envelopes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn undecodable_message_is_rejected() {
    let (consumer, backend, sink) = consumer(
        FakeBackend::responding(Duration::from_millis(10), 200, "{}"),
        KEY,
    );

    assert_matches!(
        consumer.process_message(b"{not json").await,
        Err(ConsumerError::Decode(_))
    );
    assert!(backend.submits().is_empty());
    assert!(sink.envelopes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn task_errors_are_surfaced() {
    let (consumer, _, sink) = consumer(
        FakeBackend::new(Duration::from_millis(10), common::SubmitBehavior::Unreachable),
        KEY,
    );

    assert_matches!(
        consumer.process_message(SCENARIO).await,
        Err(ConsumerError::Task(TaskError::BackendUnreachable(_)))
    );
    assert_eq!(sink.envelopes().len(), 1);

    // handle_message swallows the same failure.
    consumer.handle_message(SCENARIO).await;
    assert_eq!(sink.envelopes().len(), 2);
}

// ---------------------------------------------------------------------------
// Test: run() respects the in-flight limit and drains on close
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn run_processes_one_job_at_a_time_by_default() {
    let (consumer, backend, sink) = consumer(
        FakeBackend::responding(Duration::from_millis(500), 200, "{}"),
        KEY,
    );
    let (tx, rx) = mpsc::channel(8);
    for id in ["a", "b", "c"] {
        tx.send(job(id)).await.unwrap();
    }
    drop(tx);

    let start = Instant::now();
    Arc::new(consumer).run(rx, 1, CancellationToken::new()).await;

    assert_eq!(start.elapsed(), Duration::from_millis(1500));
    assert_eq!(backend.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(sink.envelopes().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn run_allows_configured_concurrency() {
    let (consumer, backend, sink) = consumer(
        FakeBackend::responding(Duration::from_millis(500), 200, "{}"),
        KEY,
    );
    let (tx, rx) = mpsc::channel(8);
    for id in ["a", "b", "c"] {
        tx.send(job(id)).await.unwrap();
    }
    drop(tx);

    let start = Instant::now();
    Arc::new(consumer).run(rx, 3, CancellationToken::new()).await;

    assert_eq!(start.elapsed(), Duration::from_millis(500));
    assert_eq!(backend.max_in_flight.load(Ordering::SeqCst), 3);

    let mut ids: Vec<String> = sink
        .envelopes()
        .iter()
        .map(|e| crypto::decrypt(e.task_id.as_str(), KEY).unwrap())
        .collect();
    ids.sort();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[tokio::test(start_paused = true)]
async fn run_skips_blank_and_survives_bad_messages() {
    let (consumer, backend, sink) = consumer(
        FakeBackend::responding(Duration::from_millis(10), 200, "{}"),
        KEY,
    );
    let (tx, rx) = mpsc::channel(8);
    tx.send(b"".to_vec()).await.unwrap();
    tx.send(b"   ".to_vec()).await.unwrap();
    tx.send(b"garbage".to_vec()).await.unwrap();
    tx.send(job("ok")).await.unwrap();
    drop(tx);

    Arc::new(consumer).run(rx, 1, CancellationToken::new()).await;

    assert_eq!(backend.submits().len(), 1);
    assert_eq!(sink.envelopes().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_intake_and_finishes_running_job() {
    let (consumer, backend, sink) = consumer(
        FakeBackend::responding(Duration::from_millis(2500), 200, "{}"),
        KEY,
    );
    let (tx, rx) = mpsc::channel(8);
    tx.send(job("running")).await.unwrap();
    tx.send(job("queued")).await.unwrap();

    let cancel = CancellationToken::new();
    let run = tokio::spawn(Arc::new(consumer).run(rx, 1, cancel.clone()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    run.await.unwrap();

    assert_eq!(backend.submits().len(), 1);
    let envelopes = sink.envelopes();
    assert_eq!(envelopes.last().unwrap().status, 200);
    assert!(!envelopes.last().unwrap().is_progress());
    drop(tx);
}
