//! Shared helpers for integration tests.
#![allow(dead_code)]

pub mod mock_centrifugo;
pub mod mock_grpc;

use std::time::Duration;

use centrifugo_sdk::queue::{BackoffPolicy, JobOptions, WorkerConfig};
use centrifugo_sdk::{CentrifugoConfig, LogOption, QueueConfig, QueueEvent};
use tokio::sync::broadcast;

pub use mock_centrifugo::{MockCentrifugo, RecordedRequest, TEST_API_KEY, UNKNOWN_CHANNEL};
pub use mock_grpc::MockGrpcCentrifugo;

/// HTTP configuration pointed at `mock`, logging disabled
pub fn http_config(mock: &MockCentrifugo) -> CentrifugoConfig {
    CentrifugoConfig::http(mock.endpoint())
        .with_api_key(TEST_API_KEY)
        .with_log(LogOption::disabled())
}

/// gRPC configuration pointed at `mock`, logging disabled
pub fn grpc_config(mock: &MockGrpcCentrifugo) -> CentrifugoConfig {
    CentrifugoConfig::grpc(mock.endpoint())
        .with_api_key(TEST_API_KEY)
        .with_log(LogOption::disabled())
}

/// In-memory queue with fast polling and a short fixed backoff
pub fn fast_queue(attempts: u32) -> QueueConfig {
    QueueConfig::in_memory()
        .with_job_options(
            JobOptions::default()
                .with_attempts(attempts)
                .with_backoff(BackoffPolicy::Fixed { delay_ms: 20 }),
        )
        .with_worker(WorkerConfig {
            poll_interval_ms: 10,
            ..WorkerConfig::default()
        })
}

/// Wait for the next event matching `accept`, skipping the rest
pub async fn next_event(
    events: &mut broadcast::Receiver<QueueEvent>,
    accept: impl Fn(&QueueEvent) -> bool,
) -> QueueEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await.expect("queue event channel closed");
            if accept(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for queue event")
}

pub fn is_completed(event: &QueueEvent) -> bool {
    matches!(event, QueueEvent::Completed { .. })
}

pub fn is_failed(event: &QueueEvent) -> bool {
    matches!(event, QueueEvent::Failed { .. })
}
