//! Lifecycle events emitted by the queue worker.
//!
//! Background failures have no caller to return an error to, so they are
//! published here (and logged at error level) instead.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use super::job::JobId;
use crate::error::{CentrifugoError, QueueError};
use crate::types::OperationKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    Completed {
        job_id: JobId,
        method: OperationKind,
        attempt: u32,
        at: DateTime<Utc>,
    },
    Retrying {
        job_id: JobId,
        method: OperationKind,
        attempt: u32,
        error: String,
        retry_in_ms: u64,
        at: DateTime<Utc>,
    },
    /// Attempts exhausted, the job was dead-lettered
    Failed {
        job_id: JobId,
        method: OperationKind,
        attempts: u32,
        error: String,
        at: DateTime<Utc>,
    },
}

impl QueueEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            Self::Completed { job_id, .. }
            | Self::Retrying { job_id, .. }
            | Self::Failed { job_id, .. } => *job_id,
        }
    }

    /// The execution error a `Failed` event stands for
    pub fn as_execution_error(&self) -> Option<QueueError> {
        match self {
            Self::Failed {
                job_id,
                method,
                attempts,
                error,
                ..
            } => Some(QueueError::Execution {
                job_id: job_id.to_string(),
                method: *method,
                attempts: *attempts,
                message: error.clone(),
            }),
            _ => None,
        }
    }

    /// A `Failed` event as the facade error type
    pub fn to_error(&self) -> Option<CentrifugoError> {
        self.as_execution_error().map(CentrifugoError::QueueExecution)
    }
}

/// Fan-out of queue events to any number of subscribers
#[derive(Debug, Clone)]
pub struct QueueEventPublisher {
    sender: broadcast::Sender<QueueEvent>,
}

impl QueueEventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event; having no subscribers is fine
    pub fn publish(&self, event: QueueEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for QueueEventPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let publisher = QueueEventPublisher::default();
        publisher.publish(QueueEvent::Completed {
            job_id: JobId(1),
            method: OperationKind::Publish,
            attempt: 1,
            at: Utc::now(),
        });
        assert_eq!(publisher.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_event_converts_to_execution_error() {
        let publisher = QueueEventPublisher::default();
        let mut rx = publisher.subscribe();
        publisher.publish(QueueEvent::Failed {
            job_id: JobId(7),
            method: OperationKind::Broadcast,
            attempts: 3,
            error: "boom".into(),
            at: Utc::now(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.job_id(), JobId(7));
        match event.as_execution_error() {
            Some(QueueError::Execution {
                method, attempts, ..
            }) => {
                assert_eq!(method, OperationKind::Broadcast);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
