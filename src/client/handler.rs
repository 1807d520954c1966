//! Default queue job handler: replays a job against a transport.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::JobError;
use crate::queue::{JobHandler, QueueJob};
use crate::transport::CentrifugoTransport;
use crate::types::{
    BroadcastRequest, DisconnectRequest, OperationKind, PublishRequest, RefreshRequest,
    SubscribeRequest, UnsubscribeRequest,
};

/// Calls the transport method named by the job with the job's params.
///
/// Params are replayed unchanged, so a persisted idempotency key is sent on
/// every attempt. Undecodable params, unsupported methods and transport
/// errors that are not retryable fail the job permanently.
pub struct TransportJobHandler {
    transport: Arc<dyn CentrifugoTransport>,
}

impl fmt::Debug for TransportJobHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportJobHandler")
            .field("transport", &self.transport.transport_name())
            .finish()
    }
}

impl TransportJobHandler {
    pub fn new(transport: Arc<dyn CentrifugoTransport>) -> Self {
        Self { transport }
    }
}

fn params<P: DeserializeOwned>(job: &QueueJob) -> Result<P, JobError> {
    job.params_as().map_err(|e| JobError::permanent(e.to_string()))
}

#[async_trait]
impl JobHandler for TransportJobHandler {
    async fn handle(&self, job: &QueueJob) -> Result<(), JobError> {
        let transport = &self.transport;
        let result = match job.method {
            OperationKind::Publish => transport
                .publish(&params::<PublishRequest>(job)?)
                .await
                .map(drop),
            OperationKind::Broadcast => transport
                .broadcast(&params::<BroadcastRequest>(job)?)
                .await
                .map(drop),
            OperationKind::Subscribe => transport.subscribe(&params::<SubscribeRequest>(job)?).await,
            OperationKind::Unsubscribe => {
                transport
                    .unsubscribe(&params::<UnsubscribeRequest>(job)?)
                    .await
            }
            OperationKind::Disconnect => {
                transport
                    .disconnect(&params::<DisconnectRequest>(job)?)
                    .await
            }
            OperationKind::Refresh => transport.refresh(&params::<RefreshRequest>(job)?).await,
            other => {
                return Err(JobError::permanent(format!(
                    "'{other}' cannot be executed from the queue"
                )))
            }
        };
        result.map_err(JobError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CentrifugoConfig;
    use crate::transport::UnifiedTransport;
    use serde_json::json;

    fn handler() -> TransportJobHandler {
        let transport =
            UnifiedTransport::from_config(&CentrifugoConfig::http("http://127.0.0.1:1")).unwrap();
        TransportJobHandler::new(Arc::new(transport))
    }

    #[tokio::test]
    async fn test_read_operations_are_rejected() {
        let job = QueueJob::new(OperationKind::History, &json!({"channel": "c"})).unwrap();
        let err = handler().handle(&job).await.unwrap_err();
        assert!(err.message.contains("history"), "{err}");
        assert!(err.permanent);
    }

    #[tokio::test]
    async fn test_bad_params_fail_without_calling_transport() {
        let job = QueueJob::new(OperationKind::Publish, &json!({"nope": true})).unwrap();
        let err = handler().handle(&job).await.unwrap_err();
        assert!(err.message.contains("invalid params"), "{err}");
        assert!(err.permanent);
    }

    #[tokio::test]
    async fn test_transport_failure_is_reported() {
        let request = DisconnectRequest::new("u1", false);
        let job = QueueJob::new(OperationKind::Disconnect, &request).unwrap();
        let err = handler().handle(&job).await.unwrap_err();
        assert!(err.message.contains("disconnect failed over http"), "{err}");
        // unreachable server is worth retrying
        assert!(!err.permanent);
    }
}
