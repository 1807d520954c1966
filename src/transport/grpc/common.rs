//! Channel configuration, authentication and status mapping for the gRPC
//! transport.

use std::fmt;
use std::time::Duration;

use tonic::{
    metadata::MetadataValue,
    service::Interceptor,
    transport::{Channel, Endpoint},
    Code, Request, Status,
};
use tracing::debug;

use crate::config::CentrifugoConfig;
use crate::error::{ConfigurationError, TransportCause, TransportError};
use crate::types::OperationKind;

use super::TRANSPORT;

/// Configuration for the gRPC channel.
#[derive(Clone)]
pub struct GrpcClientConfig {
    /// Endpoint URI with scheme (e.g., "http://localhost:10000")
    pub endpoint: String,
    /// Sent as `authorization: apikey <key>`
    pub api_key: Option<String>,
    /// Request timeout
    pub timeout: Duration,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// TCP keepalive interval
    pub tcp_keepalive: Option<Duration>,
}

impl fmt::Debug for GrpcClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrpcClientConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("tcp_keepalive", &self.tcp_keepalive)
            .finish()
    }
}

impl Default for GrpcClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:10000".to_string(),
            api_key: None,
            timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
            tcp_keepalive: Some(Duration::from_secs(30)),
        }
    }
}

/// Prepend `http://` to bare `host:port` endpoints
pub fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}

impl GrpcClientConfig {
    #[must_use]
    pub fn new(endpoint: impl AsRef<str>) -> Self {
        Self {
            endpoint: normalize_endpoint(endpoint.as_ref()),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Take endpoint, key and timeouts from the facade configuration.
    ///
    /// Validates the endpoint URI and the key's metadata encoding up front so
    /// a bad value fails construction instead of the first call.
    pub fn from_config(config: &CentrifugoConfig) -> Result<Self, ConfigurationError> {
        let grpc = Self {
            api_key: config.api_key.clone(),
            timeout: config.timeout(),
            connect_timeout: config.connect_timeout(),
            ..Self::new(&config.endpoint)
        };

        grpc.endpoint()?;
        if let Some(api_key) = &grpc.api_key {
            apikey_value(api_key)
                .map_err(|e| ConfigurationError::invalid("api_key", e.message().to_string()))?;
        }
        Ok(grpc)
    }

    fn endpoint(&self) -> Result<Endpoint, ConfigurationError> {
        let endpoint = Endpoint::from_shared(self.endpoint.clone()).map_err(|e| {
            ConfigurationError::invalid(
                "endpoint",
                format!("Invalid gRPC endpoint '{}': {}", self.endpoint, e),
            )
        })?;

        let mut endpoint = endpoint
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout);
        if let Some(keepalive) = self.tcp_keepalive {
            endpoint = endpoint.tcp_keepalive(Some(keepalive));
        }
        Ok(endpoint)
    }

    /// Open a channel to the configured endpoint
    pub async fn connect(&self) -> Result<Channel, String> {
        let endpoint = self.endpoint().map_err(|e| e.to_string())?;
        debug!(endpoint = %self.endpoint, "Connecting to gRPC endpoint");

        endpoint
            .connect()
            .await
            .map_err(|e| format!("Failed to connect to {}: {}", self.endpoint, e))
    }
}

fn apikey_value(api_key: &str) -> Result<MetadataValue<tonic::metadata::Ascii>, Status> {
    format!("apikey {api_key}")
        .parse::<MetadataValue<_>>()
        .map_err(|e| Status::unauthenticated(format!("Invalid API key: {e}")))
}

/// Adds `authorization: apikey <key>` to every outgoing request.
#[derive(Debug, Clone)]
pub struct AuthInterceptor {
    api_key: Option<String>,
}

impl AuthInterceptor {
    #[must_use]
    pub fn new(api_key: Option<String>) -> Self {
        Self { api_key }
    }
}

impl Interceptor for AuthInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        if let Some(ref api_key) = self.api_key {
            let value = apikey_value(api_key)?;
            request.metadata_mut().insert("authorization", value);
        }
        Ok(request)
    }
}

/// Map a gRPC status to a transport error.
///
/// Codes meaning the server could not be reached or did not answer in time
/// are network failures; everything else keeps its status code.
pub fn status_error(operation: OperationKind, status: Status) -> TransportError {
    let cause = match status.code() {
        Code::Unavailable | Code::DeadlineExceeded | Code::Cancelled => {
            TransportCause::Network(format!("{:?}: {}", status.code(), status.message()))
        }
        code => TransportCause::Status {
            code: code as u16,
            message: status.message().to_string(),
        },
    };
    TransportError::new(operation, TRANSPORT, cause)
}
