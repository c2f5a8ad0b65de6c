//! Failure taxonomy for request execution.
//!
//! Every failure the executor can surface to a caller is a [`RequestError`].
//! The network boundary reports its own, narrower [`TransportError`], which
//! the executor classifies.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by [`RequestExecutor`](crate::request::RequestExecutor).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RequestError {
    /// The network boundary could not be reached or failed mid-transfer
    #[error("Network unavailable: {reason}")]
    NetworkUnavailable { reason: String },

    /// A single attempt exceeded its time budget
    #[error("Request timeout after {}ms", after.as_millis())]
    Timeout { after: Duration },

    /// Upstream answered with a 5xx status
    #[error("Server error: {status} - {body}")]
    ServerError { status: u16, body: String },

    /// Upstream rejected the request (4xx and other non-success statuses)
    #[error("Client error: {status} - {body}")]
    ClientError { status: u16, body: String },

    /// The caller's cancellation token fired
    #[error("Request cancelled")]
    Cancelled,

    /// Every permitted attempt failed with a retryable error
    #[error("Gave up after {attempts} attempt(s): {last}")]
    ExhaustedRetries {
        attempts: u32,
        last: Box<RequestError>,
    },

    /// A successful response body could not be decoded into the expected type
    #[error("Failed to decode response: {reason}")]
    Decode { reason: String },
}

impl RequestError {
    /// Whether the failure is transient under the given set of retryable
    /// server statuses.
    pub fn is_retryable(&self, retryable_statuses: &[u16]) -> bool {
        match self {
            RequestError::NetworkUnavailable { .. } | RequestError::Timeout { .. } => true,
            RequestError::ServerError { status, .. } => retryable_statuses.contains(status),
            RequestError::ClientError { .. }
            | RequestError::Cancelled
            | RequestError::ExhaustedRetries { .. }
            | RequestError::Decode { .. } => false,
        }
    }

    /// Stable identifier for logs and user-facing error state.
    pub fn error_type(&self) -> &'static str {
        match self {
            RequestError::NetworkUnavailable { .. } => "network_unavailable",
            RequestError::Timeout { .. } => "timeout",
            RequestError::ServerError { .. } => "server_error",
            RequestError::ClientError { .. } => "client_error",
            RequestError::Cancelled => "cancelled",
            RequestError::ExhaustedRetries { .. } => "exhausted_retries",
            RequestError::Decode { .. } => "decode_error",
        }
    }

    /// HTTP status carried by the failure, looking through retry exhaustion.
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::ServerError { status, .. } | RequestError::ClientError { status, .. } => {
                Some(*status)
            }
            RequestError::ExhaustedRetries { last, .. } => last.status(),
            _ => None,
        }
    }
}

/// Errors reported by a [`Transport`](crate::request::Transport).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// Could not establish a connection
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The transport's own deadline expired
    #[error("Transport timed out")]
    TimedOut,

    /// Any other transfer failure (reset, protocol error, body read)
    #[error("Transport error: {0}")]
    Other(String),
}
