//! The pluggable network boundary.

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use super::error::TransportError;
use super::operation::Operation;

/// Raw answer from the network boundary.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// First header value with the given (case-insensitive) name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Capability supplied by the host: send one operation, return the status
/// and body, or fail at the transport level.
///
/// Non-2xx statuses are *not* transport errors; the executor classifies them.
/// Implementations should be cancel-safe: the executor drops the future when
/// a cancellation or timeout fires mid-attempt.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, operation: &Operation) -> Result<Response, TransportError>;
}
