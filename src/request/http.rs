//! HTTP implementation of [`Transport`] on top of `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use super::error::TransportError;
use super::operation::{Method, Operation};
use super::transport::{Response, Transport};
use crate::config::RequestConfig;

/// Header carrying the caller-supplied deduplication token.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Sends operations over HTTP.
///
/// Relative targets (`/v1/items`) are resolved against `base_url`; absolute
/// `http(s)://` targets are used as-is.
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, connect_timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::Other(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn from_config(config: &RequestConfig) -> Result<Self, TransportError> {
        Self::new(
            config.base_url.clone(),
            Duration::from_secs(u64::from(config.connect_timeout_seconds)),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn resolve(&self, target: &str) -> String {
        if target.starts_with("http://") || target.starts_with("https://") {
            return target.to_string();
        }
        let base = self.base_url.trim_end_matches('/');
        if target.starts_with('/') {
            format!("{}{}", base, target)
        } else {
            format!("{}/{}", base, target)
        }
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Head => reqwest::Method::HEAD,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
        Method::Options => reqwest::Method::OPTIONS,
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::TimedOut
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, operation: &Operation) -> Result<Response, TransportError> {
        let url = self.resolve(operation.target());
        let mut builder = self
            .client
            .request(to_reqwest_method(operation.method()), url);

        for (name, value) in operation.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }

        if let Some(key) = operation.idempotency_key() {
            builder = builder.header(IDEMPOTENCY_KEY_HEADER, key);
        }

        if let Some(body) = operation.body() {
            builder = builder.body(body.to_vec());
        }

        let upstream = builder.send().await.map_err(classify)?;

        let status = upstream.status().as_u16();
        let headers = upstream
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = upstream.bytes().await.map_err(classify)?.to_vec();

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}
