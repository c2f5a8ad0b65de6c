//! Resilient request execution.
//!
//! An [`Operation`] is handed to a [`RequestExecutor`], which sends it through
//! a pluggable [`Transport`] (the HTTP one lives in [`http`]) and retries
//! transient failures according to a [`RetryPolicy`].

pub mod error;
pub mod executor;
pub mod http;
pub mod operation;
pub mod policy;
pub mod transport;

pub use error::{RequestError, TransportError};
pub use executor::RequestExecutor;
pub use http::{HttpTransport, IDEMPOTENCY_KEY_HEADER};
pub use operation::{Method, Operation};
pub use policy::{PolicyError, RetryPolicy, DEFAULT_RETRYABLE_STATUSES};
pub use transport::{Response, Transport};
