use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use super::SubscriberId;

/// Error a listener returns to signal that it failed to handle a state.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// A listener that failed during a notification pass.
#[derive(Debug)]
pub struct SubscriberFailure {
    pub subscriber: SubscriberId,
    pub source: ListenerError,
}

impl fmt::Display for SubscriberFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscriber {}: {}", self.subscriber, self.source)
    }
}

/// Errors surfaced by [`Store`](super::Store) and
/// [`PersistentStore`](super::PersistentStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// One or more listeners failed. The state was committed and every
    /// listener still ran.
    #[error("{} subscriber(s) failed during notification", .0.len())]
    Subscribers(Vec<SubscriberFailure>),

    /// The backing store rejected the write or removal.
    #[error("Failed to persist state under key '{key}': {source}")]
    Persist {
        key: String,
        #[source]
        source: BackingError,
    },

    #[error("Failed to serialize state for key '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A persisted entry could not be decoded. Only ever logged: the store
    /// falls back to its default.
    #[error("Persisted entry '{key}' could not be decoded: {source}")]
    Deserialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    /// Listener failures, empty for any other variant.
    pub fn subscriber_failures(&self) -> &[SubscriberFailure] {
        match self {
            StoreError::Subscribers(failures) => failures,
            _ => &[],
        }
    }
}

/// Errors from a durable [`BackingStore`](super::BackingStore).
#[derive(Debug, Error)]
pub enum BackingError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Backing store unavailable: {reason}")]
    Unavailable { reason: String },
}
