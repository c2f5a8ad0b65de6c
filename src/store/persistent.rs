use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::backing::BackingStore;
use super::error::{BackingError, StoreError};
use super::{ListenerResult, Store, StoreReader, Subscription};

/// A [`Store`] mirrored to one entry of a [`BackingStore`].
///
/// On construction the entry is read once; a missing, unreadable or
/// undecodable entry falls back to the default (logged, never an error).
/// Each update is serialized and written before the snapshot is swapped and
/// listeners run, so a listener never observes a state that is not yet
/// durable. If the write fails the update is abandoned and the error
/// returned.
pub struct PersistentStore<T> {
    store: Store<T>,
    key: String,
    default: Arc<T>,
    backing: Arc<dyn BackingStore>,
}

impl<T> PersistentStore<T>
where
    T: Serialize + DeserializeOwned + PartialEq + Send + Sync + 'static,
{
    pub fn new(key: impl Into<String>, default: T, backing: Arc<dyn BackingStore>) -> Self {
        let key = key.into();
        let default = Arc::new(default);
        let initial = match load(&key, backing.as_ref()) {
            Some(value) => {
                tracing::debug!(key = %key, "Seeded state from persisted entry");
                Arc::new(value)
            }
            None => Arc::clone(&default),
        };

        Self {
            store: Store::from_arc(initial),
            key,
            default,
            backing,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read-only view for consumers that only observe. Every write goes
    /// through this type so that it is persisted first.
    pub fn reader(&self) -> StoreReader<T> {
        self.store.reader()
    }

    pub fn get_state(&self) -> Arc<T> {
        self.store.get_state()
    }

    pub fn set_state(&self, next: T) -> Result<(), StoreError> {
        self.store
            .commit(|_| Arc::new(next), false, |state| self.persist(state))
            .map(|_| ())
    }

    pub fn update<F>(&self, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&T) -> T,
    {
        self.store
            .commit(|prev| Arc::new(f(prev)), false, |state| self.persist(state))
            .map(|_| ())
    }

    #[must_use = "dropping the Subscription leaves the listener registered with no way to remove it"]
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) -> ListenerResult + Send + Sync + 'static,
    {
        self.store.subscribe(listener)
    }

    /// Remove the backing entry and reset to the default.
    ///
    /// Always produces exactly one notification, even when the state already
    /// equals the default.
    pub fn clear(&self) -> Result<(), StoreError> {
        let default = Arc::clone(&self.default);
        self.store
            .commit(
                |_| default,
                true,
                |_| {
                    self.backing
                        .remove(&self.key)
                        .map_err(|source| self.persist_failed(source))
                },
            )
            .map(|_| ())
    }

    fn persist(&self, state: &T) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(state).map_err(|source| StoreError::Serialize {
            key: self.key.clone(),
            source,
        })?;
        self.backing
            .write(&self.key, &serialized)
            .map_err(|source| self.persist_failed(source))
    }

    fn persist_failed(&self, source: BackingError) -> StoreError {
        tracing::warn!(key = %self.key, error = %source, "Backing store write failed");
        StoreError::Persist {
            key: self.key.clone(),
            source,
        }
    }
}

fn load<T: DeserializeOwned>(key: &str, backing: &dyn BackingStore) -> Option<T> {
    let raw = match backing.read(key) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Failed to read persisted entry, using default");
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(value) => Some(value),
        Err(source) => {
            let err = StoreError::Deserialize {
                key: key.to_string(),
                source,
            };
            tracing::warn!(error = %err, "Discarding corrupt persisted entry, using default");
            None
        }
    }
}
