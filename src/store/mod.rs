//! Observable state holders.
//!
//! A [`Store`] owns one immutable snapshot (`Arc<T>`) and a FIFO list of
//! listeners. Every committed update swaps the snapshot and notifies all
//! listeners synchronously, before `set_state` returns.
//!
//! # Concurrency
//!
//! Updates, subscription changes and notification passes are serialized by
//! one re-entrant commit lock, so concurrent writers never lose an update and
//! every listener sees commits in the same order. `get_state` only takes a
//! short read lock on the snapshot slot and never waits on a notification
//! pass. A listener may call back into the store on the same thread: the
//! nested update is committed at once (so `get_state` sees it) and its
//! notification pass is queued until the running pass ends. Passes are
//! delivered in commit order, so the last state every listener receives is
//! the current one.
//!
//! # Listener failures
//!
//! A listener that returns `Err` does not stop the pass. Once every listener
//! has run, the failures are returned together as
//! [`StoreError::Subscribers`]; the new state stays committed.
//!
//! # Equality
//!
//! An update whose result is `==` to the current state (structural
//! equality via `PartialEq`) commits nothing and notifies nobody.

mod backing;
mod error;
mod persistent;

pub use backing::{BackingStore, FileBackingStore, MemoryBackingStore, PersistedEntry};
pub use error::{BackingError, ListenerError, StoreError, SubscriberFailure};
pub use persistent::PersistentStore;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex, RwLock};

/// What a listener returns.
pub type ListenerResult = Result<(), ListenerError>;

type Listener<T> = Arc<dyn Fn(&T) -> ListenerResult + Send + Sync>;

/// Identifies one subscription within its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

struct Entry<T> {
    id: SubscriberId,
    active: Arc<AtomicBool>,
    listener: Listener<T>,
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            active: Arc::clone(&self.active),
            listener: Arc::clone(&self.listener),
        }
    }
}

/// Notification bookkeeping, only touched under the commit lock.
struct Passes<T> {
    running: bool,
    queued: VecDeque<Arc<T>>,
}

/// Clears the pass flag on exit, including when a listener panics.
struct PassReset<'a, T>(&'a RefCell<Passes<T>>);

impl<T> Drop for PassReset<'_, T> {
    fn drop(&mut self) {
        let mut passes = self.0.borrow_mut();
        passes.running = false;
        passes.queued.clear();
    }
}

struct StoreInner<T> {
    state: RwLock<Arc<T>>,
    commit: ReentrantMutex<RefCell<Passes<T>>>,
    subscribers: Mutex<Vec<Entry<T>>>,
    next_id: AtomicU64,
}

/// Type-erased removal hook so [`Subscription`] need not name `T`.
trait Detach: Send + Sync {
    fn detach(&self, id: SubscriberId);
}

impl<T: Send + Sync> Detach for StoreInner<T> {
    fn detach(&self, id: SubscriberId) {
        let _commit = self.commit.lock();
        self.subscribers.lock().retain(|entry| entry.id != id);
    }
}

/// Observable holder of a single state value.
///
/// Cloning yields another handle to the same state and listeners.
pub struct Store<T> {
    inner: Arc<StoreInner<T>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Default + PartialEq + Send + Sync + 'static> Default for Store<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: PartialEq + Send + Sync + 'static> Store<T> {
    pub fn new(initial: T) -> Self {
        Self::from_arc(Arc::new(initial))
    }

    pub(crate) fn from_arc(initial: Arc<T>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: RwLock::new(initial),
                commit: ReentrantMutex::new(RefCell::new(Passes {
                    running: false,
                    queued: VecDeque::new(),
                })),
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Current snapshot. Never waits for an in-progress notification pass.
    pub fn get_state(&self) -> Arc<T> {
        Arc::clone(&self.inner.state.read())
    }

    /// Replace the state with `next`.
    pub fn set_state(&self, next: T) -> Result<(), StoreError> {
        self.commit(|_| Arc::new(next), false, |_| Ok(()))
            .map(|_| ())
    }

    /// Replace the state with `f(current)`, atomically with respect to other
    /// writers.
    pub fn update<F>(&self, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&T) -> T,
    {
        self.commit(|prev| Arc::new(f(prev)), false, |_| Ok(()))
            .map(|_| ())
    }

    /// Register `listener`; it runs after every committed update, in
    /// registration order, with the new state.
    #[must_use = "dropping the Subscription leaves the listener registered with no way to remove it"]
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) -> ListenerResult + Send + Sync + 'static,
    {
        let _commit = self.inner.commit.lock();
        let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let active = Arc::new(AtomicBool::new(true));
        self.inner.subscribers.lock().push(Entry {
            id,
            active: Arc::clone(&active),
            listener: Arc::new(listener),
        });

        let inner: Arc<dyn Detach> = self.inner.clone();
        Subscription {
            id,
            active,
            store: Arc::downgrade(&inner),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }

    /// A handle that can read and subscribe but not write.
    pub fn reader(&self) -> StoreReader<T> {
        StoreReader {
            store: self.clone(),
        }
    }

    /// Commit pipeline shared with [`PersistentStore`].
    ///
    /// Under the commit lock: compute the next state, skip if unchanged
    /// (unless `force`), run `before_swap` (a failure aborts with the state
    /// untouched), swap the snapshot, notify. A commit made from inside a
    /// running pass is queued behind it. Returns whether a commit happened.
    pub(crate) fn commit<F, P>(&self, f: F, force: bool, before_swap: P) -> Result<bool, StoreError>
    where
        F: FnOnce(&Arc<T>) -> Arc<T>,
        P: FnOnce(&T) -> Result<(), StoreError>,
    {
        let passes = self.inner.commit.lock();
        let prev = self.get_state();
        let next = f(&prev);

        if !force && *next == *prev {
            tracing::trace!("State unchanged, skipping notification");
            return Ok(false);
        }

        before_swap(&next)?;
        *self.inner.state.write() = Arc::clone(&next);

        if passes.borrow().running {
            tracing::trace!("Notification pass running, queueing nested commit");
            passes.borrow_mut().queued.push_back(next);
            return Ok(true);
        }

        self.drain(&passes, next)?;
        Ok(true)
    }

    /// Notify `first`, then every commit queued by listeners, in order.
    fn drain(&self, passes: &RefCell<Passes<T>>, first: Arc<T>) -> Result<(), StoreError> {
        passes.borrow_mut().running = true;
        let _reset = PassReset(passes);

        let mut failures = Vec::new();
        let mut pending = Some(first);
        while let Some(state) = pending.take() {
            self.notify(&state, &mut failures);
            pending = passes.borrow_mut().queued.pop_front();
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(StoreError::Subscribers(failures))
        }
    }

    fn notify(&self, state: &T, failures: &mut Vec<SubscriberFailure>) {
        // Snapshot so listeners can (un)subscribe without holding the list.
        let entries: Vec<Entry<T>> = self.inner.subscribers.lock().clone();

        for entry in entries {
            if !entry.active.load(Ordering::SeqCst) {
                continue;
            }
            if let Err(source) = (entry.listener)(state) {
                tracing::warn!(subscriber = %entry.id, error = %source, "Subscriber failed");
                failures.push(SubscriberFailure {
                    subscriber: entry.id,
                    source,
                });
            }
        }
    }
}

/// Read-only view of a [`Store`]: snapshots and subscriptions, no writes.
///
/// ```compile_fail
/// use resilient_client::store::Store;
///
/// let reader = Store::new(1).reader();
/// reader.set_state(2);
/// ```
pub struct StoreReader<T> {
    store: Store<T>,
}

impl<T> Clone for StoreReader<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<T: PartialEq + Send + Sync + 'static> StoreReader<T> {
    pub fn get_state(&self) -> Arc<T> {
        self.store.get_state()
    }

    #[must_use = "dropping the Subscription leaves the listener registered with no way to remove it"]
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) -> ListenerResult + Send + Sync + 'static,
    {
        self.store.subscribe(listener)
    }

    pub fn subscriber_count(&self) -> usize {
        self.store.subscriber_count()
    }
}

/// Handle returned by `subscribe`; call [`unsubscribe`](Self::unsubscribe)
/// to stop notifications.
///
/// Unsubscribing is idempotent, may happen from inside any listener, and
/// takes effect for the rest of an in-progress pass. Dropping the handle
/// does not unsubscribe.
#[derive(Clone)]
pub struct Subscription {
    id: SubscriberId,
    active: Arc<AtomicBool>,
    store: Weak<dyn Detach>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(store) = self.store.upgrade() {
            store.detach(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
