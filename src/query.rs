//! Store-backed request wrapper for presentation code.
//!
//! A [`Query`] is the only way UI-level code reaches the executor: it runs
//! operations and publishes their lifecycle into a [`Store`] that views read
//! and subscribe to. [`Query::gate`] puts a [`TimingGate`] in front of it, so
//! a search box can feed keystrokes straight in.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;

use crate::cancel::CancellationToken;
use crate::gate::{TimingGate, TimingSpec};
use crate::request::{Operation, RequestError, RequestExecutor, RetryPolicy};
use crate::store::{Store, StoreError, StoreReader};

/// Lifecycle of the most recent run.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum QueryState<R> {
    #[default]
    Idle,
    Loading,
    Ready(R),
    Failed(RequestError),
}

impl<R> QueryState<R> {
    pub fn is_loading(&self) -> bool {
        matches!(self, QueryState::Loading)
    }

    pub fn data(&self) -> Option<&R> {
        match self {
            QueryState::Ready(data) => Some(data),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&RequestError> {
        match self {
            QueryState::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Runs operations through a [`RequestExecutor`] and keeps the outcome of
/// the latest one in a [`Store`].
///
/// Starting a run cancels the previous in-flight run, and results that
/// arrive after a newer run started are discarded.
pub struct Query<R> {
    store: Store<QueryState<R>>,
    executor: Arc<RequestExecutor>,
    policy: RetryPolicy,
    scope: CancellationToken,
    in_flight: Mutex<Option<(u64, CancellationToken)>>,
    latest: AtomicU64,
}

impl<R> Query<R>
where
    R: DeserializeOwned + PartialEq + Send + Sync + 'static,
{
    pub fn new(executor: Arc<RequestExecutor>) -> Self {
        let policy = executor.policy().clone();
        Self {
            store: Store::new(QueryState::Idle),
            executor,
            policy,
            scope: CancellationToken::new(),
            in_flight: Mutex::new(None),
            latest: AtomicU64::new(0),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Tie every run (and any gate built from this query) to `scope`.
    pub fn with_scope(mut self, scope: CancellationToken) -> Self {
        self.scope = scope;
        self
    }

    /// Read-only view of the published state.
    pub fn reader(&self) -> StoreReader<QueryState<R>> {
        self.store.reader()
    }

    pub fn state(&self) -> Arc<QueryState<R>> {
        self.store.get_state()
    }

    pub fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    /// Execute `operation`, publishing `Loading` and then `Ready`/`Failed`.
    ///
    /// The returned error only reports listener or store failures; request
    /// failures land in the state as [`QueryState::Failed`].
    pub async fn run(&self, operation: Operation) -> Result<(), StoreError> {
        let token = self.scope.child_token();
        let (ticket, previous) = {
            let mut in_flight = self.in_flight.lock();
            let ticket = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
            (ticket, in_flight.replace((ticket, token.clone())))
        };
        if let Some((_, previous)) = previous {
            previous.cancel();
        }

        self.publish(ticket, QueryState::Loading)?;

        let outcome = self
            .executor
            .execute_json::<R>(&operation, Some(&self.policy), Some(&token))
            .await;

        {
            let mut in_flight = self.in_flight.lock();
            if in_flight.as_ref().is_some_and(|(t, _)| *t == ticket) {
                in_flight.take();
            }
        }

        let next = match outcome {
            Ok(data) => QueryState::Ready(data),
            Err(err) => {
                tracing::debug!(operation = %operation, error = %err, "Query failed");
                QueryState::Failed(err)
            }
        };
        if !self.publish(ticket, next)? {
            tracing::debug!(operation = %operation, "Discarding superseded result");
        }
        Ok(())
    }

    /// Commit `next` only while `ticket` is still the latest run. The check
    /// runs under the store's commit lock, so a newer run's `Loading` is
    /// always ordered after it.
    fn publish(&self, ticket: u64, next: QueryState<R>) -> Result<bool, StoreError> {
        let mut current = true;
        self.store.commit(
            |prev| {
                if self.latest.load(Ordering::SeqCst) == ticket {
                    Arc::new(next)
                } else {
                    current = false;
                    Arc::clone(prev)
                }
            },
            false,
            |_| Ok(()),
        )?;
        Ok(current)
    }

    /// Cancel the in-flight run, if any.
    pub fn cancel(&self) {
        let in_flight = self.in_flight.lock().take();
        if let Some((_, token)) = in_flight {
            token.cancel();
        }
    }

    /// Reset to `Idle`, cancelling anything in flight.
    pub fn reset(&self) -> Result<(), StoreError> {
        let in_flight = {
            let mut in_flight = self.in_flight.lock();
            self.latest.fetch_add(1, Ordering::SeqCst);
            in_flight.take()
        };
        if let Some((_, token)) = in_flight {
            token.cancel();
        }
        self.store.set_state(QueryState::Idle)
    }

    /// A gate whose permitted calls start a run on the Tokio runtime.
    ///
    /// The gate shares this query's scope token: once the scope is
    /// cancelled, scheduling and flushing do nothing.
    pub fn gate(self: &Arc<Self>, spec: TimingSpec) -> TimingGate<Operation> {
        let query = Arc::clone(self);
        TimingGate::with_cancellation(spec, self.scope.clone(), move |operation| {
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                tracing::warn!(operation = %operation, "No Tokio runtime, dropping query run");
                return;
            };
            let query = Arc::clone(&query);
            runtime.spawn(async move {
                if let Err(e) = query.run(operation).await {
                    tracing::warn!(error = %e, "Failed to publish query state");
                }
            });
        })
    }
}
