//! Resilient client-state core.
//!
//! - [`request`]: execute operations with timeout, bounded retry and backoff.
//! - [`gate`]: debounce/throttle high-frequency calls.
//! - [`store`]: observable state with optional durable persistence.
//! - [`query`]: the store-backed wrapper presentation code goes through.

pub mod cancel;
pub mod config;
pub mod gate;
pub mod logging;
pub mod query;
pub mod request;
pub mod store;

pub use cancel::CancellationToken;
pub use gate::{GateMode, TimingGate, TimingSpec};
pub use query::{Query, QueryState};
pub use request::{Operation, RequestError, RequestExecutor, RetryPolicy};
pub use store::{PersistentStore, Store, StoreError, StoreReader, Subscription};
