//! Shared test utilities and mock infrastructure.

#![allow(dead_code, unused_imports)]

pub mod mock_server;

use async_trait::async_trait;
use parking_lot::Mutex;
use resilient_client::request::{Operation, Response, Transport, TransportError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// One scripted outcome of a transport call.
#[derive(Debug, Clone)]
pub enum Scripted {
    Respond(u16, String),
    Fail(TransportError),
    /// Respond after sleeping (on the Tokio clock).
    Slow(Duration, u16, String),
    /// Never complete.
    Hang,
}

impl Scripted {
    pub fn ok(body: &str) -> Self {
        Scripted::Respond(200, body.to_string())
    }

    pub fn status(status: u16) -> Self {
        Scripted::Respond(status, format!(r#"{{"error": "status {}"}}"#, status))
    }

    pub fn unreachable() -> Self {
        Scripted::Fail(TransportError::Connect("connection refused".to_string()))
    }
}

/// In-memory transport that replays a script and records every call.
///
/// Once the script runs out the last step repeats.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    last: Mutex<Option<Scripted>>,
    attempts: AtomicU32,
    calls: Mutex<Vec<(Instant, Operation)>>,
}

impl ScriptedTransport {
    pub fn new(script: Vec<Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            attempts: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<(Instant, Operation)> {
        self.calls.lock().clone()
    }

    fn next_step(&self) -> Scripted {
        let next = self.script.lock().pop_front();
        let mut last = self.last.lock();
        match next {
            Some(step) => {
                *last = Some(step.clone());
                step
            }
            None => last.clone().unwrap_or_else(|| Scripted::ok("{}")),
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, operation: &Operation) -> Result<Response, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().push((Instant::now(), operation.clone()));

        match self.next_step() {
            Scripted::Respond(status, body) => Ok(Response::new(status, body)),
            Scripted::Fail(err) => Err(err),
            Scripted::Slow(delay, status, body) => {
                tokio::time::sleep(delay).await;
                Ok(Response::new(status, body))
            }
            Scripted::Hang => std::future::pending().await,
        }
    }
}

/// Answers `{"items": [<target>]}` after a short wall-clock pause, for
/// runs that must overlap on a multi-threaded runtime.
pub struct EchoTransport;

#[async_trait]
impl Transport for EchoTransport {
    async fn send(&self, operation: &Operation) -> Result<Response, TransportError> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        let body = serde_json::json!({ "items": [operation.target()] });
        Ok(Response::new(200, body.to_string()))
    }
}

/// Collects values with the virtual time (ms since `start`) they arrived at.
#[derive(Clone)]
pub struct Recorder<A> {
    start: Instant,
    events: Arc<Mutex<Vec<(u64, A)>>>,
}

impl<A: Clone + Send + 'static> Recorder<A> {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn record(&self, value: A) {
        let at = self.start.elapsed().as_millis() as u64;
        self.events.lock().push((at, value));
    }

    /// A `Fn(A)` that records into this recorder.
    pub fn sink(&self) -> impl Fn(A) + Send + Sync + 'static {
        let recorder = self.clone();
        move |value| recorder.record(value)
    }

    pub fn events(&self) -> Vec<(u64, A)> {
        self.events.lock().clone()
    }

    pub fn values(&self) -> Vec<A> {
        self.events.lock().iter().map(|(_, v)| v.clone()).collect()
    }
}

/// Sleep on the Tokio clock until `ms` after `start`.
pub async fn at(start: Instant, ms: u64) {
    tokio::time::sleep_until(start + Duration::from_millis(ms)).await;
}
