//! Timing gates: debounce (`coalesce`) and throttle (`cap`).
//!
//! A [`TimingGate`] sits between a high-frequency caller (keystrokes, scroll
//! events) and a target operation, deciding which calls reach the target and
//! when. Each gate owns its timer; there is no process-wide timer registry.
//!
//! # Coalesce
//!
//! Every call pushes the trailing deadline to `now + interval`; when the
//! deadline passes, the target runs once with the last call's arguments.
//! With `leading`, the first call of an idle period also fires immediately.
//! A burst of one call with `leading` set fires only the leading invocation.
//!
//! # Cap
//!
//! The first call fires immediately and opens a cooldown window of
//! `interval`. Calls inside the window replace a single deferred slot
//! (last call wins) that fires exactly at window expiry and opens the next
//! window. With `leading` unset the first call is deferred to the end of
//! its window as well.
//!
//! Timers run on the ambient Tokio runtime. Called outside one, `schedule`
//! cannot arm a timer: immediate fires still happen, but any trailing or
//! deferred invocation is dropped with a warning.

mod timing_spec;

pub use timing_spec::{GateError, GateMode, TimingSpec};

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::cancel::CancellationToken;

type Target<A> = Box<dyn Fn(A) + Send + Sync>;

/// Rate-limits calls to a target function.
///
/// The target is never invoked while the gate's internal lock is held, so it
/// may call back into the gate.
pub struct TimingGate<A: Send + 'static> {
    inner: Arc<GateInner<A>>,
}

struct GateInner<A> {
    spec: TimingSpec,
    target: Target<A>,
    cancel: Option<CancellationToken>,
    state: Mutex<GateState<A>>,
}

struct GateState<A> {
    /// Arguments waiting for the trailing (coalesce) or deferred (cap) fire.
    pending: Option<A>,
    /// Coalesce: trailing fire time. Cap: end of the current cooldown.
    deadline: Option<Instant>,
    timer: Option<JoinHandle<()>>,
    /// Bumped whenever a timer is armed or disarmed; stale timers compare
    /// against it and exit without firing.
    generation: u64,
}

impl<A> GateState<A> {
    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation = self.generation.wrapping_add(1);
    }
}

impl<A: Send + 'static> TimingGate<A> {
    pub fn new<F>(spec: TimingSpec, target: F) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Self::build(spec, None, Box::new(target))
    }

    /// Create a gate that goes inert once `cancel` fires: pending work is
    /// dropped and later `schedule`/`flush` calls do nothing.
    pub fn with_cancellation<F>(spec: TimingSpec, cancel: CancellationToken, target: F) -> Self
    where
        F: Fn(A) + Send + Sync + 'static,
    {
        Self::build(spec, Some(cancel), Box::new(target))
    }

    fn build(spec: TimingSpec, cancel: Option<CancellationToken>, target: Target<A>) -> Self {
        Self {
            inner: Arc::new(GateInner {
                spec,
                target,
                cancel,
                state: Mutex::new(GateState {
                    pending: None,
                    deadline: None,
                    timer: None,
                    generation: 0,
                }),
            }),
        }
    }

    pub fn spec(&self) -> &TimingSpec {
        &self.inner.spec
    }

    /// Register a call. Depending on the policy the target runs now, later,
    /// or not at all.
    pub fn schedule(&self, args: A) {
        let inner = &self.inner;
        let fire_now = {
            let mut state = inner.state.lock();
            if inner.is_cancelled() {
                state.pending = None;
                state.disarm();
                tracing::debug!("Gate cancelled, dropping call");
                return;
            }
            match inner.spec.mode() {
                GateMode::Coalesce => inner.schedule_coalesce(&mut state, args),
                GateMode::Cap => inner.schedule_cap(&mut state, args),
            }
        };

        if let Some(args) = fire_now {
            (inner.target)(args);
        }
    }

    /// Drop any pending trailing or deferred invocation without firing it.
    ///
    /// A cap gate keeps its current cooldown window.
    pub fn cancel(&self) {
        let mut state = self.inner.state.lock();
        state.pending = None;
        state.disarm();
        if self.inner.spec.mode() == GateMode::Coalesce {
            state.deadline = None;
        }
    }

    /// Fire the pending invocation right now, on the caller's thread.
    ///
    /// Returns whether the target ran. For a cap gate the flush opens a new
    /// cooldown window.
    pub fn flush(&self) -> bool {
        let inner = &self.inner;
        let args = {
            let mut state = inner.state.lock();
            if inner.is_cancelled() {
                state.pending = None;
                state.disarm();
                return false;
            }
            let Some(args) = state.pending.take() else {
                return false;
            };
            state.disarm();
            state.deadline = match inner.spec.mode() {
                GateMode::Coalesce => None,
                GateMode::Cap => Some(Instant::now() + inner.spec.interval()),
            };
            args
        };

        (inner.target)(args);
        true
    }

    /// Whether an invocation is waiting for its timer.
    pub fn is_pending(&self) -> bool {
        self.inner.state.lock().pending.is_some()
    }
}

impl<A: Send + 'static> GateInner<A> {
    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    fn schedule_coalesce(self: &Arc<Self>, state: &mut GateState<A>, args: A) -> Option<A> {
        let leading = self.spec.leading() && state.deadline.is_none();
        let deadline = Instant::now() + self.spec.interval();
        if !self.arm(state, deadline) {
            state.pending = None;
            state.deadline = None;
            return leading.then_some(args);
        }

        state.deadline = Some(deadline);
        if leading {
            Some(args)
        } else {
            state.pending = Some(args);
            None
        }
    }

    fn schedule_cap(self: &Arc<Self>, state: &mut GateState<A>, args: A) -> Option<A> {
        let now = Instant::now();
        match state.deadline {
            Some(until) if now < until => {
                // Last call wins the single deferred slot.
                if state.timer.is_some() || self.arm(state, until) {
                    state.pending = Some(args);
                }
                None
            }
            _ => {
                let until = now + self.spec.interval();
                state.deadline = Some(until);
                if self.spec.leading() {
                    return Some(args);
                }
                if self.arm(state, until) {
                    state.pending = Some(args);
                }
                None
            }
        }
    }

    /// Replace the timer with one firing at `at`. Returns false, leaving
    /// the gate disarmed, when there is no runtime to run it on.
    fn arm(self: &Arc<Self>, state: &mut GateState<A>, at: Instant) -> bool {
        state.disarm();
        let Ok(runtime) = Handle::try_current() else {
            tracing::warn!(mode = ?self.spec.mode(), "No Tokio runtime, dropping gated call");
            return false;
        };
        let generation = state.generation;
        let gate: Weak<Self> = Arc::downgrade(self);
        state.timer = Some(runtime.spawn(async move {
            sleep_until(at).await;
            if let Some(gate) = gate.upgrade() {
                gate.expire(generation);
            }
        }));
        true
    }

    fn expire(&self, generation: u64) {
        let fire = {
            let mut state = self.state.lock();
            if state.generation != generation {
                return;
            }
            // Detach rather than abort: this is the running timer task.
            state.timer = None;
            if self.is_cancelled() {
                state.pending = None;
                return;
            }
            match self.spec.mode() {
                GateMode::Coalesce => {
                    state.deadline = None;
                    state.pending.take()
                }
                GateMode::Cap => {
                    let args = state.pending.take();
                    if args.is_some() {
                        state.deadline = Some(Instant::now() + self.spec.interval());
                    }
                    args
                }
            }
        };

        if let Some(args) = fire {
            (self.target)(args);
        }
    }
}

impl<A: Send + 'static> Drop for TimingGate<A> {
    fn drop(&mut self) {
        self.inner.state.lock().disarm();
    }
}
