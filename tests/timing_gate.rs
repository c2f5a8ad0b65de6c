//! Coalesce and cap timing of `TimingGate` on a paused Tokio clock.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{at, Recorder};
use parking_lot::Mutex;
use resilient_client::{CancellationToken, GateMode, TimingGate, TimingSpec};
use tokio::time::{sleep, Instant};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Fire times must land within 1ms of the expected instant.
fn assert_fired_at(events: &[(u64, &'static str)], expected: &[(u64, &'static str)]) {
    assert_eq!(
        events.len(),
        expected.len(),
        "events {:?} vs expected {:?}",
        events,
        expected
    );
    for ((at, value), (want_at, want_value)) in events.iter().zip(expected) {
        assert_eq!(value, want_value);
        assert!(
            at.abs_diff(*want_at) <= 1,
            "{} fired at {}ms, expected {}ms",
            value,
            at,
            want_at
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_coalesce_fires_once_with_last_args() {
    let start = Instant::now();
    let recorder = Recorder::new();
    let gate = TimingGate::new(TimingSpec::coalesce(ms(100)).unwrap(), recorder.sink());

    gate.schedule("a0");
    at(start, 50).await;
    gate.schedule("a50");
    at(start, 80).await;
    gate.schedule("a80");
    at(start, 120).await;
    gate.schedule("a120");

    at(start, 500).await;
    assert_fired_at(&recorder.events(), &[(220, "a120")]);
}

#[tokio::test(start_paused = true)]
async fn test_coalesce_separate_bursts_fire_separately() {
    let start = Instant::now();
    let recorder = Recorder::new();
    let gate = TimingGate::new(TimingSpec::coalesce(ms(100)).unwrap(), recorder.sink());

    gate.schedule("first");
    at(start, 300).await;
    gate.schedule("second");

    at(start, 1000).await;
    assert_fired_at(&recorder.events(), &[(100, "first"), (400, "second")]);
}

#[tokio::test(start_paused = true)]
async fn test_coalesce_leading_fires_immediately_then_trailing() {
    let start = Instant::now();
    let recorder = Recorder::new();
    let spec = TimingSpec::coalesce(ms(100)).unwrap().with_leading(true);
    let gate = TimingGate::new(spec, recorder.sink());

    gate.schedule("a0");
    assert_eq!(recorder.values(), vec!["a0"]);
    at(start, 50).await;
    gate.schedule("a50");

    at(start, 500).await;
    assert_fired_at(&recorder.events(), &[(0, "a0"), (150, "a50")]);
}

#[tokio::test(start_paused = true)]
async fn test_coalesce_leading_single_call_fires_once() {
    let start = Instant::now();
    let recorder = Recorder::new();
    let spec = TimingSpec::coalesce(ms(100)).unwrap().with_leading(true);
    let gate = TimingGate::new(spec, recorder.sink());

    gate.schedule("only");
    at(start, 500).await;

    assert_fired_at(&recorder.events(), &[(0, "only")]);
}

#[tokio::test(start_paused = true)]
async fn test_cap_fires_first_then_last_per_window() {
    let start = Instant::now();
    let recorder = Recorder::new();
    let gate = TimingGate::new(TimingSpec::cap(ms(100)).unwrap(), recorder.sink());

    gate.schedule("a0");
    at(start, 10).await;
    gate.schedule("a10");
    at(start, 60).await;
    gate.schedule("a60");
    at(start, 110).await;
    gate.schedule("a110");
    at(start, 160).await;
    gate.schedule("a160");

    at(start, 1000).await;
    assert_fired_at(
        &recorder.events(),
        &[(0, "a0"), (100, "a60"), (200, "a160")],
    );
}

#[tokio::test(start_paused = true)]
async fn test_cap_call_after_quiet_window_fires_immediately() {
    let start = Instant::now();
    let recorder = Recorder::new();
    let gate = TimingGate::new(TimingSpec::cap(ms(100)).unwrap(), recorder.sink());

    gate.schedule("a0");
    at(start, 250).await;
    gate.schedule("a250");

    at(start, 1000).await;
    assert_fired_at(&recorder.events(), &[(0, "a0"), (250, "a250")]);
}

#[tokio::test(start_paused = true)]
async fn test_cap_without_leading_defers_first_call() {
    let start = Instant::now();
    let recorder = Recorder::new();
    let spec = TimingSpec::cap(ms(100)).unwrap().with_leading(false);
    let gate = TimingGate::new(spec, recorder.sink());

    gate.schedule("a0");
    assert!(recorder.values().is_empty());
    at(start, 30).await;
    gate.schedule("a30");

    at(start, 1000).await;
    assert_fired_at(&recorder.events(), &[(100, "a30")]);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_drops_pending_invocation() {
    let recorder = Recorder::new();
    let gate = TimingGate::new(TimingSpec::coalesce(ms(100)).unwrap(), recorder.sink());

    gate.schedule("dropped");
    assert!(gate.is_pending());
    sleep(ms(50)).await;
    gate.cancel();
    assert!(!gate.is_pending());

    sleep(ms(500)).await;
    assert!(recorder.values().is_empty());

    // The gate keeps working after a cancel
    gate.schedule("kept");
    sleep(ms(500)).await;
    assert_eq!(recorder.values(), vec!["kept"]);
}

#[tokio::test(start_paused = true)]
async fn test_cap_cancel_keeps_cooldown() {
    let start = Instant::now();
    let recorder = Recorder::new();
    let gate = TimingGate::new(TimingSpec::cap(ms(100)).unwrap(), recorder.sink());

    gate.schedule("a0");
    at(start, 20).await;
    gate.schedule("a20");
    gate.cancel();
    at(start, 40).await;
    gate.schedule("a40");

    at(start, 1000).await;
    assert_fired_at(&recorder.events(), &[(0, "a0"), (100, "a40")]);
}

#[tokio::test(start_paused = true)]
async fn test_flush_fires_pending_now() {
    let start = Instant::now();
    let recorder = Recorder::new();
    let gate = TimingGate::new(TimingSpec::coalesce(ms(100)).unwrap(), recorder.sink());

    assert!(!gate.flush());

    gate.schedule("a0");
    at(start, 30).await;
    assert!(gate.flush());
    assert!(!gate.is_pending());

    at(start, 1000).await;
    assert_fired_at(&recorder.events(), &[(30, "a0")]);
}

#[tokio::test(start_paused = true)]
async fn test_shared_token_makes_gate_inert() {
    let recorder = Recorder::new();
    let token = CancellationToken::new();
    let gate = TimingGate::with_cancellation(
        TimingSpec::coalesce(ms(100)).unwrap(),
        token.clone(),
        recorder.sink(),
    );

    gate.schedule("before");
    token.cancel();
    sleep(ms(500)).await;
    assert!(recorder.values().is_empty());

    gate.schedule("after");
    assert!(!gate.flush());
    sleep(ms(500)).await;
    assert!(recorder.values().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_dropping_gate_discards_pending() {
    let recorder = Recorder::new();
    let gate = TimingGate::new(TimingSpec::coalesce(ms(100)).unwrap(), recorder.sink());

    gate.schedule("orphan");
    drop(gate);

    sleep(ms(500)).await;
    assert!(recorder.values().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_target_may_reschedule_on_same_gate() {
    let recorder: Recorder<u32> = Recorder::new();
    let gate = std::sync::Arc::new(std::sync::OnceLock::<TimingGate<u32>>::new());

    let inner = gate.clone();
    let sink = recorder.clone();
    let _ = gate.set(TimingGate::new(
        TimingSpec::cap(ms(100)).unwrap(),
        move |n: u32| {
            sink.record(n);
            if n < 3 {
                if let Some(gate) = inner.get() {
                    gate.schedule(n + 1);
                }
            }
        },
    ));

    gate.get().unwrap().schedule(1);
    sleep(ms(1000)).await;

    assert_eq!(recorder.values(), vec![1, 2, 3]);
}

fn collector() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) + Send + Sync) {
    let fired = Arc::new(Mutex::new(Vec::new()));
    let sink = fired.clone();
    (fired, move |value| sink.lock().push(value))
}

#[test]
fn test_coalesce_without_runtime_drops_trailing_call() {
    let (fired, sink) = collector();
    let gate = TimingGate::new(TimingSpec::coalesce(ms(100)).unwrap(), sink);

    gate.schedule("a");
    gate.schedule("b");

    assert!(!gate.is_pending());
    assert!(!gate.flush());
    assert!(fired.lock().is_empty());
}

#[test]
fn test_leading_fires_without_runtime() {
    let (fired, sink) = collector();
    let coalesce = TimingGate::new(TimingSpec::new(GateMode::Coalesce, ms(100), true).unwrap(), sink);
    coalesce.schedule("a");
    coalesce.schedule("b");
    // No timer can close the idle period, so each call counts as leading
    assert_eq!(*fired.lock(), vec!["a", "b"]);

    let (fired, sink) = collector();
    let cap = TimingGate::new(TimingSpec::cap(ms(100)).unwrap(), sink);
    cap.schedule("first");
    cap.schedule("inside window");
    assert!(!cap.is_pending());
    assert_eq!(*fired.lock(), vec!["first"]);
}
