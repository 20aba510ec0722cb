//! End-to-end scenarios for live sessions
//!
//! These tests drive real pollers on tokio's paused clock, so every
//! timestamp below is exact milliseconds since the session started.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use livesync_core::{
    alerts, call, Clock, FetchError, LiveSession, Origin, PartialRecord, SessionEvent,
    SourceDescriptor, SourceId, Timestamp, TokioClock,
};

// ============================================================================
// Test Utilities
// ============================================================================

#[derive(Clone)]
struct Step {
    latency_ms: u64,
    result: Result<PartialRecord, FetchError>,
}

fn ok(data: PartialRecord) -> Step {
    Step {
        latency_ms: 0,
        result: Ok(data),
    }
}

fn slow(latency_ms: u64, data: PartialRecord) -> Step {
    Step {
        latency_ms,
        result: Ok(data),
    }
}

fn fail() -> Step {
    Step {
        latency_ms: 0,
        result: Err(FetchError::new("503 Service Unavailable")),
    }
}

/// A source that replays `steps` in order, repeating the last one forever,
/// and records when each fetch was issued.
fn scripted(
    id: &str,
    priority: u32,
    interval_ms: u64,
    clock: TokioClock,
    steps: Vec<Step>,
) -> (SourceDescriptor, Arc<Mutex<Vec<i64>>>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let issued = Arc::new(Mutex::new(Vec::new()));
    let issued_for_fetch = issued.clone();
    let steps = Arc::new(steps);

    let source = SourceDescriptor::from_fn(id, priority, move || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        let step = steps[n.min(steps.len() - 1)].clone();
        issued_for_fetch.lock().push(clock.now().as_millis());
        async move {
            if step.latency_ms > 0 {
                tokio::time::sleep(Duration::from_millis(step.latency_ms)).await;
            }
            step.result
        }
    })
    .interval(Duration::from_millis(interval_ms));

    (source, issued)
}

fn clock() -> TokioClock {
    TokioClock::starting_at(Timestamp(0))
}

async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

// ============================================================================
// Priority and Fallback
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_higher_priority_source_wins() {
    let clock = clock();
    let (status, _) = scripted(
        "status",
        1,
        10_000,
        clock.clone(),
        vec![ok(PartialRecord::new().with("status", "ringing"))],
    );
    let (conversation, _) = scripted(
        "conversation",
        2,
        10_000,
        clock.clone(),
        vec![slow(2, PartialRecord::new().with("status", "connected"))],
    );

    let session = LiveSession::builder("call-1")
        .source(status)
        .source(conversation)
        .clock(Arc::new(clock))
        .build()
        .unwrap();
    session.start().unwrap();
    sleep_ms(50).await;

    let state = session.state();
    assert_eq!(state.field("status"), Some(&json!("connected")));
    assert_eq!(
        state.provenance("status").unwrap().origin,
        Origin::Source(SourceId::new("conversation"))
    );
    session.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_call_monitor_falls_back_to_status_feed_until_conversation_known() {
    let clock = clock();
    let known = Arc::new(AtomicBool::new(false));
    let known_for_skip = known.clone();

    let status = livesync_core::FnFetcher::new(|| async {
        Ok(PartialRecord::new()
            .with("status", "in_progress")
            .with("conversation_id", "c-9"))
    });
    let conversation = livesync_core::FnFetcher::new(|| async {
        Ok(PartialRecord::new()
            .with("status", "in_progress")
            .with("transcript", json!(["hello", "hi there"])))
    });

    let session = LiveSession::builder("call-1")
        .sources(call::call_monitor_sources(status, conversation, move || {
            known_for_skip.load(Ordering::SeqCst)
        }))
        .clock(Arc::new(clock))
        .build()
        .unwrap();
    session.start().unwrap();
    sleep_ms(100).await;

    let state = session.state();
    assert_eq!(state.field("status"), Some(&json!("in_progress")));
    assert_eq!(state.field("transcript"), None);

    known.store(true, Ordering::SeqCst);
    sleep_ms(call::CONVERSATION_INTERVAL.as_millis() as u64).await;

    let state = session.state();
    assert_eq!(state.field("transcript"), Some(&json!(["hello", "hi there"])));
    assert_eq!(state.field("conversation_id"), Some(&json!("c-9")));
    assert_eq!(
        state.provenance("status").unwrap().origin,
        Origin::Source(SourceId::new(call::CONVERSATION_SOURCE))
    );
    session.shutdown();
}

// ============================================================================
// Optimistic Mutations
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_stale_refetch_keeps_read_then_fresh_refetch_confirms() {
    let clock = clock();
    let unread = PartialRecord::new()
        .with(alerts::read_field("x"), false)
        .with(alerts::read_field("y"), false);
    let read = PartialRecord::new()
        .with(alerts::read_field("x"), true)
        .with(alerts::read_field("y"), false);

    // t=0 unread; t=3000 issued but answers at t=7000, still unread;
    // t=10000 the server has caught up.
    let (source, issued) = scripted(
        "alerts",
        1,
        3_000,
        clock.clone(),
        vec![ok(unread.clone()), slow(4_000, unread), ok(read)],
    );

    let session = LiveSession::builder("alerts")
        .source(source)
        .clock(Arc::new(clock))
        .build()
        .unwrap();
    let mut events = session.events();
    session.start().unwrap();

    sleep_ms(5_000).await;
    let id = session.mark_read("x").await.unwrap();
    assert!(alerts::is_read(&session.state(), "x"));

    sleep_ms(3_000).await; // t=8000, stale response folded
    let state = session.state();
    assert!(alerts::is_read(&state, "x"), "stale refetch must not un-mark");
    assert!(state.pending_mutations.contains(&id));
    assert_eq!(
        state.provenance(&alerts::read_field("x")).unwrap().fetched_at,
        Timestamp(5_000)
    );

    sleep_ms(2_500).await; // t=10500
    let state = session.state();
    assert!(alerts::is_read(&state, "x"));
    assert!(state.pending_mutations.is_empty());
    let provenance = state.provenance(&alerts::read_field("x")).unwrap();
    assert_eq!(provenance.origin, Origin::Source(SourceId::new("alerts")));
    assert_eq!(provenance.fetched_at, Timestamp(10_000));

    assert_eq!(*issued.lock(), vec![0, 3_000, 10_000]);

    let mut confirmed = false;
    while let Ok(event) = events.try_recv() {
        if event == (SessionEvent::MutationConfirmed {
            mutation_id: id,
            source_id: SourceId::new("alerts"),
        }) {
            confirmed = true;
        }
    }
    assert!(confirmed);
    session.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_rollback_restores_server_value() {
    let clock = clock();
    let (source, _) = scripted(
        "alerts",
        1,
        60_000,
        clock.clone(),
        vec![ok(PartialRecord::new()
            .with(alerts::read_field("x"), false)
            .with(alerts::read_field("y"), false))],
    );

    let session = LiveSession::builder("alerts")
        .source(source)
        .clock(Arc::new(clock))
        .build()
        .unwrap();
    session.start().unwrap();
    sleep_ms(10).await;

    let x = session.mark_read("x").await.unwrap();
    let y = session.mark_read("y").await.unwrap();
    assert_eq!(alerts::unread_count(&session.state()), 0);

    // The write behind `x` failed.
    session.rollback(x).await.unwrap();
    let state = session.state();
    assert!(!alerts::is_read(&state, "x"));
    assert!(alerts::is_read(&state, "y"));
    assert_eq!(state.pending_mutations.iter().collect::<Vec<_>>(), vec![&y]);

    assert!(session.rollback(x).await.is_err(), "already rolled back");
    session.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_mark_all_read_confirms_only_when_every_alert_reflected() {
    let clock = clock();
    let ids = ["a", "b", "c"];
    let all = |read_b: bool| {
        PartialRecord::new()
            .with(alerts::read_field("a"), true)
            .with(alerts::read_field("b"), read_b)
            .with(alerts::read_field("c"), true)
    };
    let (source, _) = scripted(
        "alerts",
        1,
        1_000,
        clock.clone(),
        vec![
            ok(PartialRecord::new()
                .with(alerts::read_field("a"), false)
                .with(alerts::read_field("b"), false)
                .with(alerts::read_field("c"), false)),
            ok(all(false)),
            ok(all(true)),
        ],
    );

    let session = LiveSession::builder("alerts")
        .source(source)
        .clock(Arc::new(clock))
        .build()
        .unwrap();
    session.start().unwrap();
    sleep_ms(500).await;

    let id = session.mark_all_read(ids).await.unwrap();
    assert_eq!(alerts::unread_count(&session.state()), 0);

    sleep_ms(1_000).await; // t=1500: partial catch-up
    let state = session.state();
    assert!(state.pending_mutations.contains(&id));
    assert_eq!(alerts::unread_count(&state), 0);

    sleep_ms(1_000).await; // t=2500: fully reflected
    let state = session.state();
    assert!(state.pending_mutations.is_empty());
    assert_eq!(alerts::unread_count(&state), 0);
    session.shutdown();
}

// ============================================================================
// Failures, Skips and Teardown
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_consecutive_failures_back_off_and_keep_state() {
    let clock = clock();
    let (source, issued) = scripted(
        "status",
        1,
        1_000,
        clock.clone(),
        vec![ok(PartialRecord::new().with("status", "ringing")), fail()],
    );

    let mut config = livesync_core::SessionConfig::default();
    config.poller.max_backoff_ms = 10_000;

    let session = LiveSession::builder("call-1")
        .source(source)
        .config(config)
        .clock(Arc::new(clock))
        .build()
        .unwrap();
    let mut events = session.events();
    session.start().unwrap();
    sleep_ms(10).await;
    let before = session.state();

    sleep_ms(7_500).await;

    // success at 0, failures at 1000, then +2000, +4000
    assert_eq!(*issued.lock(), vec![0, 1_000, 3_000, 7_000]);
    assert_eq!(session.state(), before);

    let all_health = session.health();
    let health = &all_health[&SourceId::new("status")];
    assert_eq!(health.consecutive_failures, 3);
    assert!(health.stale);
    assert_eq!(health.last_success, Some(Timestamp(0)));

    let mut stale_events = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::SourceStale { .. }) {
            stale_events += 1;
        }
    }
    assert_eq!(stale_events, 1);
    session.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_skipped_sources_leave_state_untouched() {
    let clock = clock();
    let gate = Arc::new(AtomicBool::new(false));

    let skip_a = gate.clone();
    let (a, a_issued) = scripted(
        "status",
        1,
        1_000,
        clock.clone(),
        vec![ok(PartialRecord::new().with("status", "ringing"))],
    );
    let skip_b = gate.clone();
    let (b, _) = scripted(
        "conversation",
        2,
        1_000,
        clock.clone(),
        vec![ok(PartialRecord::new().with("agent", "ana"))],
    );

    let session = LiveSession::builder("call-1")
        .source(a.skip_when(move || skip_a.load(Ordering::SeqCst)))
        .source(b.skip_when(move || skip_b.load(Ordering::SeqCst)))
        .clock(Arc::new(clock))
        .build()
        .unwrap();

    let notifications = Arc::new(AtomicUsize::new(0));
    let notifications_in_cb = notifications.clone();
    let _sub = session.subscribe(move |_| {
        notifications_in_cb.fetch_add(1, Ordering::SeqCst);
    });

    session.start().unwrap();
    sleep_ms(10).await;
    let before = session.state();
    let notified_before = notifications.load(Ordering::SeqCst);
    assert_eq!(before.value.len(), 2);

    gate.store(true, Ordering::SeqCst);
    sleep_ms(20_000).await;

    assert_eq!(session.state(), before);
    assert_eq!(notifications.load(Ordering::SeqCst), notified_before);
    assert_eq!(a_issued.lock().len(), 1);
    session.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_pull_to_refresh_fetches_every_source() {
    let clock = clock();
    let (a, a_issued) = scripted("status", 1, 60_000, clock.clone(), vec![ok(PartialRecord::new())]);
    let (b, b_issued) =
        scripted("conversation", 2, 60_000, clock.clone(), vec![ok(PartialRecord::new())]);

    let session = LiveSession::builder("call-1")
        .source(a)
        .source(b)
        .clock(Arc::new(clock))
        .build()
        .unwrap();
    session.start().unwrap();
    sleep_ms(100).await;

    session.trigger_now();
    sleep_ms(1).await;

    assert_eq!(*a_issued.lock(), vec![0, 100]);
    assert_eq!(*b_issued.lock(), vec![0, 100]);
    session.shutdown();
}

#[tokio::test(start_paused = true)]
async fn test_late_response_after_shutdown_never_reaches_store() {
    let clock = clock();
    let (source, _) = scripted(
        "conversation",
        2,
        1_000,
        clock.clone(),
        vec![slow(5_000, PartialRecord::new().with("status", "connected"))],
    );

    let session = LiveSession::builder("call-1")
        .source(source)
        .clock(Arc::new(clock))
        .build()
        .unwrap();
    let store = session.store().clone();
    session.start().unwrap();

    sleep_ms(1_000).await;
    session.shutdown();
    sleep_ms(10_000).await;

    assert!(store.get("call-1").is_none());
    assert!(session.health().values().all(|h| h.state == livesync_core::PollerState::Stopped));
}
