//! Scripted sessions against in-memory sources.
//!
//! Every line printed starts with the simulated time (`t=<ms>`), so the
//! output reads as a timeline of published states and session events.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use livesync_core::{
    alerts, call, Clock, FetchError, FnFetcher, LiveSession, MergedState, MutationId,
    PartialRecord, SessionConfig, SessionEvent, SourceDescriptor, Subscription, Timestamp,
    TokioClock,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::warn;

use crate::Scenario;

/// Read flags held by the simulated alert backend
type AlertServer = Arc<Mutex<BTreeMap<String, bool>>>;

const STATUS_LATENCY: Duration = Duration::from_millis(200);
const CONVERSATION_LATENCY: Duration = Duration::from_millis(1_500);
const ALERTS_LATENCY: Duration = Duration::from_millis(800);
const WRITE_LATENCY: Duration = Duration::from_millis(2_500);

pub async fn run(scenario: Scenario, config: SessionConfig) -> Result<()> {
    match scenario {
        Scenario::Call {
            seconds,
            status_failures,
        } => simulate_call(config, seconds, status_failures).await,
        Scenario::Alerts {
            seconds,
            fail_writes,
        } => simulate_alerts(config, seconds, fail_writes).await,
    }
}

// ============================================================================
// Output
// ============================================================================

fn render(state: &MergedState) -> String {
    let mut line = serde_json::to_string(&state.value).unwrap_or_default();
    if !state.pending_mutations.is_empty() {
        line.push_str(&format!(" pending={}", state.pending_mutations.len()));
    }
    line
}

fn describe(event: &SessionEvent) -> Option<String> {
    match event {
        SessionEvent::SourceStale {
            source_id,
            consecutive_failures,
        } => Some(format!(
            "source {} stale after {} failures",
            source_id, consecutive_failures
        )),
        SessionEvent::SourceRecovered { source_id } => {
            Some(format!("source {} recovered", source_id))
        }
        SessionEvent::MutationConfirmed {
            mutation_id,
            source_id,
        } => Some(format!("{} confirmed by {}", mutation_id, source_id)),
        SessionEvent::MutationRolledBack { mutation_id } => {
            Some(format!("{} rolled back", mutation_id))
        }
        SessionEvent::StatePublished { .. } => None,
    }
}

/// Print every published state and every notable session event
fn watch(session: &LiveSession, clock: Arc<TokioClock>) -> Subscription {
    let mut events = session.events();
    let event_clock = clock.clone();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    if let Some(line) = describe(&event) {
                        println!("{} event {}", event_clock.now(), line);
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    session.subscribe(move |state| println!("{} state {}", clock.now(), render(state)))
}

fn print_health(session: &LiveSession) {
    for (id, health) in session.health() {
        println!(
            "  {} {} failures={} stale={}",
            id, health.state, health.consecutive_failures, health.stale
        );
    }
}

// ============================================================================
// Call Monitor
// ============================================================================

/// What the status endpoint reports at `t`
fn call_status_at(t: i64) -> PartialRecord {
    match t {
        t if t < 4_000 => PartialRecord::new()
            .with("status", "ringing")
            .with_absent("conversation_id"),
        t if t < 14_000 => PartialRecord::new()
            .with("status", "connected")
            .with("conversation_id", "c-42")
            .with("duration", (t - 4_000) / 1_000),
        _ => PartialRecord::new()
            .with("status", "ended")
            .with("conversation_id", "c-42")
            .with("duration", 10),
    }
}

/// What the conversation endpoint reports at `t`
fn conversation_at(t: i64) -> PartialRecord {
    let status = if t < 14_000 { "connected" } else { "ended" };
    PartialRecord::new()
        .with("status", status)
        .with("agent", "ana")
        .with("transcript_lines", (t - 4_000).max(0) / 2_000)
}

async fn simulate_call(config: SessionConfig, seconds: u64, status_failures: u32) -> Result<()> {
    let clock = Arc::new(TokioClock::starting_at(Timestamp::ZERO));
    let conversation_known = Arc::new(AtomicBool::new(false));
    let status_calls = Arc::new(AtomicU32::new(0));

    let status = {
        let clock = clock.clone();
        let known = conversation_known.clone();
        FnFetcher::new(move || {
            let issued_at = clock.now().as_millis();
            let call = status_calls.fetch_add(1, Ordering::SeqCst);
            let known = known.clone();
            async move {
                sleep(STATUS_LATENCY).await;
                if call >= 3 && call < 3 + status_failures {
                    return Err(FetchError::new("status endpoint returned 503"));
                }
                let record = call_status_at(issued_at);
                if matches!(record.get("conversation_id"), Some(Some(_))) {
                    known.store(true, Ordering::SeqCst);
                }
                Ok(record)
            }
        })
    };

    let conversation = {
        let clock = clock.clone();
        FnFetcher::new(move || {
            let issued_at = clock.now().as_millis();
            async move {
                sleep(CONVERSATION_LATENCY).await;
                Ok::<_, FetchError>(conversation_at(issued_at))
            }
        })
    };

    let known = conversation_known.clone();
    let session = LiveSession::builder("call-42")
        .sources(call::call_monitor_sources(status, conversation, move || {
            known.load(Ordering::SeqCst)
        }))
        .config(config)
        .clock(clock.clone())
        .build()?;

    println!("Simulating call monitor for {}s", seconds);
    let _subscription = watch(&session, clock.clone());
    session.start()?;

    sleep(Duration::from_secs(seconds)).await;

    println!("{} final {}", clock.now(), render(&session.state()));
    print_health(&session);
    session.shutdown();
    Ok(())
}

// ============================================================================
// Alert List
// ============================================================================

fn alerts_source(server: AlertServer) -> SourceDescriptor {
    SourceDescriptor::from_fn(alerts::ALERTS_PREFIX, 1, move || {
        // The response reflects the backend as of when the request was sent.
        let list: Vec<Value> = server
            .lock()
            .iter()
            .map(|(id, read)| json!({ "id": id, "read": read, "title": format!("Alert {}", id) }))
            .collect();
        async move {
            sleep(ALERTS_LATENCY).await;
            Ok::<_, FetchError>(alerts::alert_list_fields(&list))
        }
    })
    .interval(Duration::from_secs(3))
}

/// Simulate the backing write for a read-flag mutation
fn spawn_write(
    session: Arc<LiveSession>,
    server: AlertServer,
    clock: Arc<TokioClock>,
    mutation_id: MutationId,
    alert_ids: Vec<&'static str>,
    fail: bool,
) {
    tokio::spawn(async move {
        sleep(WRITE_LATENCY).await;
        if fail {
            println!("{} write failed for {}", clock.now(), mutation_id);
            if let Err(e) = session.rollback(mutation_id).await {
                warn!(%mutation_id, error = %e, "Rollback failed");
            }
        } else {
            let mut server = server.lock();
            for id in alert_ids {
                server.insert(id.to_string(), true);
            }
            println!("{} write stored for {}", clock.now(), mutation_id);
        }
    });
}

async fn simulate_alerts(config: SessionConfig, seconds: u64, fail_writes: bool) -> Result<()> {
    let clock = Arc::new(TokioClock::starting_at(Timestamp::ZERO));
    let server: AlertServer = Arc::new(Mutex::new(
        ["a1", "a2", "a3"]
            .iter()
            .map(|id| (id.to_string(), false))
            .collect(),
    ));

    let session = Arc::new(
        LiveSession::builder("alerts")
            .source(alerts_source(server.clone()))
            .config(config)
            .clock(clock.clone())
            .build()?,
    );

    let seconds = seconds.max(10);
    println!("Simulating alert list for {}s", seconds);
    let _subscription = watch(&session, clock.clone());
    session.start()?;
    let start = Instant::now();

    sleep_until(start + Duration::from_millis(1_000)).await;
    let id = session.mark_read("a1").await?;
    println!("{} mark_read a1 -> {}", clock.now(), id);
    spawn_write(session.clone(), server.clone(), clock.clone(), id, vec!["a1"], fail_writes);

    sleep_until(start + Duration::from_millis(7_000)).await;
    let id = session.mark_all_read(["a2", "a3"]).await?;
    println!("{} mark_all_read a2,a3 -> {}", clock.now(), id);
    spawn_write(
        session.clone(),
        server.clone(),
        clock.clone(),
        id,
        vec!["a2", "a3"],
        fail_writes,
    );

    sleep_until(start + Duration::from_secs(seconds)).await;

    let state = session.state();
    println!("{} final {}", clock.now(), render(&state));
    println!("  unread={}", alerts::unread_count(&state));
    print_health(&session);
    session.shutdown();
    Ok(())
}
