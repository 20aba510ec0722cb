//! Periodic fetch loop for a single source
//!
//! A `Poller` owns one background task that ticks at the source's interval,
//! honors the source's skip predicate, and backs off exponentially while the
//! source keeps failing. It only ever emits messages on its channel; writing
//! the store is the session's job.
//!
//! ## State machine
//!
//! ```text
//! Idle ──start──▶ Scheduled ──tick──▶ InFlight ──ok──▶ Scheduled
//!                     ▲                  │
//!                     └──── Backoff ◀────┘ err
//!
//! any state ──stop──▶ Stopped (terminal)
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::PollerConfig;
use crate::events::{PollerState, SourceHealth};
use crate::snapshot::Snapshot;
use crate::source::SourceDescriptor;
use crate::types::SourceId;

/// Messages a poller sends to its session
#[derive(Debug, Clone, PartialEq)]
pub enum PollerMessage {
    /// Result of one fetch (successful or not)
    Snapshot(Snapshot),
    /// The source reached its consecutive-failure threshold
    Stale {
        source_id: SourceId,
        consecutive_failures: u32,
    },
    /// A stale source fetched successfully again
    Recovered { source_id: SourceId },
}

struct PollerShared {
    source: SourceDescriptor,
    config: PollerConfig,
    clock: Arc<dyn Clock>,
    tx: mpsc::UnboundedSender<PollerMessage>,
    health: Mutex<SourceHealth>,
    trigger: Notify,
    cancel: CancellationToken,
}

impl PollerShared {
    fn set_state(&self, state: PollerState) {
        self.health.lock().state = state;
    }
}

/// Background poller for one [`SourceDescriptor`]
pub struct Poller {
    shared: Arc<PollerShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Poller {
    pub fn new(
        source: SourceDescriptor,
        config: PollerConfig,
        clock: Arc<dyn Clock>,
        tx: mpsc::UnboundedSender<PollerMessage>,
    ) -> Self {
        Self {
            shared: Arc::new(PollerShared {
                source,
                config,
                clock,
                tx,
                health: Mutex::new(SourceHealth::default()),
                trigger: Notify::new(),
                cancel: CancellationToken::new(),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn source_id(&self) -> &SourceId {
        &self.shared.source.id
    }

    pub fn config(&self) -> &PollerConfig {
        &self.shared.config
    }

    pub fn health(&self) -> SourceHealth {
        self.shared.health.lock().clone()
    }

    pub fn state(&self) -> PollerState {
        self.shared.health.lock().state
    }

    /// Start the timer loop. The first fetch happens immediately.
    ///
    /// Returns `false` if the poller is already running or was stopped.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock();
        if task.is_some() || self.shared.cancel.is_cancelled() {
            return false;
        }

        info!(source_id = %self.shared.source.id, interval_ms = self.shared.config.interval_ms, "Starting poller");
        self.shared.set_state(PollerState::Scheduled);
        let shared = self.shared.clone();
        *task = Some(tokio::spawn(async move {
            Self::run(shared).await;
        }));
        true
    }

    /// Fetch now, outside the regular schedule
    pub fn trigger_now(&self) {
        debug!(source_id = %self.shared.source.id, "Poll triggered");
        self.shared.trigger.notify_one();
    }

    /// Cancel the timer and abort any in-flight fetch. Terminal.
    pub fn stop(&self) {
        if self.shared.cancel.is_cancelled() {
            return;
        }
        self.shared.cancel.cancel();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.shared.set_state(PollerState::Stopped);
        info!(source_id = %self.shared.source.id, "Poller stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    async fn run(shared: Arc<PollerShared>) {
        let source_id = shared.source.id.clone();
        let mut failures: u32 = 0;
        let mut delay = Duration::ZERO;

        loop {
            tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => break,
                _ = shared.trigger.notified() => {}
                _ = tokio::time::sleep(delay) => {}
            }

            if shared.source.should_skip() {
                debug!(%source_id, "Source skipped this tick");
                delay = shared.config.interval();
                continue;
            }

            let issued_at = shared.clock.now();
            shared.set_state(PollerState::InFlight);

            let result = tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => break,
                result = shared.source.fetch() => result,
            };

            // A response that lands after stop() must not reach the session.
            if shared.cancel.is_cancelled() {
                break;
            }

            let messages = match result {
                Ok(data) => {
                    let recovered = {
                        let mut health = shared.health.lock();
                        let was_stale = health.stale;
                        health.state = PollerState::Scheduled;
                        health.consecutive_failures = 0;
                        health.last_success = Some(issued_at);
                        health.last_error = None;
                        health.stale = false;
                        was_stale
                    };
                    if failures > 0 {
                        debug!(%source_id, previous_failures = failures, "Source fetch succeeded after failures");
                    }
                    failures = 0;
                    delay = shared.config.interval();

                    let mut messages = vec![PollerMessage::Snapshot(Snapshot::success(
                        source_id.clone(),
                        issued_at,
                        data,
                    ))];
                    if recovered {
                        info!(%source_id, "Source recovered");
                        messages.push(PollerMessage::Recovered {
                            source_id: source_id.clone(),
                        });
                    }
                    messages
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    delay = shared.config.backoff_delay(failures);
                    warn!(
                        %source_id,
                        failures,
                        next_delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Source fetch failed, backing off"
                    );

                    let became_stale = {
                        let mut health = shared.health.lock();
                        health.state = PollerState::Backoff;
                        health.consecutive_failures = failures;
                        health.last_error = Some(e.message.clone());
                        let became_stale =
                            !health.stale && failures >= shared.config.stale_after_failures;
                        if became_stale {
                            health.stale = true;
                        }
                        became_stale
                    };

                    let mut messages = vec![PollerMessage::Snapshot(Snapshot::failure(
                        source_id.clone(),
                        issued_at,
                    ))];
                    if became_stale {
                        warn!(%source_id, failures, "Source marked stale");
                        messages.push(PollerMessage::Stale {
                            source_id: source_id.clone(),
                            consecutive_failures: failures,
                        });
                    }
                    messages
                }
            };

            for message in messages {
                if shared.tx.send(message).is_err() {
                    debug!(%source_id, "Session channel closed, stopping poller");
                    shared.set_state(PollerState::Stopped);
                    return;
                }
            }
        }

        shared.set_state(PollerState::Stopped);
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}
