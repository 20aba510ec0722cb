//! Live session: pollers, reconciler and mutations for one logical key
//!
//! A `LiveSession` is created when a screen mounts and shut down when it
//! unmounts. It owns everything needed to keep one key's [`MergedState`]
//! current:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  LiveSession (per logical key)                                  │
//! │  ├── pollers: one background task per source                    │
//! │  │   └── PollerMessage ──▶ driver                               │
//! │  ├── driver task: the only owner of Reconciler + mutations      │
//! │  │   ├── ingests snapshots, merges, confirms mutations          │
//! │  │   └── publishes to the Store                                 │
//! │  ├── commands: apply / rollback requests ──▶ driver             │
//! │  └── event_tx: broadcast::Sender<SessionEvent>                  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every merge runs on the driver task, so merges never interleave and the
//! store always receives states in the order they were computed.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::error::{LiveSyncError, LiveSyncResult};
use crate::events::{SessionEvent, SourceHealth};
use crate::mutation::{Confirm, MutationCoordinator};
use crate::poller::{Poller, PollerMessage};
use crate::reconciler::Reconciler;
use crate::source::SourceDescriptor;
use crate::state::MergedState;
use crate::store::{Store, Subscription};
use crate::types::{MutationId, PartialRecord, SourceId};

enum SessionCommand {
    Apply {
        fields: PartialRecord,
        confirm: Confirm,
        reply: oneshot::Sender<MutationId>,
    },
    Rollback {
        mutation_id: MutationId,
        reply: oneshot::Sender<LiveSyncResult<()>>,
    },
}

/// Builder for [`LiveSession`]; registration errors surface from `build`
pub struct LiveSessionBuilder {
    key: String,
    sources: Vec<SourceDescriptor>,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
    store: Option<Store>,
}

impl LiveSessionBuilder {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            sources: Vec::new(),
            config: SessionConfig::default(),
            clock: Arc::new(SystemClock),
            store: None,
        }
    }

    /// Register a source. Registration order breaks exact ties.
    pub fn source(mut self, source: SourceDescriptor) -> Self {
        self.sources.push(source);
        self
    }

    pub fn sources(mut self, sources: impl IntoIterator<Item = SourceDescriptor>) -> Self {
        self.sources.extend(sources);
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Publish into a shared store instead of a private one
    pub fn store(mut self, store: Store) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> LiveSyncResult<LiveSession> {
        self.config.validate()?;
        if self.sources.is_empty() {
            return Err(LiveSyncError::NoSources(self.key));
        }

        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let mut reconciler = Reconciler::new();
        let mut pollers = Vec::with_capacity(self.sources.len());

        for source in self.sources {
            reconciler.register(source.id.clone(), source.priority)?;

            // Explicit per-source config beats the descriptor's own interval.
            let poller_config = match (self.config.sources.get(source.id.as_str()), source.interval) {
                (Some(configured), _) => *configured,
                (None, Some(interval)) => {
                    let mut cfg = self.config.poller;
                    cfg.interval_ms = interval.as_millis() as u64;
                    cfg.max_backoff_ms = cfg.max_backoff_ms.max(cfg.interval_ms);
                    cfg
                }
                (None, None) => self.config.poller,
            };
            poller_config.validate().map_err(|e| {
                LiveSyncError::InvalidConfig(format!("source {}: {}", source.id, e))
            })?;

            pollers.push(Poller::new(
                source,
                poller_config,
                self.clock.clone(),
                message_tx.clone(),
            ));
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, _) = broadcast::channel(self.config.event_channel_capacity);

        Ok(LiveSession {
            shared: Arc::new(SessionShared {
                key: self.key,
                store: self.store.unwrap_or_default(),
                event_tx,
                cancel: CancellationToken::new(),
            }),
            pollers,
            command_tx,
            parts: Mutex::new(Some(DriverParts {
                reconciler,
                mutations: MutationCoordinator::new(),
                clock: self.clock,
                messages: message_rx,
                commands: command_rx,
            })),
            driver: Mutex::new(None),
        })
    }
}

struct SessionShared {
    key: String,
    store: Store,
    event_tx: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
}

impl SessionShared {
    fn emit(&self, event: SessionEvent) {
        // No receivers is fine.
        let _ = self.event_tx.send(event);
    }
}

/// State that moves into the driver task on start
struct DriverParts {
    reconciler: Reconciler,
    mutations: MutationCoordinator,
    clock: Arc<dyn Clock>,
    messages: mpsc::UnboundedReceiver<PollerMessage>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
}

impl DriverParts {
    async fn run(mut self, shared: Arc<SessionShared>) {
        loop {
            tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => break,
                Some(command) = self.commands.recv() => self.handle_command(command, &shared),
                Some(message) = self.messages.recv() => self.handle_message(message, &shared),
                else => break,
            }
        }
        debug!(key = %shared.key, "Session driver exited");
    }

    fn handle_message(&mut self, message: PollerMessage, shared: &SessionShared) {
        match message {
            PollerMessage::Snapshot(snapshot) => {
                if self.reconciler.ingest(snapshot) {
                    self.reconcile(shared);
                }
            }
            PollerMessage::Stale {
                source_id,
                consecutive_failures,
            } => shared.emit(SessionEvent::SourceStale {
                source_id,
                consecutive_failures,
            }),
            PollerMessage::Recovered { source_id } => {
                shared.emit(SessionEvent::SourceRecovered { source_id })
            }
        }
    }

    fn handle_command(&mut self, command: SessionCommand, shared: &SessionShared) {
        match command {
            SessionCommand::Apply {
                fields,
                confirm,
                reply,
            } => {
                let id = self.mutations.apply(fields, confirm, self.clock.now());
                self.reconcile(shared);
                let _ = reply.send(id);
            }
            SessionCommand::Rollback { mutation_id, reply } => {
                let result = self.mutations.rollback(mutation_id).map(|_| ());
                if result.is_ok() {
                    shared.emit(SessionEvent::MutationRolledBack { mutation_id });
                    self.reconcile(shared);
                }
                let _ = reply.send(result);
            }
        }
    }

    fn reconcile(&mut self, shared: &SessionShared) {
        let outcome = self.reconciler.merge(&mut self.mutations);

        for confirmation in outcome.confirmed {
            shared.emit(SessionEvent::MutationConfirmed {
                mutation_id: confirmation.mutation.id,
                source_id: confirmation.source_id,
            });
        }

        if shared.cancel.is_cancelled() {
            return;
        }
        let changed = shared.store.publish(&shared.key, outcome.state);
        if !changed.is_empty() {
            shared.emit(SessionEvent::StatePublished {
                key: shared.key.clone(),
                changed_fields: changed.len(),
            });
        }
    }
}

/// Live synchronization session for one logical key
pub struct LiveSession {
    shared: Arc<SessionShared>,
    pollers: Vec<Poller>,
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    parts: Mutex<Option<DriverParts>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl LiveSession {
    pub fn builder(key: impl Into<String>) -> LiveSessionBuilder {
        LiveSessionBuilder::new(key)
    }

    pub fn key(&self) -> &str {
        &self.shared.key
    }

    pub fn store(&self) -> &Store {
        &self.shared.store
    }

    /// Latest published state; empty until the first merge
    pub fn state(&self) -> MergedState {
        self.shared.store.get(&self.shared.key).unwrap_or_default()
    }

    /// Subscribe to value changes of this session's key
    pub fn subscribe(
        &self,
        callback: impl Fn(&MergedState) + Send + Sync + 'static,
    ) -> Subscription {
        self.shared.store.subscribe(self.shared.key.clone(), callback)
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.event_tx.subscribe()
    }

    pub fn source_ids(&self) -> Vec<SourceId> {
        self.pollers.iter().map(|p| p.source_id().clone()).collect()
    }

    pub fn health(&self) -> BTreeMap<SourceId, SourceHealth> {
        self.pollers
            .iter()
            .map(|p| (p.source_id().clone(), p.health()))
            .collect()
    }

    pub fn is_running(&self) -> bool {
        self.driver.lock().is_some() && !self.shared.cancel.is_cancelled()
    }

    /// Spawn the driver and start every poller. Starting twice is a no-op.
    pub fn start(&self) -> LiveSyncResult<()> {
        self.ensure_open()?;
        let Some(parts) = self.parts.lock().take() else {
            return Ok(());
        };

        info!(key = %self.shared.key, sources = self.pollers.len(), "Starting live session");
        let shared = self.shared.clone();
        *self.driver.lock() = Some(tokio::spawn(parts.run(shared)));

        for poller in &self.pollers {
            poller.start();
        }
        Ok(())
    }

    /// Fetch every source now (pull-to-refresh)
    pub fn trigger_now(&self) {
        for poller in &self.pollers {
            poller.trigger_now();
        }
    }

    pub fn trigger_source(&self, source_id: &SourceId) -> LiveSyncResult<()> {
        let poller = self
            .pollers
            .iter()
            .find(|p| p.source_id() == source_id)
            .ok_or_else(|| LiveSyncError::SourceNotFound(source_id.clone()))?;
        poller.trigger_now();
        Ok(())
    }

    /// Apply an optimistic edit. The returned id is already reflected in the
    /// published state.
    pub async fn apply(
        &self,
        fields: PartialRecord,
        confirm: Confirm,
    ) -> LiveSyncResult<MutationId> {
        self.ensure_running()?;
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Apply {
            fields,
            confirm,
            reply,
        })?;
        rx.await.map_err(|_| self.closed())
    }

    /// Withdraw a mutation whose backing write failed
    pub async fn rollback(&self, mutation_id: MutationId) -> LiveSyncResult<()> {
        self.ensure_running()?;
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Rollback { mutation_id, reply })?;
        rx.await.map_err(|_| self.closed())?
    }

    /// Stop every poller and the driver. Late responses are discarded, and
    /// the key's entry and subscribers are removed from the store.
    pub fn shutdown(&self) {
        if self.shared.cancel.is_cancelled() {
            return;
        }
        self.shared.cancel.cancel();
        for poller in &self.pollers {
            poller.stop();
        }
        if let Some(driver) = self.driver.lock().take() {
            driver.abort();
        }
        self.shared.store.remove(&self.shared.key);
        info!(key = %self.shared.key, "Live session shut down");
    }

    fn send(&self, command: SessionCommand) -> LiveSyncResult<()> {
        self.command_tx.send(command).map_err(|_| self.closed())
    }

    fn closed(&self) -> LiveSyncError {
        LiveSyncError::SessionClosed(self.shared.key.clone())
    }

    fn ensure_open(&self) -> LiveSyncResult<()> {
        if self.shared.cancel.is_cancelled() {
            return Err(self.closed());
        }
        Ok(())
    }

    fn ensure_running(&self) -> LiveSyncResult<()> {
        self.ensure_open()?;
        if self.parts.lock().is_some() {
            return Err(LiveSyncError::NotStarted(self.shared.key.clone()));
        }
        Ok(())
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
