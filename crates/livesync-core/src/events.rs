//! Session events and per-source health tracking
//!
//! ## Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  PollerState: Per-source lifecycle                              │
//! │  ├── Idle: Created, not started                                 │
//! │  ├── Scheduled: Waiting for the next tick                       │
//! │  ├── InFlight: Fetch outstanding                                │
//! │  ├── Backoff: Waiting after a failed fetch                      │
//! │  └── Stopped: Terminal                                          │
//! │                                                                 │
//! │  SessionEvent: Notifications for UI indicators                  │
//! │  ├── SourceStale / SourceRecovered                              │
//! │  ├── MutationConfirmed / MutationRolledBack                     │
//! │  └── StatePublished                                             │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{MutationId, SourceId, Timestamp};

/// Lifecycle state of a poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PollerState {
    #[default]
    Idle,
    Scheduled,
    InFlight,
    Backoff,
    Stopped,
}

impl fmt::Display for PollerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollerState::Idle => write!(f, "Idle"),
            PollerState::Scheduled => write!(f, "Scheduled"),
            PollerState::InFlight => write!(f, "InFlight"),
            PollerState::Backoff => write!(f, "Backoff"),
            PollerState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Health of a single source, as observed by its poller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceHealth {
    pub state: PollerState,
    /// Failures since the last successful fetch
    pub consecutive_failures: u32,
    /// Issue time of the last successful fetch
    pub last_success: Option<Timestamp>,
    /// Last fetch error message, if the latest fetch failed
    pub last_error: Option<String>,
    /// Set after `stale_after_failures` consecutive failures
    pub stale: bool,
}

/// Events emitted by a live session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A source crossed its failure threshold
    SourceStale {
        source_id: SourceId,
        consecutive_failures: u32,
    },
    /// A stale source fetched successfully again
    SourceRecovered { source_id: SourceId },
    /// The server caught up with an optimistic mutation
    MutationConfirmed {
        mutation_id: MutationId,
        /// Source whose snapshot confirmed it
        source_id: SourceId,
    },
    /// An optimistic mutation was withdrawn
    MutationRolledBack { mutation_id: MutationId },
    /// The store accepted a state that changed at least one field
    StatePublished {
        key: String,
        changed_fields: usize,
    },
}

impl SessionEvent {
    /// Source associated with this event, if any
    pub fn source_id(&self) -> Option<&SourceId> {
        match self {
            SessionEvent::SourceStale { source_id, .. } => Some(source_id),
            SessionEvent::SourceRecovered { source_id } => Some(source_id),
            SessionEvent::MutationConfirmed { source_id, .. } => Some(source_id),
            SessionEvent::MutationRolledBack { .. } => None,
            SessionEvent::StatePublished { .. } => None,
        }
    }
}
