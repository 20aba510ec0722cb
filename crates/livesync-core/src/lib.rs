//! livesync Core Library
//!
//! Live state synchronization for polled REST backends.
//!
//! ## Overview
//!
//! Screens that poll several overlapping endpoints at different cadences,
//! and apply optimistic edits on top, need one coherent view that never
//! flickers back to an older or emptier state. livesync provides that view:
//!
//! - **Poller**: one timer loop per source, with skip predicate and backoff
//! - **Snapshot**: one fetch result, stamped with when it was issued
//! - **Reconciler**: field-by-field merge that never regresses known values
//! - **MutationCoordinator**: optimistic edits held until the server catches up
//! - **Store**: per-key merged state with change-only notifications
//!
//! ## Quick Start
//!
//! ```ignore
//! use livesync_core::{call, LiveSession, SessionEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = LiveSession::builder("call-42")
//!         .sources(call::call_monitor_sources(status_api, conversation_api, || true))
//!         .build()?;
//!
//!     let _sub = session.subscribe(|state| {
//!         println!("status = {:?}", state.field("status"));
//!     });
//!     session.start()?;
//!
//!     // Later, when the screen unmounts
//!     session.shutdown();
//!     Ok(())
//! }
//! ```

pub mod alerts;
pub mod call;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod mutation;
pub mod poller;
pub mod reconciler;
pub mod session;
pub mod snapshot;
pub mod source;
pub mod state;
pub mod store;
pub mod types;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock, TokioClock};
pub use config::{PollerConfig, SessionConfig};
pub use error::{FetchError, LiveSyncError, LiveSyncResult};
pub use events::{PollerState, SessionEvent, SourceHealth};
pub use mutation::{Confirm, Confirmation, Mutation, MutationCoordinator};
pub use poller::{Poller, PollerMessage};
pub use reconciler::{MergeOutcome, Reconciler};
pub use session::{LiveSession, LiveSessionBuilder};
pub use snapshot::Snapshot;
pub use source::{Fetch, FnFetcher, SourceDescriptor};
pub use state::MergedState;
pub use store::{Store, Subscription};
pub use types::*;
