//! Call-monitor preset: a light status feed under a heavier conversation feed.
//!
//! The status feed is cheap and polled often; the conversation feed carries
//! the full record and outranks it field by field. Until a conversation id is
//! known the conversation feed is skipped, and the status feed alone keeps the
//! view populated.

use std::time::Duration;

use crate::source::{Fetch, SourceDescriptor};

/// Source id of the lightweight call-status feed
pub const STATUS_SOURCE: &str = "call-status";

/// Source id of the full conversation feed
pub const CONVERSATION_SOURCE: &str = "conversation";

pub const STATUS_PRIORITY: u32 = 1;
pub const CONVERSATION_PRIORITY: u32 = 2;

pub const STATUS_INTERVAL: Duration = Duration::from_secs(2);
pub const CONVERSATION_INTERVAL: Duration = Duration::from_secs(5);

/// Build the two call-monitor sources.
///
/// `conversation_known` is consulted on every conversation tick; while it
/// returns false the conversation feed does not fetch.
pub fn call_monitor_sources(
    status: impl Fetch + 'static,
    conversation: impl Fetch + 'static,
    conversation_known: impl Fn() -> bool + Send + Sync + 'static,
) -> Vec<SourceDescriptor> {
    vec![
        SourceDescriptor::new(STATUS_SOURCE, STATUS_PRIORITY, status).interval(STATUS_INTERVAL),
        SourceDescriptor::new(CONVERSATION_SOURCE, CONVERSATION_PRIORITY, conversation)
            .interval(CONVERSATION_INTERVAL)
            .skip_when(move || !conversation_known()),
    ]
}
