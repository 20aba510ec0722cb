//! Poller and session configuration.
//!
//! All settings are plain `serde` structs with defaults, so a session can be
//! described in JSON and overridden per source.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LiveSyncError, LiveSyncResult};

/// Default poll interval
pub const DEFAULT_INTERVAL_MS: u64 = 5_000;

/// Default ceiling for failure backoff
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 60_000;

/// Consecutive failures before a source is reported stale
pub const DEFAULT_STALE_AFTER_FAILURES: u32 = 3;

/// Default capacity for the session event broadcast channel
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Timing settings for one poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Base interval between ticks
    pub interval_ms: u64,
    /// Cap for the exponential failure backoff
    pub max_backoff_ms: u64,
    /// Consecutive failures before the source is marked stale
    pub stale_after_failures: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
            stale_after_failures: DEFAULT_STALE_AFTER_FAILURES,
        }
    }
}

impl PollerConfig {
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            ..Self::default()
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Delay before the next tick after `failures` consecutive failures.
    ///
    /// `interval * 2^failures`, capped at `max_backoff`. Zero failures yields
    /// the base interval.
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        let factor = 1u64.checked_shl(failures).unwrap_or(u64::MAX);
        let delay = self.interval_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_backoff_ms.max(self.interval_ms)))
    }

    pub fn validate(&self) -> LiveSyncResult<()> {
        if self.interval_ms == 0 {
            return Err(LiveSyncError::InvalidConfig(
                "interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.max_backoff_ms < self.interval_ms {
            return Err(LiveSyncError::InvalidConfig(format!(
                "max_backoff_ms ({}) must be at least interval_ms ({})",
                self.max_backoff_ms, self.interval_ms
            )));
        }
        if self.stale_after_failures == 0 {
            return Err(LiveSyncError::InvalidConfig(
                "stale_after_failures must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings for a whole session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Fallback timing for sources without an override
    pub poller: PollerConfig,
    /// Per-source timing overrides, keyed by source id
    pub sources: BTreeMap<String, PollerConfig>,
    /// Capacity of the session event channel
    pub event_channel_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poller: PollerConfig::default(),
            sources: BTreeMap::new(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Timing for `source_id`, falling back to the session default
    pub fn poller_for(&self, source_id: &str) -> PollerConfig {
        self.sources.get(source_id).copied().unwrap_or(self.poller)
    }

    pub fn from_json_str(s: &str) -> LiveSyncResult<Self> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> LiveSyncResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn to_json_pretty(&self) -> LiveSyncResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> LiveSyncResult<()> {
        self.poller.validate()?;
        for (id, cfg) in &self.sources {
            cfg.validate()
                .map_err(|e| LiveSyncError::InvalidConfig(format!("source {}: {}", id, e)))?;
        }
        if self.event_channel_capacity == 0 {
            return Err(LiveSyncError::InvalidConfig(
                "event_channel_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
