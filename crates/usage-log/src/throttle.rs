//! Hourly throttle in front of the log store

use crate::entry::LogEntry;
use crate::error::UsageLogError;
use crate::store::LogStore;
use chrono::{Duration, NaiveDateTime};
use std::sync::Arc;

/// Minimum spacing between two persisted rows
#[must_use]
pub fn log_interval() -> Duration {
    Duration::hours(1)
}

/// Decides, once per tick, whether a session's total power is persisted.
///
/// `last_write` starts one interval in the past so the first offer of a
/// session is always written. It only advances after the store confirms
/// the write; a failed write is retried on the next tick.
pub struct ThrottledLogger {
    store: Arc<LogStore>,
    username: String,
    last_write: NaiveDateTime,
}

impl ThrottledLogger {
    /// Start throttling for a session opened at `now`
    pub fn new(store: Arc<LogStore>, username: impl Into<String>, now: NaiveDateTime) -> Self {
        Self {
            store,
            username: username.into(),
            last_write: now - log_interval(),
        }
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Time of the last confirmed write
    #[must_use]
    pub fn last_write(&self) -> NaiveDateTime {
        self.last_write
    }

    /// Earliest time the next row may be written
    #[must_use]
    pub fn next_due(&self) -> NaiveDateTime {
        self.last_write + log_interval()
    }

    /// Persist `total_power` if a full interval has passed since the last
    /// write. Returns whether a row was written.
    pub async fn maybe_log(
        &mut self,
        total_power: u32,
        now: NaiveDateTime,
    ) -> Result<bool, UsageLogError> {
        if now - self.last_write < log_interval() {
            return Ok(false);
        }

        let entry = LogEntry::new(now, total_power);
        self.store.append(&self.username, &entry).await?;
        self.last_write = now;

        tracing::info!(
            "Logged {} W for {} at {}",
            total_power,
            self.username,
            entry.timestamp
        );
        Ok(true)
    }

    /// The last `n` rows of this user's log
    pub async fn recent(&self, n: usize) -> Vec<LogEntry> {
        self.store.recent(&self.username, n).await
    }
}
