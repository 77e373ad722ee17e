//! Per-user energy usage log
//!
//! Total power is persisted to a CSV file per user, at most once per
//! logging interval, and read back through a short-lived cache.

pub mod entry;
pub mod error;
pub mod store;
pub mod throttle;

pub use entry::{now_local, LogEntry, TIMESTAMP_FORMAT};
pub use error::UsageLogError;
pub use store::LogStore;
pub use throttle::{log_interval, ThrottledLogger};
