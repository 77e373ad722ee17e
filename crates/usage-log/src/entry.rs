//! Log row model and CSV encoding

use crate::error::UsageLogError;
use chrono::{Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Timestamp format used in the `Time` column
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One persisted `(Time, Total Power)` row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "Time", with = "timestamp")]
    pub timestamp: NaiveDateTime,
    #[serde(rename = "Total Power")]
    pub total_power: u32,
}

impl LogEntry {
    #[must_use]
    pub fn new(timestamp: NaiveDateTime, total_power: u32) -> Self {
        Self {
            timestamp: truncate_to_second(timestamp),
            total_power,
        }
    }
}

/// Current local wall-clock time at second precision
#[must_use]
pub fn now_local() -> NaiveDateTime {
    truncate_to_second(Local::now().naive_local())
}

fn truncate_to_second(t: NaiveDateTime) -> NaiveDateTime {
    t.with_nanosecond(0).unwrap_or(t)
}

mod timestamp {
    use super::TIMESTAMP_FORMAT;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(t: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&t.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(raw.trim(), TIMESTAMP_FORMAT).map_err(serde::de::Error::custom)
    }
}

/// Encode rows as CSV, optionally preceded by the header line
pub fn encode_rows(entries: &[LogEntry], with_header: bool) -> Result<Vec<u8>, UsageLogError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(with_header)
        .from_writer(Vec::new());
    for entry in entries {
        writer.serialize(entry)?;
    }
    writer
        .into_inner()
        .map_err(|e| UsageLogError::Io(e.into_error()))
}

/// Decode CSV rows, skipping any that fail to parse.
///
/// A file whose header is missing or wrong yields no rows.
#[must_use]
pub fn decode_rows(bytes: &[u8]) -> Vec<LogEntry> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let mut entries = Vec::new();
    for (line, row) in reader.deserialize::<LogEntry>().enumerate() {
        match row {
            Ok(entry) => entries.push(entry),
            Err(e) => tracing::warn!("Skipping malformed log row {}: {}", line + 1, e),
        }
    }
    entries
}
