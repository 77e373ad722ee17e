//! Durable per-user log files with a read-through cache

use crate::entry::{decode_rows, encode_rows, LogEntry};
use crate::error::UsageLogError;
use dashmap::DashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

/// Default lifetime of a cached read
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

struct CachedLog {
    loaded_at: Instant,
    entries: Arc<Vec<LogEntry>>,
}

/// Log files for all users, one CSV file per username.
///
/// Writes append a single row to the end of the file; prior rows are never
/// rewritten. Writers and cache fills for the same user are serialized by a
/// per-user lock, different users never contend. A lock is dropped from the
/// map as soon as no caller holds it.
pub struct LogStore {
    dir: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
    cache: DashMap<String, CachedLog>,
    cache_ttl: Duration,
}

impl LogStore {
    /// Create a store rooted at `dir` with the default cache TTL
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_cache_ttl(dir, DEFAULT_CACHE_TTL)
    }

    /// Create a store with an explicit cache TTL (zero disables caching)
    pub fn with_cache_ttl(dir: impl Into<PathBuf>, cache_ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            locks: DashMap::new(),
            cache: DashMap::new(),
            cache_ttl,
        }
    }

    /// Directory holding the log files
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a user's log file (`device_log_<username>.csv`)
    #[must_use]
    pub fn log_path(&self, username: &str) -> PathBuf {
        let safe: String = username
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("device_log_{safe}.csv"))
    }

    fn lock_for(&self, username: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(username.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Drop a user's lock once no caller holds a handle to it
    fn release_lock(&self, username: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks.remove_if(username, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Append one row to a user's log.
    ///
    /// The header is written when the file is new. If a previous write left
    /// an unterminated line, a newline is inserted first so the new row
    /// stays parseable.
    pub async fn append(&self, username: &str, entry: &LogEntry) -> Result<(), UsageLogError> {
        let lock = self.lock_for(username);
        let result = {
            let _guard = lock.lock().await;
            self.append_locked(username, entry).await
        };
        self.release_lock(username, lock);
        result
    }

    async fn append_locked(&self, username: &str, entry: &LogEntry) -> Result<(), UsageLogError> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.log_path(username);

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .await?;

        let len = file.metadata().await?.len();
        let mut buf = Vec::new();
        if len > 0 {
            file.seek(SeekFrom::End(-1)).await?;
            let mut last = [0u8; 1];
            file.read_exact(&mut last).await?;
            if last[0] != b'\n' {
                tracing::warn!("Log {:?} ends mid-row, terminating it before append", path);
                buf.push(b'\n');
            }
        }
        buf.extend(encode_rows(std::slice::from_ref(entry), len == 0)?);

        file.write_all(&buf).await?;
        file.sync_data().await?;

        self.cache.remove(username);
        tracing::debug!("Appended log row for {} to {:?}", username, path);
        Ok(())
    }

    /// Read a user's full log, bypassing the cache.
    ///
    /// A missing or unreadable file reads as an empty log.
    pub async fn read_all(&self, username: &str) -> Vec<LogEntry> {
        let path = self.log_path(username);
        match fs::read(&path).await {
            Ok(bytes) => decode_rows(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No log file at {:?} yet", path);
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("Failed to read log file {:?}: {}", path, e);
                Vec::new()
            }
        }
    }

    /// The last `n` rows of a user's log in chronological order
    pub async fn recent(&self, username: &str, n: usize) -> Vec<LogEntry> {
        let entries = self.cached(username).await;
        let start = entries.len().saturating_sub(n);
        entries[start..].to_vec()
    }

    async fn cached(&self, username: &str) -> Arc<Vec<LogEntry>> {
        if let Some(hit) = self.fresh_entry(username) {
            return hit;
        }

        let lock = self.lock_for(username);
        let entries = {
            let _guard = lock.lock().await;
            self.fill_cache(username).await
        };
        self.release_lock(username, lock);
        entries
    }

    async fn fill_cache(&self, username: &str) -> Arc<Vec<LogEntry>> {
        // Another reader may have filled it while we waited
        if let Some(hit) = self.fresh_entry(username) {
            return hit;
        }

        let entries = Arc::new(self.read_all(username).await);
        if !self.cache_ttl.is_zero() {
            self.cache.insert(
                username.to_string(),
                CachedLog {
                    loaded_at: Instant::now(),
                    entries: entries.clone(),
                },
            );
        }
        entries
    }

    fn fresh_entry(&self, username: &str) -> Option<Arc<Vec<LogEntry>>> {
        let cached = self.cache.get(username)?;
        if cached.loaded_at.elapsed() < self.cache_ttl {
            Some(cached.entries.clone())
        } else {
            None
        }
    }

    /// Drop a user's cached read
    pub fn invalidate(&self, username: &str) {
        self.cache.remove(username);
    }
}
