//! Logged-in users and their running home sessions

use automation_engine::{HomeSession, TickReport};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use home_core::SimulationConfig;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use usage_log::{now_local, LogStore};

/// A user's session plus its tick publisher.
///
/// Every tab of the same user shares this value; the mutex serializes
/// ticks, commands and settings changes for that user.
pub struct LiveSession {
    session: Mutex<HomeSession>,
    updates: broadcast::Sender<TickReport>,
    ticker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl LiveSession {
    fn new(session: HomeSession) -> Self {
        let (updates, _) = broadcast::channel(16);
        Self {
            session: Mutex::new(session),
            updates,
            ticker: std::sync::Mutex::new(None),
        }
    }

    /// Lock the session for direct access
    pub async fn lock(&self) -> tokio::sync::MutexGuard<'_, HomeSession> {
        self.session.lock().await
    }

    /// Run one tick, optionally with a command, and publish the report
    pub async fn tick(&self, command: Option<&str>) -> TickReport {
        let mut session = self.session.lock().await;
        let report = session.tick(command, now_local()).await;
        // Published under the lock so subscribers see reports in tick order
        let _ = self.updates.send(report.clone());
        report
    }

    /// Subscribe to published tick reports
    pub fn subscribe(&self) -> broadcast::Receiver<TickReport> {
        self.updates.subscribe()
    }

    fn stop(&self) {
        if let Ok(mut ticker) = self.ticker.lock() {
            if let Some(handle) = ticker.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A running session and the number of tokens that reference it
struct SessionEntry {
    live: Arc<LiveSession>,
    tokens: usize,
}

/// Token and session bookkeeping for all users.
///
/// The per-user token count lives in the session entry and is only changed
/// through `sessions.entry()`, so opening and closing for the same user are
/// serialized by the map's shard lock.
pub struct SessionManager {
    /// Bearer token -> username
    tokens: DashMap<String, String>,
    /// Username -> live session
    sessions: DashMap<String, SessionEntry>,
    store: Arc<LogStore>,
    simulation: SimulationConfig,
    tick_interval: Duration,
}

impl SessionManager {
    pub fn new(store: Arc<LogStore>, simulation: SimulationConfig, tick_interval: Duration) -> Self {
        Self {
            tokens: DashMap::new(),
            sessions: DashMap::new(),
            store,
            simulation,
            tick_interval,
        }
    }

    /// Issue a token for an authenticated user, opening their session if
    /// it is not running yet
    pub fn open(&self, username: &str) -> String {
        let token = uuid::Uuid::new_v4().to_string();

        let mut entry = self
            .sessions
            .entry(username.to_string())
            .or_insert_with(|| SessionEntry {
                live: self.start_session(username),
                tokens: 0,
            });
        entry.tokens += 1;
        self.tokens.insert(token.clone(), username.to_string());
        let created = entry.tokens == 1;
        drop(entry);

        tracing::info!("Issued token for {} (new session: {})", username, created);
        token
    }

    fn start_session(&self, username: &str) -> Arc<LiveSession> {
        let session = HomeSession::new(username, &self.simulation, self.store.clone(), now_local());
        let live = Arc::new(LiveSession::new(session));
        let handle = spawn_ticker(Arc::downgrade(&live), self.tick_interval);
        if let Ok(mut ticker) = live.ticker.lock() {
            *ticker = Some(handle);
        }
        live
    }

    /// Resolve a bearer token to its user and session
    pub fn resolve(&self, token: &str) -> Option<(String, Arc<LiveSession>)> {
        let username = self.tokens.get(token)?.value().clone();
        let live = self.sessions.get(&username)?.live.clone();
        Some((username, live))
    }

    /// Revoke a token; the session ends with the user's last token
    pub fn close(&self, token: &str) -> bool {
        let Some((_, username)) = self.tokens.remove(token) else {
            return false;
        };

        if let Entry::Occupied(mut entry) = self.sessions.entry(username.clone()) {
            let remaining = entry.get().tokens.saturating_sub(1);
            entry.get_mut().tokens = remaining;
            if remaining == 0 {
                let (_, closed) = entry.remove_entry();
                closed.live.stop();
                tracing::info!("Closed session for {}", username);
            }
        }
        true
    }

    /// Number of running sessions
    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }
}

/// Tick a session periodically until it is dropped
fn spawn_ticker(live: Weak<LiveSession>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Skip the first immediate tick
        interval.tick().await;

        loop {
            interval.tick().await;
            let Some(live) = live.upgrade() else {
                break;
            };
            live.tick(None).await;
        }
    })
}
