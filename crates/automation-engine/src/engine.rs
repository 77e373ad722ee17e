//! Per-user session running the control loop

use crate::command::{CommandAction, CommandInterpreter};
use crate::controller::ThresholdController;
use crate::error::AutomationError;
use crate::model::{AutomationConfig, AutomationEvent, UpdateAutomationRequest};
use chrono::NaiveDateTime;
use home_core::{
    Device, DeviceRegistry, EnvironmentSimulator, RandomUsageMeter, SimulationConfig, UsageMeter,
    UsageReport,
};
use serde::Serialize;
use std::sync::Arc;
use usage_log::{LogEntry, LogStore, ThrottledLogger};

/// Number of log rows included in every tick report
pub const RECENT_LOG_ROWS: usize = 8;

/// Advisory conditions for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "message", rename_all = "snake_case")]
pub enum Advisory {
    /// A log row was written this tick
    LogSaved,
    /// The user's log has no rows
    NoLogsYet,
    /// Writing the log row failed; it is retried next tick
    LogWriteFailed(String),
}

impl std::fmt::Display for Advisory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Advisory::LogSaved => f.write_str("Hourly log saved!"),
            Advisory::NoLogsYet => f.write_str("No logs yet. First log in about an hour."),
            Advisory::LogWriteFailed(e) => write!(f, "Could not save hourly log: {e}"),
        }
    }
}

/// Everything one tick produced
#[derive(Debug, Clone, Serialize)]
pub struct TickReport {
    /// Ambient temperature sample (°C)
    pub temperature: f64,
    /// `temperature - threshold`, positive above the threshold
    pub threshold_delta: f64,
    pub automation: AutomationConfig,
    pub automation_event: Option<AutomationEvent>,
    pub command_actions: Vec<CommandAction>,
    pub devices: DeviceRegistry,
    pub usage: UsageReport,
    /// Whether a log row was persisted this tick
    pub logged: bool,
    #[serde(with = "timestamp")]
    pub next_log_at: NaiveDateTime,
    pub recent_logs: Vec<LogEntry>,
    pub advisories: Vec<Advisory>,
}

/// Current state without running a tick
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub username: String,
    pub temperature: f64,
    pub threshold_delta: f64,
    pub automation: AutomationConfig,
    pub devices: DeviceRegistry,
    #[serde(with = "timestamp")]
    pub next_log_at: NaiveDateTime,
}

mod timestamp {
    use chrono::NaiveDateTime;
    use serde::Serializer;
    use usage_log::TIMESTAMP_FORMAT;

    pub fn serialize<S: Serializer>(t: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.collect_str(&t.format(TIMESTAMP_FORMAT))
    }
}

/// One user's devices, automation settings, simulators and log throttle.
///
/// A session is driven by one caller at a time; every mutation goes
/// through `&mut self`.
pub struct HomeSession {
    username: String,
    devices: DeviceRegistry,
    automation: AutomationConfig,
    environment: Box<dyn EnvironmentSimulator>,
    meter: Box<dyn UsageMeter>,
    logger: ThrottledLogger,
}

impl HomeSession {
    /// Open a session with all devices off and default automation settings
    pub fn new(
        username: impl Into<String>,
        simulation: &SimulationConfig,
        store: Arc<LogStore>,
        now: NaiveDateTime,
    ) -> Self {
        Self::with_sources(
            username,
            simulation.build(),
            Box::new(RandomUsageMeter::new()),
            store,
            now,
        )
    }

    /// Open a session with explicit temperature and power sources
    pub fn with_sources(
        username: impl Into<String>,
        environment: Box<dyn EnvironmentSimulator>,
        meter: Box<dyn UsageMeter>,
        store: Arc<LogStore>,
        now: NaiveDateTime,
    ) -> Self {
        let username = username.into();
        tracing::info!("Opening home session for {}", username);
        Self {
            logger: ThrottledLogger::new(store, username.clone(), now),
            username,
            devices: DeviceRegistry::new(),
            automation: AutomationConfig::default(),
            environment,
            meter,
        }
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn devices(&self) -> &DeviceRegistry {
        &self.devices
    }

    #[must_use]
    pub fn automation(&self) -> &AutomationConfig {
        &self.automation
    }

    #[must_use]
    pub fn temperature(&self) -> f64 {
        self.environment.current()
    }

    fn threshold_delta(&self, temperature: f64) -> f64 {
        temperature - self.automation.threshold() as f64
    }

    /// Run one pass of the control loop.
    ///
    /// Advances the temperature, applies the threshold rule, applies the
    /// optional command, meters power and offers the total to the log
    /// throttle. Storage failures are reported as advisories.
    pub async fn tick(&mut self, command: Option<&str>, now: NaiveDateTime) -> TickReport {
        let temperature = self.environment.advance();
        let automation_event =
            ThresholdController::apply(&self.automation, temperature, &mut self.devices);

        let command_actions = command
            .map(|text| CommandInterpreter::parse(text, &mut self.devices))
            .unwrap_or_default();

        let usage = self.meter.compute(&self.devices);

        let mut advisories = Vec::new();
        let logged = match self.logger.maybe_log(usage.total, now).await {
            Ok(written) => {
                if written {
                    advisories.push(Advisory::LogSaved);
                }
                written
            }
            Err(e) => {
                tracing::warn!("Failed to save log for {}: {}", self.username, e);
                advisories.push(Advisory::LogWriteFailed(e.to_string()));
                false
            }
        };

        let recent_logs = self.logger.recent(RECENT_LOG_ROWS).await;
        if recent_logs.is_empty() {
            advisories.push(Advisory::NoLogsYet);
        }

        tracing::debug!(
            "Tick for {}: {:.1}°C, {} W, logged={}",
            self.username,
            temperature,
            usage.total,
            logged
        );

        TickReport {
            temperature,
            threshold_delta: self.threshold_delta(temperature),
            automation: self.automation.clone(),
            automation_event,
            command_actions,
            devices: self.devices.clone(),
            usage,
            logged,
            next_log_at: self.logger.next_due(),
            recent_logs,
            advisories,
        }
    }

    /// Switch a device directly
    pub fn set_device(&mut self, device: Device, on: bool) {
        self.devices.set(device, on);
        tracing::debug!("{} set {} {}", self.username, device, if on { "ON" } else { "OFF" });
    }

    /// Switch a device addressed by name
    pub fn set_device_by_name(&mut self, name: &str, on: bool) -> Result<Device, AutomationError> {
        let device: Device = name.parse()?;
        self.set_device(device, on);
        Ok(device)
    }

    /// Flip a device addressed by name, returning its new state
    pub fn toggle_device_by_name(&mut self, name: &str) -> Result<(Device, bool), AutomationError> {
        let device: Device = name.parse()?;
        let on = self.devices.toggle(device);
        Ok((device, on))
    }

    /// Change the automation settings; the next tick uses them
    pub fn configure_automation(&mut self, update: UpdateAutomationRequest) -> &AutomationConfig {
        self.automation.apply_update(update);
        tracing::info!(
            "Automation for {}: enabled={}, threshold={}°C",
            self.username,
            self.automation.enabled,
            self.automation.threshold()
        );
        &self.automation
    }

    /// Last `n` log rows for this user
    pub async fn recent_logs(&self, n: usize) -> Vec<LogEntry> {
        self.logger.recent(n).await
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let temperature = self.temperature();
        SessionSnapshot {
            username: self.username.clone(),
            temperature,
            threshold_delta: self.threshold_delta(temperature),
            automation: self.automation.clone(),
            devices: self.devices.clone(),
            next_log_at: self.logger.next_due(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};
    use home_core::UsageRecord;
    use std::collections::VecDeque;
    use tempfile::TempDir;

    /// Replays a fixed list of samples, repeating the last one
    struct Scripted {
        samples: VecDeque<f64>,
        current: f64,
    }

    impl Scripted {
        fn new(samples: &[f64]) -> Box<Self> {
            Box::new(Self {
                samples: samples.iter().copied().collect(),
                current: samples.first().copied().unwrap_or(25.0),
            })
        }
    }

    impl EnvironmentSimulator for Scripted {
        fn current(&self) -> f64 {
            self.current
        }

        fn advance(&mut self) -> f64 {
            if let Some(next) = self.samples.pop_front() {
                self.current = next;
            }
            self.current
        }
    }

    /// Every device that is on draws 100 W
    struct Flat;

    impl UsageMeter for Flat {
        fn compute(&mut self, devices: &DeviceRegistry) -> UsageReport {
            UsageReport::from_records(
                devices
                    .list()
                    .map(|(device, on)| UsageRecord {
                        device,
                        watts: if on { 100 } else { 0 },
                    })
                    .collect(),
            )
        }
    }

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 7, 4)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn session(dir: &TempDir, samples: &[f64]) -> HomeSession {
        let store = Arc::new(LogStore::new(dir.path()));
        HomeSession::with_sources("nina", Scripted::new(samples), Box::new(Flat), store, t0())
    }

    #[tokio::test]
    async fn test_first_tick_logs_and_runs_automation() {
        let dir = TempDir::new().unwrap();
        let mut session = session(&dir, &[31.0]);

        let report = session.tick(None, t0()).await;
        assert_eq!(report.temperature, 31.0);
        assert_eq!(report.threshold_delta, 1.0);
        assert!(matches!(
            report.automation_event,
            Some(AutomationEvent::TurnedOn { device: Device::Ac, .. })
        ));
        assert_eq!(report.usage.total, 100);
        assert!(report.logged);
        assert_eq!(report.advisories, vec![Advisory::LogSaved]);
        assert_eq!(report.recent_logs, vec![LogEntry::new(t0(), 100)]);
        assert_eq!(report.next_log_at, t0() + Duration::hours(1));
    }

    #[tokio::test]
    async fn test_command_applies_after_automation() {
        let dir = TempDir::new().unwrap();
        let mut session = session(&dir, &[35.0, 35.0]);

        // The rule switches AC on, then the command switches it off in the same tick
        let report = session.tick(Some("turn the ac off"), t0()).await;
        assert!(report.automation_event.is_some());
        assert_eq!(
            report.command_actions,
            vec![CommandAction::Switched {
                device: Device::Ac,
                on: false
            }]
        );
        assert!(!report.devices.get(Device::Ac));
        assert_eq!(report.usage.total, 0);

        // Next tick the rule reasserts itself
        let report = session.tick(None, t0() + Duration::seconds(5)).await;
        assert!(report.devices.get(Device::Ac));
    }

    #[tokio::test]
    async fn test_status_command_and_usage() {
        let dir = TempDir::new().unwrap();
        let mut session = session(&dir, &[20.0]);

        let report = session.tick(Some("turn off the tv and show status"), t0()).await;
        let rendered: Vec<_> = report.command_actions.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec!["TV OFF", "Status: Light: OFF, Fan: OFF, AC: OFF, TV: OFF"]
        );
        assert_eq!(report.usage.total, 0);
    }

    #[tokio::test]
    async fn test_ticks_within_hour_do_not_log() {
        let dir = TempDir::new().unwrap();
        let mut session = session(&dir, &[20.0]);

        assert!(session.tick(None, t0()).await.logged);
        for minute in [1, 30, 59] {
            let report = session.tick(None, t0() + Duration::minutes(minute)).await;
            assert!(!report.logged);
            assert!(report.advisories.is_empty());
            assert_eq!(report.recent_logs.len(), 1);
        }
        assert!(session.tick(None, t0() + Duration::minutes(61)).await.logged);
        assert_eq!(session.recent_logs(10).await.len(), 2);
    }

    #[tokio::test]
    async fn test_write_failure_is_advisory_and_retried() {
        let dir = TempDir::new().unwrap();
        let blocked = dir.path().join("blocked");
        std::fs::write(&blocked, b"").unwrap();
        let store = Arc::new(LogStore::new(&blocked));
        let mut session =
            HomeSession::with_sources("omar", Scripted::new(&[20.0]), Box::new(Flat), store, t0());

        let report = session.tick(None, t0()).await;
        assert!(!report.logged);
        assert!(matches!(report.advisories[0], Advisory::LogWriteFailed(_)));
        assert!(report.advisories.contains(&Advisory::NoLogsYet));
        assert_eq!(report.next_log_at, t0());
    }

    #[tokio::test]
    async fn test_configure_automation_clamps_and_applies() {
        let dir = TempDir::new().unwrap();
        let mut session = session(&dir, &[20.0, 20.0]);

        let config = session.configure_automation(UpdateAutomationRequest {
            temp_threshold_ac: Some(5),
            ..Default::default()
        });
        assert_eq!(config.threshold(), 16);

        let report = session.tick(None, t0()).await;
        assert!(report.devices.get(Device::Ac));
        assert_eq!(report.threshold_delta, 4.0);
    }

    #[tokio::test]
    async fn test_manual_device_control() {
        let dir = TempDir::new().unwrap();
        let mut session = session(&dir, &[20.0]);

        assert_eq!(session.set_device_by_name("fan", true).unwrap(), Device::Fan);
        assert_eq!(session.toggle_device_by_name("Fan").unwrap(), (Device::Fan, false));
        assert!(matches!(
            session.set_device_by_name("heater", true),
            Err(AutomationError::DeviceNotFound(_))
        ));
    }

    #[test]
    fn test_snapshot_does_not_advance() {
        let dir = TempDir::new().unwrap();
        let session = session(&dir, &[22.5, 40.0]);
        let snapshot = session.snapshot();
        assert_eq!(snapshot.temperature, 22.5);
        assert_eq!(snapshot.threshold_delta, -7.5);
        assert_eq!(session.snapshot().temperature, 22.5);
    }

    #[test]
    fn test_report_serializes() {
        let advisory = serde_json::to_value(Advisory::LogWriteFailed("disk full".into())).unwrap();
        assert_eq!(advisory["type"], "log_write_failed");
        assert_eq!(advisory["message"], "disk full");
    }
}
