//! Server configuration from environment variables

use home_core::{SimulationConfig, SimulationPolicy};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings, read once at startup
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server listens on (`CASITA_BIND`)
    pub bind: SocketAddr,
    /// Directory holding `users.csv` and `logs/` (`DATA_DIR`)
    pub data_dir: PathBuf,
    /// Period of the background tick per session (`TICK_INTERVAL_SECS`)
    pub tick_interval: Duration,
    /// Lifetime of cached log reads (`LOG_CACHE_TTL_SECS`)
    pub log_cache_ttl: Duration,
    /// Temperature simulation (`SIM_POLICY`, `SIM_MIN_TEMP`, `SIM_MAX_TEMP`)
    pub simulation: SimulationConfig,
}

impl Config {
    /// Read the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or invalid keys use defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = SimulationConfig::default();
        let policy = match lookup("SIM_POLICY").as_deref().map(str::trim) {
            None | Some("") | Some("random_walk") => SimulationPolicy::RandomWalk,
            Some("memoryless") => SimulationPolicy::Memoryless,
            Some(other) => {
                tracing::warn!("Unknown SIM_POLICY {:?}, using random_walk", other);
                SimulationPolicy::RandomWalk
            }
        };

        let simulation = SimulationConfig {
            policy,
            min_temp: finite_or(&lookup, "SIM_MIN_TEMP", defaults.min_temp),
            max_temp: finite_or(&lookup, "SIM_MAX_TEMP", defaults.max_temp),
            ..defaults
        }
        .normalized();

        let tick_secs: u64 = parse_or(&lookup, "TICK_INTERVAL_SECS", 5);

        Self {
            bind: parse_or(&lookup, "CASITA_BIND", SocketAddr::from(([0, 0, 0, 0], 3000))),
            data_dir: lookup("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            tick_interval: Duration::from_secs(tick_secs.max(1)),
            log_cache_ttl: Duration::from_secs(parse_or(&lookup, "LOG_CACHE_TTL_SECS", 300)),
            simulation,
        }
    }

    /// Credential file path
    pub fn users_path(&self) -> PathBuf {
        self.data_dir.join("users.csv")
    }

    /// Directory of per-user log files
    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Invalid {}={:?} ({}), using default", key, raw, e);
                default
            }
        },
    }
}

fn finite_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: f64) -> f64 {
    let value = parse_or(lookup, key, default);
    if value.is_finite() {
        value
    } else {
        tracing::warn!("Invalid {}={} (not finite), using default", key, value);
        default
    }
}
