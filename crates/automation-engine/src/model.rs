//! Data models for the automation engine

use home_core::Device;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lowest accepted AC threshold (°C)
pub const MIN_THRESHOLD: i64 = 16;
/// Highest accepted AC threshold (°C)
pub const MAX_THRESHOLD: i64 = 45;

/// Settings of the room temperature rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Whether the rule runs at all
    #[serde(rename = "room_auto", default = "default_enabled")]
    pub enabled: bool,
    /// Temperature at or above which the target is switched on (°C)
    #[serde(
        rename = "temp_threshold_ac",
        default = "default_threshold",
        deserialize_with = "clamped_threshold"
    )]
    threshold_celsius: i64,
    /// Device the rule switches
    #[serde(default = "default_target")]
    pub target: Device,
}

fn default_enabled() -> bool {
    true
}

fn default_threshold() -> i64 {
    30
}

fn clamped_threshold<'de, D: serde::Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    Ok(i64::deserialize(d)?.clamp(MIN_THRESHOLD, MAX_THRESHOLD))
}

fn default_target() -> Device {
    Device::Ac
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            threshold_celsius: default_threshold(),
            target: default_target(),
        }
    }
}

impl AutomationConfig {
    /// Threshold in °C, always within [`MIN_THRESHOLD`, `MAX_THRESHOLD`]
    #[must_use]
    pub fn threshold(&self) -> i64 {
        self.threshold_celsius
    }

    /// Set the threshold, clamping out-of-range input
    pub fn set_threshold(&mut self, celsius: i64) {
        self.threshold_celsius = celsius.clamp(MIN_THRESHOLD, MAX_THRESHOLD);
    }

    /// Apply an update request to this config
    pub fn apply_update(&mut self, update: UpdateAutomationRequest) {
        if let Some(enabled) = update.room_auto {
            self.enabled = enabled;
        }
        if let Some(threshold) = update.temp_threshold_ac {
            self.set_threshold(threshold);
        }
    }
}

/// Request to change the automation settings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateAutomationRequest {
    #[serde(default)]
    pub room_auto: Option<bool>,
    #[serde(default)]
    pub temp_threshold_ac: Option<i64>,
}

/// Device switches made by the threshold rule
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AutomationEvent {
    TurnedOn { device: Device, temperature: f64 },
    TurnedOff { device: Device, temperature: f64 },
}

impl fmt::Display for AutomationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (device, state, temperature) = match self {
            AutomationEvent::TurnedOn { device, temperature } => (device, "ON", temperature),
            AutomationEvent::TurnedOff { device, temperature } => (device, "OFF", temperature),
        };
        write!(f, "Automation: {device} turned {state} (Temp: {temperature:.1}°C)")
    }
}
