//! Room temperature threshold rule

use crate::model::{AutomationConfig, AutomationEvent};
use home_core::DeviceRegistry;

/// Single-threshold controller over the configured target device.
///
/// At or above the threshold the target is switched on, below it the
/// target is switched off. There is no deadband: a temperature hovering at
/// the threshold can switch the target on and off on consecutive ticks.
/// Nothing is remembered while the rule is disabled, so re-enabling it
/// evaluates the current temperature from scratch.
pub struct ThresholdController;

impl ThresholdController {
    /// Evaluate the rule for one temperature sample.
    ///
    /// Only emits an event when the target actually changes state, so
    /// repeated calls with the same inputs fire at most once.
    pub fn apply(
        config: &AutomationConfig,
        temperature: f64,
        devices: &mut DeviceRegistry,
    ) -> Option<AutomationEvent> {
        if !config.enabled {
            return None;
        }

        let device = config.target;
        let threshold = config.threshold() as f64;
        let on = devices.get(device);

        if temperature >= threshold && !on {
            devices.set(device, true);
            tracing::info!("Automation: {} turned ON at {:.1}°C", device, temperature);
            Some(AutomationEvent::TurnedOn {
                device,
                temperature,
            })
        } else if temperature < threshold && on {
            devices.set(device, false);
            tracing::info!("Automation: {} turned OFF at {:.1}°C", device, temperature);
            Some(AutomationEvent::TurnedOff {
                device,
                temperature,
            })
        } else {
            None
        }
    }
}
