//! Free-text command interpreter
//!
//! Matching is by substring on the lower-cased input, not by words: a
//! device is addressed when its name appears anywhere in the text, and the
//! text as a whole decides on/off. "on" is checked before "off", so input
//! containing both switches the device on. A device name embedded in
//! another word ("fan" in "fancy") still addresses the device.

use home_core::{Device, DeviceRegistry};
use serde::Serialize;
use std::fmt;

/// One outcome of a command, rendered for display by [`fmt::Display`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandAction {
    /// A device was switched
    Switched { device: Device, on: bool },
    /// State of every device after the command was applied
    Status { devices: Vec<(Device, bool)> },
}

impl CommandAction {
    #[must_use]
    pub fn is_status(&self) -> bool {
        matches!(self, CommandAction::Status { .. })
    }
}

fn on_off(on: bool) -> &'static str {
    if on {
        "ON"
    } else {
        "OFF"
    }
}

impl fmt::Display for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandAction::Switched { device, on } => write!(f, "{device} {}", on_off(*on)),
            CommandAction::Status { devices } => {
                f.write_str("Status: ")?;
                for (i, (device, on)) in devices.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{device}: {}", on_off(*on))?;
                }
                Ok(())
            }
        }
    }
}

/// Maps command text to device mutations
pub struct CommandInterpreter;

impl CommandInterpreter {
    /// Apply a command to the registry and describe what happened.
    ///
    /// Unrecognized text yields no actions.
    pub fn parse(text: &str, devices: &mut DeviceRegistry) -> Vec<CommandAction> {
        let cmd = text.trim().to_lowercase();
        let mut actions = Vec::new();

        let wants_on = cmd.contains("on");
        let wants_off = cmd.contains("off");

        for device in Device::ALL {
            if !cmd.contains(&device.name().to_lowercase()) {
                continue;
            }
            if wants_on {
                devices.set(device, true);
                actions.push(CommandAction::Switched { device, on: true });
            } else if wants_off {
                devices.set(device, false);
                actions.push(CommandAction::Switched { device, on: false });
            }
        }

        if cmd.contains("status") {
            actions.push(CommandAction::Status {
                devices: devices.list().collect(),
            });
        }

        tracing::debug!("Command {:?} produced {} action(s)", cmd, actions.len());
        actions
    }
}
