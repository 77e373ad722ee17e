//! Simulated device representation

use crate::error::DeviceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A switchable appliance in the simulated home.
///
/// The set is closed: the registry is built from [`Device::ALL`] and entries
/// are only ever toggled, never added or removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Device {
    Light,
    Fan,
    #[serde(rename = "AC")]
    Ac,
    #[serde(rename = "TV")]
    Tv,
}

impl Device {
    /// Number of devices in the fixed set
    pub const COUNT: usize = 4;

    /// All devices in declaration order
    pub const ALL: [Device; Device::COUNT] = [Device::Light, Device::Fan, Device::Ac, Device::Tv];

    /// Display name, also used as the command keyword
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Device::Light => "Light",
            Device::Fan => "Fan",
            Device::Ac => "AC",
            Device::Tv => "TV",
        }
    }

    fn index(self) -> usize {
        match self {
            Device::Light => 0,
            Device::Fan => 1,
            Device::Ac => 2,
            Device::Tv => 3,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Device {
    type Err = DeviceError;

    /// Case-insensitive lookup by display name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Device::ALL
            .into_iter()
            .find(|d| d.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DeviceError::Unknown(s.to_string()))
    }
}

/// On/off state of every device, owned by a single session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceRegistry {
    states: [bool; Device::COUNT],
}

impl DeviceRegistry {
    /// Create a registry with every device off
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the device is on
    #[must_use]
    pub fn get(&self, device: Device) -> bool {
        self.states[device.index()]
    }

    /// Switch a device, returning its previous state
    pub fn set(&mut self, device: Device, on: bool) -> bool {
        std::mem::replace(&mut self.states[device.index()], on)
    }

    /// Flip a device and return its new state
    pub fn toggle(&mut self, device: Device) -> bool {
        let on = !self.get(device);
        self.set(device, on);
        on
    }

    /// Devices with their state, in declaration order
    pub fn list(&self) -> impl Iterator<Item = (Device, bool)> + '_ {
        Device::ALL.into_iter().map(|d| (d, self.get(d)))
    }

    /// Number of devices currently on
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.states.iter().filter(|on| **on).count()
    }
}

impl Serialize for DeviceRegistry {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(Device::COUNT))?;
        for (device, on) in self.list() {
            map.serialize_entry(device.name(), &on)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_all_off() {
        let registry = DeviceRegistry::new();
        assert!(registry.list().all(|(_, on)| !on));
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_list_declaration_order() {
        let names: Vec<_> = DeviceRegistry::new().list().map(|(d, _)| d.name()).collect();
        assert_eq!(names, vec!["Light", "Fan", "AC", "TV"]);
    }

    #[test]
    fn test_set_and_toggle() {
        let mut registry = DeviceRegistry::new();
        assert!(!registry.set(Device::Fan, true));
        assert!(registry.get(Device::Fan));
        assert!(!registry.toggle(Device::Fan));
        assert!(registry.toggle(Device::Tv));
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_parse_device_name() {
        assert_eq!("ac".parse::<Device>().unwrap(), Device::Ac);
        assert_eq!(" Light ".parse::<Device>().unwrap(), Device::Light);
        assert!(matches!(
            "toaster".parse::<Device>(),
            Err(DeviceError::Unknown(_))
        ));
    }

    #[test]
    fn test_serialize_as_ordered_map() {
        let mut registry = DeviceRegistry::new();
        registry.set(Device::Ac, true);
        let json = serde_json::to_string(&registry).unwrap();
        assert_eq!(json, r#"{"Light":false,"Fan":false,"AC":true,"TV":false}"#);
    }
}
