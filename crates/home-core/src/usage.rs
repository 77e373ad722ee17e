//! Simulated power draw

use crate::device::{Device, DeviceRegistry};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::ops::RangeInclusive;

/// Draw range for a device that is on (W)
pub const ACTIVE_WATTS: RangeInclusive<u32> = 50..=300;

/// Power draw of one device for one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageRecord {
    pub device: Device,
    pub watts: u32,
}

/// Per-device draw for one tick plus the total
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsageReport {
    pub records: Vec<UsageRecord>,
    pub total: u32,
}

impl UsageReport {
    /// Build a report from per-device readings, summing the total
    #[must_use]
    pub fn from_records(records: Vec<UsageRecord>) -> Self {
        let total = records.iter().map(|r| r.watts).sum();
        Self { records, total }
    }

    /// Draw of a single device in this report
    #[must_use]
    pub fn watts(&self, device: Device) -> u32 {
        self.records
            .iter()
            .find(|r| r.device == device)
            .map_or(0, |r| r.watts)
    }
}

/// Derives power draw from device state
pub trait UsageMeter: Send + Sync {
    fn compute(&mut self, devices: &DeviceRegistry) -> UsageReport;
}

/// Off devices draw nothing; on devices draw a fresh uniform value from
/// [`ACTIVE_WATTS`] on every call.
pub struct RandomUsageMeter {
    rng: StdRng,
}

impl Default for RandomUsageMeter {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomUsageMeter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    #[must_use]
    pub fn with_rng(rng: StdRng) -> Self {
        Self { rng }
    }
}

impl UsageMeter for RandomUsageMeter {
    fn compute(&mut self, devices: &DeviceRegistry) -> UsageReport {
        let records = devices
            .list()
            .map(|(device, on)| UsageRecord {
                device,
                watts: if on { self.rng.gen_range(ACTIVE_WATTS) } else { 0 },
            })
            .collect();
        UsageReport::from_records(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_off_draws_nothing() {
        let mut meter = RandomUsageMeter::with_rng(StdRng::seed_from_u64(1));
        let report = meter.compute(&DeviceRegistry::new());
        assert_eq!(report.total, 0);
        assert_eq!(report.records.len(), Device::COUNT);
    }

    #[test]
    fn test_on_devices_draw_within_range() {
        let mut devices = DeviceRegistry::new();
        devices.set(Device::Light, true);
        devices.set(Device::Tv, true);
        let mut meter = RandomUsageMeter::with_rng(StdRng::seed_from_u64(9));

        for _ in 0..500 {
            let report = meter.compute(&devices);
            assert!(ACTIVE_WATTS.contains(&report.watts(Device::Light)));
            assert!(ACTIVE_WATTS.contains(&report.watts(Device::Tv)));
            assert_eq!(report.watts(Device::Fan), 0);
            assert_eq!(report.watts(Device::Ac), 0);
            assert_eq!(
                report.total,
                report.watts(Device::Light) + report.watts(Device::Tv)
            );
        }
    }

    #[test]
    fn test_records_follow_declaration_order() {
        let mut meter = RandomUsageMeter::with_rng(StdRng::seed_from_u64(2));
        let report = meter.compute(&DeviceRegistry::new());
        let order: Vec<_> = report.records.iter().map(|r| r.device).collect();
        assert_eq!(order, Device::ALL.to_vec());
    }
}
