//! Simulated home model
//!
//! This crate holds the switchable device set, the ambient temperature
//! simulation and the per-device power model that the automation engine
//! drives once per tick.

pub mod device;
pub mod environment;
pub mod error;
pub mod usage;

pub use device::{Device, DeviceRegistry};
pub use environment::{EnvironmentSimulator, Memoryless, RandomWalk, SimulationConfig, SimulationPolicy};
pub use error::DeviceError;
pub use usage::{RandomUsageMeter, UsageMeter, UsageRecord, UsageReport};
