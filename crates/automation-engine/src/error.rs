//! Error types for the automation engine

use thiserror::Error;

/// Errors that can occur in the automation engine
#[derive(Error, Debug)]
pub enum AutomationError {
    /// Device name did not resolve to a device
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
}

impl From<home_core::DeviceError> for AutomationError {
    fn from(err: home_core::DeviceError) -> Self {
        match err {
            home_core::DeviceError::Unknown(name) => Self::DeviceNotFound(name),
        }
    }
}
