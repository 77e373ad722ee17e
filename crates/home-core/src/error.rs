//! Error types for the home model

use thiserror::Error;

/// Errors raised when addressing devices by name
#[derive(Error, Debug)]
pub enum DeviceError {
    /// Name does not match any device in the fixed set
    #[error("Unknown device: {0}")]
    Unknown(String),
}
