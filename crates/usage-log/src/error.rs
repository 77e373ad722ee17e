//! Error types for the usage log

use thiserror::Error;

/// Errors that can occur while persisting log rows
#[derive(Error, Debug)]
pub enum UsageLogError {
    /// IO error writing the log file
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}
