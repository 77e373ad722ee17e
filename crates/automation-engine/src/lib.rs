//! Automation engine for the simulated home
//!
//! Provides the temperature threshold rule, the free-text command
//! interpreter and the per-user session that runs one control tick at a
//! time.

pub mod command;
pub mod controller;
pub mod engine;
pub mod error;
pub mod model;

pub use command::{CommandAction, CommandInterpreter};
pub use controller::ThresholdController;
pub use engine::{Advisory, HomeSession, SessionSnapshot, TickReport};
pub use error::AutomationError;
pub use model::*;
