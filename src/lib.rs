//! iLO4 Fan Control
//!
//! Temperature-driven fan control for HP ProLiant Gen8/Gen9 servers whose
//! only fan control surface is the patched iLO4 SSH shell.

pub mod args;
pub mod client;
pub mod config;
pub mod cpu_temp;
pub mod daemon;
pub mod errors;
pub mod fan;
pub mod logging;
pub mod session;
pub mod threshold;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::FanControlConfig;
pub use errors::{FanControlError, Result, SessionError};
pub use fan::{CommandPlanner, FanCommand, FanGroup, FanGroupAssignment};
pub use threshold::{Threshold, ThresholdTable};
