//! Miscellaneous support code shared across depman: monitored subprocess
//! execution for driving VCS binaries, filesystem helpers for vendor tree
//! materialization, and content hashing.

pub mod hash;
pub mod paths;
pub mod process;

pub use process::{MonitoredCommand, MonitoredCommandError};
