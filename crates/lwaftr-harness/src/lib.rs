//! Validation harness for the lwAFTR data plane.
//!
//! Drives the subject binary through end-to-end checks against golden
//! captures (in standard and on-a-stick topologies), regenerates those
//! goldens, soak-tests it, and exercises its `run`, `monitor` and
//! `loadtest` subcommands against a backgrounded daemon.

pub mod case;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod error;
pub mod matrix;
pub mod paths;
pub mod regen;
pub mod report;
pub mod soak;
pub mod subject;
pub mod suites;
pub mod verify;

#[cfg(test)]
pub(crate) mod test_util;

pub use error::{HarnessError, Result};
