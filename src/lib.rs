//! crashwatch - crash-aware test runner for cargo projects
//!
//! Builds a workspace's test binaries, then runs each one to completion under
//! a supervising debugger when one is available (directly otherwise), and
//! classifies hard crashes that the test framework itself cannot report.

pub mod build;
pub mod classify;
pub mod common;
pub mod debugger;
pub mod harness;
pub mod report;
pub mod supervisor;

pub use common::{Error, Result};
