//! Supervising debugger support
//!
//! Locates the console debugger and produces the per-run command file it
//! executes.

pub mod locator;
pub mod script;

pub use locator::{locate, DebuggerHandle};
pub use script::DebuggerScript;
