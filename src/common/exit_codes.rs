//! Stable process exit statuses for the harness.
//!
//! A failed build is the exception: it exits with the toolchain's own code.

/// Every discovered test binary passed, or none were discovered.
pub const OK: i32 = 0;
/// At least one test binary failed or crashed.
pub const TESTS_FAILED: i32 = 1;
/// The harness itself could not run (bad config, toolchain missing, ...).
pub const HARNESS_ERROR: i32 = 2;
/// The run was interrupted before every test binary was supervised.
pub const INTERRUPTED: i32 = 130;
