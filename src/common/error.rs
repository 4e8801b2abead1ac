//! Error types for the crash-watching harness
//!
//! Only a failed build aborts the whole run. Everything that goes wrong while
//! supervising a single test binary is folded into that binary's `RunResult`
//! instead of surfacing here.

use std::io;
use thiserror::Error;

use super::exit_codes;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Toolchain Errors ===
    #[error("Failed to start build toolchain '{program}': {error}")]
    ToolchainSpawn { program: String, error: String },

    #[error("Build failed with exit code {code}; no tests were run")]
    BuildFailed { code: i32 },

    // === Debugger Errors ===
    #[error("Configured debugger not found at '{0}'")]
    DebuggerMissing(String),

    #[error("Debugger failed to start: {0}")]
    DebuggerLaunch(String),

    #[error("Failed to launch '{program}': {error}")]
    Launch { program: String, error: String },

    // === Configuration Errors ===
    #[error("Invalid configuration file '{path}': {error}")]
    ConfigParse { path: String, error: String },

    #[error("Invalid crash signature pattern '{pattern}': {error}")]
    InvalidSignature { pattern: String, error: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a launch error for a program that could not be started
    pub fn launch<P: AsRef<std::path::Path>>(program: P, error: &io::Error) -> Self {
        Self::Launch {
            program: program.as_ref().display().to_string(),
            error: error.to_string(),
        }
    }

    /// Create a file read error
    pub fn file_read<P: AsRef<std::path::Path>>(path: P, error: &io::Error) -> Self {
        Self::FileRead {
            path: path.as_ref().display().to_string(),
            error: error.to_string(),
        }
    }

    /// Process exit status this error should terminate the harness with
    ///
    /// A failed build propagates the toolchain's own code unchanged.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::BuildFailed { code } => *code,
            _ => exit_codes::HARNESS_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_failure_propagates_toolchain_code() {
        assert_eq!(Error::BuildFailed { code: 1 }.exit_code(), 1);
        assert_eq!(Error::BuildFailed { code: 101 }.exit_code(), 101);
    }

    #[test]
    fn test_other_errors_use_harness_status() {
        let err = Error::DebuggerMissing("C:\\Debuggers\\cdb.exe".to_string());
        assert_eq!(err.exit_code(), exit_codes::HARNESS_ERROR);
    }

    #[test]
    fn test_launch_error_message() {
        let io = io::Error::new(io::ErrorKind::NotFound, "no such file");
        let err = Error::launch("/bin/missing", &io);
        assert_eq!(
            err.to_string(),
            "Failed to launch '/bin/missing': no such file"
        );
    }
}
