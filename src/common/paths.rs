//! Configuration and scratch file locations
//!
//! Scratch files (debugger script, debugger log, captured streams) live next to
//! the test binary they belong to so a run never reaches outside the build
//! output directory.

use std::path::{Path, PathBuf};

/// Name used for the configuration directory and scratch file prefixes
const APP_NAME: &str = "crashwatch";

/// Configuration file looked up in the current directory
pub const LOCAL_CONFIG_FILE: &str = "crashwatch.toml";

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/crashwatch/`
/// - macOS: `~/Library/Application Support/crashwatch/`
/// - Windows: `%APPDATA%\crashwatch\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the user-level configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the configuration file in `dir`, if present
pub fn local_config_path(dir: &Path) -> Option<PathBuf> {
    let path = dir.join(LOCAL_CONFIG_FILE);
    path.is_file().then_some(path)
}

/// Directory scratch files for `artifact` are created in
pub fn scratch_dir(artifact: &Path) -> PathBuf {
    match artifact.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// File name prefix shared by every scratch file of one run
pub fn scratch_prefix(artifact_name: &str) -> String {
    let sanitized: String = artifact_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!(".{}-{}-", APP_NAME, sanitized)
}
