//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::{config_path, local_config_path};
use super::{Error, Result};
use crate::classify::{SignatureRuleConfig, SignatureSet};

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Build toolchain settings
    #[serde(default)]
    pub build: BuildConfig,

    /// Debugger lookup settings
    #[serde(default)]
    pub debugger: DebuggerConfig,

    /// Per-binary execution settings
    #[serde(default)]
    pub run: RunConfig,

    /// Crash signature rules, in priority order; replaces the built-in set
    #[serde(default)]
    pub signatures: Option<Vec<SignatureRuleConfig>>,
}

/// Build toolchain settings
#[derive(Debug, Deserialize, Default)]
pub struct BuildConfig {
    /// Toolchain program; defaults to `$CARGO`, then `cargo`
    #[serde(default)]
    pub cargo: Option<PathBuf>,

    /// Extra arguments appended to the build command
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl BuildConfig {
    /// The toolchain program to invoke
    pub fn program(&self) -> PathBuf {
        if let Some(cargo) = &self.cargo {
            return cargo.clone();
        }
        std::env::var_os("CARGO")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("cargo"))
    }
}

/// Debugger lookup settings
#[derive(Debug, Deserialize)]
pub struct DebuggerConfig {
    /// Explicit debugger executable; skips probing
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Never use a debugger, always run test binaries directly
    #[serde(default)]
    pub disabled: bool,

    /// Extra locations checked before the built-in ones
    #[serde(default)]
    pub search_paths: Vec<PathBuf>,

    /// Executable name searched for on PATH
    #[serde(default = "default_debugger_program")]
    pub program: String,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            path: None,
            disabled: false,
            search_paths: Vec::new(),
            program: default_debugger_program(),
        }
    }
}

fn default_debugger_program() -> String {
    "cdb".to_string()
}

/// When captured test output is echoed to the terminal
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ShowOutput {
    /// Only for binaries that failed
    #[default]
    Failures,
    /// For every binary
    Always,
    /// Never
    Never,
}

/// Per-binary execution settings
#[derive(Debug, Deserialize)]
pub struct RunConfig {
    /// Wall-clock limit per test binary in seconds, 0 disables
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Value passed as `--test-threads`
    #[serde(default = "default_test_threads")]
    pub test_threads: usize,

    /// Pass `--nocapture` so test output reaches the redirected streams
    #[serde(default = "default_true")]
    pub nocapture: bool,

    /// Extra arguments passed to every test binary
    #[serde(default)]
    pub extra_args: Vec<String>,

    /// When captured output is echoed
    #[serde(default)]
    pub show_output: ShowOutput,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout(),
            test_threads: default_test_threads(),
            nocapture: default_true(),
            extra_args: Vec::new(),
            show_output: ShowOutput::default(),
        }
    }
}

impl RunConfig {
    /// The per-binary timeout, if one applies
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    /// Arguments passed to every test binary
    pub fn test_args(&self) -> Vec<String> {
        let mut args = vec![format!("--test-threads={}", self.test_threads.max(1))];
        if self.nocapture {
            args.push("--nocapture".to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

fn default_timeout() -> u64 {
    1800
}
fn default_test_threads() -> usize {
    1
}
fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration
    ///
    /// An explicit path must exist. Otherwise `crashwatch.toml` in the current
    /// directory is used, then the user config file, then defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        let cwd = std::env::current_dir()?;
        if let Some(path) = local_config_path(&cwd) {
            return Self::from_file(&path);
        }

        if let Some(path) = config_path() {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Parse a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::file_read(path, &e))?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Self::from_toml(&content).map_err(|e| match e {
            Error::ConfigParse { error, .. } => Error::ConfigParse {
                path: path.display().to_string(),
                error,
            },
            other => other,
        })
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse {
            path: "<inline>".to_string(),
            error: e.to_string(),
        })
    }

    /// Compile the crash signature rules this configuration selects
    pub fn signature_set(&self) -> Result<SignatureSet> {
        match &self.signatures {
            Some(rules) => SignatureSet::from_config(rules),
            None => Ok(SignatureSet::builtin()),
        }
    }
}
