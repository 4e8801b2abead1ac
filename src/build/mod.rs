//! Build invocation
//!
//! Runs the toolchain in "compile tests, do not run them" mode and collects
//! its line-delimited JSON message stream for artifact discovery.

mod discover;

pub use discover::{discover_artifacts, BuildEvent, BuildLine, Profile, Target, TestArtifact};

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::common::{Error, Result};
use crate::supervisor::process::exit_code_of;

/// Flags that select what gets built
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Explicit features to enable
    pub features: Vec<String>,
    /// Enable every feature
    pub all_features: bool,
    /// `--features` appeared after `--all-features` on the command line
    pub features_after_all: bool,
    /// Disable the default feature set
    pub no_default_features: bool,
    /// Only build tests of this package
    pub package: Option<String>,
    /// Build with the release profile
    pub release: bool,
}

impl BuildOptions {
    /// Split comma/space separated feature lists and resolve conflicts
    ///
    /// `--all-features` together with an explicit list is accepted with a
    /// warning; whichever was given last wins and the other is dropped.
    pub fn normalized(mut self) -> Self {
        let mut features: Vec<String> = Vec::new();
        for feature in self
            .features
            .iter()
            .flat_map(|f| f.split(|c: char| c == ',' || c.is_whitespace()))
            .filter(|f| !f.is_empty())
        {
            if !features.iter().any(|f| f == feature) {
                features.push(feature.to_string());
            }
        }
        self.features = features;

        if self.all_features && !self.features.is_empty() {
            if self.features_after_all {
                tracing::warn!(
                    "--features {} was given after --all-features; only the listed features are enabled",
                    self.features.join(",")
                );
                self.all_features = false;
            } else {
                tracing::warn!(
                    "--all-features was given after --features {}; the explicit list is ignored",
                    self.features.join(",")
                );
                self.features.clear();
            }
        }

        self
    }

    /// Arguments passed to the toolchain
    pub fn cargo_args(&self, extra_args: &[String]) -> Vec<String> {
        let mut args = vec![
            "test".to_string(),
            "--no-run".to_string(),
            "--message-format=json-render-diagnostics".to_string(),
        ];

        if let Some(package) = &self.package {
            args.push("--package".to_string());
            args.push(package.clone());
        }

        if self.all_features {
            args.push("--all-features".to_string());
        } else if !self.features.is_empty() {
            args.push("--features".to_string());
            args.push(self.features.join(","));
        }

        if self.no_default_features {
            args.push("--no-default-features".to_string());
        }

        if self.release {
            args.push("--release".to_string());
        }

        args.extend(extra_args.iter().cloned());
        args
    }
}

/// Captured result of a successful build
#[derive(Debug, Clone, Default)]
pub struct BuildOutput {
    /// The toolchain's stdout, one entry per line
    pub lines: Vec<String>,
}

/// Run the build and return its message stream
///
/// The toolchain's stderr (progress and rendered diagnostics) is passed
/// through to the terminal. A non-zero exit aborts with `Error::BuildFailed`
/// carrying the toolchain's own exit code; the build is never retried.
pub async fn run_build(
    program: &Path,
    options: &BuildOptions,
    extra_args: &[String],
) -> Result<BuildOutput> {
    let args = options.cargo_args(extra_args);
    tracing::info!("Building tests: {} {}", program.display(), args.join(" "));

    let output = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .output()
        .await
        .map_err(|e| Error::ToolchainSpawn {
            program: program.display().to_string(),
            error: e.to_string(),
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<String> = stdout.lines().map(str::to_string).collect();

    if !output.status.success() {
        let (code, _) = exit_code_of(&output.status);
        // Echo what the toolchain printed outside its JSON records
        for line in lines.iter().filter(|l| !l.trim_start().starts_with('{')) {
            eprintln!("{line}");
        }
        tracing::error!("Build failed with exit code {}", code);
        return Err(Error::BuildFailed {
            code: if code == 0 { 1 } else { code },
        });
    }

    tracing::debug!("Build produced {} output lines", lines.len());
    Ok(BuildOutput { lines })
}
