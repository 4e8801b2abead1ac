//! Test artifact discovery from the build message stream
//!
//! The toolchain interleaves free-form text with JSON records. Decoding is
//! total: anything that does not decode as a record is `BuildLine::Noise`.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// One decoded record from the build stream
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BuildEvent {
    /// Path of the emitted executable, if the record produced one
    #[serde(default)]
    pub executable: Option<PathBuf>,

    /// Build profile the artifact was compiled with
    #[serde(default)]
    pub profile: Profile,

    /// Build target the artifact belongs to
    #[serde(default)]
    pub target: Option<Target>,
}

/// The profile part of a build record
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Profile {
    #[serde(default)]
    pub test: bool,
}

/// The target part of a build record
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Target {
    pub name: String,
}

impl BuildEvent {
    /// Whether this record names a test executable
    pub fn is_test_executable(&self) -> bool {
        self.executable.is_some() && self.profile.test
    }
}

/// A line of build output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildLine {
    /// A structured record
    Record(BuildEvent),
    /// Progress text or anything else that is not a record
    Noise,
}

impl BuildLine {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if !trimmed.starts_with('{') {
            return BuildLine::Noise;
        }
        match serde_json::from_str::<BuildEvent>(trimmed) {
            Ok(event) => BuildLine::Record(event),
            Err(_) => BuildLine::Noise,
        }
    }
}

/// A test executable selected for supervision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestArtifact {
    /// Display name: the build target's name, else the file name
    pub name: String,
    /// Absolute or build-relative path to the executable
    pub path: PathBuf,
}

impl TestArtifact {
    fn from_event(event: &BuildEvent, path: &Path) -> Self {
        let name = event
            .target
            .as_ref()
            .map(|t| t.name.clone())
            .or_else(|| {
                path.file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| path.display().to_string());
        Self {
            name,
            path: path.to_path_buf(),
        }
    }
}

/// Extract test executables from the build stream
///
/// Keeps records that name an executable built with the test profile and
/// whose file exists now. Deduplicated by path in first-seen order.
pub fn discover_artifacts<I, S>(lines: I) -> Vec<TestArtifact>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut artifacts = Vec::new();

    for line in lines {
        let BuildLine::Record(event) = BuildLine::parse(line.as_ref()) else {
            continue;
        };
        if !event.is_test_executable() {
            continue;
        }
        let Some(path) = event.executable.as_deref() else {
            continue;
        };
        if !path.exists() {
            tracing::debug!("Skipping missing test artifact {}", path.display());
            continue;
        }
        if !seen.insert(path.to_path_buf()) {
            continue;
        }

        let artifact = TestArtifact::from_event(&event, path);
        tracing::debug!("Discovered test artifact {} at {}", artifact.name, path.display());
        artifacts.push(artifact);
    }

    artifacts
}
