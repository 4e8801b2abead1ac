//! Supervising debugger lookup
//!
//! Checks the Windows SDK debugger install locations (64-bit first), then the
//! executable search path. Not finding a debugger is a normal outcome.

use std::path::{Path, PathBuf};

use crate::common::config::DebuggerConfig;
use crate::common::{Error, Result};

/// Resolved debugger, shared read-only by every run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DebuggerHandle {
    /// No debugger; test binaries run directly
    #[default]
    Absent,
    /// Path to the debugger executable
    Found(PathBuf),
}

impl DebuggerHandle {
    pub fn path(&self) -> Option<&Path> {
        match self {
            DebuggerHandle::Absent => None,
            DebuggerHandle::Found(path) => Some(path),
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, DebuggerHandle::Found(_))
    }
}

/// Windows SDK releases that ship the console debugger
const KIT_VERSIONS: &[&str] = &["10", "8.1", "8.0"];

/// Architecture directories, 64-bit first
const ARCHES: &[&str] = &["x64", "x86"];

/// Well-known debugger install locations, in search order
pub fn well_known_locations(program: &str) -> Vec<PathBuf> {
    let exe = if program.ends_with(".exe") {
        program.to_string()
    } else {
        format!("{program}.exe")
    };

    let mut roots: Vec<PathBuf> = Vec::new();
    for var in ["ProgramFiles(x86)", "ProgramFiles"] {
        if let Some(root) = std::env::var_os(var) {
            let root = PathBuf::from(root);
            if !roots.contains(&root) {
                roots.push(root);
            }
        }
    }
    for fallback in [r"C:\Program Files (x86)", r"C:\Program Files"] {
        let root = PathBuf::from(fallback);
        if !roots.contains(&root) {
            roots.push(root);
        }
    }

    let mut locations = Vec::new();
    for root in &roots {
        for version in KIT_VERSIONS {
            for arch in ARCHES {
                locations.push(
                    root.join("Windows Kits")
                        .join(version)
                        .join("Debuggers")
                        .join(arch)
                        .join(&exe),
                );
            }
        }
    }
    for root in &roots {
        locations.push(root.join("Debugging Tools for Windows (x64)").join(&exe));
        locations.push(root.join("Debugging Tools for Windows (x86)").join(&exe));
    }
    locations
}

/// Check `candidates` in order, then ask `search` for `program`
///
/// First match wins.
pub fn locate_in<F>(candidates: &[PathBuf], program: &str, search: F) -> DebuggerHandle
where
    F: Fn(&str) -> Option<PathBuf>,
{
    if let Some(path) = candidates.iter().find(|p| p.is_file()) {
        return DebuggerHandle::Found(path.clone());
    }
    match search(program) {
        Some(path) => DebuggerHandle::Found(path),
        None => DebuggerHandle::Absent,
    }
}

/// Resolve the debugger for this run
///
/// An explicitly configured path must exist; probing never fails.
pub fn locate(config: &DebuggerConfig) -> Result<DebuggerHandle> {
    if config.disabled {
        tracing::info!("Debugger disabled; running test binaries directly");
        return Ok(DebuggerHandle::Absent);
    }

    if let Some(path) = &config.path {
        if !path.is_file() {
            return Err(Error::DebuggerMissing(path.display().to_string()));
        }
        return Ok(DebuggerHandle::Found(path.clone()));
    }

    let mut candidates = config.search_paths.clone();
    candidates.extend(well_known_locations(&config.program));

    let handle = locate_in(&candidates, &config.program, |name| which::which(name).ok());
    match &handle {
        DebuggerHandle::Found(path) => {
            tracing::info!("Using debugger {}", path.display());
        }
        DebuggerHandle::Absent => {
            tracing::warn!(
                "No '{}' debugger found; running test binaries directly without crash detection",
                config.program
            );
        }
    }
    Ok(handle)
}
