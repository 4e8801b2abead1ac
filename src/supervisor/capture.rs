//! Stream capture through scratch files
//!
//! Redirecting to files instead of pipes keeps a chatty test binary from
//! blocking on a full pipe while the harness waits on it. The files are
//! removed when the capture is read back or dropped.

use std::fs::File;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::common::{Error, Result};

/// Scratch files receiving a child's stdout and stderr
#[derive(Debug)]
pub struct CapturedStreams {
    stdout: NamedTempFile,
    stderr: NamedTempFile,
}

/// Text read back from a capture
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedText {
    pub stdout: String,
    pub stderr: String,
}

impl CapturedStreams {
    /// Create both scratch files in `dir`
    pub fn create(dir: &Path, prefix: &str) -> Result<Self> {
        Ok(Self {
            stdout: scratch_file(dir, prefix, ".stdout")?,
            stderr: scratch_file(dir, prefix, ".stderr")?,
        })
    }

    /// Handles to pass to the child as stdout and stderr
    pub fn stdio(&self) -> Result<(File, File)> {
        Ok((
            self.stdout.as_file().try_clone()?,
            self.stderr.as_file().try_clone()?,
        ))
    }

    /// Read both streams and delete the scratch files
    pub fn read(self) -> CapturedText {
        let text = CapturedText {
            stdout: read_lossy(self.stdout.path()),
            stderr: read_lossy(self.stderr.path()),
        };
        for file in [self.stdout, self.stderr] {
            let path = file.path().to_path_buf();
            if let Err(e) = file.close() {
                tracing::debug!("Could not remove {}: {}", path.display(), e);
            }
        }
        text
    }
}

/// Create a named scratch file in `dir`
pub fn scratch_file(dir: &Path, prefix: &str, suffix: &str) -> Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix(prefix)
        .suffix(suffix)
        .tempfile_in(dir)
        .map_err(|e| Error::Internal(format!("Failed to create scratch file in {}: {}", dir.display(), e)))
}

/// Read a file as text, replacing invalid UTF-8; a missing file reads empty
pub fn read_lossy(path: &Path) -> String {
    match std::fs::read(path) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            tracing::debug!("Could not read {}: {}", path.display(), e);
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_capture_round_trip_and_cleanup() {
        let dir = tempdir().unwrap();
        let streams = CapturedStreams::create(dir.path(), ".crashwatch-smoke-").unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);

        let (mut out, mut err) = streams.stdio().unwrap();
        out.write_all(b"running 2 tests\n").unwrap();
        err.write_all(b"thread 'main' panicked\n").unwrap();
        drop((out, err));

        let text = streams.read();
        assert_eq!(text.stdout, "running 2 tests\n");
        assert_eq!(text.stderr, "thread 'main' panicked\n");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_read_lossy_handles_invalid_utf8_and_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bytes");
        std::fs::write(&path, [b'o', b'k', 0xFF]).unwrap();
        assert_eq!(read_lossy(&path), "ok\u{FFFD}");
        assert_eq!(read_lossy(&dir.path().join("missing")), "");
    }

    #[test]
    fn test_scratch_file_naming() {
        let dir = tempdir().unwrap();
        let file = scratch_file(dir.path(), ".crashwatch-t-", ".cdb.log").unwrap();
        let name = file.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".crashwatch-t-"));
        assert!(name.ends_with(".cdb.log"));
    }
}
