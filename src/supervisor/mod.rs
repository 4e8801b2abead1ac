//! Test binary supervision
//!
//! Runs one test artifact to completion and turns whatever happened into a
//! `RunResult`. Nothing that goes wrong here propagates: a binary that cannot
//! even be launched still produces a (failed) result so the next artifact runs.

mod capture;
pub mod process;

pub use capture::{CapturedStreams, CapturedText};

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use crate::build::TestArtifact;
use crate::classify::{classify_exit, ExitClass, SignatureSet};
use crate::common::config::RunConfig;
use crate::common::{paths, Error, Result};
use crate::debugger::script::{debugger_args, parse_exit_code};
use crate::debugger::{DebuggerHandle, DebuggerScript};

use self::capture::{read_lossy, scratch_file};
use self::process::{run_to_completion, AbortSignal, ProcessOutcome};

/// How a test binary was executed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Under the supervising debugger
    Debugger,
    /// Launched directly
    #[default]
    Direct,
}

/// Outcome of supervising one test artifact
#[derive(Debug, Clone, Default)]
pub struct RunResult {
    pub artifact_name: String,
    /// Platform exit code; negative values are signed fault codes
    pub exit_code: i32,
    /// Terminating signal (Unix only)
    pub signal: Option<i32>,
    /// A crash was detected independently of the exit code
    pub had_detected_exception: bool,
    pub diagnosis: Option<String>,
    /// Debugger log line backing the diagnosis
    pub evidence: Option<String>,
    pub timed_out_after: Option<Duration>,
    /// The run was killed by a second interrupt before it finished
    pub interrupted: bool,
    pub captured_stdout: String,
    pub captured_stderr: String,
    pub duration: Duration,
    pub mode: ExecutionMode,
}

impl RunResult {
    /// A run passes only with exit code 0 and no detected exception
    pub fn passed(&self) -> bool {
        !self.had_detected_exception
            && self.exit_code == 0
            && self.signal.is_none()
            && self.timed_out_after.is_none()
            && !self.interrupted
    }

    /// Result for a run that could not be launched or supervised
    pub fn launch_failure(artifact: &TestArtifact, mode: ExecutionMode, error: &Error) -> Self {
        Self {
            artifact_name: artifact.name.clone(),
            exit_code: -1,
            had_detected_exception: true,
            diagnosis: Some(error.to_string()),
            mode,
            ..Self::default()
        }
    }

    fn from_outcome(
        artifact: &TestArtifact,
        mode: ExecutionMode,
        outcome: ProcessOutcome,
        text: CapturedText,
    ) -> Self {
        // A killed run carries no diagnosis beyond the kill itself
        let killed = outcome.timed_out_after.is_some() || outcome.aborted;
        let diagnosis = match classify_exit(outcome.exit_code, outcome.signal) {
            ExitClass::Crash(label) if !killed => Some(label.to_string()),
            _ => None,
        };
        Self {
            artifact_name: artifact.name.clone(),
            exit_code: outcome.exit_code,
            signal: outcome.signal,
            had_detected_exception: false,
            diagnosis,
            evidence: None,
            timed_out_after: outcome.timed_out_after,
            interrupted: outcome.aborted,
            captured_stdout: text.stdout,
            captured_stderr: text.stderr,
            duration: outcome.duration,
            mode,
        }
    }
}

/// Runs test artifacts one at a time
#[derive(Debug, Clone)]
pub struct Supervisor<'a> {
    debugger: &'a DebuggerHandle,
    signatures: &'a SignatureSet,
    config: &'a RunConfig,
    abort: Option<AbortSignal>,
}

impl<'a> Supervisor<'a> {
    pub fn new(
        debugger: &'a DebuggerHandle,
        signatures: &'a SignatureSet,
        config: &'a RunConfig,
    ) -> Self {
        Self {
            debugger,
            signatures,
            config,
            abort: None,
        }
    }

    /// Kill the in-flight run once `abort` turns true
    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = Some(abort);
        self
    }

    pub fn mode(&self) -> ExecutionMode {
        if self.debugger.is_found() {
            ExecutionMode::Debugger
        } else {
            ExecutionMode::Direct
        }
    }

    /// Supervise one artifact; always yields exactly one result
    pub async fn run(&self, artifact: &TestArtifact) -> RunResult {
        let result = match self.debugger.path() {
            Some(debugger) => self.run_under_debugger(debugger, artifact).await,
            None => self.run_direct(artifact).await,
        };

        result.unwrap_or_else(|e| {
            tracing::error!("Could not supervise {}: {}", artifact.name, e);
            RunResult::launch_failure(artifact, self.mode(), &e)
        })
    }

    /// Launch the artifact itself; only the exit status is observable
    async fn run_direct(&self, artifact: &TestArtifact) -> Result<RunResult> {
        let dir = paths::scratch_dir(&artifact.path);
        let prefix = paths::scratch_prefix(&artifact.name);

        let streams = CapturedStreams::create(&dir, &prefix)?;
        let (stdout, stderr) = streams.stdio()?;

        tracing::debug!("Running {} directly", artifact.path.display());
        let outcome = run_to_completion(
            &artifact.path,
            self.config.test_args(),
            stdout,
            stderr,
            self.config.timeout(),
            self.abort.clone(),
        )
        .await;
        let text = streams.read();

        Ok(RunResult::from_outcome(
            artifact,
            ExecutionMode::Direct,
            outcome?,
            text,
        ))
    }

    /// Launch the debugger with the artifact as its target and scan its log
    async fn run_under_debugger(
        &self,
        debugger: &Path,
        artifact: &TestArtifact,
    ) -> Result<RunResult> {
        let dir = paths::scratch_dir(&artifact.path);
        let prefix = paths::scratch_prefix(&artifact.name);

        // The debugger opens the log itself; only reserve the name
        let log_path = scratch_file(&dir, &prefix, ".cdb.log")?.into_temp_path();
        let script = DebuggerScript::new(log_path.to_path_buf());

        let mut script_file = scratch_file(&dir, &prefix, ".cdb.txt")?;
        script_file.write_all(script.render().as_bytes())?;
        script_file.flush()?;
        let script_path = script_file.into_temp_path();

        let streams = CapturedStreams::create(&dir, &prefix)?;
        let (stdout, stderr) = streams.stdio()?;

        let args = debugger_args(&script_path, &artifact.path, &self.config.test_args());
        tracing::debug!(
            "Running {} under {}",
            artifact.path.display(),
            debugger.display()
        );

        let outcome = run_to_completion(
            debugger,
            args,
            stdout,
            stderr,
            self.config.timeout(),
            self.abort.clone(),
        )
        .await
            .map_err(|e| match e {
                Error::Launch { error, .. } => Error::DebuggerLaunch(error),
                other => other,
            });
        let text = streams.read();
        let log = read_lossy(&log_path);

        for path in [script_path, log_path] {
            let scratch = path.to_path_buf();
            if let Err(e) = path.close() {
                tracing::debug!("Could not remove {}: {}", scratch.display(), e);
            }
        }

        let mut outcome = outcome?;
        if outcome.timed_out_after.is_some() || outcome.aborted {
            return Ok(RunResult::from_outcome(artifact, ExecutionMode::Debugger, outcome, text));
        }

        // The debugger's own exit code says nothing about the target
        match parse_exit_code(&log) {
            Some(code) => {
                outcome.exit_code = code;
                outcome.signal = None;
            }
            None => tracing::warn!(
                "{}: no process exit event in the debugger log; using the debugger's exit code {}",
                artifact.name,
                outcome.exit_code
            ),
        }

        let mut result = RunResult::from_outcome(artifact, ExecutionMode::Debugger, outcome, text);

        if let Some(found) = self.signatures.scan(&log) {
            tracing::warn!(
                "{}: debugger log shows {} ({})",
                artifact.name,
                found.label,
                found.line
            );
            result.had_detected_exception = true;
            result.diagnosis = Some(found.label);
            result.evidence = Some(found.line);
        }

        Ok(result)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn artifact(path: PathBuf) -> TestArtifact {
        TestArtifact {
            name: path.file_name().unwrap().to_string_lossy().into_owned(),
            path,
        }
    }

    /// Fake debugger: runs the target, logs its exit event the way `.lastevent`
    /// prints it, then appends `log_line`; exits 0 like the real one after `q`
    fn fake_debugger(dir: &Path, log_line: &str) -> PathBuf {
        write_script(
            dir,
            "fake-cdb",
            &format!(
                r#"script="$3"
shift 3
log=$(sed -n 's/^\.logopen "\(.*\)"$/\1/p' "$script")
"$@"
code=$?
printf 'Last event: 1a2c.3f00: Exit process 0:1a2c, code %x\n' "$code" > "$log"
printf '%s\n' '{log_line}' >> "$log"
exit 0"#
            ),
        )
    }

    fn no_scratch_left(dir: &Path) -> bool {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .all(|e| !e.file_name().to_string_lossy().starts_with(".crashwatch-"))
    }

    #[tokio::test]
    async fn test_direct_pass_captures_output() {
        let dir = tempdir().unwrap();
        let bin = write_script(dir.path(), "smoke", r#"echo "args: $*"; echo oops >&2"#);
        let config = RunConfig::default();
        let signatures = SignatureSet::builtin();
        let debugger = DebuggerHandle::Absent;
        let supervisor = Supervisor::new(&debugger, &signatures, &config);

        let result = supervisor.run(&artifact(bin)).await;
        assert!(result.passed());
        assert_eq!(result.mode, ExecutionMode::Direct);
        assert_eq!(result.captured_stdout, "args: --test-threads=1 --nocapture\n");
        assert_eq!(result.captured_stderr, "oops\n");
        assert!(no_scratch_left(dir.path()));
    }

    #[tokio::test]
    async fn test_direct_test_failure_has_no_diagnosis() {
        let dir = tempdir().unwrap();
        let bin = write_script(dir.path(), "failing", "exit 101");
        let config = RunConfig::default();
        let signatures = SignatureSet::builtin();
        let debugger = DebuggerHandle::Absent;

        let result = Supervisor::new(&debugger, &signatures, &config)
            .run(&artifact(bin))
            .await;
        assert!(!result.passed());
        assert_eq!(result.exit_code, 101);
        assert!(!result.had_detected_exception);
        assert_eq!(result.diagnosis, None);
    }

    #[tokio::test]
    async fn test_launch_failure_is_recorded_not_raised() {
        let dir = tempdir().unwrap();
        let config = RunConfig::default();
        let signatures = SignatureSet::builtin();
        let debugger = DebuggerHandle::Absent;

        let missing = artifact(dir.path().join("vanished"));
        let result = Supervisor::new(&debugger, &signatures, &config)
            .run(&missing)
            .await;
        assert!(!result.passed());
        assert!(result.had_detected_exception);
        assert!(result.diagnosis.unwrap().contains("vanished"));
    }

    #[tokio::test]
    async fn test_debugger_detects_crash_despite_zero_exit() {
        let dir = tempdir().unwrap();
        let bin = write_script(dir.path(), "handled", "exit 0");
        let cdb = fake_debugger(
            dir.path(),
            "(1a2c.3f00): Access violation - code c0000005 (first chance)",
        );
        let config = RunConfig::default();
        let signatures = SignatureSet::builtin();
        let debugger = DebuggerHandle::Found(cdb);

        let result = Supervisor::new(&debugger, &signatures, &config)
            .run(&artifact(bin))
            .await;
        assert_eq!(result.mode, ExecutionMode::Debugger);
        assert_eq!(result.exit_code, 0);
        assert!(result.had_detected_exception);
        assert!(!result.passed());
        assert_eq!(result.diagnosis.as_deref(), Some("Access Violation"));
        assert!(result.evidence.unwrap().contains("c0000005"));
        assert!(no_scratch_left(dir.path()));
    }

    #[tokio::test]
    async fn test_debugger_clean_log_passes() {
        let dir = tempdir().unwrap();
        let bin = write_script(dir.path(), "clean", "echo fine");
        let cdb = fake_debugger(dir.path(), "ModLoad: clean.exe");
        let config = RunConfig::default();
        let signatures = SignatureSet::builtin();
        let debugger = DebuggerHandle::Found(cdb);

        let result = Supervisor::new(&debugger, &signatures, &config)
            .run(&artifact(bin))
            .await;
        assert!(result.passed(), "{result:?}");
        assert_eq!(result.captured_stdout, "fine\n");
    }

    #[tokio::test]
    async fn test_debugger_reports_target_exit_code() {
        let dir = tempdir().unwrap();
        let bin = write_script(dir.path(), "failing", "exit 101");
        let cdb = fake_debugger(dir.path(), "quit:");
        let config = RunConfig::default();
        let signatures = SignatureSet::builtin();
        let debugger = DebuggerHandle::Found(cdb);

        let result = Supervisor::new(&debugger, &signatures, &config)
            .run(&artifact(bin))
            .await;
        assert_eq!(result.exit_code, 101);
        assert!(!result.had_detected_exception);
        assert!(!result.passed());
    }

    #[tokio::test]
    async fn test_debugger_exit_status_classifies_access_violation() {
        let dir = tempdir().unwrap();
        let bin = write_script(dir.path(), "faulting", "exit 0");
        // The last exit event wins over the one for the shell wrapper
        let cdb = fake_debugger(
            dir.path(),
            "Last event: 1a2c.3f00: Exit process 0:1a2c, code c0000005",
        );
        let config = RunConfig::default();
        let signatures = SignatureSet::from_config(&[]).unwrap();
        let debugger = DebuggerHandle::Found(cdb);

        let result = Supervisor::new(&debugger, &signatures, &config)
            .run(&artifact(bin))
            .await;
        assert_eq!(result.exit_code, -1073741819);
        assert!(!result.had_detected_exception);
        assert_eq!(result.diagnosis.as_deref(), Some("Access Violation"));
        assert!(!result.passed());
    }

    #[tokio::test]
    async fn test_debugger_without_exit_event_uses_own_status() {
        let dir = tempdir().unwrap();
        let bin = write_script(dir.path(), "target", "exit 0");
        let cdb = write_script(dir.path(), "silent-cdb", "exit 3");
        let config = RunConfig::default();
        let signatures = SignatureSet::builtin();
        let debugger = DebuggerHandle::Found(cdb);

        let result = Supervisor::new(&debugger, &signatures, &config)
            .run(&artifact(bin))
            .await;
        assert_eq!(result.exit_code, 3);
        assert!(!result.passed());
        assert!(no_scratch_left(dir.path()));
    }

    #[tokio::test]
    async fn test_abort_interrupts_run() {
        let dir = tempdir().unwrap();
        let bin = write_script(dir.path(), "hang", "sleep 30");
        let config = RunConfig::default();
        let signatures = SignatureSet::builtin();
        let debugger = DebuggerHandle::Absent;
        let (_tx, rx) = tokio::sync::watch::channel(true);

        let result = Supervisor::new(&debugger, &signatures, &config)
            .with_abort(rx)
            .run(&artifact(bin))
            .await;
        assert!(result.interrupted);
        assert!(!result.passed());
        assert_eq!(result.diagnosis, None);
        assert!(result.duration < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_debugger_launch_failure() {
        let dir = tempdir().unwrap();
        let bin = write_script(dir.path(), "target", "exit 0");
        let config = RunConfig::default();
        let signatures = SignatureSet::builtin();
        let debugger = DebuggerHandle::Found(dir.path().join("no-such-cdb"));

        let result = Supervisor::new(&debugger, &signatures, &config)
            .run(&artifact(bin))
            .await;
        assert!(result.had_detected_exception);
        assert!(result
            .diagnosis
            .unwrap()
            .starts_with("Debugger failed to start"));
        assert!(no_scratch_left(dir.path()));
    }

    #[tokio::test]
    async fn test_timeout_records_failure_without_diagnosis() {
        let dir = tempdir().unwrap();
        let bin = write_script(dir.path(), "hang", "sleep 30");
        let config = RunConfig {
            timeout_secs: 1,
            ..RunConfig::default()
        };
        let signatures = SignatureSet::builtin();
        let debugger = DebuggerHandle::Absent;

        let result = Supervisor::new(&debugger, &signatures, &config)
            .run(&artifact(bin))
            .await;
        assert!(!result.passed());
        assert_eq!(result.timed_out_after, Some(Duration::from_secs(1)));
        assert_eq!(result.diagnosis, None);
    }
}
