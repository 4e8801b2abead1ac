//! End-to-end harness run
//!
//! Build → discover → locate debugger → supervise each artifact in discovery
//! order → report. Artifacts run strictly one at a time: scratch files are
//! scoped to the artifact's directory and debugger logs must stay attributable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::build::{self, discover_artifacts, BuildOptions, TestArtifact};
use crate::common::config::{Config, ShowOutput};
use crate::common::{exit_codes, Result};
use crate::debugger;
use crate::report::{print_run, Summary};
use crate::supervisor::{RunResult, Supervisor};

/// Options that come from the command line rather than the config file
#[derive(Debug, Clone, Default)]
pub struct HarnessOptions {
    pub build: BuildOptions,
    /// Print the summary as JSON instead of text
    pub json: bool,
}

/// Run the harness and return the process exit status
///
/// Only a failed build (or a harness setup error) comes back as `Err`.
pub async fn run(config: &Config, options: &HarnessOptions) -> Result<i32> {
    // Fail on bad signature rules before spending time on a build
    let signatures = config.signature_set()?;

    let build_options = options.build.clone().normalized();
    let output = build::run_build(
        &config.build.program(),
        &build_options,
        &config.build.extra_args,
    )
    .await?;

    let artifacts = discover_artifacts(&output.lines);
    if artifacts.is_empty() {
        tracing::info!("Build produced no test executables");
        emit_summary(&Summary::new(), options.json)?;
        return Ok(exit_codes::OK);
    }
    tracing::info!("Discovered {} test binaries", artifacts.len());

    let debugger = debugger::locate(&config.debugger)?;
    let cancelled = Arc::new(AtomicBool::new(false));
    let (abort_tx, abort_rx) = watch::channel(false);
    let supervisor =
        Supervisor::new(&debugger, &signatures, &config.run).with_abort(abort_rx);

    let interrupt = spawn_interrupt_listener(Arc::clone(&cancelled), abort_tx);

    let show_output = if options.json {
        ShowOutput::Never
    } else {
        config.run.show_output
    };
    let json = options.json;

    let summary = supervise_all(
        &supervisor,
        &artifacts,
        || cancelled.load(Ordering::SeqCst),
        |result| {
            if !json {
                print_run(result, show_output);
            }
        },
    )
    .await;
    interrupt.abort();

    emit_summary(&summary, options.json)?;
    Ok(summary.exit_code())
}

/// Supervise artifacts in order, folding each result into a summary
///
/// `is_cancelled` is checked before each artifact; once it reports true the
/// remaining artifacts are recorded as skipped. A run killed by an abort
/// counts as skipped too.
pub async fn supervise_all<C, F>(
    supervisor: &Supervisor<'_>,
    artifacts: &[TestArtifact],
    is_cancelled: C,
    mut on_result: F,
) -> Summary
where
    C: Fn() -> bool,
    F: FnMut(&RunResult),
{
    let mut summary = Summary::new();

    for (index, artifact) in artifacts.iter().enumerate() {
        if is_cancelled() {
            for skipped in &artifacts[index..] {
                summary.skip(&skipped.name);
            }
            break;
        }

        tracing::info!(
            "[{}/{}] Running {}",
            index + 1,
            artifacts.len(),
            artifact.name
        );
        let result = supervisor.run(artifact).await;
        on_result(&result);
        if result.interrupted {
            summary.skip(&result.artifact_name);
        } else {
            summary.record(&result);
        }
    }

    if is_cancelled() {
        summary.mark_interrupted();
    }

    summary
}

/// Set `flag` on the first Ctrl-C so the in-flight artifact can finish;
/// a second Ctrl-C fires `abort` to kill it
fn spawn_interrupt_listener(
    flag: Arc<AtomicBool>,
    abort: watch::Sender<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        tracing::warn!("Interrupt received; finishing the current test binary and skipping the rest (Ctrl-C again to kill it)");
        flag.store(true, Ordering::SeqCst);

        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Second interrupt received; killing the running test binary");
            abort.send_replace(true);
        }
    })
}

fn emit_summary(summary: &Summary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
    } else {
        print!("{}", summary.render());
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::classify::SignatureSet;
    use crate::common::config::RunConfig;
    use crate::debugger::DebuggerHandle;
    use std::cell::Cell;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::tempdir;

    fn script_artifact(dir: &Path, name: &str, body: &str) -> TestArtifact {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        TestArtifact {
            name: name.to_string(),
            path,
        }
    }

    #[tokio::test]
    async fn test_one_crash_does_not_stop_the_run() {
        let dir = tempdir().unwrap();
        let artifacts = vec![
            script_artifact(dir.path(), "first", "exit 0"),
            script_artifact(dir.path(), "crashes", "kill -SEGV $$"),
            TestArtifact {
                name: "vanished".to_string(),
                path: dir.path().join("vanished"),
            },
            script_artifact(dir.path(), "last", "exit 0"),
        ];

        let config = RunConfig::default();
        let signatures = SignatureSet::builtin();
        let debugger = DebuggerHandle::Absent;
        let supervisor = Supervisor::new(&debugger, &signatures, &config);

        let mut seen = Vec::new();
        let summary = supervise_all(&supervisor, &artifacts, || false, |r| {
            seen.push(r.artifact_name.clone())
        })
        .await;

        assert_eq!(seen, vec!["first", "crashes", "vanished", "last"]);
        assert_eq!(summary.total(), 4);
        assert_eq!(summary.passed(), 2);
        assert_eq!(summary.failed(), 2);
        assert_eq!(summary.exit_code(), exit_codes::TESTS_FAILED);
        assert!(summary.failures()[0].reason.contains("SIGSEGV"));
    }

    #[tokio::test]
    async fn test_cancellation_skips_remaining() {
        let dir = tempdir().unwrap();
        let artifacts = vec![
            script_artifact(dir.path(), "a", "exit 0"),
            script_artifact(dir.path(), "b", "exit 0"),
            script_artifact(dir.path(), "c", "exit 0"),
        ];

        let config = RunConfig::default();
        let signatures = SignatureSet::builtin();
        let debugger = DebuggerHandle::Absent;
        let supervisor = Supervisor::new(&debugger, &signatures, &config);

        // Interrupt arrives while the first artifact runs
        let runs = Cell::new(0);
        let summary = supervise_all(
            &supervisor,
            &artifacts,
            || runs.get() >= 1,
            |_| runs.set(runs.get() + 1),
        )
        .await;

        assert_eq!(summary.total(), 1);
        assert_eq!(summary.passed(), 1);
        assert_eq!(summary.skipped(), &["b".to_string(), "c".to_string()]);
        assert!(summary.interrupted());
        assert_eq!(summary.exit_code(), exit_codes::INTERRUPTED);
    }

    #[tokio::test]
    async fn test_aborted_run_is_skipped_not_failed() {
        let dir = tempdir().unwrap();
        let artifacts = vec![
            script_artifact(dir.path(), "hangs", "sleep 30"),
            script_artifact(dir.path(), "next", "exit 0"),
        ];

        let config = RunConfig::default();
        let signatures = SignatureSet::builtin();
        let debugger = DebuggerHandle::Absent;
        // Second interrupt already delivered
        let (_abort, abort_rx) = watch::channel(true);
        let supervisor =
            Supervisor::new(&debugger, &signatures, &config).with_abort(abort_rx);

        let runs = Cell::new(0);
        let summary = supervise_all(
            &supervisor,
            &artifacts,
            || runs.get() >= 1,
            |_| runs.set(runs.get() + 1),
        )
        .await;

        assert_eq!(runs.get(), 1);
        assert_eq!(summary.total(), 0);
        assert_eq!(summary.failed(), 0);
        assert_eq!(summary.skipped(), &["hangs".to_string(), "next".to_string()]);
        assert_eq!(summary.exit_code(), exit_codes::INTERRUPTED);
    }

    #[tokio::test]
    async fn test_repeated_runs_match() {
        let dir = tempdir().unwrap();
        let artifacts = vec![
            script_artifact(dir.path(), "ok", "exit 0"),
            script_artifact(dir.path(), "bad", "exit 101"),
        ];

        let config = RunConfig::default();
        let signatures = SignatureSet::builtin();
        let debugger = DebuggerHandle::Absent;
        let supervisor = Supervisor::new(&debugger, &signatures, &config);

        let first = supervise_all(&supervisor, &artifacts, || false, |_| {}).await;
        let second = supervise_all(&supervisor, &artifacts, || false, |_| {}).await;
        assert_eq!(first, second);
    }
}
