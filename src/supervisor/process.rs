//! Child process launch and bounded waiting
//!
//! Children run in their own process group on Unix so a timeout can take down
//! everything they spawned, not just the direct child.

use std::ffi::OsStr;
use std::fs::File;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::process::{Child, Command};
use tokio::sync::watch;

use crate::common::{Error, Result};

/// Environment variable enabling verbose backtraces in test binaries
pub const BACKTRACE_ENV: (&str, &str) = ("RUST_BACKTRACE", "1");

/// Set to `true` to kill whatever is running and stop waiting
pub type AbortSignal = watch::Receiver<bool>;

/// How a supervised process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub exit_code: i32,
    /// Terminating signal (Unix only)
    pub signal: Option<i32>,
    /// Set when the process was killed for exceeding its limit
    pub timed_out_after: Option<Duration>,
    /// Set when the process was killed on request
    pub aborted: bool,
    pub duration: Duration,
}

/// What ended the wait on a child
enum Wait {
    Exited(std::io::Result<ExitStatus>),
    TimedOut(Duration),
    Aborted,
}

/// Split an exit status into a code and, on Unix, the terminating signal
///
/// A signal-terminated process gets the shell convention `128 + signal`.
pub fn exit_code_of(status: &ExitStatus) -> (i32, Option<i32>) {
    if let Some(code) = status.code() {
        return (code, None);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return (128 + signal, Some(signal));
        }
    }

    (1, None)
}

/// Run `program` to completion with stdout/stderr redirected to files
///
/// The wait ends early, killing the process tree, when `timeout` expires or
/// `abort` turns true.
pub async fn run_to_completion<I, S>(
    program: &Path,
    args: I,
    stdout: File,
    stderr: File,
    timeout: Option<Duration>,
    abort: Option<AbortSignal>,
) -> Result<ProcessOutcome>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = Command::new(program);
    cmd.args(args)
        .env(BACKTRACE_ENV.0, BACKTRACE_ENV.1)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    let started = Instant::now();
    let mut child = cmd.spawn().map_err(|e| Error::launch(program, &e))?;
    tracing::debug!(pid = ?child.id(), "Spawned {}", program.display());

    let wait = tokio::select! {
        status = child.wait() => Wait::Exited(status),
        limit = expiry(timeout) => Wait::TimedOut(limit),
        _ = aborted(abort) => Wait::Aborted,
    };

    let mut timed_out_after = None;
    let mut was_aborted = false;
    let status = match wait {
        Wait::Exited(status) => status?,
        Wait::TimedOut(limit) => {
            tracing::warn!(
                "{} exceeded {}s, killing its process tree",
                program.display(),
                limit.as_secs()
            );
            timed_out_after = Some(limit);
            kill_tree(&mut child).await;
            child.wait().await?
        }
        Wait::Aborted => {
            tracing::warn!("Killing {} and its process tree", program.display());
            was_aborted = true;
            kill_tree(&mut child).await;
            child.wait().await?
        }
    };

    let (exit_code, signal) = exit_code_of(&status);
    let duration = started.elapsed();
    tracing::debug!(exit_code, ?signal, ?duration, "{} finished", program.display());

    Ok(ProcessOutcome {
        exit_code,
        signal,
        timed_out_after,
        aborted: was_aborted,
        duration,
    })
}

/// Completes with the limit once it has elapsed; never without one
async fn expiry(timeout: Option<Duration>) -> Duration {
    match timeout {
        Some(limit) => {
            tokio::time::sleep(limit).await;
            limit
        }
        None => std::future::pending().await,
    }
}

/// Completes once `abort` is set; never if there is none or its sender is gone
async fn aborted(abort: Option<AbortSignal>) {
    if let Some(mut abort) = abort {
        if abort.wait_for(|set| *set).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}

/// Forcibly terminate a child and everything it spawned
async fn kill_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // The child leads its own process group
        let rc = unsafe { libc::killpg(pid as libc::pid_t, libc::SIGKILL) };
        if rc != 0 {
            tracing::debug!(
                "killpg({}) failed: {}",
                pid,
                std::io::Error::last_os_error()
            );
        }
    }

    #[cfg(windows)]
    if let Some(pid) = child.id() {
        let pid = pid.to_string();
        let result = Command::new("taskkill")
            .args(["/F", "/T", "/PID", pid.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = result {
            tracing::debug!("taskkill for {} failed: {}", pid, e);
        }
    }

    if let Err(e) = child.start_kill() {
        tracing::debug!("Failed to kill child: {}", e);
    }
}
