//! Argv-array subprocess runner with hard timeouts.
//!
//! Two execution modes are provided:
//!
//! - [`CommandRunner::run`] captures stdout/stderr wholesale and returns
//!   them in the outcome. Used for quick probes (`fastboot devices`,
//!   version checks).
//! - [`CommandRunner::run_streaming`] forwards output line-by-line through
//!   an mpsc channel while the command runs. Used for long flash writes so
//!   observers see tool output live.
//!
//! On timeout the child receives SIGTERM; if it has not exited after
//! [`KILL_GRACE_WINDOW`] it is killed forcefully. Neither mode ever returns
//! `Err` - spawn failures and timeouts are recorded in the outcome.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Default per-command execution timeout.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Grace window between SIGTERM and SIGKILL on timeout.
pub const KILL_GRACE_WINDOW: Duration = Duration::from_secs(5);

/// Options for a single command invocation.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Hard execution timeout for the whole command.
    pub timeout: Duration,
    /// Working directory, if different from the process default.
    pub cwd: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_COMMAND_TIMEOUT,
            cwd: None,
        }
    }
}

impl RunOptions {
    /// Options with the given timeout and no working-directory override.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            cwd: None,
        }
    }
}

/// Which stream an output line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// One line of live output from a streamed command.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub source: StreamSource,
    pub line: String,
}

/// Structured result of a command invocation.
///
/// A nonzero exit, a timeout, and a spawn failure are all represented here
/// rather than as errors; callers inspect the fields and decide policy.
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    /// True iff the command ran to completion with a zero exit code.
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// Exit code, when the process exited normally.
    pub exit_code: Option<i32>,
    /// True when the command was terminated by the execution timeout.
    pub timed_out: bool,
    /// Populated when the command could not be started or waited on.
    pub error: Option<String>,
}

impl CommandOutcome {
    fn spawn_failed(message: String) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: String::new(),
            exit_code: None,
            timed_out: false,
            error: Some(message),
        }
    }

    /// The most useful human-readable message for a failed outcome.
    ///
    /// Prefers stderr (tools report real failures there), then stdout,
    /// then the internal error, then the bare exit code.
    pub fn failure_message(&self) -> String {
        if self.timed_out {
            return "command timed out".to_string();
        }
        if let Some(err) = &self.error {
            return err.clone();
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.exit_code {
            Some(code) => format!("command exited with code {}", code),
            None => "command terminated by signal".to_string(),
        }
    }
}

/// Tracker for the pid of a job's currently-running child process.
///
/// The orchestrator hands one of these to the runner so that a cancel
/// request can best-effort signal the active child without owning the
/// `Child` itself. A pid of zero means no child is active.
#[derive(Debug, Clone, Default)]
pub struct ActiveChild(Arc<AtomicU32>);

impl ActiveChild {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, pid: u32) {
        self.0.store(pid, Ordering::SeqCst);
    }

    fn clear(&self) {
        self.0.store(0, Ordering::SeqCst);
    }

    /// The pid of the active child, if one is running.
    pub fn pid(&self) -> Option<u32> {
        match self.0.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Sends SIGTERM to the active child, if any.
    ///
    /// Best-effort: the child may exit before the signal lands, or ignore
    /// it entirely. The flash run loop still unwinds at its next safe
    /// boundary regardless.
    pub fn signal_term(&self) {
        if let Some(pid) = self.pid() {
            debug!(pid, "Signalling active child with SIGTERM");
            // SAFETY: plain kill(2) with a valid signal number.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
    }
}

/// Runs external tools as argv arrays with hard timeouts.
#[derive(Debug, Clone, Default)]
pub struct CommandRunner;

impl CommandRunner {
    pub fn new() -> Self {
        Self
    }

    /// Runs a command to completion, capturing stdout and stderr.
    pub async fn run(&self, program: &str, args: &[&str], opts: &RunOptions) -> CommandOutcome {
        let mut child = match self.spawn(program, args, opts) {
            Ok(child) => child,
            Err(outcome) => return outcome,
        };

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task = tokio::spawn(read_to_string(stdout));
        let stderr_task = tokio::spawn(read_to_string(stderr));

        let (exit_code, timed_out, error) = self.wait_with_timeout(&mut child, opts).await;
        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        CommandOutcome {
            success: exit_code == Some(0),
            stdout,
            stderr,
            exit_code,
            timed_out,
            error,
        }
    }

    /// Runs a command, forwarding each output line through `lines`.
    ///
    /// Lines are also accumulated into the returned outcome so failure
    /// messages can be derived after the fact. When `tracker` is provided
    /// the child's pid is published there for the duration of the run.
    pub async fn run_streaming(
        &self,
        program: &str,
        args: &[&str],
        opts: &RunOptions,
        lines: mpsc::Sender<OutputLine>,
        tracker: Option<&ActiveChild>,
    ) -> CommandOutcome {
        let mut child = match self.spawn(program, args, opts) {
            Ok(child) => child,
            Err(outcome) => return outcome,
        };

        if let (Some(tracker), Some(pid)) = (tracker, child.id()) {
            tracker.set(pid);
        }

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_task = tokio::spawn(forward_lines(stdout, StreamSource::Stdout, lines.clone()));
        let stderr_task = tokio::spawn(forward_lines(stderr, StreamSource::Stderr, lines));

        let (exit_code, timed_out, error) = self.wait_with_timeout(&mut child, opts).await;
        if let Some(tracker) = tracker {
            tracker.clear();
        }
        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        CommandOutcome {
            success: exit_code == Some(0),
            stdout,
            stderr,
            exit_code,
            timed_out,
            error,
        }
    }

    fn spawn(
        &self,
        program: &str,
        args: &[&str],
        opts: &RunOptions,
    ) -> Result<Child, CommandOutcome> {
        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &opts.cwd {
            command.current_dir(cwd);
        }

        debug!(program, ?args, timeout = ?opts.timeout, "Spawning external command");

        command.spawn().map_err(|e| {
            warn!(program, error = %e, "Failed to spawn external command");
            CommandOutcome::spawn_failed(format!("failed to spawn {}: {}", program, e))
        })
    }

    /// Waits for the child, enforcing the timeout.
    ///
    /// Returns `(exit_code, timed_out, error)`.
    async fn wait_with_timeout(
        &self,
        child: &mut Child,
        opts: &RunOptions,
    ) -> (Option<i32>, bool, Option<String>) {
        match tokio::time::timeout(opts.timeout, child.wait()).await {
            Ok(Ok(status)) => (status.code(), false, None),
            Ok(Err(e)) => (None, false, Some(format!("failed to wait on child: {}", e))),
            Err(_) => {
                warn!(timeout = ?opts.timeout, "Command exceeded timeout, terminating");
                self.terminate(child).await;
                (None, true, None)
            }
        }
    }

    /// Graceful-then-forceful termination of a timed-out child.
    async fn terminate(&self, child: &mut Child) {
        if let Some(pid) = child.id() {
            // SAFETY: plain kill(2) with a valid signal number.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            if tokio::time::timeout(KILL_GRACE_WINDOW, child.wait())
                .await
                .is_ok()
            {
                return;
            }
            warn!(pid, "Child ignored SIGTERM, killing forcefully");
        }
        let _ = child.kill().await;
    }
}

async fn read_to_string<R: AsyncRead + Unpin>(reader: Option<R>) -> String {
    let Some(mut reader) = reader else {
        return String::new();
    };
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

async fn forward_lines<R: AsyncRead + Unpin>(
    reader: Option<R>,
    source: StreamSource,
    tx: mpsc::Sender<OutputLine>,
) -> String {
    let Some(reader) = reader else {
        return String::new();
    };
    let mut accumulated = String::new();
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        accumulated.push_str(&line);
        accumulated.push('\n');
        // Receiver gone means nobody is watching; keep draining the pipe
        // so the child does not block on a full buffer.
        let _ = tx
            .send(OutputLine {
                source,
                line,
            })
            .await;
    }
    accumulated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_captures_stdout_of_successful_command() {
        let runner = CommandRunner::new();
        let outcome = runner
            .run("echo", &["hello", "world"], &RunOptions::default())
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.exit_code, Some(0));
        assert_eq!(outcome.stdout.trim(), "hello world");
        assert!(!outcome.timed_out);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_run_reports_nonzero_exit_as_data() {
        let runner = CommandRunner::new();
        let outcome = runner.run("false", &[], &RunOptions::default()).await;

        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, Some(1));
        assert!(!outcome.timed_out);
    }

    #[tokio::test]
    async fn test_run_reports_spawn_failure_as_data() {
        let runner = CommandRunner::new();
        let outcome = runner
            .run("definitely-not-a-real-tool", &[], &RunOptions::default())
            .await;

        assert!(!outcome.success);
        assert!(outcome.error.is_some());
        assert!(outcome.failure_message().contains("failed to spawn"));
    }

    #[tokio::test]
    async fn test_run_enforces_timeout() {
        let runner = CommandRunner::new();
        let opts = RunOptions::with_timeout(Duration::from_millis(200));
        let outcome = runner.run("sleep", &["30"], &opts).await;

        assert!(!outcome.success);
        assert!(outcome.timed_out);
        assert_eq!(outcome.failure_message(), "command timed out");
    }

    #[tokio::test]
    async fn test_run_streaming_delivers_lines_in_order() {
        let runner = CommandRunner::new();
        let (tx, mut rx) = mpsc::channel(16);
        let outcome = runner
            .run_streaming(
                "sh",
                &["-c", "echo one; echo two"],
                &RunOptions::default(),
                tx,
                None,
            )
            .await;

        assert!(outcome.success);
        let first = rx.recv().await.expect("first line");
        let second = rx.recv().await.expect("second line");
        assert_eq!(first.line, "one");
        assert_eq!(second.line, "two");
        assert_eq!(first.source, StreamSource::Stdout);
    }

    #[tokio::test]
    async fn test_run_streaming_accumulates_stderr_for_failure_message() {
        let runner = CommandRunner::new();
        let (tx, _rx) = mpsc::channel(16);
        let outcome = runner
            .run_streaming(
                "sh",
                &["-c", "echo 'device not found' >&2; exit 1"],
                &RunOptions::default(),
                tx,
                None,
            )
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.failure_message(), "device not found");
    }

    #[test]
    fn test_failure_message_prefers_stderr_over_exit_code() {
        let outcome = CommandOutcome {
            success: false,
            stdout: "progress output".to_string(),
            stderr: "FAILED (remote: 'no such partition')".to_string(),
            exit_code: Some(1),
            timed_out: false,
            error: None,
        };
        assert_eq!(
            outcome.failure_message(),
            "FAILED (remote: 'no such partition')"
        );
    }

    #[test]
    fn test_active_child_tracks_pid() {
        let tracker = ActiveChild::new();
        assert_eq!(tracker.pid(), None);
        tracker.set(4242);
        assert_eq!(tracker.pid(), Some(4242));
        tracker.clear();
        assert_eq!(tracker.pid(), None);
    }
}
