//! One-shot and streaming process execution.
//!
//! [`run`] spawns a process, optionally feeds it an input payload, and
//! captures everything until exit. [`run_stream`] hands the caller the live
//! pipes instead, which is what the worker pool builds its persistent
//! workers from.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::time::{Instant, timeout, timeout_at};

/// Errors from one-shot and streaming execution.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("empty command")]
    EmptyCommand,

    #[error("failed to spawn process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("process I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("deadline exceeded")]
    Timeout,
}

/// Options for a one-shot execution.
///
/// `cwd` absent means the child inherits the parent's working directory.
/// `env` is an overlay: the child inherits the parent environment plus these
/// overrides, last write winning per key. `stdin` bytes, when present, are
/// fed to the child and the pipe closed afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

/// Captured output of a one-shot execution.
///
/// A non-zero exit is reported here, not as an error; only spawn failures,
/// I/O failures, and deadline expiry surface as [`RunError`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Process exit code; -1 when the process was terminated by a signal.
    pub exit_code: i32,
    /// Wall-clock time from spawn to exit.
    pub duration: Duration,
}

/// Executes `command` (argv, no shell) and captures its output.
///
/// Blocks until the process exits, the capture completes, or the deadline
/// fires. On timeout the child is killed and [`RunError::Timeout`] is
/// returned, even if the process also produced its own exit error.
pub async fn run<S: AsRef<str>>(options: &RunOptions, command: &[S]) -> Result<RunResult, RunError> {
    let (program, args) = command.split_first().ok_or(RunError::EmptyCommand)?;

    let mut cmd = Command::new(program.as_ref());
    for arg in args {
        cmd.arg(arg.as_ref());
    }
    configure(&mut cmd, options.cwd.as_deref(), options.env.as_ref());
    cmd.stdin(if options.stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

    tracing::debug!(program = %program.as_ref(), "spawning one-shot process");
    let start = std::time::Instant::now();
    let mut child = cmd.spawn().map_err(RunError::Spawn)?;

    if let Some(data) = options.stdin.clone() {
        let mut stdin = child.stdin.take().ok_or_else(|| {
            RunError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "child stdin unavailable",
            ))
        })?;
        // Feed stdin concurrently so a child that writes before reading
        // cannot deadlock against a full pipe; dropping the handle closes it.
        tokio::spawn(async move {
            if let Err(error) = stdin.write_all(&data).await {
                tracing::warn!(%error, "failed to feed process stdin");
            }
        });
    }

    let capture = child.wait_with_output();
    let output = match options.timeout {
        Some(limit) => timeout(limit, capture)
            .await
            .map_err(|_| RunError::Timeout)??,
        None => capture.await?,
    };

    Ok(RunResult {
        stdout: output.stdout,
        stderr: output.stderr,
        exit_code: output.status.code().unwrap_or(-1),
        duration: start.elapsed(),
    })
}

/// Options for a streaming execution.
///
/// Identical to [`RunOptions`] except that input arrives through the live
/// stdin handle rather than a byte buffer, and an optional `shell` changes
/// how argv is invoked.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    /// When set, argv is joined with spaces and run as `<shell> -c <joined>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl StreamOptions {
    /// Canonical identity of this execution profile:
    /// `cwd=<cwd>,shell=<shell>,env=<k1=v1;k2=v2;...>`.
    ///
    /// Environment pairs iterate in ascending key order (`BTreeMap`) and the
    /// separators are fixed, so identical logical profiles always produce an
    /// identical string. The worker pool uses this as its registry key; the
    /// format must stay stable and collision-free.
    pub fn profile_key(&self) -> String {
        let env = match &self.env {
            Some(env) => env
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(";"),
            None => String::new(),
        };
        format!(
            "cwd={},shell={},env={}",
            self.cwd.as_deref().unwrap_or_else(|| Path::new("")).display(),
            self.shell.as_deref().unwrap_or(""),
            env,
        )
    }
}

/// A process started by [`run_stream`], with its pipes live.
///
/// Take the ends you need (`stream.stdin.take()`, ...), close stdin when
/// finished, and keep draining stdout and stderr while the process runs: an
/// undrained pipe eventually fills and deadlocks the child.
#[derive(Debug)]
pub struct StreamChild {
    pub stdin: Option<ChildStdin>,
    pub stdout: Option<ChildStdout>,
    pub stderr: Option<ChildStderr>,
    child: Child,
    deadline: Option<Instant>,
}

impl StreamChild {
    /// Waits for the process to exit.
    ///
    /// A non-zero exit is a normal `Ok(status)`. Once the configured deadline
    /// has passed, the child is killed and [`RunError::Timeout`] is returned
    /// in preference to whatever exit the process produced on its own.
    pub async fn wait(&mut self) -> Result<ExitStatus, RunError> {
        match self.deadline {
            Some(deadline) => match timeout_at(deadline, self.child.wait()).await {
                Ok(result) => {
                    let status = result?;
                    if !status.success() && Instant::now() >= deadline {
                        return Err(RunError::Timeout);
                    }
                    Ok(status)
                }
                Err(_) => {
                    if let Err(error) = self.child.kill().await {
                        tracing::warn!(%error, "failed to kill timed-out process");
                    }
                    Err(RunError::Timeout)
                }
            },
            None => Ok(self.child.wait().await?),
        }
    }
}

/// Spawns `command` with piped stdin/stdout/stderr and returns the live
/// handles.
///
/// With `options.shell` set, argv is joined into a single string and invoked
/// as `<shell> -c <joined>`; otherwise argv runs directly. The deadline
/// clock starts at spawn; see [`StreamChild::wait`].
pub fn run_stream<S: AsRef<str>>(
    options: &StreamOptions,
    command: &[S],
) -> Result<StreamChild, RunError> {
    let mut cmd = match &options.shell {
        Some(shell) => {
            let joined = command
                .iter()
                .map(|part| part.as_ref())
                .collect::<Vec<_>>()
                .join(" ");
            tracing::debug!(%shell, script = %joined, "spawning shell worker");
            let mut cmd = Command::new(shell);
            cmd.arg("-c").arg(joined);
            cmd
        }
        None => {
            let (program, args) = command.split_first().ok_or(RunError::EmptyCommand)?;
            tracing::debug!(program = %program.as_ref(), "spawning streaming process");
            let mut cmd = Command::new(program.as_ref());
            for arg in args {
                cmd.arg(arg.as_ref());
            }
            cmd
        }
    };
    configure(&mut cmd, options.cwd.as_deref(), options.env.as_ref());
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let deadline = options.timeout.map(|limit| Instant::now() + limit);
    let mut child = cmd.spawn().map_err(RunError::Spawn)?;

    Ok(StreamChild {
        stdin: child.stdin.take(),
        stdout: child.stdout.take(),
        stderr: child.stderr.take(),
        child,
        deadline,
    })
}

fn configure(cmd: &mut Command, cwd: Option<&Path>, env: Option<&BTreeMap<String, String>>) {
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }
    if let Some(env) = env {
        // Inherit the parent environment; the overlay wins per key.
        cmd.envs(env);
    }
}
