//! ProcessRunner - spawn, supervise and reap a single OS process.

use crate::config::RunnerConfig;
use crate::error::{ProcessError, Result};
use crate::output::{CapturedOutput, OutputDrain};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, ChildStdout, Command};

/// How long to keep draining output after the process itself exited.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Outcome of a process that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// Exit code; `128 + signal` when the process was killed by a signal.
    pub exit_code: i32,
    /// Captured standard output, byte for byte.
    pub stdout: Vec<u8>,
    /// Captured standard error, byte for byte.
    pub stderr: Vec<u8>,
    /// Whether any captured stream hit the output limit.
    pub truncated: bool,
}

impl ExecResult {
    /// Whether the process exited with code 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Lossy UTF-8 view of stdout.
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Lossy UTF-8 view of stderr.
    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// A configurable OS process with owned stdout/stderr drains.
///
/// The runner is reusable: once a process exited (or `cleanup()` ran) the same
/// command can be started again. Dropping a runner kills a still-running child.
///
/// # Example
///
/// ```no_run
/// use emucomp_process::ProcessRunner;
///
/// # async fn example() -> emucomp_process::Result<()> {
/// let mut runner = ProcessRunner::new("vde_switch")
///     .args(["-s", "/tmp/emucomp/sockets"]);
///
/// if !runner.start(false).await {
///     eprintln!("vde_switch did not start");
/// }
///
/// runner.stop().await?;
/// runner.print_stderr();
/// runner.cleanup();
/// # Ok(())
/// # }
/// ```
pub struct ProcessRunner {
    command: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    current_dir: Option<PathBuf>,
    config: RunnerConfig,
    stdin: Option<Stdio>,
    child: Option<Child>,
    pid: Option<u32>,
    stdout: Option<OutputDrain>,
    stderr: Option<OutputDrain>,
    exit_code: Option<i32>,
    captured_stdout: CapturedOutput,
    captured_stderr: CapturedOutput,
}

impl ProcessRunner {
    /// Create a runner for the given executable.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
            current_dir: None,
            config: RunnerConfig::default(),
            stdin: None,
            child: None,
            pid: None,
            stdout: None,
            stderr: None,
            exit_code: None,
            captured_stdout: CapturedOutput::default(),
            captured_stderr: CapturedOutput::default(),
        }
    }

    /// Use the given timeouts and output limits.
    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable for the child.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Run the child in the given working directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// The executable this runner starts.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Executable and arguments joined by spaces, for diagnostics.
    pub fn command_line(&self) -> String {
        std::iter::once(self.command.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// OS process ID of the most recently started process.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit code of the most recently finished process.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Output captured from stdout so far (complete once the process exited).
    pub fn stdout(&self) -> &CapturedOutput {
        &self.captured_stdout
    }

    /// Output captured from stderr so far (complete once the process exited).
    pub fn stderr(&self) -> &CapturedOutput {
        &self.captured_stderr
    }

    /// Check whether the child is still alive.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub(crate) fn set_stdin(&mut self, stdin: Stdio) {
        self.stdin = Some(stdin);
    }

    /// Spawn the child. With `pipe_stdout` the caller receives stdout instead
    /// of it being drained into the capture buffer.
    pub(crate) fn spawn(&mut self, capture: bool, pipe_stdout: bool) -> Result<Option<ChildStdout>> {
        if self.child.is_some() {
            return Err(ProcessError::AlreadyStarted(self.command_line()));
        }

        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k, v)))
            .stdin(self.stdin.take().unwrap_or_else(Stdio::null))
            .stdout(if capture || pipe_stdout {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(if capture { Stdio::piped() } else { Stdio::null() })
            .kill_on_drop(true);

        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|source| ProcessError::Spawn {
            command: self.command.clone(),
            source,
        })?;

        let pid = child.id();
        tracing::info!(command = %self.command_line(), pid, "Started process");

        let limit = self.config.max_output_bytes;
        self.stderr = child
            .stderr
            .take()
            .map(|stream| OutputDrain::spawn(stream, limit, "stderr"));

        let piped = if pipe_stdout {
            child.stdout.take()
        } else {
            self.stdout = child
                .stdout
                .take()
                .map(|stream| OutputDrain::spawn(stream, limit, "stdout"));
            None
        };

        self.captured_stdout = CapturedOutput::default();
        self.captured_stderr = CapturedOutput::default();
        self.exit_code = None;
        self.pid = pid;
        self.child = Some(child);
        Ok(piped)
    }

    /// Start the process with output capture.
    ///
    /// With `blocking` the call waits for the process to exit and reports
    /// whether it exited with code 0. Otherwise it reports whether the spawn
    /// succeeded. Failures are logged, never propagated.
    pub async fn start(&mut self, blocking: bool) -> bool {
        if let Err(e) = self.spawn(true, false) {
            tracing::warn!(command = %self.command, error = %e, "Starting process failed");
            return false;
        }

        if !blocking {
            return true;
        }

        match self.wait().await {
            Ok(code) => code == 0,
            Err(e) => {
                tracing::warn!(command = %self.command, error = %e, "Waiting for process failed");
                false
            }
        }
    }

    /// Wait for the running process to exit and return its exit code.
    ///
    /// # Errors
    /// Returns an error if no process was started.
    pub async fn wait(&mut self) -> Result<i32> {
        let status = match self.child.as_mut() {
            Some(child) => child.wait().await?,
            None => return Err(ProcessError::NotStarted(self.command_line())),
        };

        Ok(self.finish(status).await)
    }

    /// Run to completion and report whether the exit code was 0.
    pub async fn execute(&mut self) -> bool {
        self.start(true).await
    }

    /// Run to completion and return the exit code with captured output.
    ///
    /// # Errors
    /// Returns an error if the process could not be spawned. A non-zero exit
    /// code is not an error; check [`ExecResult::success`].
    pub async fn execute_with_result(&mut self, capture: bool) -> Result<ExecResult> {
        self.spawn(capture, false)?;
        let exit_code = self.wait().await?;
        Ok(self.result(exit_code))
    }

    pub(crate) fn result(&self, exit_code: i32) -> ExecResult {
        ExecResult {
            exit_code,
            stdout: self.captured_stdout.bytes.clone(),
            stderr: self.captured_stderr.bytes.clone(),
            truncated: self.captured_stdout.truncated || self.captured_stderr.truncated,
        }
    }

    /// Stop the process gracefully.
    ///
    /// Sends SIGTERM and waits up to the configured `stop_timeout`, then
    /// falls back to [`kill`](Self::kill). Stopping an exited or never
    /// started runner is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(pid) = self.live_pid() else {
            return Ok(());
        };

        match signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => {
                tracing::warn!(pid, error = %e, "SIGTERM failed, killing");
                return self.kill().await;
            }
        }

        let timeout = self.config.stop_timeout;
        let waited = match self.child.as_mut() {
            Some(child) => tokio::time::timeout(timeout, child.wait()).await,
            None => return Ok(()),
        };

        match waited {
            Ok(status) => {
                let code = self.finish(status?).await;
                tracing::debug!(pid, exit_code = code, "Process stopped");
                Ok(())
            }
            Err(_) => {
                tracing::warn!(
                    pid,
                    timeout_ms = timeout.as_millis() as u64,
                    "Process ignored SIGTERM, killing"
                );
                self.kill().await
            }
        }
    }

    /// Kill the process immediately with SIGKILL and reap it.
    pub async fn kill(&mut self) -> Result<()> {
        let status = match self.child.as_mut() {
            Some(child) => {
                if let Err(e) = child.start_kill() {
                    tracing::debug!(pid = self.pid, error = %e, "Process already gone");
                }
                child.wait().await?
            }
            None => return Ok(()),
        };

        let code = self.finish(status).await;
        tracing::debug!(pid = self.pid, exit_code = code, "Process killed");
        Ok(())
    }

    /// Log every captured stdout line.
    pub fn print_stdout(&self) {
        self.print_output("stdout", &self.captured_stdout);
    }

    /// Log every captured stderr line.
    pub fn print_stderr(&self) {
        self.print_output("stderr", &self.captured_stderr);
    }

    /// Release all OS resources held by this runner.
    ///
    /// Kills a still-running child, stops the output drains and forgets the
    /// captured output. Safe to call any number of times, including after a
    /// failed start.
    pub fn cleanup(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.start_kill() {
                tracing::trace!(pid = self.pid, error = %e, "Child already exited");
            }
        }
        if let Some(drain) = self.stdout.take() {
            drain.abort();
        }
        if let Some(drain) = self.stderr.take() {
            drain.abort();
        }
        self.stdin = None;
        self.captured_stdout = CapturedOutput::default();
        self.captured_stderr = CapturedOutput::default();
    }

    fn live_pid(&self) -> Option<u32> {
        if self.child.is_some() {
            self.pid
        } else {
            None
        }
    }

    async fn finish(&mut self, status: ExitStatus) -> i32 {
        let code = status
            .code()
            .or_else(|| status.signal().map(|signal| 128 + signal))
            .unwrap_or(-1);

        self.child = None;
        self.exit_code = Some(code);
        if let Some(drain) = self.stdout.take() {
            self.captured_stdout = drain.collect_within(DRAIN_GRACE).await;
        }
        if let Some(drain) = self.stderr.take() {
            self.captured_stderr = drain.collect_within(DRAIN_GRACE).await;
        }

        tracing::debug!(command = %self.command, pid = self.pid, exit_code = code, "Process exited");
        code
    }

    fn print_output(&self, stream: &'static str, output: &CapturedOutput) {
        for line in output.to_string_lossy().lines() {
            tracing::info!(command = %self.command, pid = self.pid, stream, "{}", line);
        }
        if output.truncated {
            tracing::info!(command = %self.command, pid = self.pid, stream, "[output truncated]");
        }
    }
}
