use crate::capture::{self, Echo, SharedBuffer};
use crate::config::RunConfig;
use crate::error::RunError;
use shellchat_core::{ExecutionResult, InterruptReason};
use std::collections::VecDeque;
use std::io::Write;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tempfile::TempPath;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// How long output readers may keep going after the child is reaped. A
/// descendant that moved to another process group can hold the pipes open
/// indefinitely.
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Poll interval while waiting for a signalled process group to empty.
const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Runs one command block. Implemented by [`ShellRunner`] and [`MockRunner`] (tests).
#[async_trait::async_trait]
pub trait BlockRunner: Send + Sync {
    /// Execute `source` to completion, interruption or timeout. Cancelling
    /// `cancel` is the only way to stop it early and may happen from any thread.
    async fn run(
        &self,
        source: &str,
        config: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, RunError>;
}

/// Executes blocks as `shell_path <script>` in their own process group.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }
}

/// Check that the configured interpreter can be launched at all.
pub fn verify_shell(shell_path: &Path) -> Result<(), RunError> {
    std::process::Command::new(shell_path)
        .arg("-c")
        .arg("exit 0")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|_| ())
        .map_err(|source| RunError::Spawn {
            shell: shell_path.display().to_string(),
            source,
        })
}

enum Outcome {
    Exited(std::io::Result<ExitStatus>),
    Stopped(InterruptReason),
}

#[async_trait::async_trait]
impl BlockRunner for ShellRunner {
    async fn run(
        &self,
        source: &str,
        config: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, RunError> {
        // Removed when dropped, on every return path below.
        let script = write_script(source, config).map_err(RunError::Script)?;

        let mut cmd = Command::new(&config.shell_path);
        cmd.arg(&*script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &config.working_directory {
            cmd.current_dir(dir);
        }
        apply_env(&mut cmd, config);

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|source| RunError::Spawn {
            shell: config.shell_path.display().to_string(),
            source,
        })?;
        let pid = child.id();
        debug!(?pid, shell = %config.shell_path.display(), "command started");

        let stdout_buf = capture::shared(config.output_cap);
        let stderr_buf = capture::shared(config.output_cap);
        let stdout_task = child.stdout.take().map(|pipe| {
            tokio::spawn(capture::drain(
                pipe,
                stdout_buf.clone(),
                config.echo.then_some(Echo::Stdout),
            ))
        });
        let stderr_task = child.stderr.take().map(|pipe| {
            tokio::spawn(capture::drain(
                pipe,
                stderr_buf.clone(),
                config.echo.then_some(Echo::Stderr),
            ))
        });

        let outcome = tokio::select! {
            biased;
            status = child.wait() => Outcome::Exited(status),
            _ = cancel.cancelled() => Outcome::Stopped(InterruptReason::User),
            _ = deadline(config.timeout) => Outcome::Stopped(InterruptReason::Timeout),
        };

        let mut result = match outcome {
            Outcome::Exited(Ok(status)) => {
                let result = ExecutionResult::exited(exit_code(status), start.elapsed());
                sweep_group(pid, config.grace_period).await;
                result
            }
            Outcome::Exited(Err(e)) => {
                // Still reap before reporting.
                let _ = terminate(&mut child, pid, config.grace_period).await;
                return Err(RunError::Wait(e));
            }
            Outcome::Stopped(reason) => {
                debug!(?pid, ?reason, "stopping command");
                terminate(&mut child, pid, config.grace_period).await?;
                ExecutionResult::interrupted(reason, start.elapsed())
            }
        };

        let ((stdout, stdout_truncated), (stderr, stderr_truncated)) = tokio::join!(
            collect(stdout_task, &stdout_buf),
            collect(stderr_task, &stderr_buf),
        );
        result.stdout = stdout;
        result.stdout_truncated = stdout_truncated;
        result.stderr = stderr;
        result.stderr_truncated = stderr_truncated;

        drop(script);
        debug!(?pid, status = %result.status_label(), duration_ms = result.duration.as_millis() as u64, "command finished");
        Ok(result)
    }
}

/// Write the block to a private temp file so multi-line scripts, quoting and
/// heredocs reach the interpreter untouched.
fn write_script(source: &str, config: &RunConfig) -> std::io::Result<TempPath> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("shellchat-").suffix(".sh");
    let mut file = match &config.script_dir {
        Some(dir) => builder.tempfile_in(dir)?,
        None => builder.tempfile()?,
    };
    file.write_all(source.as_bytes())?;
    if !source.ends_with('\n') {
        file.write_all(b"\n")?;
    }
    file.flush()?;
    Ok(file.into_temp_path())
}

fn apply_env(cmd: &mut Command, config: &RunConfig) {
    if config.strip_secrets {
        for var in &config.secret_vars {
            cmd.env_remove(var);
        }
    }
    for (key, value) in &config.env_overrides {
        match value {
            Some(v) => cmd.env(key, v),
            None => cmd.env_remove(key),
        };
    }
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

/// SIGTERM the group, give it `grace` to exit, then SIGKILL. Always reaps the
/// direct child; group members that outlive it are killed with the group.
async fn terminate(
    child: &mut Child,
    pid: Option<u32>,
    grace: Duration,
) -> Result<ExitStatus, RunError> {
    signal_group(child, pid, GroupSignal::Terminate);
    let status = match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status.map_err(RunError::Wait)?,
        Err(_) => {
            warn!(?pid, ?grace, "command ignored termination; killing process group");
            signal_group(child, pid, GroupSignal::Kill);
            child.wait().await.map_err(RunError::Wait)?
        }
    };
    signal_group(child, pid, GroupSignal::Kill);
    Ok(status)
}

#[derive(Debug, Clone, Copy)]
enum GroupSignal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(_child: &mut Child, pid: Option<u32>, sig: GroupSignal) {
    let Some(pgid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };
    let signo = match sig {
        GroupSignal::Terminate => libc::SIGTERM,
        GroupSignal::Kill => libc::SIGKILL,
    };
    // SAFETY: killpg only sends a signal; ESRCH (group already gone) is expected.
    unsafe {
        libc::killpg(pgid, signo);
    }
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, _pid: Option<u32>, _sig: GroupSignal) {
    let _ = child.start_kill();
}

/// Whether any process of the command's group still exists.
#[cfg(unix)]
fn group_alive(pid: Option<u32>) -> bool {
    let Some(pgid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return false;
    };
    // SAFETY: signal 0 only checks that the target exists.
    unsafe { libc::killpg(pgid, 0) == 0 }
}

/// The shell exited on its own: terminate whatever it left running in its
/// group (`cmd &`, `nohup`), escalating to SIGKILL after `grace`.
#[cfg(unix)]
async fn sweep_group(pid: Option<u32>, grace: Duration) {
    if !group_alive(pid) {
        return;
    }
    let Some(pgid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };
    debug!(?pid, "terminating background processes left by command");
    // SAFETY: killpg only sends a signal; ESRCH (group already gone) is expected.
    unsafe {
        libc::killpg(pgid, libc::SIGTERM);
    }
    let give_up = Instant::now() + grace;
    while group_alive(pid) && Instant::now() < give_up {
        tokio::time::sleep(GROUP_POLL_INTERVAL).await;
    }
    if group_alive(pid) {
        warn!(?pid, "background processes ignored termination; killing process group");
        // SAFETY: as above.
        unsafe {
            libc::killpg(pgid, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
async fn sweep_group(_pid: Option<u32>, _grace: Duration) {}

/// Exit code of a child that ended on its own; signal deaths map to 128+n like a shell.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return 128 + sig;
        }
    }
    1
}

async fn collect(task: Option<JoinHandle<()>>, sink: &SharedBuffer) -> (String, bool) {
    if let Some(mut task) = task {
        if tokio::time::timeout(PIPE_DRAIN_TIMEOUT, &mut task)
            .await
            .is_err()
        {
            debug!("output pipe still open after exit; dropping further output");
            task.abort();
        }
    }
    capture::take(sink)
}

// ── Mock ──

/// Scripted behaviour for one [`MockRunner`] call.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Finish(ExecutionResult),
    SpawnFailure(String),
    /// Block until the cancellation token fires, then report a user interrupt.
    UntilCancelled,
}

/// Mock runner for testing. Pops outcomes per call; when none are queued it
/// echoes the block text back as stdout with exit 0.
pub struct MockRunner {
    outcomes: Mutex<VecDeque<MockOutcome>>,
    calls: Mutex<Vec<String>>,
}

impl Default for MockRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRunner {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, outcome: MockOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    /// Block texts received so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl BlockRunner for MockRunner {
    async fn run(
        &self,
        source: &str,
        _config: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, RunError> {
        self.calls.lock().unwrap().push(source.to_string());
        let next = self.outcomes.lock().unwrap().pop_front();
        match next {
            Some(MockOutcome::Finish(result)) => Ok(result),
            Some(MockOutcome::SpawnFailure(shell)) => Err(RunError::Spawn {
                shell,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "mock spawn failure"),
            }),
            Some(MockOutcome::UntilCancelled) => {
                cancel.cancelled().await;
                Ok(ExecutionResult::interrupted(
                    InterruptReason::User,
                    Duration::ZERO,
                ))
            }
            None => {
                let mut result = ExecutionResult::exited(0, Duration::ZERO);
                result.stdout = format!("{source}\n");
                Ok(result)
            }
        }
    }
}
