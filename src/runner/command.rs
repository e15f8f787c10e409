//! Bounded subprocess execution.
//!
//! Harness-controlled commands (dependency install, test runs, tool calls)
//! never fail: spawn errors and timeouts are folded into the returned
//! [`CommandOutput`] with the sentinel exit code.
//!
//! Every command runs as the leader of its own process group, and a timeout
//! kills the whole group so backgrounded children do not outlive it.

use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, warn};

use super::result::SENTINEL_EXIT_CODE;

/// Exit status and captured streams of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            exit_code: SENTINEL_EXIT_CODE,
            stdout: String::new(),
            stderr: message.into(),
            timed_out: false,
        }
    }

    /// True when the command ran and exited with 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Runs `argv` in `cwd`, killing it once `timeout` elapses.
pub async fn run_argv(argv: &[String], cwd: &Path, timeout: Duration) -> CommandOutput {
    let Some((program, args)) = argv.split_first() else {
        return CommandOutput::failed("empty command");
    };

    let mut cmd = Command::new(program);
    cmd.args(args);
    run(cmd, program, cwd, timeout).await
}

/// Runs a shell command line through `sh -c` in `cwd`.
pub async fn run_shell(command_line: &str, cwd: &Path, timeout: Duration) -> CommandOutput {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command_line);
    run(cmd, "sh", cwd, timeout).await
}

async fn run(mut cmd: Command, program: &str, cwd: &Path, timeout: Duration) -> CommandOutput {
    cmd.current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    own_process_group(&mut cmd);

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => return CommandOutput::failed(format!("failed to spawn {program}: {e}")),
    };
    let pid = child.id();

    // Dropping the wait future on timeout drops the child, which kills it.
    let result = tokio::time::timeout(timeout, child.wait_with_output()).await;
    kill_process_group(pid);
    match result {
        Ok(Ok(output)) => {
            let exit_code = exit_code(&output.status);
            debug!(program, exit_code, "Command finished");
            CommandOutput {
                exit_code,
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                timed_out: false,
            }
        }
        Ok(Err(e)) => CommandOutput::failed(format!("{program} failed: {e}")),
        Err(_) => CommandOutput {
            exit_code: SENTINEL_EXIT_CODE,
            stdout: String::new(),
            stderr: format!("timed out after {}s", timeout.as_secs_f64()),
            timed_out: true,
        },
    }
}

/// Makes the spawned process lead a new process group.
pub(crate) fn own_process_group(cmd: &mut Command) {
    #[cfg(unix)]
    cmd.process_group(0);
    #[cfg(not(unix))]
    let _ = cmd;
}

/// Sends SIGKILL to the process group led by `pid`. A group with no
/// members left is not an error.
#[cfg(unix)]
pub(crate) fn kill_process_group(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill process group {}: {}", pid, e),
    }
}

#[cfg(not(unix))]
pub(crate) fn kill_process_group(_pid: Option<u32>) {}

/// Maps an exit status to an integer; death by signal `n` becomes `-n`.
pub(crate) fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    SENTINEL_EXIT_CODE
}
