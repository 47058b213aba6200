// src/process/mod.rs

//! Bounded external command execution
//!
//! Every command runs through a shell in its own process group with stdin
//! nulled and both output streams drained on background threads. The caller
//! blocks until the command exits or the timeout elapses. On timeout the
//! whole process group is killed and reaped before `run` returns.
//!
//! Exit codes and timeouts are data in [`CommandResult`]; only a failure to
//! start the shell is an [`Error`].

use crate::error::{Error, Result};
use std::io::Read;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Default shell used to interpret commands
pub const DEFAULT_SHELL: &str = "/bin/sh";

/// Default timeout for external commands (2 seconds)
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Outcome of a single command invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code, `None` if the command timed out or died from a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// Wall-clock time between spawn and exit (or kill)
    pub elapsed: Duration,
}

impl CommandResult {
    /// True when the command exited normally with code 0
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Convert into captured stdout, turning timeouts and non-zero exits into errors
    pub fn into_stdout(self) -> Result<String> {
        if self.timed_out {
            return Err(Error::TimedOut(self.elapsed.as_millis()));
        }
        match self.exit_code {
            Some(0) => Ok(self.stdout),
            code => Err(Error::CommandFailed {
                exit_code: code.unwrap_or(-1),
                stderr: self.stderr.trim_end().to_string(),
            }),
        }
    }
}

/// Runs shell commands with a hard wall-clock timeout
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    shell: PathBuf,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(DEFAULT_SHELL)
    }
}

impl ProcessRunner {
    /// Create a runner that interprets commands with the given shell
    pub fn new(shell: impl AsRef<Path>) -> Self {
        Self {
            shell: shell.as_ref().to_path_buf(),
        }
    }

    pub fn shell(&self) -> &Path {
        &self.shell
    }

    /// Run `command` via `<shell> -c`, waiting at most `timeout`
    pub fn run(&self, command: &str, timeout: Duration) -> Result<CommandResult> {
        debug!("Running command with {:?} timeout: {}", timeout, command);

        let started = Instant::now();
        let child = Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|source| Error::SpawnFailed {
                command: command.to_string(),
                source,
            })?;

        let mut guard = ChildGuard::new(child);
        let stdout = spawn_reader(guard.child.stdout.take());
        let stderr = spawn_reader(guard.child.stderr.take());

        match guard.child.wait_timeout(timeout)? {
            Some(status) => {
                guard.reaped = true;
                let deadline = started + timeout;
                let stdout = collect(stdout, deadline);
                let stderr = collect(stderr, deadline);
                let elapsed = started.elapsed();

                debug!(
                    "Command exited with {:?} after {:?}: {}",
                    status.code(),
                    elapsed,
                    command
                );

                Ok(CommandResult {
                    exit_code: status.code(),
                    stdout,
                    stderr,
                    timed_out: false,
                    elapsed,
                })
            }
            None => {
                guard.terminate();
                let elapsed = started.elapsed();
                warn!("Timeout after {:?} while running command: {}", timeout, command);

                // Any output already produced is dropped along with the receivers
                Ok(CommandResult {
                    exit_code: None,
                    stdout: String::new(),
                    stderr: String::new(),
                    timed_out: true,
                    elapsed,
                })
            }
        }
    }
}

/// Owns a spawned child and kills its process group unless it was reaped
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self {
            child,
            reaped: false,
        }
    }

    fn terminate(&mut self) {
        if self.reaped {
            return;
        }

        // The child leads its own process group, so this also reaches
        // anything the shell forked.
        let pgid = self.child.id() as libc::pid_t;
        // SAFETY: kill(2) has no memory-safety preconditions
        unsafe {
            libc::kill(-pgid, libc::SIGKILL);
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
        self.reaped = true;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn spawn_reader<R: Read + Send + 'static>(stream: Option<R>) -> Option<Receiver<Vec<u8>>> {
    let mut stream = stream?;
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf);
        let _ = tx.send(buf);
    });
    Some(rx)
}

/// Wait for a reader to finish, but never past `deadline`
///
/// A background grandchild can keep a pipe open after the shell exits;
/// whatever was read so far is lost in that case.
fn collect(rx: Option<Receiver<Vec<u8>>>, deadline: Instant) -> String {
    let Some(rx) = rx else {
        return String::new();
    };
    let remaining = deadline
        .saturating_duration_since(Instant::now())
        .max(Duration::from_millis(50));
    match rx.recv_timeout(remaining) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(_) => {
            warn!("Output stream still open after command exit, discarding");
            String::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_captures_stdout() {
        let runner = ProcessRunner::default();
        let result = runner.run("echo hello", DEFAULT_TIMEOUT).unwrap();

        assert!(result.success());
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout, "hello\n");
        assert!(!result.timed_out);
    }

    #[test]
    fn test_run_separates_stderr() {
        let runner = ProcessRunner::default();
        let result = runner
            .run("echo out; echo err >&2", DEFAULT_TIMEOUT)
            .unwrap();

        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
    }

    #[test]
    fn test_nonzero_exit_is_data() {
        let runner = ProcessRunner::default();
        let result = runner
            .run("echo broken >&2; exit 3", DEFAULT_TIMEOUT)
            .unwrap();

        assert!(!result.success());
        assert_eq!(result.exit_code, Some(3));

        match result.into_stdout() {
            Err(Error::CommandFailed { exit_code, stderr }) => {
                assert_eq!(exit_code, 3);
                assert_eq!(stderr, "broken");
            }
            other => panic!("expected CommandFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_timeout_kills_command() {
        let runner = ProcessRunner::default();
        let started = Instant::now();
        let result = runner
            .run("sleep 5", Duration::from_millis(200))
            .unwrap();

        assert!(result.timed_out);
        assert_eq!(result.exit_code, None);
        assert!(result.stdout.is_empty());
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(matches!(result.into_stdout(), Err(Error::TimedOut(_))));
    }

    #[test]
    fn test_timeout_discards_partial_output() {
        let runner = ProcessRunner::default();
        let result = runner
            .run("echo early; sleep 5", Duration::from_millis(200))
            .unwrap();

        assert!(result.timed_out);
        assert!(result.stdout.is_empty());
    }

    #[test]
    fn test_missing_shell_is_spawn_failure() {
        let runner = ProcessRunner::new("/nonexistent/shell");
        let result = runner.run("true", DEFAULT_TIMEOUT);

        assert!(matches!(result, Err(Error::SpawnFailed { .. })));
    }

    #[test]
    fn test_large_output_does_not_block() {
        let runner = ProcessRunner::default();
        let result = runner
            .run("head -c 262144 /dev/zero | tr '\\0' 'a'", Duration::from_secs(10))
            .unwrap();

        assert!(result.success());
        assert_eq!(result.stdout.len(), 262144);
    }
}
