// src/service/mod.rs

//! Restarting the dependent service
//!
//! A `ServiceController` issues exactly one restart directive per call and
//! reports whether it was accepted. Failures of any kind are folded into
//! the returned `RestartOutcome`; nothing propagates past `restart()`.

pub mod management;
pub mod readiness;

pub use management::ManagementController;
pub use readiness::ReadinessProbe;

use crate::error::Error;
use crate::process::ProcessRunner;
use std::time::Duration;
use tracing::{info, warn};

/// Result of one restart attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartOutcome {
    pub succeeded: bool,
    /// Free-form text from the management channel, surfaced verbatim
    pub diagnostic: String,
}

impl RestartOutcome {
    pub fn accepted(diagnostic: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            diagnostic: diagnostic.into(),
        }
    }

    pub fn failed(diagnostic: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            diagnostic: diagnostic.into(),
        }
    }
}

impl From<Error> for RestartOutcome {
    fn from(err: Error) -> Self {
        let diagnostic = match err {
            Error::ConnectionFailed(msg) => format!("connection failed: {}", msg),
            Error::RestartRejected(msg) => format!("restart rejected: {}", msg),
            other => other.to_string(),
        };
        RestartOutcome::failed(diagnostic)
    }
}

/// Something that can restart the dependent service
pub trait ServiceController {
    fn restart(&self) -> RestartOutcome;
}

impl<T: ServiceController + ?Sized> ServiceController for Box<T> {
    fn restart(&self) -> RestartOutcome {
        (**self).restart()
    }
}

/// Restarts the service by running a shell command
///
/// Useful for management CLIs (`jboss-cli.sh --connect ...`) or init
/// systems (`systemctl restart ...`). Exit code 0 means accepted.
#[derive(Debug, Clone)]
pub struct CommandController {
    runner: ProcessRunner,
    command: String,
    timeout: Duration,
}

impl CommandController {
    pub fn new(runner: ProcessRunner, command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            runner,
            command: command.into(),
            timeout,
        }
    }
}

impl ServiceController for CommandController {
    fn restart(&self) -> RestartOutcome {
        info!("Restarting service via command: {}", self.command);

        let result = match self.runner.run(&self.command, self.timeout) {
            Ok(result) => result,
            Err(e) => {
                warn!("Restart command could not be started: {}", e);
                return Error::ConnectionFailed(e.to_string()).into();
            }
        };

        if result.success() {
            return RestartOutcome::accepted(result.stdout.trim_end());
        }

        let reason = if result.timed_out {
            format!("restart command timed out after {:?}", self.timeout)
        } else {
            let stderr = result.stderr.trim_end();
            match result.exit_code {
                Some(code) if stderr.is_empty() => format!("exit code {}", code),
                Some(code) => format!("exit code {}: {}", code, stderr),
                None => "terminated by signal".to_string(),
            }
        };
        warn!("Restart command failed: {}", reason);
        Error::RestartRejected(reason).into()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Minimal one-shot HTTP responder for exercising the HTTP controllers

    use std::io::{ErrorKind, Read, Write};
    use std::net::TcpListener;
    use std::thread::{self, JoinHandle};
    use std::time::{Duration, Instant};

    /// How long the responder waits for requests that never arrive
    const ACCEPT_DEADLINE: Duration = Duration::from_secs(5);

    /// Serve up to `count` requests with the given status and body; returns
    /// the URL and a handle yielding the raw requests received
    ///
    /// The responder gives up after `ACCEPT_DEADLINE`, so joining never hangs
    /// when a client makes fewer requests than `count`.
    pub fn serve(count: usize, status: &str, body: &str) -> (String, JoinHandle<Vec<String>>) {
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        serve_raw(count, response)
    }

    /// Like [`serve`], but answers with `response` exactly as given
    pub fn serve_raw(count: usize, response: String) -> (String, JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let url = format!("http://{}/management", listener.local_addr().unwrap());

        let handle = thread::spawn(move || {
            let deadline = Instant::now() + ACCEPT_DEADLINE;
            let mut requests = Vec::new();
            while requests.len() < count && Instant::now() < deadline {
                let mut stream = match listener.accept() {
                    Ok((stream, _)) => stream,
                    Err(e) if e.kind() == ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(10));
                        continue;
                    }
                    Err(e) => panic!("accept failed: {}", e),
                };
                stream.set_nonblocking(false).unwrap();
                stream.set_read_timeout(Some(ACCEPT_DEADLINE)).unwrap();
                requests.push(read_request(&mut stream));
                let _ = stream.write_all(response.as_bytes());
            }
            requests
        });

        (url, handle)
    }

    fn read_request(stream: &mut std::net::TcpStream) -> String {
        let mut data = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            data.extend_from_slice(&buf[..n]);

            let text = String::from_utf8_lossy(&data).to_string();
            if let Some(header_end) = text.find("\r\n\r\n") {
                let content_length = text[..header_end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if data.len() >= header_end + 4 + content_length {
                    return text;
                }
            }
        }
        String::from_utf8_lossy(&data).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_controller_success() {
        let controller = CommandController::new(
            ProcessRunner::default(),
            "echo '{\"outcome\" => \"success\"}'",
            Duration::from_secs(2),
        );

        let outcome = controller.restart();
        assert!(outcome.succeeded);
        assert_eq!(outcome.diagnostic, "{\"outcome\" => \"success\"}");
    }

    #[test]
    fn test_command_controller_failure_keeps_stderr() {
        let controller = CommandController::new(
            ProcessRunner::default(),
            "echo 'auth rejected' >&2; exit 1",
            Duration::from_secs(2),
        );

        let outcome = controller.restart();
        assert!(!outcome.succeeded);
        assert_eq!(outcome.diagnostic, "restart rejected: exit code 1: auth rejected");
    }

    #[test]
    fn test_command_controller_timeout() {
        let controller = CommandController::new(
            ProcessRunner::default(),
            "sleep 5",
            Duration::from_millis(200),
        );

        let outcome = controller.restart();
        assert!(!outcome.succeeded);
        assert!(outcome.diagnostic.contains("timed out"));
    }

    #[test]
    fn test_command_controller_missing_shell() {
        let controller = CommandController::new(
            ProcessRunner::new("/nonexistent/shell"),
            "true",
            Duration::from_secs(1),
        );

        let outcome = controller.restart();
        assert!(!outcome.succeeded);
        assert!(outcome.diagnostic.starts_with("connection failed:"));
    }

    #[test]
    fn test_outcome_from_error() {
        let outcome: RestartOutcome = Error::ConnectionFailed("refused".into()).into();
        assert_eq!(outcome, RestartOutcome::failed("connection failed: refused"));
    }
}
