// src/service/readiness.rs

//! Post-restart readiness polling
//!
//! Polls a URL until it answers with a 2xx or 3xx status or the deadline
//! passes. Only used when a readiness URL is configured.

use crate::error::{Error, Result};
use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Default time to wait for the service to come back (15 seconds)
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(15);

/// Default delay between polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub struct ReadinessProbe {
    client: Client,
    url: String,
    timeout: Duration,
    interval: Duration,
}

impl ReadinessProbe {
    pub fn new(url: impl Into<String>, timeout: Duration, interval: Duration) -> Result<Self> {
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(interval.max(Duration::from_secs(1)))
            .build()
            .map_err(|e| Error::ConnectionFailed(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
            interval,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Block until the URL answers 2xx/3xx; `false` if the deadline passes first
    pub fn wait_ready(&self) -> bool {
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.client.get(&self.url).send() {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() || status.is_redirection() {
                        info!(
                            "{} ready after {:?} ({} attempts, HTTP {})",
                            self.url,
                            started.elapsed(),
                            attempt,
                            status
                        );
                        return true;
                    }
                    debug!("Readiness attempt {}: HTTP {}", attempt, status);
                }
                Err(e) => debug!("Readiness attempt {} failed: {}", attempt, e),
            }

            if started.elapsed() + self.interval >= self.timeout {
                warn!(
                    "{} not ready after {:?} ({} attempts)",
                    self.url,
                    started.elapsed(),
                    attempt
                );
                return false;
            }
            thread::sleep(self.interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::test_support::serve;

    #[test]
    fn test_ready_on_redirect() {
        let (url, server) = serve(1, "302 Found", "");
        let probe = ReadinessProbe::new(url, Duration::from_secs(5), Duration::from_millis(100)).unwrap();

        assert!(probe.wait_ready());
        server.join().unwrap();
    }

    #[test]
    fn test_retries_until_deadline() {
        let (url, server) = serve(3, "503 Service Unavailable", "");
        let probe = ReadinessProbe::new(url, Duration::from_millis(250), Duration::from_millis(100)).unwrap();

        let started = std::time::Instant::now();
        assert!(!probe.wait_ready());
        assert!(started.elapsed() < Duration::from_secs(4));

        // However slow the first answer, the responder stops on its own
        let requests = server.join().unwrap();
        assert!(!requests.is_empty());
        assert!(requests.len() <= 3);
    }
}
