// src/service/management.rs

//! Restart through an HTTP management endpoint
//!
//! Posts a single `shutdown(restart=true)` operation as JSON, the format
//! understood by application server management APIs such as
//! `http://127.0.0.1:9990/management`.

use super::{RestartOutcome, ServiceController};
use crate::error::{Error, Result};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default management endpoint
pub const DEFAULT_MANAGEMENT_URL: &str = "http://127.0.0.1:9990/management";

/// Default timeout for the management request (30 seconds)
pub const DEFAULT_MANAGEMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Management operation payload
#[derive(Debug, Serialize)]
struct ManagementOperation {
    operation: &'static str,
    restart: bool,
    address: Vec<String>,
}

impl ManagementOperation {
    fn restart() -> Self {
        Self {
            operation: "shutdown",
            restart: true,
            address: Vec::new(),
        }
    }
}

/// Management operation response
#[derive(Debug, Deserialize)]
struct ManagementResponse {
    outcome: String,
    #[serde(rename = "failure-description")]
    failure_description: Option<serde_json::Value>,
}

/// Controller talking to an HTTP management endpoint
pub struct ManagementController {
    client: Client,
    url: String,
    username: Option<String>,
    password: Option<String>,
}

impl ManagementController {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::ConnectionFailed(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            username: None,
            password: None,
        })
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn try_restart(&self) -> Result<String> {
        let mut request = self.client.post(&self.url).json(&ManagementOperation::restart());
        if let Some(user) = &self.username {
            request = request.basic_auth(user, self.password.as_ref());
        }

        let response = request
            .send()
            .map_err(|e| Error::ConnectionFailed(format!("{}: {}", self.url, e)))?;

        let status = response.status();
        let body = response.text().map_err(|e| {
            Error::ConnectionFailed(format!(
                "{}: HTTP {} but reading the response failed: {}",
                self.url, status, e
            ))
        })?;
        debug!("Management endpoint answered HTTP {}: {}", status, body.trim());

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::ConnectionFailed(format!(
                "authentication rejected (HTTP {})",
                status
            )));
        }

        match serde_json::from_str::<ManagementResponse>(&body) {
            Ok(parsed) if status.is_success() && parsed.outcome == "success" => Ok(body),
            Ok(parsed) => {
                let description = match parsed.failure_description {
                    Some(serde_json::Value::String(s)) => s,
                    Some(other) => other.to_string(),
                    None => format!("outcome {}", parsed.outcome),
                };
                Err(Error::RestartRejected(format!("HTTP {}: {}", status, description)))
            }
            Err(_) => Err(Error::RestartRejected(format!(
                "HTTP {}: {}",
                status,
                body.trim()
            ))),
        }
    }
}

impl ServiceController for ManagementController {
    fn restart(&self) -> RestartOutcome {
        info!("Requesting service restart at {}", self.url);
        match self.try_restart() {
            Ok(body) => RestartOutcome::accepted(format!("success: message: {}", body.trim())),
            Err(e) => {
                warn!("Restart via {} failed: {}", self.url, e);
                e.into()
            }
        }
    }
}
