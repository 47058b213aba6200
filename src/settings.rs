// src/settings.rs

//! Settings file parsing for propguard
//!
//! Supports TOML settings files with the following sections:
//! - [store] - Managed properties file, backup slot, history database
//! - [packages] - Package listing command and timeout
//! - [service] - How the dependent service is restarted
//! - [readiness] - Optional post-restart readiness polling
//!
//! Every field has a default, so a missing file yields a usable setup.

use crate::error::{Error, Result};
use crate::packages::PackageVersionResolver;
use crate::packages::resolver::DEFAULT_QUERY_COMMAND;
use crate::process::{DEFAULT_SHELL, ProcessRunner};
use crate::rollout::RolloutTarget;
use crate::service::management::DEFAULT_MANAGEMENT_URL;
use crate::service::{CommandController, ManagementController, ReadinessProbe, ServiceController};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default settings file location
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/propguard/propguard.toml";

/// TOML settings file structure
#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub store: StoreSection,

    #[serde(default)]
    pub packages: PackagesSection,

    #[serde(default)]
    pub service: ServiceSection,

    /// Absent means no readiness polling
    #[serde(default)]
    pub readiness: Option<ReadinessSection>,
}

#[derive(Debug, Deserialize)]
pub struct StoreSection {
    /// Managed properties file
    #[serde(default = "default_config_path")]
    pub path: PathBuf,

    /// Backup slot (default: `backup.txt` next to `path`)
    #[serde(default)]
    pub backup_path: Option<PathBuf>,

    /// Rollout history database
    #[serde(default = "default_history_db")]
    pub history_db: PathBuf,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: default_config_path(),
            backup_path: None,
            history_db: default_history_db(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PackagesSection {
    #[serde(default = "default_query_command")]
    pub query_command: String,

    #[serde(default = "default_query_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_shell")]
    pub shell: PathBuf,
}

impl Default for PackagesSection {
    fn default() -> Self {
        Self {
            query_command: default_query_command(),
            timeout_secs: default_query_timeout(),
            shell: default_shell(),
        }
    }
}

/// How the restart directive is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// HTTP management endpoint
    Management,
    /// Shell command
    Command,
}

#[derive(Debug, Deserialize)]
pub struct ServiceSection {
    #[serde(default = "default_service_kind")]
    pub kind: ServiceKind,

    /// Management endpoint URL
    #[serde(default = "default_management_url")]
    pub url: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Restart command for `kind = "command"`
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default = "default_restart_timeout")]
    pub timeout_secs: u64,

    /// Restart again after restoring the backup
    #[serde(default)]
    pub restart_after_rollback: bool,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            kind: default_service_kind(),
            url: default_management_url(),
            username: None,
            password: None,
            command: None,
            timeout_secs: default_restart_timeout(),
            restart_after_rollback: false,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReadinessSection {
    pub url: String,

    #[serde(default = "default_ready_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,
}

fn default_config_path() -> PathBuf {
    PathBuf::from("/etc/propguard/app.properties")
}

fn default_history_db() -> PathBuf {
    PathBuf::from("/var/lib/propguard/history.db")
}

fn default_query_command() -> String {
    DEFAULT_QUERY_COMMAND.to_string()
}

fn default_query_timeout() -> u64 {
    2
}

fn default_shell() -> PathBuf {
    PathBuf::from(DEFAULT_SHELL)
}

fn default_service_kind() -> ServiceKind {
    ServiceKind::Management
}

fn default_management_url() -> String {
    DEFAULT_MANAGEMENT_URL.to_string()
}

fn default_restart_timeout() -> u64 {
    30
}

fn default_ready_timeout() -> u64 {
    15
}

fn default_poll_interval() -> u64 {
    1000
}

impl Settings {
    /// Parse settings from TOML text
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load settings from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::parse(&text)
    }

    pub fn runner(&self) -> ProcessRunner {
        ProcessRunner::new(&self.packages.shell)
    }

    pub fn rollout_target(&self) -> RolloutTarget {
        let target = RolloutTarget::new(&self.store.path);
        match &self.store.backup_path {
            Some(backup) => target.with_backup_path(backup),
            None => target,
        }
    }

    pub fn resolver(&self) -> PackageVersionResolver {
        PackageVersionResolver::new(self.runner())
            .with_query_command(&self.packages.query_command)
            .with_timeout(Duration::from_secs(self.packages.timeout_secs))
    }

    /// Build the configured restart controller
    pub fn controller(&self) -> Result<Box<dyn ServiceController>> {
        let timeout = Duration::from_secs(self.service.timeout_secs);
        match self.service.kind {
            ServiceKind::Management => {
                let mut controller = ManagementController::new(&self.service.url, timeout)?;
                if let Some(user) = &self.service.username {
                    controller = controller
                        .with_credentials(user, self.service.password.clone().unwrap_or_default());
                }
                Ok(Box::new(controller))
            }
            ServiceKind::Command => {
                let command = self.service.command.clone().ok_or_else(|| {
                    Error::Config("service.kind = \"command\" requires service.command".to_string())
                })?;
                Ok(Box::new(CommandController::new(self.runner(), command, timeout)))
            }
        }
    }

    pub fn readiness_probe(&self) -> Result<Option<ReadinessProbe>> {
        self.readiness
            .as_ref()
            .map(|r| {
                ReadinessProbe::new(
                    &r.url,
                    Duration::from_secs(r.timeout_secs),
                    Duration::from_millis(r.interval_ms),
                )
            })
            .transpose()
    }
}
