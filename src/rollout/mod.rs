// src/rollout/mod.rs

//! Guarded configuration rollout
//!
//! A rollout takes the configuration file through
//! `Idle -> BackingUp -> Editing -> Committing -> Restarting -> Verifying`
//! and ends in `Success`, `RolledBack`, or `Failed`:
//!
//! - The active file is snapshotted into the backup slot before anything changes.
//! - Edits only rewrite values of keys already present in the file.
//! - The edited file replaces the active one atomically.
//! - The dependent service is restarted once; if that is rejected (or the
//!   optional readiness probe gives up) the backup is restored.
//!
//! Only one rollout per target may run at a time. The orchestrator does no
//! file locking; callers serialize requests.

mod target;

pub use target::{BACKUP_FILE_NAME, RolloutTarget};

use crate::error::{Error, Result};
use crate::service::{ReadinessProbe, RestartOutcome, ServiceController};
use crate::store::{ConfigStore, write_atomically};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use tracing::{debug, error, info, warn};

/// Rollout progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutState {
    Idle,
    BackingUp,
    Editing,
    Committing,
    Restarting,
    Verifying,
    Success,
    RolledBack,
    Failed,
}

impl RolloutState {
    pub fn as_str(&self) -> &str {
        match self {
            RolloutState::Idle => "idle",
            RolloutState::BackingUp => "backing_up",
            RolloutState::Editing => "editing",
            RolloutState::Committing => "committing",
            RolloutState::Restarting => "restarting",
            RolloutState::Verifying => "verifying",
            RolloutState::Success => "success",
            RolloutState::RolledBack => "rolled_back",
            RolloutState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RolloutState::Success | RolloutState::RolledBack | RolloutState::Failed
        )
    }
}

impl fmt::Display for RolloutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened during one rollout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutReport {
    /// Terminal state
    pub state: RolloutState,
    /// Human-readable reason for `RolledBack` / `Failed`
    pub diagnostic: Option<String>,
    pub applied_keys: Vec<String>,
    /// Edit keys not present in the file (ignored, not added)
    pub unknown_keys: Vec<String>,
    /// Edit keys whose value contained a line break (ignored)
    pub rejected_keys: Vec<String>,
    /// SHA-256 of the pre-rollout file, once the backup exists
    pub backup_digest: Option<String>,
    /// Text returned by the management channel
    pub restart_output: Option<String>,
    /// The backup could not be put back; manual recovery needed
    pub rollback_failed: bool,
    /// Outcome of the extra restart after a rollback, if enabled
    pub recovery_restart: Option<RestartOutcome>,
}

impl RolloutReport {
    fn new() -> Self {
        Self {
            state: RolloutState::Idle,
            diagnostic: None,
            applied_keys: Vec::new(),
            unknown_keys: Vec::new(),
            rejected_keys: Vec::new(),
            backup_digest: None,
            restart_output: None,
            rollback_failed: false,
            recovery_restart: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == RolloutState::Success
    }
}

/// Coordinates backup, edit, commit, restart, and rollback for one target
pub struct RolloutOrchestrator<C: ServiceController> {
    target: RolloutTarget,
    controller: C,
    readiness: Option<ReadinessProbe>,
    restart_after_rollback: bool,
    state: RolloutState,
}

impl<C: ServiceController> RolloutOrchestrator<C> {
    pub fn new(target: RolloutTarget, controller: C) -> Self {
        Self {
            target,
            controller,
            readiness: None,
            restart_after_rollback: false,
            state: RolloutState::Idle,
        }
    }

    /// Wait for the service to answer before declaring success
    pub fn with_readiness(mut self, probe: ReadinessProbe) -> Self {
        self.readiness = Some(probe);
        self
    }

    /// Restart again after restoring the backup so the service picks it up
    pub fn with_restart_after_rollback(mut self, enabled: bool) -> Self {
        self.restart_after_rollback = enabled;
        self
    }

    pub fn target(&self) -> &RolloutTarget {
        &self.target
    }

    /// State reached by the most recent rollout
    pub fn state(&self) -> RolloutState {
        self.state
    }

    /// Apply `edits` to the active file and restart the service
    ///
    /// Always runs to a terminal state and never returns an error; failure
    /// details are in the report.
    pub fn run(&mut self, edits: &BTreeMap<String, String>) -> RolloutReport {
        let mut report = RolloutReport::new();
        self.state = RolloutState::Idle;
        info!(
            "Starting rollout of {} edit(s) to {}",
            edits.len(),
            self.target.active_path.display()
        );

        // BackingUp
        self.transition(RolloutState::BackingUp);
        match snapshot(&self.target) {
            Ok(digest) => report.backup_digest = Some(digest),
            Err(e) => return self.fail(report, e, false),
        }

        // Editing
        self.transition(RolloutState::Editing);
        let store = match ConfigStore::load(&self.target.active_path) {
            Ok(store) => store,
            Err(e) => return self.fail(report, e, false),
        };
        let outcome = store.file().apply_edits(edits);
        report.applied_keys = outcome.applied_keys;
        report.unknown_keys = outcome.unknown_keys;
        report.rejected_keys = outcome.rejected_keys;

        // Committing
        self.transition(RolloutState::Committing);
        let rendered = outcome.file.render();
        if let Err(e) = write_atomically(&self.target.active_path, rendered.as_bytes()) {
            return self.fail(report, e, true);
        }

        // Restarting
        self.transition(RolloutState::Restarting);
        let restart = self.controller.restart();
        report.restart_output = Some(restart.diagnostic.clone());

        // Verifying
        self.transition(RolloutState::Verifying);
        let failure = if !restart.succeeded {
            Some(restart.diagnostic)
        } else {
            match &self.readiness {
                Some(probe) if !probe.wait_ready() => Some(format!(
                    "service not ready at {} within {:?}",
                    probe.url(),
                    probe.timeout()
                )),
                _ => None,
            }
        };

        match failure {
            None => {
                self.transition(RolloutState::Success);
                info!(
                    "Rollout succeeded; backup kept at {}",
                    self.target.backup_path.display()
                );
                report.state = RolloutState::Success;
                report
            }
            Some(diagnostic) => self.roll_back(report, diagnostic),
        }
    }

    /// Put the backup slot's content back onto the active path
    pub fn restore_backup(&self) -> Result<()> {
        restore_backup(&self.target)
    }

    fn roll_back(&mut self, mut report: RolloutReport, diagnostic: String) -> RolloutReport {
        warn!("Restart failed, rolling back: {}", diagnostic);

        let mut diagnostic = diagnostic;
        if let Err(e) = restore_backup(&self.target) {
            error!("Rollback failed: {}", e);
            report.rollback_failed = true;
            diagnostic = format!("{}; rollback failed: {}", diagnostic, e);
        } else if self.restart_after_rollback {
            info!("Restarting service with restored configuration");
            report.recovery_restart = Some(self.controller.restart());
        }

        self.transition(RolloutState::RolledBack);
        report.state = RolloutState::RolledBack;
        report.diagnostic = Some(diagnostic);
        report
    }

    fn fail(&mut self, mut report: RolloutReport, err: Error, restore: bool) -> RolloutReport {
        error!("Rollout failed while {}: {}", self.state, err);

        let mut diagnostic = err.to_string();
        if restore && !self.active_matches(report.backup_digest.as_deref()) {
            if let Err(e) = restore_backup(&self.target) {
                error!("Rollback failed: {}", e);
                report.rollback_failed = true;
                diagnostic = format!("{}; rollback failed: {}", diagnostic, e);
            }
        }

        self.transition(RolloutState::Failed);
        report.state = RolloutState::Failed;
        report.diagnostic = Some(diagnostic);
        report
    }

    /// True when the active file still holds exactly the snapshotted bytes
    fn active_matches(&self, digest: Option<&str>) -> bool {
        match (fs::read(&self.target.active_path), digest) {
            (Ok(data), Some(digest)) => sha256_hex(&data) == digest,
            _ => false,
        }
    }

    fn transition(&mut self, next: RolloutState) {
        debug!("Rollout state: {} -> {}", self.state, next);
        self.state = next;
    }
}

/// Copy the active file into the backup slot and verify it
///
/// Returns the SHA-256 of the snapshot.
fn snapshot(target: &RolloutTarget) -> Result<String> {
    let data = fs::read(&target.active_path).map_err(|e| {
        Error::Backup(format!(
            "cannot read {}: {}",
            target.active_path.display(),
            e
        ))
    })?;

    write_atomically(&target.backup_path, &data)
        .map_err(|e| Error::Backup(format!("cannot write backup: {}", e)))?;

    let written = fs::read(&target.backup_path).map_err(|e| {
        Error::Backup(format!(
            "cannot verify {}: {}",
            target.backup_path.display(),
            e
        ))
    })?;

    let digest = sha256_hex(&data);
    if sha256_hex(&written) != digest {
        return Err(Error::Backup(format!(
            "{} does not match {}",
            target.backup_path.display(),
            target.active_path.display()
        )));
    }

    debug!(
        "Backed up {} to {} (sha256 {})",
        target.active_path.display(),
        target.backup_path.display(),
        digest
    );
    Ok(digest)
}

/// Copy the backup slot over the active file; the backup itself is kept
pub fn restore_backup(target: &RolloutTarget) -> Result<()> {
    let data = fs::read(&target.backup_path).map_err(|e| {
        Error::Backup(format!(
            "backup file {} unavailable: {}",
            target.backup_path.display(),
            e
        ))
    })?;
    write_atomically(&target.active_path, &data)?;
    info!(
        "Restored {} from {}",
        target.active_path.display(),
        target.backup_path.display()
    );
    Ok(())
}

fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}
