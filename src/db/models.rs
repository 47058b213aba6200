// src/db/models.rs

//! Data models for the rollout history
//!
//! Rust structs mirroring the history tables, with methods for creating,
//! reading, and updating records.

use crate::error::{Error, Result};
use crate::rollout::{RolloutReport, RolloutState};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Journaled rollout status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutStatus {
    Pending,
    Applied,
    RolledBack,
    Failed,
}

impl RolloutStatus {
    pub fn as_str(&self) -> &str {
        match self {
            RolloutStatus::Pending => "pending",
            RolloutStatus::Applied => "applied",
            RolloutStatus::RolledBack => "rolled_back",
            RolloutStatus::Failed => "failed",
        }
    }
}

impl FromStr for RolloutStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RolloutStatus::Pending),
            "applied" => Ok(RolloutStatus::Applied),
            "rolled_back" => Ok(RolloutStatus::RolledBack),
            "failed" => Ok(RolloutStatus::Failed),
            _ => Err(format!("Invalid rollout status: {}", s)),
        }
    }
}

impl From<RolloutState> for RolloutStatus {
    fn from(state: RolloutState) -> Self {
        match state {
            RolloutState::Success => RolloutStatus::Applied,
            RolloutState::RolledBack => RolloutStatus::RolledBack,
            RolloutState::Failed => RolloutStatus::Failed,
            _ => RolloutStatus::Pending,
        }
    }
}

/// One journaled rollout attempt
#[derive(Debug, Clone)]
pub struct Rollout {
    pub id: Option<i64>,
    pub description: String,
    pub config_path: String,
    pub status: RolloutStatus,
    pub diagnostic: Option<String>,
    pub backup_digest: Option<String>,
    pub created_at: Option<String>,
    pub finished_at: Option<String>,
}

impl Rollout {
    pub fn new(description: String, config_path: String) -> Self {
        Self {
            id: None,
            description,
            config_path,
            status: RolloutStatus::Pending,
            diagnostic: None,
            backup_digest: None,
            created_at: None,
            finished_at: None,
        }
    }

    /// Insert this rollout along with its requested edits
    pub fn insert(&mut self, conn: &Connection, edits: &BTreeMap<String, String>) -> Result<i64> {
        conn.execute(
            "INSERT INTO rollouts (description, config_path, status) VALUES (?1, ?2, ?3)",
            params![&self.description, &self.config_path, self.status.as_str()],
        )?;

        let id = conn.last_insert_rowid();
        for (key, value) in edits {
            conn.execute(
                "INSERT INTO rollout_edits (rollout_id, key, value) VALUES (?1, ?2, ?3)",
                params![id, key, value],
            )?;
        }

        self.id = Some(id);
        Ok(id)
    }

    pub fn find_by_id(conn: &Connection, id: i64) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, description, config_path, status, diagnostic, backup_digest, created_at, finished_at
             FROM rollouts WHERE id = ?1",
        )?;

        let rollout = stmt.query_row([id], Self::from_row).optional()?;

        Ok(rollout)
    }

    /// List rollouts, newest first
    pub fn list_all(conn: &Connection) -> Result<Vec<Self>> {
        let mut stmt = conn.prepare(
            "SELECT id, description, config_path, status, diagnostic, backup_digest, created_at, finished_at
             FROM rollouts ORDER BY id DESC",
        )?;

        let rollouts = stmt
            .query_map([], Self::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rollouts)
    }

    /// Edits requested by this rollout as `(key, value, applied)`
    pub fn edits(&self, conn: &Connection) -> Result<Vec<(String, String, bool)>> {
        let id = self.require_id()?;
        let mut stmt = conn.prepare(
            "SELECT key, value, applied FROM rollout_edits WHERE rollout_id = ?1 ORDER BY key",
        )?;

        let edits = stmt
            .query_map([id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(edits)
    }

    /// Record the terminal outcome of a rollout
    pub fn finish(&mut self, conn: &Connection, report: &RolloutReport) -> Result<()> {
        let id = self.require_id()?;
        let status = RolloutStatus::from(report.state);

        conn.execute(
            "UPDATE rollouts
             SET status = ?1, diagnostic = ?2, backup_digest = ?3, finished_at = CURRENT_TIMESTAMP
             WHERE id = ?4",
            params![status.as_str(), &report.diagnostic, &report.backup_digest, id],
        )?;

        // Edits only count as applied when the rollout kept them
        let kept: &[String] = if status == RolloutStatus::Applied {
            &report.applied_keys
        } else {
            &[]
        };
        for key in kept {
            conn.execute(
                "UPDATE rollout_edits SET applied = 1 WHERE rollout_id = ?1 AND key = ?2",
                params![id, key],
            )?;
        }

        self.status = status;
        self.diagnostic = report.diagnostic.clone();
        self.backup_digest = report.backup_digest.clone();
        Ok(())
    }

    fn require_id(&self) -> Result<i64> {
        self.id
            .ok_or_else(|| Error::InitError("Rollout has not been inserted".to_string()))
    }

    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let status_str: String = row.get(3)?;
        let status = status_str.parse::<RolloutStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?;

        Ok(Self {
            id: Some(row.get(0)?),
            description: row.get(1)?,
            config_path: row.get(2)?,
            status,
            diagnostic: row.get(4)?,
            backup_digest: row.get(5)?,
            created_at: row.get(6)?,
            finished_at: row.get(7)?,
        })
    }
}
