// src/db/mod.rs

//! Rollout history database
//!
//! Every rollout started from the command line is journaled in SQLite:
//! - Database initialization and schema migration
//! - Connection management
//! - CRUD operations for rollout records

pub mod models;
pub mod schema;

use crate::error::{Error, Result};
use rusqlite::Connection;
use std::path::Path;
use tracing::{debug, info};

/// Initialize a new history database at the specified path
///
/// Creates the database file and applies all schema migrations.
/// This is idempotent - calling it on an existing database is safe.
pub fn init(db_path: &str) -> Result<()> {
    debug!("Initializing database at: {}", db_path);

    // Create parent directories if they don't exist
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::InitError(format!("Failed to create database directory: {}", e))
            })?;
        }
    }

    let conn = Connection::open(db_path)?;

    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        ",
    )?;

    schema::migrate(&conn)?;

    info!("Database initialized successfully");
    Ok(())
}

/// Open an existing history database
pub fn open(db_path: &str) -> Result<Connection> {
    if !Path::new(db_path).exists() {
        return Err(Error::DatabaseNotFound(db_path.to_string()));
    }

    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA busy_timeout = 5000;")?;

    Ok(conn)
}

/// Open the history database, creating it on first use
pub fn open_or_init(db_path: &str) -> Result<Connection> {
    if !Path::new(db_path).exists() {
        init(db_path)?;
    }
    let conn = open(db_path)?;
    schema::migrate(&conn)?;
    Ok(conn)
}
