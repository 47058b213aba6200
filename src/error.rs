// src/error.rs

use thiserror::Error;

/// Core error types for Propguard
#[derive(Error, Debug)]
pub enum Error {
    /// The shell could not be started for a command
    #[error("Failed to spawn command '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// A command ran past its deadline and was killed
    #[error("Command timed out after {0} ms")]
    TimedOut(u128),

    /// A command exited with a non-zero status
    #[error("Command failed with exit code {exit_code}: {stderr}")]
    CommandFailed { exit_code: i32, stderr: String },

    /// The configuration file could not be read
    #[error("Failed to load configuration file {path}: {reason}")]
    Load { path: String, reason: String },

    /// The configuration file could not be written
    #[error("Failed to write configuration file {path}: {reason}")]
    Write { path: String, reason: String },

    /// The pre-rollout snapshot could not be taken or restored
    #[error("Backup error: {0}")]
    Backup(String),

    /// The management endpoint refused the restart
    #[error("Restart rejected: {0}")]
    RestartRejected(String),

    /// The management endpoint could not be reached
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Settings file could not be parsed
    #[error("Invalid settings: {0}")]
    Config(String),

    /// History database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// History database initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// History database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),
}

/// Result type alias using Propguard's Error type
pub type Result<T> = std::result::Result<T, Error>;
