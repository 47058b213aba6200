// src/lib.rs

//! Propguard
//!
//! Guarded rollout of a service's properties file: back up, edit, commit
//! atomically, restart the service through its management channel, and
//! restore the backup when the restart is rejected.
//!
//! # Architecture
//!
//! - `process`: bounded shell command execution with kill-on-timeout
//! - `packages`: batched installed-package version lookup on top of `process`
//! - `store`: line-preserving `key=value` file model and atomic writes
//! - `service`: restart controllers (HTTP management endpoint, shell command)
//! - `rollout`: the backup/edit/commit/restart/rollback state machine
//! - `db`: SQLite journal of past rollouts

pub mod db;
mod error;
pub mod packages;
pub mod process;
pub mod rollout;
pub mod service;
pub mod settings;
pub mod store;

pub use error::{Error, Result};
