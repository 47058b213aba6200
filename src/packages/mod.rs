// src/packages/mod.rs

//! Installed package version lookup
//!
//! Versions are resolved by running the system package manager's list
//! command once per batch and scanning its output.

pub mod resolver;

pub use resolver::{PackageVersionResolver, VersionResult, parse_versions};
