// src/store/mod.rs

//! Properties file backed configuration store
//!
//! This module provides:
//! - A line-preserving model of the file (`ConfigFile`)
//! - Point lookups and prefix enumeration (`ConfigStore`, `Preferences`)
//! - Crash-safe replacement of the file on disk (`write_atomically`)
//! - A guessed server URL when the file leaves it undefined

pub mod atomic;
pub mod file;
pub mod server_url;

pub use atomic::write_atomically;
pub use file::{ConfigFile, ConfigLine, EditOutcome, Entry};
pub use server_url::guess_server_url;

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Key of the externally reachable server URL
pub const SERVER_URL_KEY: &str = "local.server.url";

/// Read access to preference values
pub trait Preferences {
    /// Value for `key`, `None` if missing or empty
    fn get(&self, key: &str) -> Option<String>;

    /// All known keys in file order
    fn keys(&self) -> Vec<String>;

    /// Visit every `(key, value)` whose key starts with `prefix`; returns the count
    fn for_prefix(&self, prefix: &str, visitor: &mut dyn FnMut(&str, &str)) -> usize;
}

/// In-memory view of a configuration file
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    file: ConfigFile,
    /// Distinct keys in order of first appearance, with their effective value
    values: Vec<(String, String)>,
}

impl ConfigStore {
    /// Load the file at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());

        let text = fs::read_to_string(path).map_err(|e| Error::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self::from_file(path, ConfigFile::parse(&text)))
    }

    /// Build a store from already parsed content
    pub fn from_file(path: impl AsRef<Path>, file: ConfigFile) -> Self {
        let mut values: Vec<(String, String)> = Vec::new();
        for entry in file.entries() {
            // Later duplicates override earlier ones, like java.util.Properties
            match values.iter_mut().find(|(k, _)| *k == entry.key) {
                Some(slot) => slot.1 = entry.value.clone(),
                None => values.push((entry.key.clone(), entry.value.clone())),
            }
        }

        Self {
            path: path.as_ref().to_path_buf(),
            file,
            values,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self) -> &ConfigFile {
        &self.file
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(k, _)| k.as_str())
    }

    pub fn for_prefix<F>(&self, prefix: &str, mut visitor: F) -> usize
    where
        F: FnMut(&str, &str),
    {
        let mut count = 0;
        for (key, value) in self.values.iter().filter(|(k, _)| k.starts_with(prefix)) {
            visitor(key, value);
            count += 1;
        }
        count
    }

    /// Override a value in memory only; the file on disk is not touched
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.values.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.values.push((key, value)),
        }
    }

    /// Load `path` as preferences, guessing `local.server.url` if undefined
    pub fn load_preferences(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::load(path)?.with_default(SERVER_URL_KEY, guess_server_url))
    }

    /// Fill `key` with `fallback` if the file leaves it undefined
    pub fn with_default(mut self, key: &str, fallback: impl FnOnce() -> String) -> Self {
        if self.get(key).is_none() {
            let value = fallback();
            warn!("{} undefined. Guessing: {}", key, value);
            self.put(key, value);
        }
        self
    }
}

impl Preferences for ConfigStore {
    fn get(&self, key: &str) -> Option<String> {
        ConfigStore::get(self, key).map(str::to_string)
    }

    fn keys(&self) -> Vec<String> {
        ConfigStore::keys(self).map(str::to_string).collect()
    }

    fn for_prefix(&self, prefix: &str, visitor: &mut dyn FnMut(&str, &str)) -> usize {
        ConfigStore::for_prefix(self, prefix, |k, v| visitor(k, v))
    }
}
