// src/rollout/target.rs

use std::path::{Path, PathBuf};

/// File name of the backup slot, next to the active file
pub const BACKUP_FILE_NAME: &str = "backup.txt";

/// The configuration file a rollout manages and its single backup slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutTarget {
    pub active_path: PathBuf,
    pub backup_path: PathBuf,
}

impl RolloutTarget {
    /// Target with the backup slot in the same directory as `active_path`
    pub fn new(active_path: impl AsRef<Path>) -> Self {
        let active_path = active_path.as_ref().to_path_buf();
        let backup_path = active_path
            .parent()
            .map(|dir| dir.join(BACKUP_FILE_NAME))
            .unwrap_or_else(|| PathBuf::from(BACKUP_FILE_NAME));

        Self {
            active_path,
            backup_path,
        }
    }

    pub fn with_backup_path(mut self, backup_path: impl AsRef<Path>) -> Self {
        self.backup_path = backup_path.as_ref().to_path_buf();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backup_is_sibling() {
        let target = RolloutTarget::new("/opt/service/conf/app.properties");
        assert_eq!(
            target.backup_path,
            PathBuf::from("/opt/service/conf/backup.txt")
        );
    }

    #[test]
    fn test_relative_path_without_parent() {
        let target = RolloutTarget::new("app.properties");
        assert_eq!(target.backup_path, PathBuf::from("backup.txt"));
    }
}
