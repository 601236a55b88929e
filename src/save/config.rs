use std::path::PathBuf;

use super::error::{SaveError, SaveResult};
use super::format::ArchiveFlags;

/// Environment variable that overrides the base directory for save files
pub const SAVE_DIR_ENV: &str = "SAVE_FILE_DIR";

/// Configure where and how saves are stored
#[derive(Debug, Clone)]
pub struct SaveConfig {
    app_name: String,
    root: Option<PathBuf>,
    flags: ArchiveFlags,
    keep_backups: usize,
}

impl SaveConfig {
    /// Creates a new configuration, `app_name` is used as directory name or storage prefix
    pub fn new(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            root: None,
            flags: ArchiveFlags::default(),
            keep_backups: 1,
        }
    }

    /// Store saves in this directory instead of the user's data dir
    pub fn root<P>(mut self, path: P) -> Self
    where
        P: Into<PathBuf>,
    {
        self.root = Some(path.into());
        self
    }

    /// Container flags used when committing archives
    pub fn flags(mut self, flags: ArchiveFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Number of previous versions kept next to each save (local backend only)
    pub fn keep_backups(mut self, keep: usize) -> Self {
        self.keep_backups = keep;
        self
    }

    #[inline]
    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    #[inline]
    pub fn archive_flags(&self) -> ArchiveFlags {
        self.flags
    }

    #[inline]
    pub fn backups(&self) -> usize {
        self.keep_backups
    }

    /// Resolves the directory used by file based backends.
    /// Priority is: explicit root, `SAVE_FILE_DIR` + app name, user's data dir.
    pub fn data_dir(&self) -> SaveResult<PathBuf> {
        if let Some(root) = &self.root {
            return Ok(root.clone());
        }

        match std::env::var(SAVE_DIR_ENV).ok() {
            Some(p) => Ok(PathBuf::from(p).join(&self.app_name)),
            None => user_data_path(&self.app_name).ok_or_else(|| {
                SaveError::Backend("Unable to find a folder to store the saves.".to_string())
            }),
        }
    }
}

/// Returns the User's data directory depending on the enviroment
/// The `web` build will return None
#[inline]
fn user_data_path(base: &str) -> Option<PathBuf> {
    #[cfg(not(target_arch = "wasm32"))]
    {
        platform_dirs::AppDirs::new(Some(base), false).map(|d| d.data_dir)
    }

    #[cfg(target_arch = "wasm32")]
    {
        let _ = base;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_root_wins() {
        let config = SaveConfig::new("my-game").root("/tmp/saves");
        assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/saves"));
    }

    #[test]
    fn test_defaults() {
        let config = SaveConfig::new("my-game");
        assert_eq!(config.app_name(), "my-game");
        assert_eq!(config.archive_flags(), ArchiveFlags::default());
        assert_eq!(config.backups(), 1);

        let config = config.keep_backups(3).flags(ArchiveFlags::empty());
        assert_eq!(config.backups(), 3);
        assert!(config.archive_flags().is_empty());
    }
}
