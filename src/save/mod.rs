//! Transactional saves.
//!
//! A save is an [`Archive`]: a set of named byte blobs committed as a single
//! unit to a [`StorageBackend`] (local files, a remote blob store or memory).
//! [`SaveService`] validates names and talks to the backend,
//! [`EnvironmentGate`] holds operations back while the app is paused and
//! [`DataStore`] keeps typed key-value state inside a save.

mod archive;
mod backend;
mod config;
mod data_store;
mod environment;
mod error;
mod format;
mod gate;
mod name;
mod service;

pub use archive::{Archive, ArchiveMode, CommitFn};
pub use backend::{BlobClient, CloudBackend, MemoryBackend, PlatformBackend, StorageBackend};
pub use config::{SAVE_DIR_ENV, SaveConfig};
pub use data_store::DataStore;
pub use environment::{Environment, WaitResumed};
pub use error::{SaveError, SaveResult};
pub use format::ArchiveFlags;
pub use gate::EnvironmentGate;
pub use name::{validate_file_name, validate_save_name};
pub use service::{SaveProvider, SaveService};

#[cfg(not(target_arch = "wasm32"))]
pub use backend::LocalBackend;

#[cfg(target_arch = "wasm32")]
pub use backend::WebStorageBlobs;

/// Save service for the current platform: files in the user's data dir on
/// desktop, browser storage on the web. Operations wait while `env` is paused.
pub fn platform_saves(
    config: &SaveConfig,
    env: Environment,
) -> SaveResult<EnvironmentGate<SaveService<PlatformBackend>>> {
    let backend = PlatformBackend::from_config(config)?.with_environment(env.clone());
    Ok(EnvironmentGate::new(SaveService::new(backend), env))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pollster::block_on;
    use tempfile::TempDir;

    #[test]
    fn test_platform_saves() {
        let tmp = TempDir::new().unwrap();
        let config = SaveConfig::new("my-game").root(tmp.path());
        let saves = platform_saves(&config, Environment::new()).unwrap();

        let mut store = block_on(DataStore::load(&saves, "save-slot-1")).unwrap();
        store.set_int("cheese", 99);
        block_on(store.save(&saves, "save-slot-1")).unwrap();

        assert!(tmp.path().join("save-slot-1.sav").exists());
        let store = block_on(DataStore::load(&saves, "save-slot-1")).unwrap();
        assert_eq!(store.get_int("cheese", 0), 99);
    }
}
