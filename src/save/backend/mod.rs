mod cloud;
mod file_sys;
mod local_storage;
mod memory;

use std::future::Future;

use super::archive::Archive;
use super::environment::Environment;
use super::error::{SaveError, SaveResult};

pub use cloud::{BlobClient, CloudBackend};
pub use memory::MemoryBackend;

#[cfg(not(target_arch = "wasm32"))]
pub use file_sys::LocalBackend;

#[cfg(target_arch = "wasm32")]
pub use local_storage::WebStorageBlobs;

/// Extension of every stored archive
pub(crate) const SAVE_EXT: &str = "sav";

/// Archive level CRUD over one storage medium.
///
/// Implementations receive names already validated by the saving service.
/// A commit made through an archive returned by [`StorageBackend::writable_archive`]
/// must be visible to every archive opened after it, and must leave the
/// previous version intact if it fails.
pub trait StorageBackend: Send + Sync {
    /// Names of the saves currently persisted
    fn enumerate_archives(&self) -> impl Future<Output = SaveResult<Vec<String>>> + Send;

    /// Snapshot of a stored save, fails with [`SaveError::NotFound`] if missing
    fn read_only_archive(&self, name: &str) -> impl Future<Output = SaveResult<Archive>> + Send;

    /// Writable archive seeded with the stored save, if any
    fn writable_archive(&self, name: &str) -> impl Future<Output = SaveResult<Archive>> + Send;

    fn delete_archive(&self, name: &str) -> impl Future<Output = SaveResult<()>> + Send;
}

/// Commit guard shared by every backend
#[inline]
pub(crate) fn check_storage(env: Option<&Environment>) -> SaveResult<()> {
    match env {
        Some(env) if env.is_storage_full() => Err(SaveError::StorageFull),
        _ => Ok(()),
    }
}

#[cfg(target_arch = "wasm32")]
pub type PlatformBackend = CloudBackend<WebStorageBlobs>;

#[cfg(not(target_arch = "wasm32"))]
pub type PlatformBackend = LocalBackend;
