use std::future::Future;

use super::archive::Archive;
use super::backend::StorageBackend;
use super::error::SaveResult;
use super::name::validate_save_name;

/// Public save API, implemented by [`SaveService`] and by wrappers around it
pub trait SaveProvider: Send + Sync {
    /// Names of every stored save, stable within one call
    fn enumerate_save_names(&self) -> impl Future<Output = SaveResult<Vec<String>>> + Send;

    fn save_exists(&self, name: &str) -> impl Future<Output = SaveResult<bool>> + Send;

    /// Snapshot of `name`, fails with `NotFound` if it doesn't exist
    fn open_save_readable(&self, name: &str) -> impl Future<Output = SaveResult<Archive>> + Send;

    /// Writable copy of `name`, empty if it doesn't exist yet
    fn open_save_writable(&self, name: &str) -> impl Future<Output = SaveResult<Archive>> + Send;

    fn delete_save(&self, name: &str) -> impl Future<Output = SaveResult<()>> + Send;
}

/// Validates names and forwards to the backend.
///
/// Nothing is cached, every call asks the backend again. Two writers
/// committing the same save at the same time are not coordinated, the last
/// commit wins.
#[derive(Clone)]
pub struct SaveService<B: StorageBackend> {
    backend: B,
}

impl<B: StorageBackend> SaveService<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    #[inline]
    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B: StorageBackend> SaveProvider for SaveService<B> {
    async fn enumerate_save_names(&self) -> SaveResult<Vec<String>> {
        self.backend.enumerate_archives().await
    }

    async fn save_exists(&self, name: &str) -> SaveResult<bool> {
        validate_save_name(name)?;
        let names = self.backend.enumerate_archives().await?;
        Ok(names.iter().any(|n| n == name))
    }

    async fn open_save_readable(&self, name: &str) -> SaveResult<Archive> {
        validate_save_name(name)?;
        self.backend.read_only_archive(name).await
    }

    async fn open_save_writable(&self, name: &str) -> SaveResult<Archive> {
        validate_save_name(name)?;
        self.backend.writable_archive(name).await
    }

    async fn delete_save(&self, name: &str) -> SaveResult<()> {
        validate_save_name(name)?;
        self.backend.delete_archive(name).await?;
        log::debug!("Save '{name}' deleted");
        Ok(())
    }
}
