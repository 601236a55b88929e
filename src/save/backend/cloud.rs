use std::{future::Future, sync::Arc};

use super::{SAVE_EXT, StorageBackend, check_storage};
use crate::save::{
    archive::{Archive, CommitFn},
    environment::Environment,
    error::{SaveError, SaveResult},
    format::{ArchiveFlags, Container},
    name::validate_save_name,
};

/// Remote blob storage consumed by [`CloudBackend`].
///
/// Keys are plain `/` separated strings. `upload` must replace the whole
/// object or fail leaving the previous one untouched, and report a full
/// quota as [`SaveError::StorageFull`].
pub trait BlobClient: Send + Sync + 'static {
    /// Keys starting with `prefix`
    fn list(&self, prefix: &str) -> impl Future<Output = SaveResult<Vec<String>>> + Send;

    /// Object stored at `key`, `None` if missing
    fn download(&self, key: &str) -> impl Future<Output = SaveResult<Option<Vec<u8>>>> + Send;

    fn upload(&self, key: &str, bytes: Vec<u8>) -> impl Future<Output = SaveResult<()>> + Send;

    /// Removes `key`, missing keys are not an error
    fn remove(&self, key: &str) -> impl Future<Output = SaveResult<()>> + Send;
}

/// Stores every save as one object `<root>/<name>.sav` in a remote blob store.
///
/// `root` is usually the account or profile id, so each account gets its own
/// set of saves. Deleting a missing save is a no-op.
pub struct CloudBackend<C: BlobClient> {
    client: Arc<C>,
    root: String,
    flags: ArchiveFlags,
    env: Option<Environment>,
}

impl<C: BlobClient> Clone for CloudBackend<C> {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            root: self.root.clone(),
            flags: self.flags,
            env: self.env.clone(),
        }
    }
}

impl<C: BlobClient> CloudBackend<C> {
    pub fn new(client: C, root: &str) -> Self {
        Self {
            client: Arc::new(client),
            root: root.trim_matches('/').to_string(),
            flags: ArchiveFlags::default(),
            env: None,
        }
    }

    pub fn with_flags(mut self, flags: ArchiveFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_environment(mut self, env: Environment) -> Self {
        self.env = Some(env);
        self
    }

    #[inline]
    pub fn client(&self) -> &C {
        &self.client
    }

    fn prefix(&self) -> String {
        if self.root.is_empty() {
            String::new()
        } else {
            format!("{}/", self.root)
        }
    }

    fn key(&self, name: &str) -> String {
        format!("{}{name}.{SAVE_EXT}", self.prefix())
    }

    /// Save name for `key`, if it belongs to this backend
    fn name_of(&self, key: &str) -> Option<String> {
        let name = key
            .strip_prefix(&self.prefix())?
            .strip_suffix(SAVE_EXT)?
            .strip_suffix('.')?;
        validate_save_name(name).ok()?;
        Some(name.to_string())
    }

    async fn container(&self, name: &str) -> SaveResult<Option<Container>> {
        let bytes = self.client.download(&self.key(name)).await?;
        bytes
            .map(|bytes| Container::parse(name, Arc::from(bytes)))
            .transpose()
    }

    fn commit_fn(&self, name: &str) -> CommitFn {
        let client = self.client.clone();
        let env = self.env.clone();
        let key = self.key(name);
        Box::new(move |bytes| {
            let client = client.clone();
            let env = env.clone();
            let key = key.clone();
            Box::pin(async move {
                check_storage(env.as_ref())?;
                client.upload(&key, bytes).await?;
                log::debug!("Save uploaded to '{key}'");
                Ok(())
            })
        })
    }
}

impl<C: BlobClient> StorageBackend for CloudBackend<C> {
    async fn enumerate_archives(&self) -> SaveResult<Vec<String>> {
        let keys = self.client.list(&self.prefix()).await?;
        let mut names: Vec<String> = keys
            .iter()
            .filter_map(|key| {
                let name = self.name_of(key);
                if name.is_none() {
                    log::debug!("Skipping unknown blob '{key}'");
                }
                name
            })
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn read_only_archive(&self, name: &str) -> SaveResult<Archive> {
        let container = self
            .container(name)
            .await?
            .ok_or_else(|| SaveError::NotFound(name.to_string()))?;
        Ok(Archive::read_only(name, container))
    }

    async fn writable_archive(&self, name: &str) -> SaveResult<Archive> {
        let seed = self.container(name).await;
        Archive::writable(name, seed, self.flags, self.commit_fn(name))
    }

    async fn delete_archive(&self, name: &str) -> SaveResult<()> {
        let key = self.key(name);
        self.client.remove(&key).await?;
        log::debug!("Save blob '{key}' deleted");
        Ok(())
    }
}
