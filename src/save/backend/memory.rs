use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

use super::{StorageBackend, check_storage};
use crate::save::{
    archive::{Archive, CommitFn},
    environment::Environment,
    error::{SaveError, SaveResult},
    format::{ArchiveFlags, Container},
};

type SaveMap = FxHashMap<String, Arc<[u8]>>;

/// Process local backend, used for tests and offline/preview modes.
///
/// Commits and deletes take the write lock so they never interleave, reads
/// share the read lock. Deleting a missing save fails with `NotFound`.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    saves: Arc<RwLock<SaveMap>>,
    capacity: Option<usize>,
    flags: ArchiveFlags,
    env: Option<Environment>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the total amount of bytes stored, commits going over it fail with `StorageFull`
    pub fn with_capacity(mut self, bytes: usize) -> Self {
        self.capacity = Some(bytes);
        self
    }

    pub fn with_flags(mut self, flags: ArchiveFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_environment(mut self, env: Environment) -> Self {
        self.env = Some(env);
        self
    }

    /// Total bytes currently stored
    pub fn used_bytes(&self) -> usize {
        self.saves.read().values().map(|b| b.len()).sum()
    }

    fn container(&self, name: &str) -> SaveResult<Option<Container>> {
        let bytes = self.saves.read().get(name).cloned();
        bytes
            .map(|bytes| Container::parse(name, bytes))
            .transpose()
    }

    fn store(&self, name: &str, bytes: Vec<u8>) -> SaveResult<()> {
        check_storage(self.env.as_ref())?;

        let mut saves = self.saves.write();
        if let Some(capacity) = self.capacity {
            let used: usize = saves
                .iter()
                .filter(|(k, _)| k.as_str() != name)
                .map(|(_, v)| v.len())
                .sum();

            if used + bytes.len() > capacity {
                log::warn!(
                    "Memory storage full committing '{name}': {} of {capacity} bytes",
                    used + bytes.len()
                );
                return Err(SaveError::StorageFull);
            }
        }

        saves.insert(name.to_string(), Arc::from(bytes));
        Ok(())
    }

    fn commit_fn(&self, name: &str) -> CommitFn {
        let backend = self.clone();
        let name = name.to_string();
        Box::new(move |bytes| {
            let res = backend.store(&name, bytes);
            Box::pin(async move { res })
        })
    }
}

impl StorageBackend for MemoryBackend {
    async fn enumerate_archives(&self) -> SaveResult<Vec<String>> {
        let mut names: Vec<String> = self.saves.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn read_only_archive(&self, name: &str) -> SaveResult<Archive> {
        let container = self
            .container(name)?
            .ok_or_else(|| SaveError::NotFound(name.to_string()))?;
        Ok(Archive::read_only(name, container))
    }

    async fn writable_archive(&self, name: &str) -> SaveResult<Archive> {
        Archive::writable(name, self.container(name), self.flags, self.commit_fn(name))
    }

    async fn delete_archive(&self, name: &str) -> SaveResult<()> {
        match self.saves.write().remove(name) {
            Some(_) => {
                log::debug!("Memory save '{name}' deleted");
                Ok(())
            }
            None => Err(SaveError::NotFound(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pollster::block_on;

    #[test]
    fn test_missing_save() {
        let backend = MemoryBackend::new();
        assert!(block_on(backend.enumerate_archives()).unwrap().is_empty());
        assert!(matches!(
            block_on(backend.read_only_archive("slot")),
            Err(SaveError::NotFound(_))
        ));
        assert!(matches!(
            block_on(backend.delete_archive("slot")),
            Err(SaveError::NotFound(_))
        ));
    }

    #[test]
    fn test_reader_keeps_snapshot() {
        let backend = MemoryBackend::new();
        let mut writer = block_on(backend.writable_archive("slot")).unwrap();
        writer.write_file("file", b"one".to_vec()).unwrap();
        block_on(writer.commit()).unwrap();

        let reader = block_on(backend.read_only_archive("slot")).unwrap();

        let mut writer = block_on(backend.writable_archive("slot")).unwrap();
        assert_eq!(writer.read_file("file").unwrap(), b"one");
        writer.write_file("file", b"two".to_vec()).unwrap();

        // not visible before the commit
        let before = block_on(backend.read_only_archive("slot")).unwrap();
        assert_eq!(before.read_file("file").unwrap(), b"one");

        block_on(writer.commit()).unwrap();

        // the old snapshot is unchanged, new readers see the commit
        assert_eq!(reader.read_file("file").unwrap(), b"one");
        let after = block_on(backend.read_only_archive("slot")).unwrap();
        assert_eq!(after.read_file("file").unwrap(), b"two");
    }

    #[test]
    fn test_capacity_keeps_previous_version() {
        let backend = MemoryBackend::new()
            .with_flags(ArchiveFlags::empty())
            .with_capacity(256);

        let mut writer = block_on(backend.writable_archive("slot")).unwrap();
        writer.write_file("file", vec![1u8; 16]).unwrap();
        block_on(writer.commit()).unwrap();
        let used = backend.used_bytes();

        let mut writer = block_on(backend.writable_archive("slot")).unwrap();
        writer.write_file("file", vec![2u8; 1024]).unwrap();
        assert!(matches!(
            block_on(writer.commit()),
            Err(SaveError::StorageFull)
        ));

        assert_eq!(backend.used_bytes(), used);
        let reader = block_on(backend.read_only_archive("slot")).unwrap();
        assert_eq!(reader.read_file("file").unwrap(), vec![1; 16]);
    }

    #[test]
    fn test_environment_storage_full() {
        let env = Environment::new();
        let backend = MemoryBackend::new().with_environment(env.clone());

        env.set_storage_full(true);
        let mut writer = block_on(backend.writable_archive("slot")).unwrap();
        assert!(matches!(
            block_on(writer.commit()),
            Err(SaveError::StorageFull)
        ));
        assert!(block_on(backend.enumerate_archives()).unwrap().is_empty());

        env.set_storage_full(false);
        block_on(writer.commit()).unwrap();
        assert_eq!(block_on(backend.enumerate_archives()).unwrap(), vec!["slot"]);
    }

    #[test]
    fn test_corrupted_save_can_be_overwritten() {
        let backend = MemoryBackend::new();
        backend
            .saves
            .write()
            .insert("slot".to_string(), Arc::from(&b"garbage"[..]));

        assert!(matches!(
            block_on(backend.read_only_archive("slot")),
            Err(SaveError::Corrupted { .. })
        ));

        let mut writer = block_on(backend.writable_archive("slot")).unwrap();
        assert_eq!(writer.enumerate_files().count(), 0);
        writer.write_file("file", b"fresh".to_vec()).unwrap();
        block_on(writer.commit()).unwrap();

        let reader = block_on(backend.read_only_archive("slot")).unwrap();
        assert_eq!(reader.read_file("file").unwrap(), b"fresh");
    }

    #[test]
    fn test_clones_share_storage() {
        let backend = MemoryBackend::new();
        let other = backend.clone();

        let mut writer = block_on(backend.writable_archive("a/b")).unwrap();
        block_on(writer.commit()).unwrap();
        assert_eq!(block_on(other.enumerate_archives()).unwrap(), vec!["a/b"]);

        block_on(other.delete_archive("a/b")).unwrap();
        assert!(block_on(backend.enumerate_archives()).unwrap().is_empty());
    }
}
