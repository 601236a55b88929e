use futures::future::BoxFuture;
use std::{collections::BTreeMap, fmt, sync::Arc};

use super::error::{SaveError, SaveResult};
use super::format::{self, ArchiveFlags, Container};
use super::name::validate_file_name;

/// Persistence step supplied by the backend, receives the finished container bytes
pub type CommitFn = Box<dyn Fn(Vec<u8>) -> BoxFuture<'static, SaveResult<()>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveMode {
    ReadOnly,
    Writable,
}

enum Files {
    /// Snapshot of the stored container, entries are decoded on demand
    Packed(Container),
    /// Mutable copy of the entries, only used by writable archives
    Loose(BTreeMap<String, Vec<u8>>),
}

struct Writer {
    flags: ArchiveFlags,
    commit: CommitFn,
    dirty: bool,
    committed: bool,
}

/// The contents of one save: a set of named byte blobs.
///
/// Read-only archives are a snapshot of what was stored when they were opened.
/// Writable archives hold their own copy of the files and nothing reaches
/// the backend until [`Archive::commit`] succeeds. Once committed the archive
/// is inert and any write fails with [`SaveError::InvalidState`].
pub struct Archive {
    name: String,
    files: Files,
    writer: Option<Writer>,
}

impl fmt::Debug for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Archive")
            .field("name", &self.name)
            .field("mode", &self.mode())
            .field("files", &self.enumerate_files().collect::<Vec<_>>())
            .field("dirty", &self.is_dirty())
            .field("committed", &self.is_committed())
            .finish()
    }
}

impl Archive {
    pub(crate) fn read_only(name: &str, container: Container) -> Self {
        Self {
            name: name.to_string(),
            files: Files::Packed(container),
            writer: None,
        }
    }

    /// Creates a writable archive seeded with a full copy of `seed`.
    ///
    /// `seed` is the backend's read of the stored container. A corrupted one
    /// can't be repaired, so the archive starts empty and the next commit
    /// replaces it. Any other read error is returned.
    pub(crate) fn writable(
        name: &str,
        seed: SaveResult<Option<Container>>,
        flags: ArchiveFlags,
        commit: CommitFn,
    ) -> SaveResult<Self> {
        let decoded = seed.and_then(|seed| seed.map(|c| c.decode_all()).transpose());
        let files = match decoded {
            Ok(files) => files.unwrap_or_default(),
            Err(err @ SaveError::Corrupted { .. }) => {
                log::warn!("Save '{name}' is corrupted, it will be overwritten on commit: {err}");
                BTreeMap::new()
            }
            Err(err) => return Err(err),
        };

        Ok(Self {
            name: name.to_string(),
            files: Files::Loose(files),
            writer: Some(Writer {
                flags,
                commit,
                dirty: false,
                committed: false,
            }),
        })
    }

    /// Read-only archive over stored container bytes, used by custom backends
    pub fn from_bytes(name: &str, bytes: impl Into<Arc<[u8]>>) -> SaveResult<Self> {
        let container = Container::parse(name, bytes.into())?;
        Ok(Self::read_only(name, container))
    }

    /// Writable archive for custom backends, `seed` holds the stored container if the save exists.
    /// `commit` receives the encoded container and must persist it atomically.
    /// A seed that can't be parsed gives an empty archive.
    pub fn with_commit(
        name: &str,
        seed: Option<&[u8]>,
        flags: ArchiveFlags,
        commit: CommitFn,
    ) -> SaveResult<Self> {
        let seed = seed
            .map(|bytes| Container::parse(name, Arc::from(bytes)))
            .transpose();
        Self::writable(name, seed, flags, commit)
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn mode(&self) -> ArchiveMode {
        if self.writer.is_some() {
            ArchiveMode::Writable
        } else {
            ArchiveMode::ReadOnly
        }
    }

    /// Writable archive with changes not committed yet
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.writer.as_ref().is_some_and(|w| w.dirty)
    }

    #[inline]
    pub fn is_committed(&self) -> bool {
        self.writer.as_ref().is_some_and(|w| w.committed)
    }

    /// Unix timestamp (seconds) of the commit that produced a read-only archive
    pub fn timestamp(&self) -> Option<u64> {
        match &self.files {
            Files::Packed(container) => Some(container.timestamp()),
            Files::Loose(_) => None,
        }
    }

    /// Names of the files currently in the archive, sorted
    pub fn enumerate_files(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        match &self.files {
            Files::Packed(container) => Box::new(container.names()),
            Files::Loose(files) => Box::new(files.keys().map(String::as_str)),
        }
    }

    pub fn contains(&self, file: &str) -> bool {
        match &self.files {
            Files::Packed(container) => container.names().any(|n| n == file),
            Files::Loose(files) => files.contains_key(file),
        }
    }

    pub fn read_file(&self, file: &str) -> SaveResult<Vec<u8>> {
        validate_file_name(file)?;
        match &self.files {
            Files::Packed(container) => container.read(file),
            Files::Loose(files) => files
                .get(file)
                .cloned()
                .ok_or_else(|| SaveError::NotFound(format!("{}:{file}", self.name))),
        }
    }

    /// Inserts or overwrites `file`
    pub fn write_file(&mut self, file: &str, bytes: impl Into<Vec<u8>>) -> SaveResult<()> {
        validate_file_name(file)?;
        let files = self.loose_files_mut()?;
        files.insert(file.to_string(), bytes.into());
        self.mark_dirty();
        Ok(())
    }

    /// Removes `file`, returns false if it wasn't in the archive
    pub fn remove_file(&mut self, file: &str) -> SaveResult<bool> {
        validate_file_name(file)?;
        let files = self.loose_files_mut()?;
        let removed = files.remove(file).is_some();
        if removed {
            self.mark_dirty();
        }
        Ok(removed)
    }

    /// Publishes the archive to its backend.
    ///
    /// If the backend fails the archive stays uncommitted, keeps its changes
    /// and the commit can be retried.
    pub async fn commit(&mut self) -> SaveResult<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(SaveError::InvalidState("Read-only archives can't be committed"));
        };

        if writer.committed {
            return Err(SaveError::InvalidState("Archive already committed"));
        }

        let Files::Loose(files) = &self.files else {
            return Err(SaveError::InvalidState("Writable archive without file buffer"));
        };

        let bytes = format::encode(files, writer.flags)?;
        let len = bytes.len();
        (writer.commit)(bytes).await?;

        writer.committed = true;
        writer.dirty = false;
        log::debug!("Archive '{}' committed ({len} bytes)", self.name);
        Ok(())
    }

    fn loose_files_mut(&mut self) -> SaveResult<&mut BTreeMap<String, Vec<u8>>> {
        match (&self.writer, &mut self.files) {
            (None, _) => Err(SaveError::InvalidState("Archive is read-only")),
            (Some(w), _) if w.committed => Err(SaveError::InvalidState("Archive already committed")),
            (Some(_), Files::Loose(files)) => Ok(files),
            (Some(_), Files::Packed(_)) => Err(SaveError::InvalidState(
                "Writable archive without file buffer",
            )),
        }
    }

    #[inline]
    fn mark_dirty(&mut self) {
        if let Some(writer) = self.writer.as_mut() {
            writer.dirty = true;
        }
    }
}
