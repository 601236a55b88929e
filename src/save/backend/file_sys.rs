#![cfg(not(target_arch = "wasm32"))]

use futures::channel::oneshot;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::{
    fs,
    future::Future,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use super::{SAVE_EXT, StorageBackend, check_storage};
use crate::save::{
    archive::{Archive, CommitFn},
    config::SaveConfig,
    environment::Environment,
    error::{SaveError, SaveResult},
    format::{ArchiveFlags, Container},
    name::validate_save_name,
};

const TEMP_EXT: &str = "tmp";
const BACKUP_EXT: &str = "bak";

/// Stores each save as one packed file, `profile/slot` lives in `<root>/profile/slot.sav`.
///
/// Commits write `slot.<ts>.tmp`, copy the current file to `slot.<ts>.bak` and
/// then rename the temp file over it, a crash at any point keeps either the old
/// or the new version. If the main file can't be decoded the newest readable
/// backup is used instead.
///
/// File system calls run on a thread pool so the futures never block the caller.
/// Deleting a missing save fails with `NotFound`.
#[derive(Clone)]
pub struct LocalBackend {
    root: PathBuf,
    pool: Arc<ThreadPool>,
    flags: ArchiveFlags,
    keep_backups: usize,
    env: Option<Environment>,
}

impl LocalBackend {
    /// Creates a backend storing the saves in `root`
    pub fn new<P>(root: P) -> SaveResult<Self>
    where
        P: Into<PathBuf>,
    {
        let pool = ThreadPoolBuilder::default()
            .num_threads(2)
            .thread_name(|i| format!("save-io-{i}"))
            .build()
            .map_err(|e| SaveError::Backend(e.to_string()))?;

        Ok(Self {
            root: root.into(),
            pool: Arc::new(pool),
            flags: ArchiveFlags::default(),
            keep_backups: 1,
            env: None,
        })
    }

    pub fn from_config(config: &SaveConfig) -> SaveResult<Self> {
        Ok(Self::new(config.data_dir()?)?
            .with_flags(config.archive_flags())
            .with_backups(config.backups()))
    }

    pub fn with_flags(mut self, flags: ArchiveFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Number of previous versions kept next to each save
    pub fn with_backups(mut self, keep: usize) -> Self {
        self.keep_backups = keep;
        self
    }

    pub fn with_environment(mut self, env: Environment) -> Self {
        self.env = Some(env);
        self
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deletes the backups of `name` beyond the newest `keep`, returns how many were removed
    pub fn clean_backups(
        &self,
        name: &str,
        keep: usize,
    ) -> impl Future<Output = SaveResult<usize>> + Send + 'static {
        let name = name.to_string();
        self.spawn(move |backend| {
            validate_save_name(&name)?;
            backend.prune_backups(&name, keep)
        })
    }

    fn spawn<T, F>(&self, task: F) -> impl Future<Output = SaveResult<T>> + Send + 'static
    where
        F: FnOnce(&LocalBackend) -> SaveResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let backend = self.clone();
        self.pool.spawn(move || {
            let _ = tx.send(task(&backend));
        });

        async move {
            rx.await
                .unwrap_or_else(|_| Err(SaveError::Backend("The channel was dropped.".to_string())))
        }
    }

    fn save_path(&self, name: &str) -> PathBuf {
        let mut path = self.root.clone();
        name.split('/').for_each(|segment| path.push(segment));
        path.set_extension(SAVE_EXT);
        path
    }

    /// Directory and file stem where `name` lives
    fn location(&self, name: &str) -> (PathBuf, String) {
        let path = self.save_path(name);
        let leaf = name.rsplit('/').next().unwrap_or(name).to_string();
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
        (dir, leaf)
    }

    fn list_names(&self) -> SaveResult<Vec<String>> {
        let mut names = vec![];
        if !fs::exists(&self.root)? {
            return Ok(names);
        }

        let mut pending = vec![(self.root.clone(), String::new())];
        while let Some((dir, prefix)) = pending.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let path = entry.path();
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };

                if entry.file_type()?.is_dir() {
                    // directories use the whole file name, they never have an extension
                    let Some(dir_name) = path.file_name().and_then(|s| s.to_str()) else {
                        continue;
                    };
                    pending.push((path.clone(), format!("{prefix}{dir_name}/")));
                    continue;
                }

                let is_save = path.extension().and_then(|e| e.to_str()) == Some(SAVE_EXT);
                if !is_save {
                    continue;
                }

                let name = format!("{prefix}{stem}");
                match validate_save_name(&name) {
                    Ok(_) => names.push(name),
                    Err(e) => log::debug!("Skipping unknown file '{path:?}': {e}"),
                }
            }
        }

        names.sort();
        Ok(names)
    }

    /// Backups of `name` sorted by timestamp DESC
    fn list_backups(&self, name: &str) -> SaveResult<Vec<(u64, PathBuf)>> {
        let (dir, leaf) = self.location(name);
        if !fs::exists(&dir)? {
            return Ok(vec![]);
        }

        let mut backups = vec![];
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(BACKUP_EXT) {
                continue;
            }

            // expecting "slot.timestamp"
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && let Some((stem_name, ts)) = stem.rsplit_once('.')
                && stem_name == leaf
                && let Ok(ts) = ts.parse::<u64>()
            {
                backups.push((ts, path));
            }
        }

        backups.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(backups)
    }

    fn prune_backups(&self, name: &str, keep: usize) -> SaveResult<usize> {
        let mut deleted = 0;
        for (_, path) in self.list_backups(name)?.iter().skip(keep) {
            fs::remove_file(path)?;
            deleted += 1;
        }
        Ok(deleted)
    }

    fn read_container(&self, name: &str) -> SaveResult<Option<Container>> {
        let path = self.save_path(name);
        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let err = match Container::parse(name, Arc::from(raw)) {
            Ok(container) => return Ok(Some(container)),
            Err(err @ SaveError::Corrupted { .. }) => err,
            Err(err) => return Err(err),
        };

        // main file is corrupted, move to the backups
        log::warn!("Save file '{path:?}' seems corrupted: {err}");
        for (_, backup) in self.list_backups(name)? {
            let parsed = fs::read(&backup)
                .map_err(SaveError::from)
                .and_then(|raw| Container::parse(name, Arc::from(raw)));

            match parsed {
                Ok(container) => {
                    log::warn!("Using backup save file '{backup:?}'");
                    return Ok(Some(container));
                }
                Err(e) => log::warn!("Backup save file seems corrupted, skipping '{backup:?}': {e}"),
            }
        }

        Err(err)
    }

    fn write(&self, name: &str, bytes: &[u8]) -> SaveResult<()> {
        check_storage(self.env.as_ref())?;

        let (dir, leaf) = self.location(name);
        fs::create_dir_all(&dir)?;

        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| SaveError::Backend(e.to_string()))?
            .as_millis();

        // write to a temp file, if the process is stopped by the os (power loss, etc...)
        // we do not corrupt the latest save file
        let tmp_path = dir.join(format!("{leaf}.{ts}.{TEMP_EXT}"));
        let final_path = self.save_path(name);

        let res = write_synced(&tmp_path, bytes).and_then(|_| {
            if self.keep_backups > 0 && fs::exists(&final_path)? {
                let backup_path = dir.join(format!("{leaf}.{ts}.{BACKUP_EXT}"));
                fs::copy(&final_path, &backup_path)?;
                log::debug!("New backup file created '{backup_path:?}'");
            }

            fs::rename(&tmp_path, &final_path)
        });

        if let Err(e) = res {
            if let Err(rm_err) = fs::remove_file(&tmp_path) {
                log::debug!("Unable to remove temp file '{tmp_path:?}': {rm_err}");
            }
            return Err(e.into());
        }

        log::debug!("Save file written '{final_path:?}'");

        if let Err(e) = self.prune_backups(name, self.keep_backups) {
            log::warn!("Cleaning backups for '{name}': {e}");
        }

        Ok(())
    }

    fn remove(&self, name: &str) -> SaveResult<()> {
        let path = self.save_path(name);
        let mut found = match fs::remove_file(&path) {
            Ok(_) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        for (_, backup) in self.list_backups(name)? {
            fs::remove_file(&backup)?;
            found = true;
        }

        if !found {
            return Err(SaveError::NotFound(name.to_string()));
        }

        // drop the now empty parent directories, never the root
        let mut dir = path.parent().map(Path::to_path_buf);
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            if fs::remove_dir(&current).is_err() {
                break;
            }
            dir = current.parent().map(Path::to_path_buf);
        }

        log::debug!("Save file deleted '{path:?}'");
        Ok(())
    }

    fn commit_fn(&self, name: &str) -> CommitFn {
        let backend = self.clone();
        let name = name.to_string();
        Box::new(move |bytes| {
            let name = name.clone();
            Box::pin(backend.spawn(move |backend| backend.write(&name, &bytes)))
        })
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

impl StorageBackend for LocalBackend {
    async fn enumerate_archives(&self) -> SaveResult<Vec<String>> {
        self.spawn(|backend| backend.list_names()).await
    }

    async fn read_only_archive(&self, name: &str) -> SaveResult<Archive> {
        let name = name.to_string();
        self.spawn(move |backend| {
            let container = backend
                .read_container(&name)?
                .ok_or_else(|| SaveError::NotFound(name.clone()))?;
            Ok(Archive::read_only(&name, container))
        })
        .await
    }

    async fn writable_archive(&self, name: &str) -> SaveResult<Archive> {
        let seed = {
            let name = name.to_string();
            self.spawn(move |backend| backend.read_container(&name))
                .await
        };

        Archive::writable(name, seed, self.flags, self.commit_fn(name))
    }

    async fn delete_archive(&self, name: &str) -> SaveResult<()> {
        let name = name.to_string();
        self.spawn(move |backend| backend.remove(&name)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pollster::block_on;
    use std::{thread, time::Duration};
    use tempfile::TempDir;

    fn commit(backend: &LocalBackend, name: &str, file: &str, data: &[u8]) {
        let mut archive = block_on(backend.writable_archive(name)).unwrap();
        archive.write_file(file, data.to_vec()).unwrap();
        block_on(archive.commit()).unwrap();
    }

    fn files_with_ext(dir: &Path, ext: &str) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok().map(|ent| ent.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(ext))
            .collect()
    }

    #[test]
    fn test_commit_and_read() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalBackend::new(tmp.path()).unwrap();

        assert!(block_on(backend.enumerate_archives()).unwrap().is_empty());
        commit(&backend, "test/potato", "file", b"chips");

        assert!(tmp.path().join("test").join("potato.sav").exists());
        assert_eq!(
            block_on(backend.enumerate_archives()).unwrap(),
            vec!["test/potato"]
        );

        let archive = block_on(backend.read_only_archive("test/potato")).unwrap();
        assert_eq!(archive.read_file("file").unwrap(), b"chips");

        // no temp files left behind
        assert!(files_with_ext(&tmp.path().join("test"), TEMP_EXT).is_empty());
    }

    #[test]
    fn test_missing_root_is_empty() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalBackend::new(tmp.path().join("nope")).unwrap();
        assert!(block_on(backend.enumerate_archives()).unwrap().is_empty());
        assert!(matches!(
            block_on(backend.read_only_archive("slot")),
            Err(SaveError::NotFound(_))
        ));
    }

    #[test]
    fn test_nested_names_do_not_collide() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalBackend::new(tmp.path()).unwrap();
        commit(&backend, "test", "file", b"outer");
        commit(&backend, "test/potato", "file", b"inner");

        assert_eq!(
            block_on(backend.enumerate_archives()).unwrap(),
            vec!["test", "test/potato"]
        );
        let outer = block_on(backend.read_only_archive("test")).unwrap();
        assert_eq!(outer.read_file("file").unwrap(), b"outer");
        let inner = block_on(backend.read_only_archive("test/potato")).unwrap();
        assert_eq!(inner.read_file("file").unwrap(), b"inner");
    }

    #[test]
    fn test_unknown_files_are_ignored() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalBackend::new(tmp.path()).unwrap();
        commit(&backend, "slot", "file", b"data");
        fs::write(tmp.path().join("notes.txt"), b"hi").unwrap();
        fs::write(tmp.path().join("Bad Name.sav"), b"hi").unwrap();

        assert_eq!(block_on(backend.enumerate_archives()).unwrap(), vec!["slot"]);
    }

    #[test]
    fn test_backup_created_on_overwrite() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalBackend::new(tmp.path()).unwrap();

        // first save: no backup should be created
        commit(&backend, "my_slot", "file", b"one");
        assert!(files_with_ext(tmp.path(), BACKUP_EXT).is_empty());

        // second save keeps the old version as backup
        commit(&backend, "my_slot", "file", b"two");
        let backups = files_with_ext(tmp.path(), BACKUP_EXT);
        assert_eq!(backups.len(), 1, "Expected one backup, found: {backups:?}");

        let stem = backups[0].file_stem().and_then(|s| s.to_str()).unwrap();
        assert!(stem.starts_with("my_slot."));

        // backups are not listed as saves
        assert_eq!(
            block_on(backend.enumerate_archives()).unwrap(),
            vec!["my_slot"]
        );
    }

    #[test]
    fn test_clean_backups_keeps_last_n() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalBackend::new(tmp.path()).unwrap().with_backups(10);

        const KEEP: usize = 2;
        const N: usize = 5;
        for i in 0..N {
            // ensure unique timestamp
            thread::sleep(Duration::from_millis(5));
            commit(&backend, "slot", "file", &[i as u8]);
        }

        assert_eq!(files_with_ext(tmp.path(), BACKUP_EXT).len(), N - 1);

        let removed = block_on(backend.clean_backups("slot", KEEP)).unwrap();
        assert_eq!(removed, N - 1 - KEEP);
        assert_eq!(files_with_ext(tmp.path(), BACKUP_EXT).len(), KEEP);
    }

    #[test]
    fn test_corrupted_main_falls_back_to_backup() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalBackend::new(tmp.path()).unwrap();

        commit(&backend, "slot", "file", b"old");
        thread::sleep(Duration::from_millis(5));
        commit(&backend, "slot", "file", b"new");

        // overwrite the header so it fails parsing
        let main = tmp.path().join("slot.sav");
        let mut raw = fs::read(&main).unwrap();
        raw[..10].copy_from_slice(&[0u8; 10]);
        fs::write(&main, raw).unwrap();

        let archive = block_on(backend.read_only_archive("slot")).unwrap();
        assert_eq!(archive.read_file("file").unwrap(), b"old");
    }

    #[test]
    fn test_corrupted_without_backup_fails() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalBackend::new(tmp.path()).unwrap();
        commit(&backend, "slot", "file", b"data");
        fs::write(tmp.path().join("slot.sav"), b"garbage").unwrap();

        assert!(matches!(
            block_on(backend.read_only_archive("slot")),
            Err(SaveError::Corrupted { .. })
        ));
    }

    #[test]
    fn test_corrupted_save_can_be_overwritten() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalBackend::new(tmp.path()).unwrap().with_backups(0);
        commit(&backend, "slot", "file", b"data");
        fs::write(tmp.path().join("slot.sav"), b"garbage").unwrap();

        let mut archive = block_on(backend.writable_archive("slot")).unwrap();
        assert_eq!(archive.enumerate_files().count(), 0);
        archive.write_file("file", b"fresh".to_vec()).unwrap();
        block_on(archive.commit()).unwrap();

        let archive = block_on(backend.read_only_archive("slot")).unwrap();
        assert_eq!(archive.read_file("file").unwrap(), b"fresh");
    }

    #[test]
    fn test_failed_rename_removes_temp_file() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalBackend::new(tmp.path()).unwrap().with_backups(0);
        let mut archive = block_on(backend.writable_archive("slot")).unwrap();
        archive.write_file("file", b"data".to_vec()).unwrap();

        // a non empty dir in the way of the save file makes the rename fail
        let blocker = tmp.path().join("slot.sav");
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("keep"), b"x").unwrap();

        assert!(matches!(
            block_on(archive.commit()),
            Err(SaveError::Io(_))
        ));
        assert!(!archive.is_committed());
        assert!(files_with_ext(tmp.path(), TEMP_EXT).is_empty());
        assert!(blocker.join("keep").exists());
    }

    #[test]
    fn test_storage_full_keeps_previous_version() {
        let tmp = TempDir::new().unwrap();
        let env = Environment::new();
        let backend = LocalBackend::new(tmp.path())
            .unwrap()
            .with_environment(env.clone());
        commit(&backend, "slot", "file", b"safe");

        env.set_storage_full(true);
        let mut archive = block_on(backend.writable_archive("slot")).unwrap();
        archive.write_file("file", b"lost".to_vec()).unwrap();
        assert!(matches!(
            block_on(archive.commit()),
            Err(SaveError::StorageFull)
        ));

        let archive = block_on(backend.read_only_archive("slot")).unwrap();
        assert_eq!(archive.read_file("file").unwrap(), b"safe");
        assert!(files_with_ext(tmp.path(), TEMP_EXT).is_empty());
    }

    #[test]
    fn test_delete() {
        let tmp = TempDir::new().unwrap();
        let backend = LocalBackend::new(tmp.path()).unwrap();
        commit(&backend, "a/b", "file", b"1");
        commit(&backend, "a/b", "file", b"2");

        block_on(backend.delete_archive("a/b")).unwrap();
        assert!(block_on(backend.enumerate_archives()).unwrap().is_empty());
        assert!(!tmp.path().join("a").exists());
        assert!(tmp.path().exists());

        assert!(matches!(
            block_on(backend.delete_archive("a/b")),
            Err(SaveError::NotFound(_))
        ));
    }
}
