use super::archive::Archive;
use super::environment::Environment;
use super::error::SaveResult;
use super::service::SaveProvider;

/// Delays every save operation while the environment is paused.
///
/// Only the start of an operation is delayed, results are the same as
/// calling the wrapped provider directly.
pub struct EnvironmentGate<P: SaveProvider> {
    inner: P,
    env: Environment,
}

impl<P: SaveProvider> EnvironmentGate<P> {
    pub fn new(inner: P, env: Environment) -> Self {
        Self { inner, env }
    }

    #[inline]
    pub fn environment(&self) -> &Environment {
        &self.env
    }

    #[inline]
    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn into_inner(self) -> P {
        self.inner
    }
}

impl<P: SaveProvider> SaveProvider for EnvironmentGate<P> {
    async fn enumerate_save_names(&self) -> SaveResult<Vec<String>> {
        self.env.wait_resumed().await;
        self.inner.enumerate_save_names().await
    }

    async fn save_exists(&self, name: &str) -> SaveResult<bool> {
        self.env.wait_resumed().await;
        self.inner.save_exists(name).await
    }

    async fn open_save_readable(&self, name: &str) -> SaveResult<Archive> {
        self.env.wait_resumed().await;
        self.inner.open_save_readable(name).await
    }

    async fn open_save_writable(&self, name: &str) -> SaveResult<Archive> {
        self.env.wait_resumed().await;
        self.inner.open_save_writable(name).await
    }

    async fn delete_save(&self, name: &str) -> SaveResult<()> {
        self.env.wait_resumed().await;
        self.inner.delete_save(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::save::{backend::MemoryBackend, error::SaveError, service::SaveService};
    use pollster::block_on;
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        thread,
        time::Duration,
    };

    fn gate(env: &Environment) -> EnvironmentGate<SaveService<MemoryBackend>> {
        EnvironmentGate::new(SaveService::new(MemoryBackend::new()), env.clone())
    }

    #[test]
    fn test_never_paused_passes_through() {
        let env = Environment::new();
        let gate = gate(&env);

        let mut archive = block_on(gate.open_save_writable("slot")).unwrap();
        archive.write_file("file", b"data".to_vec()).unwrap();
        block_on(archive.commit()).unwrap();

        assert!(block_on(gate.save_exists("slot")).unwrap());
        assert_eq!(block_on(gate.enumerate_save_names()).unwrap(), vec!["slot"]);
        let archive = block_on(gate.open_save_readable("slot")).unwrap();
        assert_eq!(archive.read_file("file").unwrap(), b"data");
        block_on(gate.delete_save("slot")).unwrap();
    }

    #[test]
    fn test_errors_are_unchanged() {
        let env = Environment::new();
        let gate = gate(&env);
        assert!(matches!(
            block_on(gate.open_save_readable("missing")),
            Err(SaveError::NotFound(_))
        ));
        assert!(matches!(
            block_on(gate.open_save_writable("../nope")),
            Err(SaveError::InvalidName { .. })
        ));
    }

    #[test]
    fn test_paused_waits_for_resume() {
        let env = Environment::new();
        let gate = Arc::new(gate(&env));
        env.pause();

        let done = Arc::new(AtomicBool::new(false));
        let worker = {
            let gate = gate.clone();
            let done = done.clone();
            thread::spawn(move || {
                let res = block_on(gate.save_exists("slot"));
                done.store(true, Ordering::SeqCst);
                res
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst));

        env.resume();
        let exists = worker.join().unwrap().unwrap();
        assert!(!exists);
        assert!(done.load(Ordering::SeqCst));
    }
}
