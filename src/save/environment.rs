use parking_lot::Mutex;
use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll, Waker},
};

#[derive(Default)]
struct GateState {
    paused: bool,
    wakers: Vec<Waker>,
}

#[derive(Default)]
struct EnvInner {
    gate: Mutex<GateState>,
    storage_full: AtomicBool,
}

/// Host environment signals consumed by the save system.
///
/// The host flips `paused` when the application is backgrounded, pending save
/// operations wait until it resumes. `storage_full` is checked by the backends
/// before persisting a commit. Clones share the same state.
#[derive(Clone, Default)]
pub struct Environment {
    inner: Arc<EnvInner>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.inner.gate.lock().paused = true;
        log::debug!("Save operations paused");
    }

    /// Resumes the environment waking up every pending operation
    pub fn resume(&self) {
        let wakers = {
            let mut gate = self.inner.gate.lock();
            gate.paused = false;
            std::mem::take(&mut gate.wakers)
        };

        log::debug!("Save operations resumed ({} waiting)", wakers.len());
        wakers.into_iter().for_each(Waker::wake);
    }

    #[inline]
    pub fn is_paused(&self) -> bool {
        self.inner.gate.lock().paused
    }

    /// Resolves immediately if not paused, otherwise once [`Environment::resume`] is called
    pub fn wait_resumed(&self) -> WaitResumed<'_> {
        WaitResumed { env: self }
    }

    pub fn set_storage_full(&self, full: bool) {
        self.inner.storage_full.store(full, Ordering::Release);
    }

    #[inline]
    pub fn is_storage_full(&self) -> bool {
        self.inner.storage_full.load(Ordering::Acquire)
    }
}

/// Future returned by [`Environment::wait_resumed`]
pub struct WaitResumed<'a> {
    env: &'a Environment,
}

impl Future for WaitResumed<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut gate = self.env.inner.gate.lock();
        if !gate.paused {
            return Poll::Ready(());
        }

        if !gate.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            gate.wakers.push(cx.waker().clone());
        }

        Poll::Pending
    }
}
