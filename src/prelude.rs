#[doc(inline)]
pub use crate::save::{
    Archive, ArchiveFlags, BlobClient, CloudBackend, DataStore, Environment, EnvironmentGate,
    MemoryBackend, PlatformBackend, SaveConfig, SaveError, SaveProvider, SaveResult, SaveService,
    StorageBackend, platform_saves,
};

#[cfg(not(target_arch = "wasm32"))]
#[doc(inline)]
pub use crate::save::LocalBackend;
