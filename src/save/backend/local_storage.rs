#![cfg(target_arch = "wasm32")]

use base64::{Engine, engine::general_purpose::STANDARD};
use std::future::{Future, ready};
use web_sys::Storage;

use super::cloud::{BlobClient, CloudBackend};
use crate::save::{
    config::SaveConfig,
    error::{SaveError, SaveResult},
};

/// Browser `localStorage` used as blob store, values are kept as base64.
///
/// Browsers reject `setItem` when the origin quota is exhausted, that's
/// reported as `StorageFull` and the previous value stays in place.
pub struct WebStorageBlobs;

impl CloudBackend<WebStorageBlobs> {
    /// Uses the app name as prefix for every key
    pub fn from_config(config: &SaveConfig) -> SaveResult<Self> {
        Ok(CloudBackend::new(WebStorageBlobs, config.app_name()).with_flags(config.archive_flags()))
    }
}

impl BlobClient for WebStorageBlobs {
    fn list(&self, prefix: &str) -> impl Future<Output = SaveResult<Vec<String>>> + Send {
        ready(list_keys(prefix))
    }

    fn download(&self, key: &str) -> impl Future<Output = SaveResult<Option<Vec<u8>>>> + Send {
        ready(read_key(key))
    }

    fn upload(&self, key: &str, bytes: Vec<u8>) -> impl Future<Output = SaveResult<()>> + Send {
        ready(write_key(key, &bytes))
    }

    fn remove(&self, key: &str) -> impl Future<Output = SaveResult<()>> + Send {
        ready(remove_key(key))
    }
}

fn local_storage() -> SaveResult<Storage> {
    web_sys::window()
        .ok_or_else(|| SaveError::Backend("No window".to_string()))?
        .local_storage()
        .map_err(|_| SaveError::Backend("Cannot access LocalStorage".to_string()))?
        .ok_or_else(|| SaveError::Backend("LocalStorage unavailable".to_string()))
}

fn list_keys(prefix: &str) -> SaveResult<Vec<String>> {
    log::trace!("list '{prefix}'");
    let s = local_storage()?;
    let len = s
        .length()
        .map_err(|_| SaveError::Backend("LocalStorage length failed".to_string()))?;

    let mut out = Vec::new();
    for i in 0..len {
        let key = s
            .key(i)
            .map_err(|_| SaveError::Backend("LocalStorage key failed".to_string()))?;
        if let Some(key) = key
            && key.starts_with(prefix)
        {
            out.push(key);
        }
    }
    Ok(out)
}

fn read_key(key: &str) -> SaveResult<Option<Vec<u8>>> {
    log::trace!("read '{key}'");
    let s = local_storage()?;
    let Some(text) = s
        .get_item(key)
        .map_err(|_| SaveError::Backend("LocalStorage get_item failed".to_string()))?
    else {
        return Ok(None);
    };

    STANDARD
        .decode(text)
        .map(Some)
        .map_err(|e| SaveError::corrupted(key, format!("Decode error: {e}")))
}

fn write_key(key: &str, bytes: &[u8]) -> SaveResult<()> {
    log::trace!("write '{key}'");
    let s = local_storage()?;
    s.set_item(key, &STANDARD.encode(bytes))
        .map_err(|_| SaveError::StorageFull)
}

fn remove_key(key: &str) -> SaveResult<()> {
    log::trace!("remove '{key}'");
    let s = local_storage()?;
    s.remove_item(key)
        .map_err(|_| SaveError::Backend("LocalStorage remove_item failed".to_string()))
}
