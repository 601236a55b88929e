use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::error::{SaveError, SaveResult};
use super::service::SaveProvider;

const RECORD_VERSION: u16 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Record {
    version: u16,
    ints: FxHashMap<String, i32>,
    floats: FxHashMap<String, f32>,
    strings: FxHashMap<String, String>,
}

impl Default for Record {
    fn default() -> Self {
        Self {
            version: RECORD_VERSION,
            ints: Default::default(),
            floats: Default::default(),
            strings: Default::default(),
        }
    }
}

fn encode(record: &Record) -> SaveResult<Vec<u8>> {
    bincode::serde::encode_to_vec(record, bincode::config::standard())
        .map_err(|e| SaveError::Serialization(format!("Data store serialization failed: {e}")))
}

fn decode(bytes: &[u8]) -> SaveResult<Record> {
    let (record, _): (Record, _) =
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| SaveError::Serialization(format!("Data store deserialization failed: {e}")))?;

    if record.version != RECORD_VERSION {
        return Err(SaveError::Serialization(format!(
            "Unknown data store version {}",
            record.version
        )));
    }

    Ok(record)
}

/// Typed key-value state (ints, floats and strings) kept as one file inside a save.
///
/// Values live in memory, nothing is stored until [`DataStore::save`] is called.
/// Each type has its own namespace, `set_int("a", 1)` and `set_string("a", "b")`
/// don't collide.
///
/// ```ignore
/// let mut store = DataStore::load(&service, "save-slot-1").await?;
/// store.set_int("cheese", 99);
/// store.save(&service, "save-slot-1").await?;
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataStore {
    record: Record,
}

impl DataStore {
    /// Name of the file inside the archive
    pub const FILE_NAME: &'static str = "data";

    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the store from `save_name`.
    ///
    /// A missing save or a missing file gives an empty store. A record that
    /// can't be decoded (unknown version included) fails with `Serialization`
    /// so it is never replaced by an empty one.
    pub async fn load<P: SaveProvider>(service: &P, save_name: &str) -> SaveResult<Self> {
        let archive = match service.open_save_readable(save_name).await {
            Ok(archive) => archive,
            Err(e) if e.is_not_found() => {
                log::debug!("No save '{save_name}', using an empty data store");
                return Ok(Self::default());
            }
            Err(e) => return Err(e),
        };

        let bytes = match archive.read_file(Self::FILE_NAME) {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                log::debug!("No data store in save '{save_name}', using an empty one");
                return Ok(Self::default());
            }
            Err(e) => return Err(e),
        };

        let record = decode(&bytes).inspect_err(|e| {
            log::warn!("Data store in save '{save_name}' can't be read: {e}");
        })?;
        Ok(Self { record })
    }

    /// Stores the whole record in `save_name`, other files in the save are kept
    pub async fn save<P: SaveProvider>(&self, service: &P, save_name: &str) -> SaveResult<()> {
        let bytes = encode(&self.record)?;
        let mut archive = service.open_save_writable(save_name).await?;
        archive.write_file(Self::FILE_NAME, bytes)?;
        archive.commit().await
    }

    #[inline]
    pub fn get_int(&self, key: &str, default: i32) -> i32 {
        self.record.ints.get(key).copied().unwrap_or(default)
    }

    #[inline]
    pub fn get_int_or_default(&self, key: &str) -> i32 {
        self.get_int(key, 0)
    }

    #[inline]
    pub fn get_float(&self, key: &str, default: f32) -> f32 {
        self.record.floats.get(key).copied().unwrap_or(default)
    }

    #[inline]
    pub fn get_float_or_default(&self, key: &str) -> f32 {
        self.get_float(key, 0.0)
    }

    #[inline]
    pub fn get_string<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.record
            .strings
            .get(key)
            .map(String::as_str)
            .unwrap_or(default)
    }

    #[inline]
    pub fn get_string_or_default(&self, key: &str) -> &str {
        self.get_string(key, "")
    }

    pub fn set_int(&mut self, key: &str, value: i32) {
        self.record.ints.insert(key.to_string(), value);
    }

    pub fn set_float(&mut self, key: &str, value: f32) {
        self.record.floats.insert(key.to_string(), value);
    }

    pub fn set_string(&mut self, key: &str, value: impl Into<String>) {
        self.record.strings.insert(key.to_string(), value.into());
    }

    pub fn remove_int(&mut self, key: &str) -> Option<i32> {
        self.record.ints.remove(key)
    }

    pub fn remove_float(&mut self, key: &str) -> Option<f32> {
        self.record.floats.remove(key)
    }

    pub fn remove_string(&mut self, key: &str) -> Option<String> {
        self.record.strings.remove(key)
    }

    pub fn clear(&mut self) {
        self.record.ints.clear();
        self.record.floats.clear();
        self.record.strings.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.record.ints.is_empty() && self.record.floats.is_empty() && self.record.strings.is_empty()
    }
}
