//! Packed container used by every backend to store one archive as a single blob.
//!
//! The layout is `[header][index][payload]`:
//! - header: `[magic:4][version:u16][flags:u16][checksum:u32][timestamp:u64][index_len:u32]`
//! - index: bincode list of `(name, offset, len)`, offsets relative to the payload
//! - payload: entries back to back, each one compressed on its own when
//!   [`ArchiveFlags::COMPRESSED`] is set so a single file can be read without
//!   touching the rest.
//!
//! All integers are little endian. The checksum covers timestamp, flags, index and payload.

use brotli::{CompressorWriter, Decompressor};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    io::{Read, Write},
    ops::Range,
    sync::Arc,
};

#[cfg(target_arch = "wasm32")]
use web_time::{SystemTime, UNIX_EPOCH};

#[cfg(not(target_arch = "wasm32"))]
use std::time::{SystemTime, UNIX_EPOCH};

use super::error::{SaveError, SaveResult};

const MAGIC: [u8; 4] = *b"SKAR";
const VERSION: u16 = 1;

/// header len is [magic:4][version:u16][flags:u16][checksum:u32][timestamp:u64][index_len:u32]
pub(crate) const HEADER_LEN: usize = 4 + 2 + 2 + 4 + 8 + 4;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ArchiveFlags: u16 {
        /// Compress each entry using brotli
        const COMPRESSED = 0b0000_0000_0000_0001;
        /// Fail on checksum validation instead of just logging it
        const PROTECTED  = 0b0000_0000_0000_0010;
    }
}

impl Default for ArchiveFlags {
    fn default() -> Self {
        ArchiveFlags::COMPRESSED | ArchiveFlags::PROTECTED
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexEntry {
    name: String,
    offset: u64,
    len: u64,
}

#[inline]
fn hash_data(timestamp: u64, flags: ArchiveFlags, index: &[u8], payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&timestamp.to_le_bytes());
    hasher.update(&flags.bits().to_le_bytes());
    hasher.update(index);
    hasher.update(payload);
    hasher.finalize()
}

#[inline]
fn now_secs() -> SaveResult<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|e| SaveError::Backend(e.to_string()))
}

fn compress(data: &[u8]) -> SaveResult<Vec<u8>> {
    // brotli support 1-11 levels of quality, but 5 seems to be the sweet spot for performance and size
    const COMPRESSION_QUALITY: u32 = 5;
    let mut compressor = CompressorWriter::new(Vec::new(), 4096, COMPRESSION_QUALITY, 22);
    compressor
        .write_all(data)
        .map_err(|e| SaveError::Serialization(format!("Compression failed: {e}")))?;
    Ok(compressor.into_inner())
}

/// Serializes the whole file mapping into a single container blob
pub(crate) fn encode(files: &BTreeMap<String, Vec<u8>>, flags: ArchiveFlags) -> SaveResult<Vec<u8>> {
    let mut index = Vec::with_capacity(files.len());
    let mut payload = Vec::new();
    for (name, data) in files {
        let offset = payload.len();
        if flags.contains(ArchiveFlags::COMPRESSED) {
            payload.extend_from_slice(&compress(data)?);
        } else {
            payload.extend_from_slice(data);
        }

        index.push(IndexEntry {
            name: name.clone(),
            offset: offset as u64,
            len: (payload.len() - offset) as u64,
        });
    }

    let index = bincode::serde::encode_to_vec(&index, bincode::config::standard())
        .map_err(|e| SaveError::Serialization(format!("Index serialization failed: {e}")))?;
    let index_len = u32::try_from(index.len())
        .map_err(|_| SaveError::Serialization("Archive index too big".to_string()))?;

    let timestamp = now_secs()?;
    let checksum = hash_data(timestamp, flags, &index, &payload);

    let mut buf = Vec::with_capacity(HEADER_LEN + index.len() + payload.len());
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.extend_from_slice(&flags.bits().to_le_bytes());
    buf.extend_from_slice(&checksum.to_le_bytes());
    buf.extend_from_slice(&timestamp.to_le_bytes());
    buf.extend_from_slice(&index_len.to_le_bytes());
    buf.extend_from_slice(&index);
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// A parsed container, entries are decoded lazily on read
#[derive(Debug, Clone)]
pub(crate) struct Container {
    name: String,
    bytes: Arc<[u8]>,
    entries: BTreeMap<String, Range<usize>>,
    flags: ArchiveFlags,
    timestamp: u64,
}

impl Container {
    /// Validates the header and index of `bytes`, `name` is only used for errors
    pub fn parse(name: &str, bytes: Arc<[u8]>) -> SaveResult<Self> {
        let raw = &bytes[..];
        if raw.len() < HEADER_LEN {
            return Err(SaveError::corrupted(
                name,
                format!(
                    "Container too small: {} bytes (need at least {HEADER_LEN})",
                    raw.len()
                ),
            ));
        }

        if raw[0..4] != MAGIC {
            return Err(SaveError::corrupted(name, "Unknown container format"));
        }

        let version = u16::from_le_bytes([raw[4], raw[5]]);
        if version != VERSION {
            return Err(SaveError::corrupted(
                name,
                format!("Unsupported container version {version}"),
            ));
        }

        let flag_bits = u16::from_le_bytes([raw[6], raw[7]]);
        let flags = ArchiveFlags::from_bits(flag_bits)
            .ok_or_else(|| SaveError::corrupted(name, format!("Unknown flags: {flag_bits}")))?;

        let checksum = raw[8..12]
            .try_into()
            .map(u32::from_le_bytes)
            .map_err(|_| SaveError::corrupted(name, "Checksum slice has wrong length"))?;

        let timestamp = raw[12..20]
            .try_into()
            .map(u64::from_le_bytes)
            .map_err(|_| SaveError::corrupted(name, "Timestamp slice has wrong length"))?;

        let index_len = raw[20..24]
            .try_into()
            .map(u32::from_le_bytes)
            .map_err(|_| SaveError::corrupted(name, "Index length slice has wrong length"))?;

        let index_end = HEADER_LEN
            .checked_add(index_len as usize)
            .filter(|end| *end <= raw.len())
            .ok_or_else(|| SaveError::corrupted(name, "Index out of bounds"))?;

        let (index, payload) = (&raw[HEADER_LEN..index_end], &raw[index_end..]);

        // a bad checksum means the file was altered or corrupted, protected
        // containers refuse to load, the rest just warn and try to go on
        if hash_data(timestamp, flags, index, payload) != checksum {
            log::warn!("Save container '{name}' altered or corrupted.");
            if flags.contains(ArchiveFlags::PROTECTED) {
                return Err(SaveError::corrupted(name, "Checksum mismatch"));
            }
        }

        let (list, _): (Vec<IndexEntry>, _) =
            bincode::serde::decode_from_slice(index, bincode::config::standard())
                .map_err(|e| SaveError::corrupted(name, format!("Invalid index: {e}")))?;

        let mut entries = BTreeMap::new();
        for entry in list {
            let range = usize::try_from(entry.offset)
                .ok()
                .zip(usize::try_from(entry.len).ok())
                .and_then(|(offset, len)| {
                    let start = index_end.checked_add(offset)?;
                    let end = start.checked_add(len)?;
                    (end <= raw.len()).then_some(start..end)
                })
                .ok_or_else(|| {
                    SaveError::corrupted(name, format!("Entry '{}' out of bounds", entry.name))
                })?;

            if entries.insert(entry.name, range).is_some() {
                return Err(SaveError::corrupted(name, "Duplicated entry"));
            }
        }

        Ok(Self {
            name: name.to_string(),
            bytes,
            entries,
            flags,
            timestamp,
        })
    }

    #[inline]
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    #[inline]
    pub fn flags(&self) -> ArchiveFlags {
        self.flags
    }

    #[inline]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Decodes a single entry
    pub fn read(&self, file: &str) -> SaveResult<Vec<u8>> {
        let range = self
            .entries
            .get(file)
            .ok_or_else(|| SaveError::NotFound(format!("{}:{file}", self.name)))?;

        let raw = &self.bytes[range.clone()];
        if !self.flags.contains(ArchiveFlags::COMPRESSED) {
            return Ok(raw.to_vec());
        }

        let mut data = vec![];
        Decompressor::new(raw, 4096)
            .read_to_end(&mut data)
            .map_err(|e| {
                SaveError::corrupted(&self.name, format!("Decompression of '{file}' failed: {e}"))
            })?;
        Ok(data)
    }

    /// Decodes every entry, used to seed writable archives
    pub fn decode_all(&self) -> SaveResult<BTreeMap<String, Vec<u8>>> {
        self.entries
            .keys()
            .map(|file| Ok((file.clone(), self.read(file)?)))
            .collect()
    }
}
