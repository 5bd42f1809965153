//! Store lifecycle and the adapter-facing boundary
//!
//! This is the surface the FUSE/NBD/GUI front ends call: create or open a
//! store with a passphrase, then read and write fixed-size blocks. Everything
//! else (log format, compaction, key handling) stays behind it.
//!
//! A store directory holds the chunk files plus two companions: `salt`, the
//! random KDF salt, and `meta`, an authenticated envelope recording the
//! logical block count and geometry. `meta` is sealed with its own derived
//! key and read exactly once at open.

use std::fmt;
use std::fs;
use std::path::Path;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::aead::BlockCipher;
use crate::error::{Result, VaultError};
use crate::keys::{generate_salt, StoreKeys, SALT_LEN};
use crate::layout::{Geometry, TAG_SIZE};
use crate::map::BlockMap;

const SALT_FILE: &str = "salt";
const META_FILE: &str = "meta";
/// The metadata key seals exactly one message, so a fixed IV is safe.
const META_IV: u64 = 0;

pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Metadata {
    format_version: u32,
    logical_blocks: u32,
    geometry: Geometry,
}

/// Parameters for a new store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Number of logical blocks the device exposes. Fixed for the life of
    /// the store.
    pub logical_blocks: u32,
    pub geometry: Geometry,
}

impl StoreConfig {
    pub fn new(logical_blocks: u32) -> Self {
        StoreConfig {
            logical_blocks,
            geometry: Geometry::default(),
        }
    }
}

/// An open encrypted block device.
///
/// Operations take `&self`; the engine underneath is single-writer and is
/// serialized with a mutex so adapters can share one handle. Dropping the
/// store closes it.
pub struct Store {
    map: Mutex<BlockMap>,
    logical_blocks: u32,
    geometry: Geometry,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("logical_blocks", &self.logical_blocks)
            .field("geometry", &self.geometry)
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Create a new store in `dir` and open it.
    pub fn create<P: AsRef<Path>>(dir: P, passphrase: &str, config: StoreConfig) -> Result<Self> {
        let dir = dir.as_ref();
        // Checked before anything touches disk; the indirection table needs
        // a retention window of twice the logical size in u32 space.
        if config.logical_blocks == 0 || config.logical_blocks > u32::MAX / 2 {
            return Err(VaultError::Consistency(format!(
                "logical block count {} out of range (1..={})",
                config.logical_blocks,
                u32::MAX / 2
            )));
        }
        fs::create_dir_all(dir)?;
        if dir.join(SALT_FILE).exists() || dir.join(META_FILE).exists() {
            return Err(VaultError::Consistency(format!(
                "store already exists in {}",
                dir.display()
            )));
        }

        let salt = generate_salt();
        let keys = StoreKeys::derive(passphrase, &salt)?;
        fs::write(dir.join(SALT_FILE), salt)?;

        let meta = Metadata {
            format_version: FORMAT_VERSION,
            logical_blocks: config.logical_blocks,
            geometry: config.geometry,
        };
        let mut body = serde_json::to_vec(&meta)?;
        let tag = BlockCipher::new(keys.meta()).seal(META_IV, &mut body)?;
        let mut envelope = Vec::with_capacity(TAG_SIZE as usize + body.len());
        envelope.extend_from_slice(&tag);
        envelope.extend_from_slice(&body);
        fs::write(dir.join(META_FILE), envelope)?;

        tracing::info!(
            dir = %dir.display(),
            blocks = config.logical_blocks,
            "created new store"
        );
        Self::attach(dir, &keys, meta)
    }

    /// Open an existing store.
    pub fn open<P: AsRef<Path>>(dir: P, passphrase: &str) -> Result<Self> {
        let dir = dir.as_ref();

        let salt_bytes = fs::read(dir.join(SALT_FILE))?;
        let salt: [u8; SALT_LEN] = salt_bytes.as_slice().try_into().map_err(|_| {
            VaultError::Consistency(format!(
                "salt file is {} bytes, expected {SALT_LEN}",
                salt_bytes.len()
            ))
        })?;
        let keys = StoreKeys::derive(passphrase, &salt)?;

        let envelope = fs::read(dir.join(META_FILE))?;
        if envelope.len() <= TAG_SIZE as usize {
            return Err(VaultError::Consistency(
                "metadata file is too short".to_string(),
            ));
        }
        let (tag, body) = envelope.split_at(TAG_SIZE as usize);
        let mut body = body.to_vec();
        BlockCipher::new(keys.meta())
            .open(META_IV, &mut body, tag)
            .map_err(|_| VaultError::Auth("wrong passphrase or tampered metadata"))?;
        let meta: Metadata = serde_json::from_slice(&body)?;
        if meta.format_version != FORMAT_VERSION {
            return Err(VaultError::Consistency(format!(
                "unsupported format version {}",
                meta.format_version
            )));
        }
        Self::attach(dir, &keys, meta)
    }

    fn attach(dir: &Path, keys: &StoreKeys, meta: Metadata) -> Result<Self> {
        let map = BlockMap::open(dir, meta.geometry, keys.data(), meta.logical_blocks)?;
        Ok(Store {
            map: Mutex::new(map),
            logical_blocks: meta.logical_blocks,
            geometry: meta.geometry,
        })
    }

    /// Device size in bytes.
    pub fn size(&self) -> u64 {
        self.logical_blocks as u64 * self.geometry.bytes_per_block
    }

    pub fn logical_blocks(&self) -> u32 {
        self.logical_blocks
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Read one block. Never-written blocks read as zeroes.
    pub fn read_block(&self, block: u32) -> Result<Bytes> {
        self.map.lock().read(block)
    }

    /// Write one block of exactly `geometry().bytes_per_block` bytes.
    pub fn write_block(&self, block: u32, data: &[u8]) -> Result<()> {
        self.map.lock().write(block, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config() -> StoreConfig {
        StoreConfig {
            logical_blocks: 8,
            geometry: Geometry {
                bytes_per_block: 64,
                blocks_per_region: 4,
                regions_per_chunk: 2,
            },
        }
    }

    #[test]
    fn create_then_open_round_trip() {
        let dir = TempDir::new().unwrap();
        let data = vec![0x5a; 64];
        {
            let store = Store::create(dir.path(), "hunter2", config()).unwrap();
            assert_eq!(store.size(), 8 * 64);
            store.write_block(3, &data).unwrap();
            assert_eq!(&store.read_block(3).unwrap()[..], &data[..]);
        }
        let store = Store::open(dir.path(), "hunter2").unwrap();
        assert_eq!(store.logical_blocks(), 8);
        assert_eq!(&store.read_block(3).unwrap()[..], &data[..]);
        assert_eq!(&store.read_block(0).unwrap()[..], &[0u8; 64][..]);
    }

    #[test]
    fn wrong_passphrase_is_rejected() {
        let dir = TempDir::new().unwrap();
        drop(Store::create(dir.path(), "right", config()).unwrap());
        let err = Store::open(dir.path(), "wrong").unwrap_err();
        assert!(matches!(err, VaultError::Auth(_)));
    }

    #[test]
    fn create_over_existing_store_is_refused() {
        let dir = TempDir::new().unwrap();
        drop(Store::create(dir.path(), "pass", config()).unwrap());
        let err = Store::create(dir.path(), "pass", config()).unwrap_err();
        assert!(matches!(err, VaultError::Consistency(_)));
    }

    #[test]
    fn tampered_metadata_is_rejected() {
        let dir = TempDir::new().unwrap();
        drop(Store::create(dir.path(), "pass", config()).unwrap());

        let meta_path = dir.path().join("meta");
        let mut bytes = fs::read(&meta_path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        fs::write(&meta_path, bytes).unwrap();

        let err = Store::open(dir.path(), "pass").unwrap_err();
        assert!(matches!(err, VaultError::Auth(_)));
    }

    #[test]
    fn zero_blocks_is_refused() {
        let dir = TempDir::new().unwrap();
        let err = Store::create(dir.path(), "pass", StoreConfig::new(0)).unwrap_err();
        assert!(matches!(err, VaultError::Consistency(_)));
    }

    #[test]
    fn oversized_device_is_refused() {
        let dir = TempDir::new().unwrap();
        let err = Store::create(dir.path(), "pass", StoreConfig::new(u32::MAX)).unwrap_err();
        assert!(matches!(err, VaultError::Consistency(_)));
        // Refused before any companion file was written.
        assert!(!dir.path().join("salt").exists());
        assert!(!dir.path().join("meta").exists());
    }
}
