//! Log-backed message store.

use super::{MessageIndex, MessageLog, MessageStore};
use crate::error::{FeedError, Result};
use crate::types::{Message, MessageId, MessageInput};
use fs2::FileExt;
use parking_lot::Mutex;
use serde::Deserialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Store configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the store files.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// fsync the log every N appends (0 and 1 both mean every append).
    pub sync_interval: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./messages"),
            create_if_missing: true,
            sync_interval: MessageLog::DEFAULT_SYNC_INTERVAL,
        }
    }
}

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"CHF\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// Message store persisted to an append-only log on disk.
///
/// Holds an exclusive lock on its directory for as long as it is open.
pub struct LogStore {
    config: StoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    log: MessageLog,

    index: MessageIndex,

    /// Keeps log append and index update atomic with respect to each other.
    write_lock: Mutex<()>,
}

impl LogStore {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(FeedError::NotInitialized)
        }
    }

    /// Create a new store.
    pub fn create(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;
        Self::write_manifest(&config.path)?;

        let store = Self::load(config)?;
        tracing::info!(path = %store.config.path.display(), "created message store");
        Ok(store)
    }

    /// Open an existing store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::verify_manifest(&config.path)?;

        let store = Self::load(config)?;
        tracing::info!(
            path = %store.config.path.display(),
            messages = store.index.len(),
            head = ?store.index.head(),
            "opened message store"
        );
        Ok(store)
    }

    fn load(config: StoreConfig) -> Result<Self> {
        let lock_file = Self::acquire_lock(&config.path)?;

        let (log, entries) =
            MessageLog::open(config.path.join("messages.log"), config.sync_interval)?;
        let index = MessageIndex::from_entries(entries);

        Ok(Self {
            config,
            _lock_file: lock_file,
            log,
            index,
            write_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Get a message by id.
    pub fn get(&self, id: MessageId) -> Result<Option<Message>> {
        match self.index.get_offset(id) {
            Some(offset) => Ok(Some(self.log.read_at(offset)?)),
            None => Ok(None),
        }
    }

    fn write_manifest(path: &Path) -> Result<()> {
        use std::io::Write;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::create(manifest_path)?;

        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        use std::io::Read;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::open(manifest_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(FeedError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(FeedError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| FeedError::Locked)?;

        Ok(lock_file)
    }
}

impl MessageStore for LogStore {
    fn insert(&self, input: MessageInput) -> Result<Message> {
        let _lock = self.write_lock.lock();

        let (message, offset) = self.log.append(input)?;
        self.index.add(message.id, offset);

        Ok(message)
    }

    fn query_after(&self, cursor: Option<MessageId>, limit: Option<usize>) -> Result<Vec<Message>> {
        self.index
            .offsets_after(cursor, limit)?
            .into_iter()
            .map(|offset| self.log.read_at(offset))
            .collect()
    }

    fn head(&self) -> Option<MessageId> {
        self.index.head()
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn sync(&self) -> Result<()> {
        self.log.sync()
    }
}

impl Drop for LogStore {
    fn drop(&mut self) {
        // Best-effort sync on drop
        let _ = self.log.sync();
    }
}
