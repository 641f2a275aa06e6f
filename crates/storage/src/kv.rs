//! Device-local cache
//!
//! A sled tree holding small string values under `scope:key` names, and
//! [`DeviceStore`], the device-scoped view the auth layer uses as its local
//! cache (cached role, pending registrations).

use std::path::Path;
use std::string::FromUtf8Error;
use std::sync::Arc;

use sled::Db;
use thiserror::Error;
use tracing::debug;

const SEPARATOR: char = ':';
const FLUSH_EVERY_MS: u64 = 500;

/// Key-value store error types
#[derive(Debug, Error)]
pub enum KvError {
    /// Sled database error
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    /// Stored bytes are not a string
    #[error("Stored value is not UTF-8: {0}")]
    Encoding(#[from] FromUtf8Error),

    /// Invalid key
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Result type for key-value operations
pub type Result<T> = std::result::Result<T, KvError>;

/// Sled-backed string store with scoped keys
pub struct KvStore {
    db: Db,
}

impl KvStore {
    /// Open (or create) the store at `path`
    ///
    /// Writes are flushed in the background every half second; call
    /// [`KvStore::flush`] before exit to make them durable.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::Config::new()
            .path(path)
            .flush_every_ms(Some(FLUSH_EVERY_MS))
            .open()?;
        debug!(path = %path.display(), "opened device cache");

        Ok(Self { db })
    }

    /// A store that lives only as long as the process (tests, offline mode)
    pub fn in_memory() -> Result<Self> {
        Ok(Self { db: sled::Config::new().temporary(true).open()? })
    }

    /// Read `key` within `scope`
    pub fn get(&self, scope: &str, key: &str) -> Result<Option<String>> {
        match self.db.get(scoped_key(scope, key)?)? {
            Some(bytes) => Ok(Some(String::from_utf8(bytes.to_vec())?)),
            None => Ok(None),
        }
    }

    /// Write `key` within `scope`, replacing any previous value
    pub fn set(&self, scope: &str, key: &str, value: &str) -> Result<()> {
        self.db.insert(scoped_key(scope, key)?, value.as_bytes())?;
        Ok(())
    }

    /// Remove `keys` within `scope`, returning how many existed
    pub fn remove(&self, scope: &str, keys: &[&str]) -> Result<usize> {
        let mut removed = 0;
        for key in keys {
            if self.db.remove(scoped_key(scope, key)?)?.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }
}

fn scoped_key(scope: &str, key: &str) -> Result<String> {
    if scope.is_empty() || key.is_empty() {
        return Err(KvError::InvalidKey(format!("{scope}{SEPARATOR}{key}")));
    }
    Ok(format!("{scope}{SEPARATOR}{key}"))
}

/// Fire-and-forget string cache consulted for fast start-up hints
///
/// Implementations persist locally; nothing in the auth flow waits on a
/// successful write.
pub trait LocalCache: Send + Sync {
    /// Store `value` under `key`, overwriting any previous value
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Read the value stored under `key`
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Remove every key in `keys`, returning how many existed
    fn remove(&self, keys: &[&str]) -> Result<usize>;
}

/// The device scope of a [`KvStore`]
pub struct DeviceStore {
    kv: Arc<KvStore>,
}

impl DeviceStore {
    const SCOPE: &'static str = "device";

    /// Create a new device store
    pub fn new(kv: Arc<KvStore>) -> Self {
        Self { kv }
    }
}

impl LocalCache for DeviceStore {
    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.kv.set(Self::SCOPE, key, value)
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        self.kv.get(Self::SCOPE, key)
    }

    fn remove(&self, keys: &[&str]) -> Result<usize> {
        self.kv.remove(Self::SCOPE, keys)
    }
}
