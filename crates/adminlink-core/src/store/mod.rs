//! Persistent key-value storage.
//!
//! Backends are fallible (`StorageBackend`); everything above them goes through
//! `KvStore`, which never fails. A faulting backend degrades to "nothing stored":
//! reads miss, writes and removals are dropped, and the fault is logged.

mod file;
mod memory;
mod os_keyring;

use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

pub use self::file::FileBackend;
pub use self::memory::MemoryBackend;
pub use self::os_keyring::KeyringBackend;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage quota exceeded for key {0}")]
    QuotaExceeded(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Keyring error: {0}")]
    Keyring(#[from] ::keyring::Error),
}

/// A persistent storage medium.
pub trait StorageBackend: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Backend that refuses every operation, standing in for disabled storage.
struct UnavailableBackend;

impl StorageBackend for UnavailableBackend {
    fn read(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Err(StorageError::Unavailable("storage disabled".to_string()))
    }

    fn write(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("storage disabled".to_string()))
    }

    fn delete(&self, _key: &str) -> Result<(), StorageError> {
        Err(StorageError::Unavailable("storage disabled".to_string()))
    }
}

/// Infallible facade over a storage backend.
/// Clone is cheap - the backend is shared.
#[derive(Clone)]
pub struct KvStore {
    backend: Arc<dyn StorageBackend>,
}

impl KvStore {
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn from_arc(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Ephemeral in-process store.
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// Store whose medium is unavailable: every read misses, every write is dropped.
    pub fn disabled() -> Self {
        Self::new(UnavailableBackend)
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match self.backend.read(key) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = key, error = %e, "Storage read failed, treating as missing");
                None
            }
        }
    }

    pub fn set(&self, key: &str, value: &str) {
        if let Err(e) = self.backend.write(key, value) {
            warn!(key = key, error = %e, "Storage write failed, value not persisted");
        }
    }

    pub fn remove(&self, key: &str) {
        if let Err(e) = self.backend.delete(key) {
            warn!(key = key, error = %e, "Storage remove failed");
        }
    }
}

impl std::fmt::Debug for KvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvStore").finish_non_exhaustive()
    }
}
