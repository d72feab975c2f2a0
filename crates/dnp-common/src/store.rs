//! Persisted key/value store.
//!
//! The store is an opaque, last-write-wins `get`/`set` service. Components
//! never touch it directly: they receive a [`Namespace`] and derive typed
//! [`Entry`] handles from it, so each one can only reach its own keys.

use std::fmt;
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{DnpError, DnpResult};

/// Raw key/value storage.
pub trait KvStore: Send + Sync + fmt::Debug {
    /// Read a value.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be read.
    fn get(&self, key: &str) -> DnpResult<Option<Value>>;

    /// Write a value, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing storage cannot be written.
    fn set(&self, key: &str, value: Value) -> DnpResult<()>;
}

/// Store backed by a single JSON document on disk.
///
/// The document is loaded once and every `set` rewrites it atomically
/// (write to a temporary file in the same directory, then rename).
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    data: Mutex<Map<String, Value>>,
}

impl JsonFileStore {
    /// Open the store, creating an empty one if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> DnpResult<Self> {
        let path = path.into();
        let data = if path.exists() {
            let json = std::fs::read_to_string(&path)?;
            if json.trim().is_empty() {
                Map::new()
            } else {
                serde_json::from_str(&json)?
            }
        } else {
            Map::new()
        };

        tracing::debug!(path = %path.display(), keys = data.len(), "Opened store");

        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &Map<String, Value>) -> DnpResult<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut file, data)?;
        file.flush()?;
        file.persist(&self.path).map_err(|e| DnpError::Store {
            message: format!("Failed to replace {}: {}", self.path.display(), e.error),
        })?;
        Ok(())
    }
}

impl KvStore for JsonFileStore {
    fn get(&self, key: &str) -> DnpResult<Option<Value>> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> DnpResult<()> {
        let mut data = self.data.lock();
        let mut next = data.clone();
        next.insert(key.to_string(), value);
        // Memory only changes once the file does
        self.persist(&next)?;
        *data = next;
        Ok(())
    }
}

/// Volatile store, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<Map<String, Value>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> DnpResult<Option<Value>> {
        Ok(self.data.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> DnpResult<()> {
        self.data.lock().insert(key.to_string(), value);
        Ok(())
    }
}

/// A prefix of the key space handed to one component.
#[derive(Debug, Clone)]
pub struct Namespace {
    store: Arc<dyn KvStore>,
    prefix: String,
}

impl Namespace {
    /// Scope `store` to keys starting with `prefix.`.
    pub fn new(store: Arc<dyn KvStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// Typed handle to one key of this namespace.
    #[must_use]
    pub fn entry<T>(&self, key: &str) -> Entry<T> {
        Entry {
            store: Arc::clone(&self.store),
            key: format!("{}.{}", self.prefix, key),
            _marker: PhantomData,
        }
    }
}

/// Typed handle to a single stored value.
pub struct Entry<T> {
    store: Arc<dyn KvStore>,
    key: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            key: self.key.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Entry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry").field("key", &self.key).finish()
    }
}

impl<T: Serialize + DeserializeOwned> Entry<T> {
    /// Full key in the store.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the value, if set.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the stored value has a different shape.
    pub fn get(&self) -> DnpResult<Option<T>> {
        match self.store.get(&self.key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Write the value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn set(&self, value: &T) -> DnpResult<()> {
        self.store.set(&self.key, serde_json::to_value(value)?)
    }
}

impl<T: Serialize + DeserializeOwned + Default> Entry<T> {
    /// Read the value, falling back to `T::default()` when unset.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the stored value has a different shape.
    pub fn get_or_default(&self) -> DnpResult<T> {
        Ok(self.get()?.unwrap_or_default())
    }
}
