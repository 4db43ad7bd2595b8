//! Key-value stores holding encoded marker records, keyed by [Title].

use bytes::Bytes;
use hashbrown::HashMap;
use std::path::Path;
use std::sync::RwLock;
use tracing::debug;

use crate::error::MarkerError;
use crate::title::Title;

/// A store of encoded records.
///
/// Stores are single-writer: nothing makes an [Store::exists] check atomic with a subsequent
/// [Store::put].
pub trait Store: Send + Sync {
    /// Write `blob` at `title`, replacing any existing value.
    fn put(&self, title: &Title, blob: Bytes) -> Result<(), MarkerError>;

    /// Read the value at `title`, if any.
    fn get(&self, title: &Title) -> Result<Option<Bytes>, MarkerError>;

    /// Whether a value exists at `title`.
    fn exists(&self, title: &Title) -> Result<bool, MarkerError>;

    /// Every title in the store, sorted.
    fn titles(&self) -> Result<Vec<Title>, MarkerError>;

    /// Write several values.
    ///
    /// Implementations that can commit a batch atomically should do so. The default writes each
    /// value in turn.
    fn put_all(&self, entries: Vec<(Title, Bytes)>) -> Result<(), MarkerError> {
        for (title, blob) in entries {
            self.put(&title, blob)?;
        }
        Ok(())
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    /// A [hashbrown::HashMap] of records. A read-write lock synchronises access to the map.
    map: RwLock<HashMap<Title, Bytes>>,
}

impl MemoryStore {
    /// Return a new empty MemoryStore.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records in the store.
    pub fn len(&self) -> Result<usize, MarkerError> {
        Ok(self.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, MarkerError> {
        Ok(self.len()? == 0)
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<Title, Bytes>>, MarkerError> {
        self.map.read().map_err(|_| MarkerError::LockPoisoned {
            what: "memory store".to_string(),
        })
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<Title, Bytes>>, MarkerError> {
        self.map.write().map_err(|_| MarkerError::LockPoisoned {
            what: "memory store".to_string(),
        })
    }
}

impl Store for MemoryStore {
    fn put(&self, title: &Title, blob: Bytes) -> Result<(), MarkerError> {
        self.write()?.insert(title.clone(), blob);
        Ok(())
    }

    fn get(&self, title: &Title) -> Result<Option<Bytes>, MarkerError> {
        Ok(self.read()?.get(title).cloned())
    }

    fn exists(&self, title: &Title) -> Result<bool, MarkerError> {
        Ok(self.read()?.contains_key(title))
    }

    fn titles(&self) -> Result<Vec<Title>, MarkerError> {
        let mut titles: Vec<Title> = self.read()?.keys().cloned().collect();
        titles.sort();
        Ok(titles)
    }

    fn put_all(&self, entries: Vec<(Title, Bytes)>) -> Result<(), MarkerError> {
        // Hold the write lock for the whole batch.
        let mut map = self.write()?;
        for (title, blob) in entries {
            map.insert(title, blob);
        }
        Ok(())
    }
}

/// Persistent store backed by a [sled] database.
///
/// Keys are the string form of each title.
#[derive(Clone, Debug)]
pub struct SledStore {
    db: sled::Db,
}

impl SledStore {
    /// Open or create a store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, MarkerError> {
        debug!(path = %path.as_ref().display(), "opening sled store");
        Ok(SledStore {
            db: sled::open(path)?,
        })
    }

    /// Open a store that is removed when dropped.
    pub fn temporary() -> Result<Self, MarkerError> {
        Ok(SledStore {
            db: sled::Config::new().temporary(true).open()?,
        })
    }

    fn parse_key(key: &[u8]) -> Result<Title, MarkerError> {
        let key = std::str::from_utf8(key).map_err(|_| MarkerError::InvalidRecord {
            title: String::from_utf8_lossy(key).into_owned(),
            reason: "store key is not valid UTF-8".to_string(),
        })?;
        key.parse()
    }
}

impl Store for SledStore {
    fn put(&self, title: &Title, blob: Bytes) -> Result<(), MarkerError> {
        self.db.insert(title.to_string(), blob.as_ref())?;
        self.db.flush()?;
        Ok(())
    }

    fn get(&self, title: &Title) -> Result<Option<Bytes>, MarkerError> {
        let value = self.db.get(title.to_string())?;
        Ok(value.map(|value| Bytes::copy_from_slice(&value)))
    }

    fn exists(&self, title: &Title) -> Result<bool, MarkerError> {
        Ok(self.db.contains_key(title.to_string())?)
    }

    fn titles(&self) -> Result<Vec<Title>, MarkerError> {
        let mut titles = Vec::new();
        for key in self.db.iter().keys() {
            titles.push(Self::parse_key(&key?)?);
        }
        titles.sort();
        Ok(titles)
    }

    fn put_all(&self, entries: Vec<(Title, Bytes)>) -> Result<(), MarkerError> {
        let mut batch = sled::Batch::default();
        for (title, blob) in &entries {
            batch.insert(title.to_string().as_bytes(), blob.as_ref());
        }
        self.db.apply_batch(batch)?;
        self.db.flush()?;
        debug!(records = entries.len(), "committed batch");
        Ok(())
    }
}
