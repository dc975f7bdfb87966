//! Embedded key-value store and the locking interface the gateway reads it through.
//!
//! The gateway only ever sees the store through [`Store`], [`LockedStore`]
//! and [`OpenKey`]:
//! - `Store::lock` takes the single process-wide lock; dropping the guard
//!   releases it
//! - `LockedStore::open_for_read` opens a key while the lock is held
//! - `OpenKey::key_type` / `OpenKey::read_bytes` inspect the opened key;
//!   dropping it closes the key
//!
//! [`MemoryStore`] is the in-process implementation. It keeps Redis-style
//! typed values so that non-string keys can coexist with the byte strings
//! the gateway serves.

use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, trace};

/// Kind of value stored under a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    /// Opaque byte string, the only kind the gateway serves.
    String,
    List,
    Set,
    Hash,
}

/// A store guarded by one process-wide lock.
pub trait Store: Send + Sync {
    type Guard<'a>: LockedStore
    where
        Self: 'a;

    /// Acquire the store lock. It is released when the guard is dropped.
    fn lock(&self) -> Self::Guard<'_>;
}

/// Operations available while the store lock is held.
pub trait LockedStore {
    type Key<'k>: OpenKey
    where
        Self: 'k;

    /// Open a key for reading. `None` when the key does not exist.
    fn open_for_read(&self, key: &[u8]) -> Option<Self::Key<'_>>;
}

/// A key opened under the store lock.
pub trait OpenKey {
    fn key_type(&self) -> KeyType;

    /// Read view of the raw bytes of a string value; `None` for other types.
    ///
    /// The returned `Bytes` shares the stored buffer, so it stays valid after
    /// the key is closed and the lock released.
    fn read_bytes(&self) -> Option<Bytes>;
}

/// Errors returned by the producer API.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("operation against a key holding the wrong kind of value")]
    WrongType,
}

/// A stored value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(Bytes),
    List(VecDeque<Bytes>),
    Set(HashSet<Bytes>),
    Hash(HashMap<Bytes, Bytes>),
}

impl Value {
    fn key_type(&self) -> KeyType {
        match self {
            Value::String(_) => KeyType::String,
            Value::List(_) => KeyType::List,
            Value::Set(_) => KeyType::Set,
            Value::Hash(_) => KeyType::Hash,
        }
    }
}

/// A value together with its optional expiry.
#[derive(Debug, Clone)]
pub struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Check if this entry has expired
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| Instant::now() >= expires_at)
    }
}

impl OpenKey for &Entry {
    fn key_type(&self) -> KeyType {
        self.value.key_type()
    }

    fn read_bytes(&self) -> Option<Bytes> {
        match &self.value {
            Value::String(bytes) => Some(bytes.clone()),
            _ => None,
        }
    }
}

/// Thread-safe in-memory store with a single global lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<Bytes, Entry>>,
}

/// Held store lock for [`MemoryStore`].
pub struct MemoryGuard<'a> {
    data: MutexGuard<'a, HashMap<Bytes, Entry>>,
}

impl Store for MemoryStore {
    type Guard<'a> = MemoryGuard<'a>;

    fn lock(&self) -> MemoryGuard<'_> {
        MemoryGuard { data: self.data() }
    }
}

impl LockedStore for MemoryGuard<'_> {
    type Key<'k>
        = &'k Entry
    where
        Self: 'k;

    fn open_for_read(&self, key: &[u8]) -> Option<&Entry> {
        self.data.get(key).filter(|entry| !entry.is_expired())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock leaves the map itself consistent.
    fn data(&self) -> MutexGuard<'_, HashMap<Bytes, Entry>> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store a byte string, replacing whatever the key held.
    pub fn set(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) {
        let key = key.into();
        trace!(key = ?key, "String stored");
        self.data()
            .insert(key, Entry::new(Value::String(value.into())));
    }

    /// Store a byte string that disappears after `ttl`.
    pub fn set_with_ttl(&self, key: impl Into<Bytes>, value: impl Into<Bytes>, ttl: Duration) {
        let entry = Entry {
            value: Value::String(value.into()),
            expires_at: Some(Instant::now() + ttl),
        };
        self.data().insert(key.into(), entry);
    }

    /// Append to the list at `key`, creating it if needed. Returns the new length.
    pub fn rpush(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Result<usize, StoreError> {
        let mut data = self.data();
        let entry = live_entry(&mut data, key.into(), || Value::List(VecDeque::new()));
        match &mut entry.value {
            Value::List(list) => {
                list.push_back(value.into());
                Ok(list.len())
            }
            _ => Err(StoreError::WrongType),
        }
    }

    /// Add a member to the set at `key`. Returns whether it was newly added.
    pub fn sadd(&self, key: impl Into<Bytes>, member: impl Into<Bytes>) -> Result<bool, StoreError> {
        let mut data = self.data();
        let entry = live_entry(&mut data, key.into(), || Value::Set(HashSet::new()));
        match &mut entry.value {
            Value::Set(set) => Ok(set.insert(member.into())),
            _ => Err(StoreError::WrongType),
        }
    }

    /// Set a field of the hash at `key`. Returns whether the field is new.
    pub fn hset(
        &self,
        key: impl Into<Bytes>,
        field: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Result<bool, StoreError> {
        let mut data = self.data();
        let entry = live_entry(&mut data, key.into(), || Value::Hash(HashMap::new()));
        match &mut entry.value {
            Value::Hash(hash) => Ok(hash.insert(field.into(), value.into()).is_none()),
            _ => Err(StoreError::WrongType),
        }
    }

    /// Remove a key. Returns whether a live key was removed.
    pub fn delete(&self, key: &[u8]) -> bool {
        self.data()
            .remove(key)
            .is_some_and(|entry| !entry.is_expired())
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let mut data = self.data();
        let before = data.len();
        data.retain(|_, entry| !entry.is_expired());
        let removed = before - data.len();

        if removed > 0 {
            debug!(removed, remaining = data.len(), "Cleaned up expired keys");
        }
        removed
    }

    /// Number of keys, expired ones included until the next cleanup or touch.
    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Load every regular file below `dir` as a string value.
    ///
    /// The key is `/` followed by the file's path relative to `dir` with `/`
    /// separators, so `GET /<relative path>` serves the file.
    pub fn preload_dir(&self, dir: &Path) -> io::Result<usize> {
        let mut loaded = 0;
        let mut pending = vec![dir.to_path_buf()];

        while let Some(current) = pending.pop() {
            for dir_entry in fs::read_dir(&current)? {
                let path = dir_entry?.path();
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                if !path.is_file() {
                    continue;
                }

                let relative = path
                    .strip_prefix(dir)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                let mut key = String::new();
                for component in relative.components() {
                    key.push('/');
                    key.push_str(&component.as_os_str().to_string_lossy());
                }

                let contents = fs::read(&path)?;
                debug!(key = %key, bytes = contents.len(), "Preloaded file");
                self.set(key, contents);
                loaded += 1;
            }
        }

        info!(dir = %dir.display(), keys = loaded, "Store preloaded");
        Ok(loaded)
    }
}

/// Run [`MemoryStore::cleanup_expired`] every `interval` on a background thread.
///
/// The thread holds only a weak reference and exits once the store is dropped.
pub fn start_expiry_sweeper(store: &Arc<MemoryStore>, interval: Duration) -> io::Result<JoinHandle<()>> {
    let store: Weak<MemoryStore> = Arc::downgrade(store);
    thread::Builder::new()
        .name("expiry-sweeper".to_string())
        .spawn(move || loop {
            thread::sleep(interval);
            let Some(store) = store.upgrade() else {
                debug!("Store dropped, expiry sweeper exiting");
                break;
            };
            store.cleanup_expired();
        })
}

/// Entry for `key`, replacing an expired one and creating it with `init` when missing.
fn live_entry(
    data: &mut HashMap<Bytes, Entry>,
    key: Bytes,
    init: impl FnOnce() -> Value,
) -> &mut Entry {
    if data.get(&key).is_some_and(Entry::is_expired) {
        data.remove(&key);
    }
    data.entry(key).or_insert_with(|| Entry::new(init()))
}
