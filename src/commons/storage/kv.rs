use std::fmt;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use url::Url;

use crate::commons::error::IrrdIoError;
use crate::commons::storage::{Disk, Key, Memory, ParseSegmentError, Scope};

pub type StorageResult<T> = Result<T, KeyValueError>;

//------------ KeyValueStore -------------------------------------------------

#[derive(Debug)]
pub enum KeyValueStore {
    Memory(Memory),
    Disk(Disk),
}

// # Construct and high level functions.
impl KeyValueStore {
    /// Creates a new KeyValueStore for the given storage URI and namespace.
    ///
    /// Supported schemes are `local://<path>` and `memory://<name>`.
    pub fn create(storage_uri: &Url, namespace: &str) -> StorageResult<Self> {
        match storage_uri.scheme() {
            "local" => {
                let path = format!("{}{}", storage_uri.host_str().unwrap_or_default(), storage_uri.path());
                Ok(KeyValueStore::Disk(Disk::new(&path, namespace)?))
            }
            "memory" => Ok(KeyValueStore::Memory(Memory::new(storage_uri.host_str(), namespace))),
            scheme => Err(KeyValueError::UnknownScheme(scheme.to_owned())),
        }
    }

    /// Returns true if this KeyValueStore (with this namespace) has any entries.
    pub fn is_empty(&self) -> StorageResult<bool> {
        self.execute(&Scope::global(), |kv| kv.is_empty())
    }

    /// Wipe the complete store. Use with care.
    pub fn wipe(&self) -> StorageResult<()> {
        self.execute(&Scope::global(), |kv| kv.clear())
    }

    /// Execute one or more operations while holding the lock for the
    /// given scope.
    ///
    /// The closure needs to return a `StorageResult<T>`, so that the
    /// caller can use the ? operator on any kv call within it.
    pub fn execute<F, T>(&self, scope: &Scope, op: F) -> StorageResult<T>
    where
        F: FnOnce(&KeyValueStoreDispatcher) -> StorageResult<T>,
    {
        match self {
            KeyValueStore::Memory(memory) => memory.execute(scope, op),
            KeyValueStore::Disk(disk) => disk.execute(scope, op),
        }
    }
}

// # Keys and Values
impl KeyValueStore {
    /// Stores a key value pair, serialized as json, overwrite existing
    pub fn store<V: Serialize>(&self, key: &Key, value: &V) -> StorageResult<()> {
        self.execute(key.scope(), |kv| kv.store(key, serde_json::to_value(value)?))
    }

    /// Gets a value for a key, returns an error if the value cannot be
    /// deserialized, returns None if it cannot be found.
    pub fn get<V: DeserializeOwned>(&self, key: &Key) -> StorageResult<Option<V>> {
        self.execute(key.scope(), |kv| kv.get_json(key))
    }

    /// Returns whether a key exists
    pub fn has(&self, key: &Key) -> StorageResult<bool> {
        self.execute(key.scope(), |kv| kv.has(key))
    }

    /// Delete a key-value pair
    pub fn drop_key(&self, key: &Key) -> StorageResult<()> {
        self.execute(key.scope(), |kv| kv.delete(key))
    }

    /// Returns all keys directly under the given scope.
    pub fn keys(&self, scope: &Scope) -> StorageResult<Vec<Key>> {
        self.execute(scope, |kv| kv.keys(scope))
    }

    /// Delete a scope and everything under it.
    pub fn drop_scope(&self, scope: &Scope) -> StorageResult<()> {
        self.execute(scope, |kv| kv.delete_scope(scope))
    }
}

impl fmt::Display for KeyValueStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValueStore::Memory(memory) => memory.fmt(f),
            KeyValueStore::Disk(disk) => disk.fmt(f),
        }
    }
}

//------------ KeyValueStoreDispatcher ---------------------------------------

/// Gives access to the backend while a scope lock is held.
#[derive(Debug)]
pub enum KeyValueStoreDispatcher<'a> {
    Memory(&'a Memory),
    Disk(&'a Disk),
}

impl KeyValueStoreDispatcher<'_> {
    pub fn is_empty(&self) -> StorageResult<bool> {
        match self {
            KeyValueStoreDispatcher::Memory(m) => m.is_empty(),
            KeyValueStoreDispatcher::Disk(d) => d.is_empty(),
        }
    }

    pub fn has(&self, key: &Key) -> StorageResult<bool> {
        match self {
            KeyValueStoreDispatcher::Memory(m) => m.has(key),
            KeyValueStoreDispatcher::Disk(d) => d.has(key),
        }
    }

    pub fn get(&self, key: &Key) -> StorageResult<Option<Value>> {
        match self {
            KeyValueStoreDispatcher::Memory(m) => m.get(key),
            KeyValueStoreDispatcher::Disk(d) => d.get(key),
        }
    }

    pub fn get_json<V: DeserializeOwned>(&self, key: &Key) -> StorageResult<Option<V>> {
        match self.get(key)? {
            Some(value) => {
                trace!("got value for key: {key}");
                Ok(Some(serde_json::from_value(value)?))
            }
            None => {
                trace!("got nothing for key: {key}");
                Ok(None)
            }
        }
    }

    /// Returns the keys directly under the given scope, sorted.
    pub fn keys(&self, scope: &Scope) -> StorageResult<Vec<Key>> {
        let mut keys = match self {
            KeyValueStoreDispatcher::Memory(m) => m.list_keys(scope)?,
            KeyValueStoreDispatcher::Disk(d) => d.list_keys(scope)?,
        };
        keys.retain(|k| k.scope() == scope);
        keys.sort();
        Ok(keys)
    }

    pub fn store(&self, key: &Key, value: Value) -> StorageResult<()> {
        match self {
            KeyValueStoreDispatcher::Memory(m) => m.store(key, value),
            KeyValueStoreDispatcher::Disk(d) => d.store(key, value),
        }
    }

    pub fn store_json<V: Serialize>(&self, key: &Key, value: &V) -> StorageResult<()> {
        self.store(key, serde_json::to_value(value)?)
    }

    pub fn delete(&self, key: &Key) -> StorageResult<()> {
        match self {
            KeyValueStoreDispatcher::Memory(m) => m.delete(key),
            KeyValueStoreDispatcher::Disk(d) => d.delete(key),
        }
    }

    pub fn delete_scope(&self, scope: &Scope) -> StorageResult<()> {
        match self {
            KeyValueStoreDispatcher::Memory(m) => m.delete_scope(scope),
            KeyValueStoreDispatcher::Disk(d) => d.delete_scope(scope),
        }
    }

    pub fn clear(&self) -> StorageResult<()> {
        match self {
            KeyValueStoreDispatcher::Memory(m) => m.clear(),
            KeyValueStoreDispatcher::Disk(d) => d.clear(),
        }
    }
}

//------------ KeyValueError -------------------------------------------------

#[derive(Debug)]
pub enum KeyValueError {
    UnknownScheme(String),
    IoError(IrrdIoError),
    JsonError(serde_json::Error),
    UnknownKey(Key),
    InvalidKey(ParseSegmentError),
    Other(String),
}

impl From<IrrdIoError> for KeyValueError {
    fn from(e: IrrdIoError) -> Self {
        KeyValueError::IoError(e)
    }
}

impl From<serde_json::Error> for KeyValueError {
    fn from(e: serde_json::Error) -> Self {
        KeyValueError::JsonError(e)
    }
}

impl From<ParseSegmentError> for KeyValueError {
    fn from(e: ParseSegmentError) -> Self {
        KeyValueError::InvalidKey(e)
    }
}

impl fmt::Display for KeyValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValueError::UnknownScheme(e) => write!(f, "Unknown Scheme: {e}"),
            KeyValueError::IoError(e) => write!(f, "I/O error: {e}"),
            KeyValueError::JsonError(e) => write!(f, "JSON error: {e}"),
            KeyValueError::UnknownKey(key) => write!(f, "Unknown key: {key}"),
            KeyValueError::InvalidKey(e) => write!(f, "Invalid key: {e}"),
            KeyValueError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for KeyValueError {}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use serde_json::json;

    use super::*;
    use crate::commons::storage::Segment;

    fn random_memory_store() -> KeyValueStore {
        let uri = Url::parse(&format!("memory://{}", hex::encode(rand::random::<[u8; 8]>()))).unwrap();
        KeyValueStore::create(&uri, "test").unwrap()
    }

    fn disk_store(dir: &tempfile::TempDir) -> KeyValueStore {
        let uri = Url::parse(&format!("local://{}/data/", dir.path().display())).unwrap();
        KeyValueStore::create(&uri, "test").unwrap()
    }

    fn exercise(store: KeyValueStore) {
        assert!(store.is_empty().unwrap());

        let scope = Scope::from_str("TEST/objects").unwrap();
        let key = Key::new_scoped(scope.clone(), Segment::encode("192.0.2.0/24AS65530").unwrap());
        let other = Key::new_scoped(scope.clone(), Segment::parse("other").unwrap());
        let nested = Key::new_scoped(
            scope.with_sub_scope(Segment::parse("route").unwrap()),
            Segment::parse("nested").unwrap(),
        );

        store.store(&key, &json!({"a": 1})).unwrap();
        store.store(&other, &json!({"b": 2})).unwrap();
        store.store(&nested, &json!({"c": 3})).unwrap();

        assert!(store.has(&key).unwrap());
        let value: Option<Value> = store.get(&key).unwrap();
        assert_eq!(value, Some(json!({"a": 1})));

        let keys = store.keys(&scope).unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&key));

        store.drop_key(&other).unwrap();
        assert!(!store.has(&other).unwrap());

        store.drop_scope(&Scope::from_str("TEST").unwrap()).unwrap();
        assert!(!store.has(&key).unwrap());
        assert!(!store.has(&nested).unwrap());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn memory_store() {
        exercise(random_memory_store());
    }

    #[test]
    fn disk_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        exercise(disk_store(&dir));
    }

    #[test]
    fn stale_lock_file_does_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let store = disk_store(&dir);

        // A process that died while holding the lock leaves its file.
        let lock_dir = dir.path().join("data/test/.locks/TEST");
        std::fs::create_dir_all(&lock_dir).unwrap();
        std::fs::write(lock_dir.join("lockfile.lock"), b"").unwrap();

        let key = Key::new_scoped(Scope::from_str("TEST").unwrap(), Segment::parse("status").unwrap());
        store
            .execute(&Scope::from_str("TEST").unwrap(), |kv| kv.store_json(&key, &json!({"serial": 1})))
            .unwrap();
        assert!(store.has(&key).unwrap());
    }

    #[test]
    fn disk_execute_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(disk_store(&dir));
        let scope = Scope::from_str("TEST").unwrap();
        let key = Key::new_scoped(scope.clone(), Segment::parse("counter").unwrap());

        let threads: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                let scope = scope.clone();
                let key = key.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        store
                            .execute(&scope, |kv| {
                                let count: u64 = kv.get_json(&key)?.unwrap_or(0);
                                kv.store_json(&key, &(count + 1))
                            })
                            .unwrap();
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let count: Option<u64> = store.get(&key).unwrap();
        assert_eq!(count, Some(40));
    }

    #[test]
    fn unknown_scheme() {
        let uri = Url::parse("ftp://example.net/").unwrap();
        assert!(matches!(
            KeyValueStore::create(&uri, "test"),
            Err(KeyValueError::UnknownScheme(_))
        ));
    }
}
