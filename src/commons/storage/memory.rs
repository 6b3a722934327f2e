use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{Mutex, MutexGuard},
    thread,
    time::Duration,
};

use lazy_static::lazy_static;
use serde_json::Value;

use crate::commons::storage::{Key, KeyValueError, KeyValueStoreDispatcher, Scope, StorageResult};

//------------ MemoryStore ---------------------------------------------------

#[derive(Debug, Default)]
struct MemoryStore(HashMap<String, HashMap<Key, Value>>);

impl MemoryStore {
    fn namespace_is_empty(&self, namespace: &str) -> bool {
        self.0.get(namespace).map(|m| m.is_empty()).unwrap_or(true)
    }

    fn has(&self, namespace: &str, key: &Key) -> bool {
        self.0.get(namespace).map(|m| m.contains_key(key)).unwrap_or(false)
    }

    fn get(&self, namespace: &str, key: &Key) -> Option<Value> {
        self.0.get(namespace).and_then(|m| m.get(key).cloned())
    }

    fn insert(&mut self, namespace: &str, key: &Key, value: Value) {
        self.0
            .entry(namespace.to_string())
            .or_default()
            .insert(key.clone(), value);
    }

    fn delete(&mut self, namespace: &str, key: &Key) {
        if let Some(map) = self.0.get_mut(namespace) {
            map.remove(key);
        }
    }

    fn list_keys(&self, namespace: &str, scope: &Scope) -> Vec<Key> {
        self.0
            .get(namespace)
            .map(|m| m.keys().filter(|k| k.scope().starts_with(scope)).cloned().collect())
            .unwrap_or_default()
    }

    fn delete_scope(&mut self, namespace: &str, scope: &Scope) {
        if let Some(map) = self.0.get_mut(namespace) {
            map.retain(|k, _| !k.scope().starts_with(scope));
        }
    }

    fn clear(&mut self, namespace: &str) {
        self.0.remove(namespace);
    }
}

lazy_static! {
    static ref STORE: Mutex<MemoryStore> = Mutex::new(MemoryStore::default());
    static ref LOCKS: Mutex<HashSet<ScopeLock>> = Mutex::new(HashSet::new());
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct ScopeLock(String);

impl ScopeLock {
    fn new(namespace: &str, scope: &Scope) -> Self {
        ScopeLock(format!("{namespace}/{scope}"))
    }
}

//------------ Memory --------------------------------------------------------

/// A store kept in a process wide map.
///
/// The optional name from the `memory://<name>` URI prefixes the namespace
/// so that tests using different names never see each other's data.
#[derive(Clone, Debug)]
pub struct Memory {
    effective_namespace: String,
}

impl Memory {
    const LOCK_WAIT: Duration = Duration::from_millis(10);
    const LOCK_TRIES: usize = 1000;

    pub fn new(prefix: Option<&str>, namespace: &str) -> Self {
        let effective_namespace = match prefix {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}_{namespace}"),
            _ => namespace.to_string(),
        };
        Memory { effective_namespace }
    }

    fn lock(&self) -> StorageResult<MutexGuard<'static, MemoryStore>> {
        STORE
            .lock()
            .map_err(|e| KeyValueError::Other(format!("cannot lock memory store: {e}")))
    }

    /// Runs the operation while holding a lock on the scope.
    pub fn execute<F, T>(&self, scope: &Scope, op: F) -> StorageResult<T>
    where
        F: FnOnce(&KeyValueStoreDispatcher) -> StorageResult<T>,
    {
        let scope_lock = ScopeLock::new(&self.effective_namespace, scope);

        let mut acquired = false;
        for _ in 0..Self::LOCK_TRIES {
            let mut locks = LOCKS
                .lock()
                .map_err(|e| KeyValueError::Other(format!("cannot get lock: {e}")))?;

            if locks.contains(&scope_lock) {
                drop(locks);
                thread::sleep(Self::LOCK_WAIT);
            } else {
                locks.insert(scope_lock.clone());
                acquired = true;
                break;
            }
        }

        if !acquired {
            return Err(KeyValueError::Other(format!("scope {scope} already locked")));
        }

        let res = op(&KeyValueStoreDispatcher::Memory(self));

        LOCKS
            .lock()
            .map_err(|e| KeyValueError::Other(format!("cannot get lock: {e}")))?
            .remove(&scope_lock);

        res
    }
}

impl fmt::Display for Memory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "memory://{}", self.effective_namespace)
    }
}

impl Memory {
    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.lock()?.namespace_is_empty(&self.effective_namespace))
    }

    pub fn has(&self, key: &Key) -> StorageResult<bool> {
        Ok(self.lock()?.has(&self.effective_namespace, key))
    }

    pub fn get(&self, key: &Key) -> StorageResult<Option<Value>> {
        Ok(self.lock()?.get(&self.effective_namespace, key))
    }

    pub fn list_keys(&self, scope: &Scope) -> StorageResult<Vec<Key>> {
        Ok(self.lock()?.list_keys(&self.effective_namespace, scope))
    }

    pub fn store(&self, key: &Key, value: Value) -> StorageResult<()> {
        self.lock()?.insert(&self.effective_namespace, key, value);
        Ok(())
    }

    /// Deletes the key. Deleting a key that does not exist is a no-op.
    pub fn delete(&self, key: &Key) -> StorageResult<()> {
        self.lock()?.delete(&self.effective_namespace, key);
        Ok(())
    }

    pub fn delete_scope(&self, scope: &Scope) -> StorageResult<()> {
        self.lock()?.delete_scope(&self.effective_namespace, scope);
        Ok(())
    }

    pub fn clear(&self) -> StorageResult<()> {
        self.lock()?.clear(&self.effective_namespace);
        Ok(())
    }
}
