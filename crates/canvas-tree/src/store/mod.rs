//! PersistentKV: the durable key→value substrate under both indexes.
//!
//! Backends only promise atomic single-key `get`/`put`/`delete`; there are no
//! cross-key transactions. [`Keyspace`] adds a key prefix and a serde codec on
//! top of any backend so the indexes stay backend-agnostic.

mod log;
mod memory;

pub use log::LogStore;
pub use memory::MemoryStore;

use crate::config::{StoreBackend, StoreConfig};
use crate::error::StoreError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Byte-level key-value backend. `scan_prefix` returns entries in
/// lexicographic key order.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: Vec<u8>) -> StoreResult<()>;
    /// Returns whether the key existed.
    fn delete(&self, key: &str) -> StoreResult<bool>;
    fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<(String, Vec<u8>)>>;
}

/// Open the backend selected by `config`.
pub fn open_store(config: &StoreConfig) -> StoreResult<Arc<dyn KvStore>> {
    match &config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::Log { path } => Ok(Arc::new(LogStore::open(path, config)?)),
    }
}

// ============================================================================
// Typed keyspace
// ============================================================================

/// A typed view of one key prefix of a [`KvStore`].
pub struct Keyspace<V> {
    store: Arc<dyn KvStore>,
    prefix: &'static str,
    what: &'static str,
    _value: PhantomData<fn() -> V>,
}

impl<V> Clone for Keyspace<V> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            prefix: self.prefix,
            what: self.what,
            _value: PhantomData,
        }
    }
}

impl<V: Serialize + DeserializeOwned> Keyspace<V> {
    pub fn new(store: Arc<dyn KvStore>, prefix: &'static str, what: &'static str) -> Self {
        Self {
            store,
            prefix,
            what,
            _value: PhantomData,
        }
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn decode(&self, key: &str, bytes: &[u8]) -> StoreResult<V> {
        bincode::deserialize(bytes).map_err(|e| StoreError::Decode {
            what: self.what,
            key: key.to_string(),
            reason: e.to_string(),
        })
    }

    pub fn get(&self, key: &str) -> StoreResult<Option<V>> {
        let full = self.key(key);
        match self.store.get(&full)? {
            Some(bytes) => self.decode(&full, &bytes).map(Some),
            None => Ok(None),
        }
    }

    pub fn put(&self, key: &str, value: &V) -> StoreResult<()> {
        let bytes = bincode::serialize(value).map_err(|e| StoreError::Encode {
            what: self.what,
            reason: e.to_string(),
        })?;
        self.store.put(&self.key(key), bytes)
    }

    pub fn delete(&self, key: &str) -> StoreResult<bool> {
        self.store.delete(&self.key(key))
    }

    /// Entries whose key (without the keyspace prefix) starts with `prefix`.
    pub fn scan(&self, prefix: &str) -> StoreResult<Vec<(String, V)>> {
        let full = self.key(prefix);
        let mut out = Vec::new();
        for (key, bytes) in self.store.scan_prefix(&full)? {
            let value = self.decode(&key, &bytes)?;
            out.push((key[self.prefix.len()..].to_string(), value));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Rec {
        n: u32,
    }

    #[test]
    fn test_keyspaces_do_not_overlap() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let a: Keyspace<Rec> = Keyspace::new(Arc::clone(&store), "a/", "rec");
        let b: Keyspace<Rec> = Keyspace::new(Arc::clone(&store), "b/", "rec");

        a.put("x", &Rec { n: 1 }).unwrap();
        b.put("x", &Rec { n: 2 }).unwrap();
        a.put("xy", &Rec { n: 3 }).unwrap();

        assert_eq!(a.get("x").unwrap(), Some(Rec { n: 1 }));
        assert_eq!(b.get("x").unwrap(), Some(Rec { n: 2 }));
        let scanned: Vec<_> = a.scan("x").unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(scanned, vec!["x", "xy"]);
        assert!(a.delete("x").unwrap());
        assert!(!a.delete("x").unwrap());
        assert_eq!(b.get("x").unwrap(), Some(Rec { n: 2 }));
    }

    #[test]
    fn test_decode_error_names_key() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        store.put("r/bad", vec![1]).unwrap();
        let ks: Keyspace<String> = Keyspace::new(store, "r/", "record");
        let err = ks.get("bad").unwrap_err();
        assert!(matches!(err, StoreError::Decode { ref key, .. } if key == "r/bad"));
    }
}
