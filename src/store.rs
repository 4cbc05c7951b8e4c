//! In-memory key-value store.
//!
//! A single `RwLock` guards the whole mapping: lookups share the read side,
//! `set` and `delete` take the write side. There is no per-key locking.
//!
//! Keys and values are normalized by trimming leading and trailing NUL bytes
//! on every path, so a key written with buffer padding is found again by the
//! same key without it.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, trace};

/// Thread-safe in-memory key-value store
#[derive(Debug, Default)]
pub struct Store {
    data: RwLock<HashMap<Bytes, Bytes>>,
}

impl Store {
    /// Create a new, empty store
    pub fn new() -> Arc<Self> {
        info!("Initializing store");
        Arc::new(Self::default())
    }

    /// Look up the current value for `key`. `None` means the key is absent.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        let key = trim_nul(key);
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        data.get(key).cloned()
    }

    /// Insert or overwrite the entry for `key`
    pub fn set(&self, key: Bytes, value: Bytes) {
        let key = clean(&key);
        let value = clean(&value);
        trace!(key_len = key.len(), value_len = value.len(), "Item stored");

        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        data.insert(key, value);
    }

    /// Remove the entry for `key`, returning whether one existed
    pub fn delete(&self, key: &[u8]) -> bool {
        let key = trim_nul(key);
        let mut data = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let removed = data.remove(key).is_some();
        trace!(key_len = key.len(), removed, "Item deleted");
        removed
    }

    /// Number of entries currently stored
    pub fn len(&self) -> usize {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Strip leading and trailing NUL bytes.
pub fn trim_nul(input: &[u8]) -> &[u8] {
    let start = input.iter().position(|&b| b != 0).unwrap_or(input.len());
    let end = input.iter().rposition(|&b| b != 0).map_or(start, |i| i + 1);
    &input[start..end]
}

// Slices into the original buffer rather than copying.
fn clean(bytes: &Bytes) -> Bytes {
    bytes.slice_ref(trim_nul(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_basic_set_get() {
        let store = Store::new();

        store.set(Bytes::from_static(b"key1"), Bytes::from_static(b"value1"));

        assert_eq!(store.get(b"key1").unwrap(), "value1");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_nonexistent() {
        let store = Store::new();
        assert!(store.get(b"nonexistent").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_overwrite() {
        let store = Store::new();

        store.set(Bytes::from_static(b"key1"), Bytes::from_static(b"value1"));
        store.set(Bytes::from_static(b"key1"), Bytes::from_static(b"value2"));

        assert_eq!(store.get(b"key1").unwrap(), "value2");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_delete() {
        let store = Store::new();

        store.set(Bytes::from_static(b"key1"), Bytes::from_static(b"value1"));
        assert!(store.delete(b"key1"));
        assert!(store.get(b"key1").is_none());

        // Deleting again is a no-op
        assert!(!store.delete(b"key1"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_delete_absent_leaves_others() {
        let store = Store::new();

        store.set(Bytes::from_static(b"a"), Bytes::from_static(b"1"));
        assert!(!store.delete(b"b"));
        assert_eq!(store.get(b"a").unwrap(), "1");
    }

    #[test]
    fn test_trailing_nul_key_found_without_padding() {
        let store = Store::new();

        store.set(
            Bytes::from_static(b"key\0\0\0"),
            Bytes::from_static(b"value\0\0"),
        );

        assert_eq!(store.get(b"key").unwrap(), "value");
    }

    #[test]
    fn test_padded_lookup_finds_plain_key() {
        let store = Store::new();

        store.set(Bytes::from_static(b"key"), Bytes::from_static(b"value"));

        assert_eq!(store.get(b"\0key\0\0").unwrap(), "value");
        assert!(store.delete(b"key\0"));
        assert!(store.get(b"key").is_none());
    }

    #[test]
    fn test_trim_nul() {
        assert_eq!(trim_nul(b"\0\0abc\0"), b"abc");
        assert_eq!(trim_nul(b"a\0b"), b"a\0b");
        assert_eq!(trim_nul(b"\0\0\0"), b"");
        assert_eq!(trim_nul(b""), b"");
    }

    #[test]
    fn test_concurrent_writers_same_key() {
        let store = Store::new();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        store.set(Bytes::from_static(b"shared"), Bytes::from(format!("value-{i}")));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let value = store.get(b"shared").unwrap();
        let valid: Vec<String> = (0..8).map(|i| format!("value-{i}")).collect();
        assert!(valid.iter().any(|v| v.as_bytes() == value.as_ref()));
    }

    #[test]
    fn test_concurrent_readers_see_whole_values() {
        let store = Store::new();
        store.set(Bytes::from_static(b"k"), Bytes::from_static(b"aaaa"));

        let writer = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..1000 {
                    let value = if i % 2 == 0 { "bbbb" } else { "aaaa" };
                    store.set(Bytes::from_static(b"k"), Bytes::from_static(value.as_bytes()));
                }
            })
        };

        for _ in 0..1000 {
            let value = store.get(b"k").unwrap();
            assert!(value == "aaaa" || value == "bbbb");
        }

        writer.join().unwrap();
    }
}
