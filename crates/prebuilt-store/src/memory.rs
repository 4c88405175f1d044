//! In-process object store for tests.
//!
//! Keeps objects in a map, counts calls, and can be switched into an
//! "unavailable" mode to simulate transport failures.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::{validate_key, ObjectStore, StoreError, StoreResult};

/// Object store backed by a `BTreeMap` in memory.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    unavailable: AtomicBool,
    gets: AtomicUsize,
    puts: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an object directly, bypassing `put`.
    pub fn insert(&self, key: impl Into<String>, bytes: Vec<u8>) {
        self.objects().insert(key.into(), bytes);
    }

    /// Raw bytes of a stored object.
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.objects().get(key).cloned()
    }

    /// All stored keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        self.objects().keys().cloned().collect()
    }

    /// Make every subsequent call fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `get` and `exists` calls made so far.
    pub fn get_calls(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Number of `put` calls made so far.
    pub fn put_calls(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.objects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store switched to unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

impl ObjectStore for MemoryObjectStore {
    fn get(&self, key: &str, dest: &Path) -> StoreResult<Option<u64>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        validate_key(key)?;

        let Some(bytes) = self.object(key) else {
            return Ok(None);
        };
        fs::write(dest, &bytes)?;
        Ok(Some(bytes.len() as u64))
    }

    fn put(&self, key: &str, source: &Path) -> StoreResult<u64> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        validate_key(key)?;

        let bytes = fs::read(source)?;
        let len = bytes.len() as u64;
        self.insert(key, bytes);
        Ok(len)
    }

    fn exists(&self, key: &str) -> StoreResult<bool> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        validate_key(key)?;
        Ok(self.objects().contains_key(key))
    }

    fn describe(&self) -> String {
        "memory://".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_counts_calls() {
        let scratch = TempDir::new().unwrap();
        let store = MemoryObjectStore::new();
        let source = scratch.path().join("in");
        fs::write(&source, b"abc").unwrap();

        store.put("k", &source).unwrap();
        store.get("k", &scratch.path().join("out")).unwrap();
        store.exists("other").unwrap();

        assert_eq!(store.put_calls(), 1);
        assert_eq!(store.get_calls(), 2);
        assert_eq!(store.keys(), vec!["k".to_string()]);
    }

    #[test]
    fn test_unavailable_mode() {
        let scratch = TempDir::new().unwrap();
        let store = MemoryObjectStore::new();
        store.insert("k", b"abc".to_vec());
        store.set_unavailable(true);

        let err = store.get("k", &scratch.path().join("out")).unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        store.set_unavailable(false);
        assert_eq!(store.get("k", &scratch.path().join("out")).unwrap(), Some(3));
    }

    #[test]
    fn test_missing_object_leaves_dest_absent() {
        let scratch = TempDir::new().unwrap();
        let store = MemoryObjectStore::new();
        let dest = scratch.path().join("out");
        assert_eq!(store.get("nope", &dest).unwrap(), None);
        assert!(!dest.exists());
    }
}
