//! In-memory storage backend.

use super::{DurableStorage, PersistenceError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Process-local [`DurableStorage`].
///
/// Writes can be made to fail on demand, which lets hosts exercise the
/// queue's persist-before-commit behaviour.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set`/`delete` fail until turned off again.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<(), PersistenceError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable(
                "write rejected by memory storage".to_string(),
            ));
        }
        Ok(())
    }
}

impl DurableStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        let entries = self.entries.lock().map_err(|_| PersistenceError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), PersistenceError> {
        self.check_writable()?;
        let mut entries = self.entries.lock().map_err(|_| PersistenceError::Poisoned)?;
        entries.insert(key.to_string(), value.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), PersistenceError> {
        self.check_writable()?;
        let mut entries = self.entries.lock().map_err(|_| PersistenceError::Poisoned)?;
        entries.remove(key);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_delete() {
        let storage = MemoryStorage::new();
        assert!(storage.get("k").unwrap().is_none());

        storage.set("k", b"v1").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some(&b"v1"[..]));

        storage.delete("k").unwrap();
        storage.delete("k").unwrap();
        assert!(storage.get("k").unwrap().is_none());
        assert_eq!(storage.write_count(), 3);
    }

    #[test]
    fn test_injected_failure_keeps_previous_value() {
        let storage = MemoryStorage::new();
        storage.set("k", b"v1").unwrap();

        storage.fail_writes(true);
        assert!(matches!(
            storage.set("k", b"v2"),
            Err(PersistenceError::Unavailable(_))
        ));
        assert_eq!(storage.get("k").unwrap().as_deref(), Some(&b"v1"[..]));

        storage.fail_writes(false);
        storage.set("k", b"v2").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some(&b"v2"[..]));
    }
}
