//! In-memory key-value storage engine.
//!
//! The engine stores opaque byte values with caller-defined flags and an
//! optional absolute expiry. Expired entries are evicted lazily when read.
//!
//! This is the local storage collaborator of the cluster layer; the cluster
//! decides *which* node stores a key, this crate stores it.

#![deny(unsafe_code)]

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// No-expiry sentinel for [`KvStore::set`].
pub const NEVER_EXPIRES: u64 = 0;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    flags: u32,
    /// Unix seconds; 0 means the entry never expires.
    expires_at: u64,
}

impl Entry {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at != NEVER_EXPIRES && self.expires_at <= now
    }
}

/// Thread-safe in-memory key-value store.
///
/// All operations take `&self`; the map is guarded by an `RwLock` so reads
/// from concurrent peer tasks don't serialize on writes.
#[derive(Debug, Default)]
pub struct KvStore {
    entries: RwLock<HashMap<String, Entry>>,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl KvStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value under a key, replacing any previous entry.
    ///
    /// `expires_at` is unix seconds; pass [`NEVER_EXPIRES`] for no expiry.
    pub fn set(&self, key: &str, value: Vec<u8>, flags: u32, expires_at: u64) {
        let mut entries = self.entries.write().expect("store lock poisoned");
        entries.insert(
            key.to_string(),
            Entry {
                value,
                flags,
                expires_at,
            },
        );
    }

    /// Fetch a value and its flags.
    ///
    /// Returns `None` for missing or expired keys. Expired entries are
    /// evicted on the spot.
    pub fn get(&self, key: &str) -> Option<(Vec<u8>, u32)> {
        let now = unix_now();

        {
            let entries = self.entries.read().expect("store lock poisoned");
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    return Some((entry.value.clone(), entry.flags));
                }
                Some(_) => {} // expired, fall through to evict
                None => return None,
            }
        }

        // Re-check under the write lock; another writer may have replaced
        // the entry since the read lock was dropped.
        let mut entries = self.entries.write().expect("store lock poisoned");
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some((entry.value.clone(), entry.flags)),
            None => None,
        }
    }

    /// Delete a key. Returns `true` if a live entry was removed.
    pub fn delete(&self, key: &str) -> bool {
        let now = unix_now();
        let mut entries = self.entries.write().expect("store lock poisoned");
        match entries.remove(key) {
            Some(entry) => !entry.is_expired(now),
            None => false,
        }
    }

    /// Number of entries, including not-yet-evicted expired ones.
    pub fn len(&self) -> usize {
        self.entries.read().expect("store lock poisoned").len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.entries.write().expect("store lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_empty() {
        let store = KvStore::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_set_then_get() {
        let store = KvStore::new();
        store.set("a", b"1".to_vec(), 7, NEVER_EXPIRES);

        assert_eq!(store.get("a"), Some((b"1".to_vec(), 7)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_missing() {
        let store = KvStore::new();
        assert_eq!(store.get("missing"), None);
    }

    #[test]
    fn test_overwrite() {
        let store = KvStore::new();
        store.set("key", b"old".to_vec(), 0, NEVER_EXPIRES);
        store.set("key", b"new".to_vec(), 1, NEVER_EXPIRES);

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("key"), Some((b"new".to_vec(), 1)));
    }

    #[test]
    fn test_delete() {
        let store = KvStore::new();
        store.set("key", b"value".to_vec(), 0, NEVER_EXPIRES);

        assert!(store.delete("key"));
        assert!(!store.delete("key"));
        assert_eq!(store.get("key"), None);
    }

    #[test]
    fn test_expired_entry_reads_as_absent() {
        let store = KvStore::new();
        // Expired one second after the epoch, i.e. long ago.
        store.set("stale", b"value".to_vec(), 0, 1);

        assert_eq!(store.get("stale"), None);
        // The read evicted it.
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_future_expiry_still_readable() {
        let store = KvStore::new();
        let future = unix_now() + 3600;
        store.set("fresh", b"value".to_vec(), 0, future);

        assert_eq!(store.get("fresh"), Some((b"value".to_vec(), 0)));
    }

    #[test]
    fn test_delete_expired_reports_not_found() {
        let store = KvStore::new();
        store.set("stale", b"value".to_vec(), 0, 1);

        assert!(!store.delete("stale"));
    }

    #[test]
    fn test_clear() {
        let store = KvStore::new();
        store.set("a", b"1".to_vec(), 0, NEVER_EXPIRES);
        store.set("b", b"2".to_vec(), 0, NEVER_EXPIRES);

        store.clear();
        assert!(store.is_empty());
    }
}
