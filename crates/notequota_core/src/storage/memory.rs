//! In-process object store.

use super::{validate_object_path, ObjectEntry, ObjectStore, StorageResult};
use crate::clock::{Clock, SystemClock};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

struct StoredObject {
    data: Vec<u8>,
    modified_at_ms: u64,
}

/// Map-backed store for tests and single-process deployments.
///
/// Write times come from the injected clock so object age is deterministic
/// under a `ManualClock`.
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects.read().contains_key(path)
    }
}

impl ObjectStore for MemoryObjectStore {
    fn put(&self, path: &str, data: &[u8]) -> StorageResult<()> {
        validate_object_path(path)?;
        let object = StoredObject {
            data: data.to_vec(),
            modified_at_ms: self.clock.now_ms(),
        };
        self.objects.write().insert(path.to_string(), object);
        Ok(())
    }

    fn stat(&self, path: &str) -> StorageResult<Option<u64>> {
        validate_object_path(path)?;
        Ok(self
            .objects
            .read()
            .get(path)
            .map(|object| object.data.len() as u64))
    }

    fn delete(&self, path: &str) -> StorageResult<bool> {
        validate_object_path(path)?;
        Ok(self.objects.write().remove(path).is_some())
    }

    fn list(&self, prefix: &str) -> StorageResult<Vec<ObjectEntry>> {
        let objects = self.objects.read();
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(path, _)| path.starts_with(prefix))
            .map(|(path, object)| ObjectEntry {
                path: path.clone(),
                size_bytes: object.data.len() as u64,
                modified_at_ms: object.modified_at_ms,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryObjectStore;
    use crate::clock::ManualClock;
    use crate::storage::ObjectStore;
    use std::sync::Arc;

    #[test]
    fn list_is_scoped_to_prefix() {
        let store = MemoryObjectStore::new();
        store.put("accounts/a/notes/1/x", b"abc").unwrap();
        store.put("accounts/ab/notes/1/y", b"de").unwrap();
        store.put("accounts/b/notes/2/z", b"f").unwrap();

        let listed = store.list("accounts/a/").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path, "accounts/a/notes/1/x");
        assert_eq!(listed[0].size_bytes, 3);
    }

    #[test]
    fn delete_reports_whether_object_existed() {
        let store = MemoryObjectStore::new();
        store.put("accounts/a/x", b"1").unwrap();
        assert!(store.delete("accounts/a/x").unwrap());
        assert!(!store.delete("accounts/a/x").unwrap());
        assert_eq!(store.stat("accounts/a/x").unwrap(), None);
    }

    #[test]
    fn listing_carries_write_time_from_clock() {
        let clock = Arc::new(ManualClock::new(5_000));
        let store = MemoryObjectStore::with_clock(clock.clone());
        store.put("accounts/a/x", b"1").unwrap();
        clock.advance(250);
        store.put("accounts/a/y", b"2").unwrap();

        let listed = store.list("accounts/a/").unwrap();
        assert_eq!(listed[0].modified_at_ms, 5_000);
        assert_eq!(listed[1].modified_at_ms, 5_250);
    }
}
