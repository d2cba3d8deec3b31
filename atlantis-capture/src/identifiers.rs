use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Mutex;

use crate::id::PackageId;

/// Side-table used by capture adapters to give platform task handles a stable
/// [`PackageId`] and to tag tasks that belong to the transport itself.
#[derive(Debug)]
pub struct TaskIdentifiers<K> {
    inner: Mutex<Inner<K>>,
}

#[derive(Debug)]
struct Inner<K> {
    ids: HashMap<K, PackageId>,
    internal: HashSet<K>,
}

impl<K> Default for TaskIdentifiers<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> TaskIdentifiers<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                ids: HashMap::new(),
                internal: HashSet::new(),
            }),
        }
    }

    pub fn identifier_for(&self, key: &K) -> PackageId {
        let mut inner = self.lock();
        inner
            .ids
            .entry(key.clone())
            .or_insert_with(PackageId::new)
            .clone()
    }

    pub fn get(&self, key: &K) -> Option<PackageId> {
        self.lock().ids.get(key).cloned()
    }

    pub fn mark_internal(&self, key: &K) {
        self.lock().internal.insert(key.clone());
    }

    pub fn is_internal(&self, key: &K) -> bool {
        self.lock().internal.contains(key)
    }

    pub fn forget(&self, key: &K) -> Option<PackageId> {
        let mut inner = self.lock();
        inner.internal.remove(key);
        inner.ids.remove(key)
    }

    pub fn len(&self) -> usize {
        self.lock().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<K>> {
        // A poisoned table still holds valid ids.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::TaskIdentifiers;

    #[test]
    fn identifier_is_idempotent() {
        let table = TaskIdentifiers::new();
        let first = table.identifier_for(&7u64);
        assert_eq!(table.identifier_for(&7u64), first);
        assert_ne!(table.identifier_for(&8u64), first);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn concurrent_lookups_share_one_id() {
        let table = Arc::new(TaskIdentifiers::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || table.identifier_for(&"task"))
            })
            .collect();
        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn internal_tag_is_cleared_on_forget() {
        let table = TaskIdentifiers::new();
        table.mark_internal(&1u32);
        assert!(table.is_internal(&1));
        assert!(!table.is_internal(&2));
        table.identifier_for(&1);
        assert!(table.forget(&1).is_some());
        assert!(!table.is_internal(&1));
        assert!(table.is_empty());
    }
}
