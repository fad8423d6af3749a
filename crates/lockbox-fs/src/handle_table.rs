//! Concurrent table of open handles with auto-incrementing ids.
//!
//! Every backend that hands out opaque [`FileHandle`](crate::FileHandle) or
//! [`DirHandle`](crate::DirHandle) values keeps the real objects here. Ids
//! start at 1 and are never reused while the entry is live; 0 is reserved so
//! a zeroed handle never aliases an open one.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::{Ref, RefMut};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub struct HandleTable<V> {
    handles: DashMap<u64, V>,
    next_id: AtomicU64,
}

impl<V> HandleTable<V> {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Store `value` under a fresh id and return the id.
    pub fn insert(&self, value: V) -> u64 {
        let mut value = Some(value);
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id == 0 {
                continue;
            }
            if let Entry::Vacant(entry) = self.handles.entry(id)
                && let Some(value) = value.take()
            {
                entry.insert(value);
                return id;
            }
        }
    }

    pub fn get(&self, id: u64) -> Option<Ref<'_, u64, V>> {
        self.handles.get(&id)
    }

    pub fn get_mut(&self, id: u64) -> Option<RefMut<'_, u64, V>> {
        self.handles.get_mut(&id)
    }

    pub fn remove(&self, id: u64) -> Option<V> {
        self.handles.remove(&id).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl<V> Default for HandleTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_ids_start_at_one() {
        let table = HandleTable::new();
        assert_eq!(table.insert("a"), 1);
        assert_eq!(table.insert("b"), 2);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_remove_is_single_shot() {
        let table = HandleTable::new();
        let id = table.insert(7);
        assert_eq!(table.remove(id), Some(7));
        assert_eq!(table.remove(id), None);
        assert!(table.is_empty());
    }

    #[test]
    fn test_get_mut_updates_in_place() {
        let table = HandleTable::new();
        let id = table.insert(String::from("x"));
        table.get_mut(id).unwrap().push('y');
        assert_eq!(table.get(id).unwrap().as_str(), "xy");
    }

    #[test]
    fn test_concurrent_inserts_get_unique_ids() {
        let table = Arc::new(HandleTable::new());
        let workers: Vec<_> = (0..8)
            .map(|t| {
                let table = Arc::clone(&table);
                thread::spawn(move || (0..100).map(|i| table.insert(t * 100 + i)).collect::<Vec<_>>())
            })
            .collect();

        let mut ids: Vec<u64> = workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 800);
        assert_eq!(table.len(), 800);
    }
}
