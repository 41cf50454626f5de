use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::error::CoreError;

/// Concurrent map from opaque handle values to objects.
/// Used by the ICD to translate between the 64-bit handles seen by the
/// application and the objects backing them.
pub struct HandleMap<T: Clone> {
    entries: DashMap<u64, T>,
    /// Counter for generating unique handles
    next_id: AtomicU64,
    kind: &'static str,
}

impl<T: Clone> HandleMap<T> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            entries: DashMap::new(),
            // Start from 1 so that 0 stays VK_NULL_HANDLE
            next_id: AtomicU64::new(1),
            kind,
        }
    }

    /// Store an object and return its new handle value.
    pub fn insert(&self, value: T) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(id, value);
        id
    }

    pub fn get(&self, id: u64) -> Option<T> {
        self.entries.get(&id).map(|v| v.value().clone())
    }

    /// Like [`get`](Self::get), but reports the handle kind on failure.
    pub fn lookup(&self, id: u64) -> Result<T, CoreError> {
        self.get(id)
            .ok_or_else(|| CoreError::HandleNotFound(format!("{} {:#x}", self.kind, id)))
    }

    pub fn remove(&self, id: u64) -> Option<T> {
        self.entries.remove(&id).map(|(_, v)| v)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    /// Return number of live handles.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_nonzero_and_unique() {
        let map = HandleMap::new("VkSampler");
        let a = map.insert(10u32);
        let b = map.insert(20u32);
        assert_ne!(a, 0);
        assert_ne!(a, b);
        assert_eq!(map.get(a), Some(10));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn lookup_names_the_missing_kind() {
        let map: HandleMap<u32> = HandleMap::new("VkBuffer");
        let err = map.lookup(42).unwrap_err();
        assert!(err.to_string().contains("VkBuffer"));
    }

    #[test]
    fn remove_forgets_the_handle() {
        let map = HandleMap::new("VkImage");
        let h = map.insert("image");
        assert_eq!(map.remove(h), Some("image"));
        assert!(!map.contains(h));
        assert!(map.is_empty());
    }
}
