use crate::engine::storage::area::{StorageArea, StorageError};
use anyhow::Result;
use indexmap::IndexMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// In-memory storage area with insertion-ordered keys and an optional item limit.
#[derive(Debug, Default)]
pub struct MemoryArea {
    items: RwLock<IndexMap<String, String>>,
    /// Maximum number of items, `0` for unlimited
    quota: usize,
}

impl MemoryArea {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            items: RwLock::default(),
            quota,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, IndexMap<String, String>> {
        self.items.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IndexMap<String, String>> {
        self.items.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StorageArea for MemoryArea {
    fn get_item(&self, key: &str) -> Option<String> {
        self.read().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut items = self.write();
        if let Some(existing) = items.get_mut(key) {
            *existing = value.to_string();
            return Ok(());
        }

        if self.quota > 0 && items.len() >= self.quota {
            return Err(StorageError::QuotaExceeded { limit: self.quota }.into());
        }
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        // shift_remove keeps the remaining keys in insertion order
        self.write().shift_remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.write().clear();
        Ok(())
    }

    fn len(&self) -> usize {
        self.read().len()
    }

    fn keys(&self) -> Vec<String> {
        self.read().keys().cloned().collect()
    }

    fn key(&self, index: usize) -> Option<String> {
        self.read().get_index(index).map(|(k, _)| k.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storagearea_basic_contract() {
        let area = MemoryArea::new();

        // starts empty
        assert!(area.is_empty());
        assert!(area.get_item("missing").is_none());

        // set + get
        area.set_item("a", "1").unwrap();
        area.set_item("b", "2").unwrap();
        assert_eq!(area.len(), 2);
        assert_eq!(area.get_item("a").as_deref(), Some("1"));

        // overwrite keeps len() and position
        area.set_item("a", "ONE").unwrap();
        assert_eq!(area.len(), 2);
        assert_eq!(area.key(0).as_deref(), Some("a"));
        assert_eq!(area.get_item("a").as_deref(), Some("ONE"));

        // remove
        area.remove_item("a").unwrap();
        assert_eq!(area.keys(), vec!["b".to_string()]);
        assert_eq!(area.key(1), None);

        // clear
        area.clear().unwrap();
        assert_eq!(area.len(), 0);
    }

    #[test]
    fn keys_keep_insertion_order() {
        let area = MemoryArea::new();
        for k in ["z", "a", "m"] {
            area.set_item(k, "x").unwrap();
        }
        area.remove_item("a").unwrap();
        area.set_item("a", "again").unwrap();
        assert_eq!(area.keys(), vec!["z", "m", "a"]);
    }

    #[test]
    fn quota_limits_new_keys_only() {
        let area = MemoryArea::with_quota(2);
        area.set_item("a", "1").unwrap();
        area.set_item("b", "2").unwrap();

        let err = area.set_item("c", "3").unwrap_err();
        assert_eq!(err.downcast_ref::<StorageError>(), Some(&StorageError::QuotaExceeded { limit: 2 }));

        // overwriting an existing key is still allowed
        area.set_item("a", "changed").unwrap();
        assert_eq!(area.get_item("a").as_deref(), Some("changed"));
    }
}
