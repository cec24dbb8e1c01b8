use anyhow::Result;

/// Object-safe key/value storage area (DOM's Storage).
///
/// Keys keep insertion order: [`keys`](StorageArea::keys) and [`key`](StorageArea::key)
/// list them in the order they were first set.
pub trait StorageArea: Send + Sync {
    /// Retrieves the value associated with the given key, or `None` if not found.
    fn get_item(&self, key: &str) -> Option<String>;

    /// Sets the value for the given key, overwriting any existing value.
    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Removes the item with the given key.
    fn remove_item(&self, key: &str) -> Result<()>;

    /// Clears all items in the storage area.
    fn clear(&self) -> Result<()>;

    /// Returns the number of items in the storage area.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns all keys in insertion order.
    fn keys(&self) -> Vec<String>;

    /// Returns the key at `index` in insertion order.
    fn key(&self, index: usize) -> Option<String> {
        self.keys().into_iter().nth(index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("storage quota of {limit} items exceeded")]
    QuotaExceeded { limit: usize },

    #[error("opaque origin of {0} has no local storage")]
    OpaqueOrigin(String),
}
