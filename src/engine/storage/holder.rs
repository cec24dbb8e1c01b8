use super::area::{StorageArea, StorageError};
use super::event::{StorageEvent, StorageScope};
use super::memory::MemoryArea;
use crate::engine::window::WindowId;
use crate::engine::DEFAULT_CHANNEL_CAPACITY;
use anyhow::Result;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use url::{Origin, Url};

/// A handle for receiving storage change notifications.
pub type Subscription = broadcast::Receiver<StorageEvent>;

#[derive(Debug)]
struct StorageBus {
    tx: broadcast::Sender<StorageEvent>,
}

impl Default for StorageBus {
    fn default() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        Self { tx }
    }
}

impl StorageBus {
    fn subscribe(&self) -> Subscription {
        self.tx.subscribe()
    }

    fn publish(&self, ev: StorageEvent) {
        // send() only fails when nobody is subscribed
        let _ = self.tx.send(ev);
    }
}

/// Registry of storage areas: one local area per origin, one session area per window.
///
/// Asking twice for the same origin (or window) returns the same `Arc`, so every holder
/// of an area sees the mutations of every other holder. Local areas outlive the windows
/// that used them; session areas go away with [`drop_window`](StorageHolder::drop_window).
pub struct StorageHolder {
    local: RwLock<HashMap<Origin, Arc<dyn StorageArea>>>,
    session: RwLock<HashMap<WindowId, Arc<dyn StorageArea>>>,
    bus: Arc<StorageBus>,
    quota: usize,
}

impl Debug for StorageHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageHolder").finish_non_exhaustive()
    }
}

impl Default for StorageHolder {
    fn default() -> Self {
        Self::new(0)
    }
}

impl StorageHolder {
    /// Creates an empty holder. `quota` limits the items per area, `0` for unlimited.
    pub fn new(quota: usize) -> Self {
        Self {
            local: RwLock::default(),
            session: RwLock::default(),
            bus: Arc::new(StorageBus::default()),
            quota,
        }
    }

    pub fn subscribe(&self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn local_for(&self, origin: &Origin) -> Arc<dyn StorageArea> {
        if let Some(area) = self.local.read().unwrap_or_else(PoisonError::into_inner).get(origin) {
            return area.clone();
        }

        // Another thread may have created it between the read and the write lock
        let mut local = self.local.write().unwrap_or_else(PoisonError::into_inner);
        local
            .entry(origin.clone())
            .or_insert_with(|| self.notifying(StorageScope::Local, Some(origin.clone()), None))
            .clone()
    }

    /// Local area for the origin of `url`. Opaque origins (`data:`, `about:blank`) have none.
    pub fn local_for_url(&self, url: &Url) -> Result<Arc<dyn StorageArea>, StorageError> {
        let origin = url.origin();
        if !origin.is_tuple() {
            return Err(StorageError::OpaqueOrigin(url.to_string()));
        }
        Ok(self.local_for(&origin))
    }

    pub fn session_for(&self, window: WindowId) -> Arc<dyn StorageArea> {
        if let Some(area) = self.session.read().unwrap_or_else(PoisonError::into_inner).get(&window) {
            return area.clone();
        }

        let mut session = self.session.write().unwrap_or_else(PoisonError::into_inner);
        session
            .entry(window)
            .or_insert_with(|| self.notifying(StorageScope::Session, None, Some(window)))
            .clone()
    }

    /// Discards the session area of `window`. Existing handles keep working but are no
    /// longer reachable through the holder.
    pub fn drop_window(&self, window: WindowId) {
        self.session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&window);
    }

    pub fn local_origins(&self) -> Vec<Origin> {
        self.local
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    fn notifying(&self, scope: StorageScope, origin: Option<Origin>, window: Option<WindowId>) -> Arc<dyn StorageArea> {
        Arc::new(NotifyingArea {
            inner: MemoryArea::with_quota(self.quota),
            scope,
            origin,
            window,
            bus: self.bus.clone(),
        })
    }
}

struct NotifyingArea {
    inner: MemoryArea,
    scope: StorageScope,
    origin: Option<Origin>,
    window: Option<WindowId>,
    bus: Arc<StorageBus>,
}

impl NotifyingArea {
    fn publish(&self, key: Option<&str>, old_value: Option<String>, new_value: Option<String>) {
        self.bus.publish(StorageEvent {
            scope: self.scope,
            origin: self.origin.clone(),
            window: self.window,
            key: key.map(str::to_string),
            old_value,
            new_value,
        });
    }
}

impl StorageArea for NotifyingArea {
    fn get_item(&self, key: &str) -> Option<String> {
        self.inner.get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let old = self.inner.get_item(key);
        self.inner.set_item(key, value)?;
        self.publish(Some(key), old, Some(value.to_string()));
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let old = self.inner.get_item(key);
        self.inner.remove_item(key)?;
        if old.is_some() {
            self.publish(Some(key), old, None);
        }
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.inner.clear()?;
        self.publish(None, None, None);
        Ok(())
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }

    fn key(&self, index: usize) -> Option<String> {
        self.inner.key(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn o(s: &str) -> Origin {
        Url::parse(s).expect("valid URL").origin()
    }

    #[test]
    fn same_origin_returns_same_area() {
        let holder = StorageHolder::default();
        let a = holder.local_for(&o("https://example.com/a"));
        let b = holder.local_for(&o("https://example.com/b"));
        assert!(Arc::ptr_eq(&a, &b));

        a.set_item("k", "v").unwrap();
        assert_eq!(b.get_item("k").as_deref(), Some("v"));

        let other = holder.local_for(&o("https://other.com/"));
        assert!(!Arc::ptr_eq(&a, &other));
        assert!(other.get_item("k").is_none());
    }

    #[test]
    fn session_is_per_window_and_dropped_with_it() {
        let holder = StorageHolder::default();
        let (w1, w2) = (WindowId::new(), WindowId::new());

        holder.session_for(w1).set_item("k", "1").unwrap();
        assert!(Arc::ptr_eq(&holder.session_for(w1), &holder.session_for(w1)));
        assert!(holder.session_for(w2).get_item("k").is_none());

        holder.drop_window(w1);
        assert!(holder.session_for(w1).is_empty());
    }

    #[test]
    fn local_survives_window_drop() {
        let holder = StorageHolder::default();
        let w = WindowId::new();
        holder.local_for(&o("https://a.test")).set_item("k", "v").unwrap();
        holder.drop_window(w);
        assert_eq!(holder.local_for(&o("https://a.test")).get_item("k").as_deref(), Some("v"));
    }

    #[test]
    fn opaque_origin_has_no_local_storage() {
        let holder = StorageHolder::default();
        let err = holder.local_for_url(&Url::parse("about:blank").unwrap()).err();
        assert!(matches!(err, Some(StorageError::OpaqueOrigin(_))));
        assert!(holder.local_for_url(&Url::parse("https://a.test/x").unwrap()).is_ok());
    }

    #[test]
    fn mutations_are_published() {
        let holder = StorageHolder::default();
        let mut rx = holder.subscribe();
        let w = WindowId::new();
        let area = holder.session_for(w);

        area.set_item("k", "1").unwrap();
        area.set_item("k", "2").unwrap();
        area.remove_item("k").unwrap();
        area.remove_item("k").unwrap();
        area.clear().unwrap();

        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.scope, StorageScope::Session);
        assert_eq!(ev.window, Some(w));
        assert_eq!((ev.old_value, ev.new_value), (None, Some("1".into())));

        let ev = rx.try_recv().unwrap();
        assert_eq!((ev.old_value, ev.new_value), (Some("1".into()), Some("2".into())));

        let ev = rx.try_recv().unwrap();
        assert_eq!((ev.old_value, ev.new_value), (Some("2".into()), None));

        // removing a missing key publishes nothing; clear has no key
        let ev = rx.try_recv().unwrap();
        assert!(ev.key.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn concurrent_access_shares_one_area() {
        let holder = Arc::new(StorageHolder::default());
        let origin = o("https://busy.test");

        std::thread::scope(|scope| {
            for t in 0..16 {
                let holder = holder.clone();
                let origin = origin.clone();
                scope.spawn(move || {
                    for i in 0..500 {
                        holder.local_for(&origin).set_item(&format!("{t}-{i}"), "x").unwrap();
                    }
                });
            }
        });

        assert_eq!(holder.local_for(&origin).len(), 16 * 500);
        assert_eq!(holder.local_origins().len(), 1);
    }
}
