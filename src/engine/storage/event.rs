use crate::engine::window::WindowId;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StorageScope {
    Local,
    Session,
}

/// A change made to a storage area.
#[derive(Clone, Debug)]
pub struct StorageEvent {
    pub scope: StorageScope,
    /// Origin of a local area. `None` for session areas.
    pub origin: Option<url::Origin>,
    /// Window of a session area. `None` for local areas.
    pub window: Option<WindowId>,
    /// Changed key, `None` when the area was cleared
    pub key: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}
