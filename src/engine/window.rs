//! Window lifecycle management.
//!
//! Windows form a tree: top-level windows (optionally remembering the window that opened
//! them) and frames nested below a parent window. Every window always shows exactly one
//! [`Page`], starting with `about:blank`.

mod manager;

pub use manager::WindowManager;

use crate::engine::page::Page;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;
use uuid::Uuid;

/// A unique identifier for a window or frame.
///
/// `WindowId` is an opaque handle. It stays valid after the window is closed, so operations
/// on a closed window can be told apart from operations on an unknown one.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WindowId(Uuid);

impl WindowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WindowId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot of a window at the time it was requested.
#[derive(Debug, Clone)]
pub struct Window {
    pub id: WindowId,
    pub name: String,
    /// Window whose script opened this one
    pub opener: Option<WindowId>,
    /// Parent window for frames, `None` for top-level windows
    pub parent: Option<WindowId>,
    /// Child frames, in creation order
    pub children: Vec<WindowId>,
    pub page: Arc<Page>,
}

impl Window {
    pub fn is_frame(&self) -> bool {
        self.parent.is_some()
    }
}
