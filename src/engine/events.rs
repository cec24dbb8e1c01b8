//! Window events, listeners and engine events.
//!
//! Two channels report what the engine does:
//!
//! - [`WindowListener`]s are called synchronously for every window opened, changed or
//!   closed, one event at a time. Ordering is strict: `changed` only after
//!   the new page is installed, children `closed` before their parent, and a replacement
//!   window `opened` after the `closed` it replaces.
//! - [`EngineEvent`]s are broadcast on a `tokio::sync::broadcast` channel for observers that
//!   do not need to act inside the engine's call (loads, refreshes, script failures).
//!
//! # Main Types
//!
//! - [`WindowEvent`] / [`WindowEventKind`]: payload handed to window listeners.
//! - [`WindowListener`]: listener trait with default no-op methods.
//! - [`ListenerId`]: handle to remove a registered listener.
//! - [`EngineEvent`]: broadcast events.

use crate::engine::page::Page;
use crate::engine::refresh::DirectiveSource;
use crate::engine::script::JobId;
use crate::engine::window::WindowId;
use std::fmt::{Debug, Display};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEventKind {
    Opened,
    Changed,
    Closed,
}

impl Display for WindowEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WindowEventKind::Opened => write!(f, "opened"),
            WindowEventKind::Changed => write!(f, "changed"),
            WindowEventKind::Closed => write!(f, "closed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WindowEvent {
    pub kind: WindowEventKind,
    pub window: WindowId,
    /// Page shown before the change. `None` for `opened`.
    pub old_page: Option<Arc<Page>>,
    /// Page shown after the change. `None` for `closed`.
    pub new_page: Option<Arc<Page>>,
}

impl WindowEvent {
    pub(crate) fn opened(window: WindowId, page: Arc<Page>) -> Self {
        Self {
            kind: WindowEventKind::Opened,
            window,
            old_page: None,
            new_page: Some(page),
        }
    }

    pub(crate) fn changed(window: WindowId, old_page: Arc<Page>, new_page: Arc<Page>) -> Self {
        Self {
            kind: WindowEventKind::Changed,
            window,
            old_page: Some(old_page),
            new_page: Some(new_page),
        }
    }

    pub(crate) fn closed(window: WindowId, page: Arc<Page>) -> Self {
        Self {
            kind: WindowEventKind::Closed,
            window,
            old_page: Some(page),
            new_page: None,
        }
    }
}

/// Receives window lifecycle events. All methods default to doing nothing.
///
/// Listeners run synchronously, one event at a time and in the order the changes were
/// made. Usually the thread that changed the window delivers; when another thread is
/// already delivering, that thread delivers the change instead. This can be a background
/// script thread. A panicking listener is logged and skipped; the remaining
/// listeners still see the event.
pub trait WindowListener: Send + Sync {
    fn on_opened(&self, _event: &WindowEvent) {}
    fn on_changed(&self, _event: &WindowEvent) {}
    fn on_closed(&self, _event: &WindowEvent) {}
}

/// Handle of a registered [`WindowListener`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Events broadcast by the engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    // ****************************************
    // ** Window lifecycle
    /// Window or frame opened
    WindowOpened { window_id: WindowId },
    /// Page of a window was replaced
    WindowChanged { window_id: WindowId, url: Url },
    /// Window or frame closed
    WindowClosed { window_id: WindowId },

    // ****************************************
    // ** Navigation
    /// Loading of a URL started
    LoadStarted { window_id: WindowId, url: Url },
    /// Page has been installed in the window
    LoadFinished { window_id: WindowId, url: Url, status: u16 },
    /// Navigation failed before a page could be installed
    NavigationFailed { window_id: WindowId, url: Url, error: String },

    // ****************************************
    // ** Refresh
    /// A refresh was deferred to the window's background context
    RefreshScheduled { window_id: WindowId, target: Url, delay: u64, job: JobId },
    /// A refresh navigation is being performed
    RefreshExecuted { window_id: WindowId, target: Url, source: DirectiveSource },
    /// A refresh was not followed
    RefreshSuppressed { window_id: WindowId, target: Url, delay: u64 },
    /// A refresh value could not be parsed and was ignored
    MalformedDirective {
        window_id: WindowId,
        source: DirectiveSource,
        value: String,
        error: String,
    },

    // ****************************************
    // ** Scripts
    /// Script work failed
    ScriptError { window_id: WindowId, url: Option<Url>, message: String },
}

pub(crate) type EventSender = broadcast::Sender<EngineEvent>;

pub(crate) fn publish(tx: &EventSender, event: EngineEvent) {
    // send() only fails when nobody is subscribed
    let _ = tx.send(event);
}
