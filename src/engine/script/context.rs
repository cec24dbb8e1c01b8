use crate::engine::engine::EngineInner;
use crate::engine::errors::ScriptError;
use crate::engine::net::Request;
use crate::engine::page::Page;
use crate::engine::script::{JobContext, JobId};
use crate::engine::storage::StorageArea;
use crate::engine::window::WindowId;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// What script code can reach of the engine: its window, the window's page and storage,
/// navigation and timers.
///
/// The context holds the engine weakly. Once the engine is dropped every operation fails
/// with [`ScriptError::WindowGone`].
pub struct ScriptContext {
    window: WindowId,
    engine: Weak<EngineInner>,
    job: Option<JobContext>,
}

impl ScriptContext {
    pub(crate) fn new(window: WindowId, engine: Weak<EngineInner>, job: Option<JobContext>) -> Self {
        Self { window, engine, job }
    }

    pub fn window(&self) -> WindowId {
        self.window
    }

    /// Job this context runs in, `None` while running synchronously during a page load.
    pub fn job(&self) -> Option<JobId> {
        self.job.as_ref().map(JobContext::job)
    }

    pub fn is_cancelled(&self) -> bool {
        self.job.as_ref().is_some_and(JobContext::is_cancelled)
    }

    pub fn page(&self) -> Result<Arc<Page>, ScriptError> {
        self.engine()?
            .windows
            .page(self.window)
            .map_err(|_| ScriptError::WindowGone)
    }

    /// Navigates the window to `target`, resolved against the current page, like an
    /// assignment to `window.location`. Runs synchronously on the calling thread.
    pub fn assign_location(&self, target: &str) -> Result<Arc<Page>, ScriptError> {
        let engine = self.engine()?;
        let base = engine
            .windows
            .page(self.window)
            .map_err(|_| ScriptError::WindowGone)?;

        let url = base.url().join(target).map_err(|e| ScriptError::Navigation {
            url: target.to_string(),
            message: e.to_string(),
        })?;

        log::debug!("Window[{}]: script navigates to {}", self.window, url);
        engine
            .load_request(self.window, Request::get(url.clone()), 0)
            .map_err(|e| ScriptError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })
    }

    /// Local storage of the current page's origin. `None` for opaque origins.
    pub fn local_storage(&self) -> Option<Arc<dyn StorageArea>> {
        let engine = self.engine.upgrade()?;
        let page = engine.windows.page(self.window).ok()?;
        engine.storage.local_for_url(page.url()).ok()
    }

    pub fn session_storage(&self) -> Option<Arc<dyn StorageArea>> {
        let engine = self.engine.upgrade()?;
        engine.windows.ensure_open(self.window).ok()?;
        Some(engine.storage.session_for(self.window))
    }

    /// Schedules `task` on this window's background context, like `setTimeout`.
    pub fn set_timeout<F>(&self, delay: Duration, task: F) -> Result<JobId, ScriptError>
    where
        F: FnOnce(&ScriptContext) -> Result<(), ScriptError> + Send + 'static,
    {
        self.engine()?
            .schedule(self.window, delay, task)
            .map_err(|_| ScriptError::WindowGone)
    }

    fn engine(&self) -> Result<Arc<EngineInner>, ScriptError> {
        self.engine.upgrade().ok_or(ScriptError::WindowGone)
    }
}

impl std::fmt::Debug for ScriptContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptContext")
            .field("window", &self.window)
            .field("job", &self.job())
            .finish()
    }
}
