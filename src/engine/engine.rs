use crate::engine::config::EngineConfig;
use crate::engine::errors::{EngineError, ScriptError};
use crate::engine::events::{publish, EngineEvent, EventSender, ListenerId, WindowListener};
use crate::engine::net::{Request, Response, Transport};
use crate::engine::page::{MarkupScanner, Page};
use crate::engine::pool::{PoolStats, ResourcePool};
use crate::engine::refresh::{RefreshAction, RefreshHandler, RefreshOutcome, RefreshScheduler};
use crate::engine::script::{
    panic_message, JobId, ScriptContext, ScriptCoordinator, ScriptErrorListener, ScriptFailure, ScriptRuntime,
};
use crate::engine::storage::{StorageArea, StorageHolder};
use crate::engine::window::{Window, WindowId, WindowManager};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use url::{Origin, Url};

type SharedListener = Arc<RwLock<Option<Arc<dyn ScriptErrorListener>>>>;

/// State shared by all engine handles, script contexts and deferred jobs.
pub(crate) struct EngineInner {
    config: EngineConfig,
    transport: Arc<dyn Transport>,
    pub(crate) windows: WindowManager,
    pub(crate) scripts: ScriptCoordinator,
    refresh: RefreshScheduler,
    pub(crate) storage: StorageHolder,
    scanners: ResourcePool<MarkupScanner>,
    script_runtime: RwLock<Option<Arc<dyn ScriptRuntime>>>,
    error_listener: SharedListener,
    events: EventSender,
}

/// Headless browsing engine.
///
/// Loads URLs into windows, follows refresh directives according to the configured
/// policy and runs background script work per window. `HeadlessEngine` is a cheap handle:
/// clones share the same windows, storage and workers.
///
/// Navigation calls run on the calling thread and return once the page is installed
/// (and any synchronous refresh has been followed). Deferred work runs on the engine's
/// own worker threads; use [`wait_for_quiescence`](Self::wait_for_quiescence) to
/// synchronize with it.
#[derive(Clone)]
pub struct HeadlessEngine {
    inner: Arc<EngineInner>,
}

impl HeadlessEngine {
    /// Creates an engine with one blank window, which is the current window.
    pub fn new(config: EngineConfig, transport: Arc<dyn Transport>) -> Result<Self, EngineError> {
        let (events, _first_rx) = broadcast::channel::<EngineEvent>(config.event_channel_capacity);
        let scripts = ScriptCoordinator::new(&config)?;
        let error_listener: SharedListener = Arc::new(RwLock::new(None));

        let inner = Arc::new_cyclic(|weak: &Weak<EngineInner>| {
            scripts.set_error_reporter(error_reporter(weak.clone(), events.clone(), error_listener.clone()));

            EngineInner {
                transport,
                windows: WindowManager::new(events.clone(), config.replace_last_window),
                scripts,
                refresh: RefreshScheduler::new(config.refresh_policy.handler()),
                storage: StorageHolder::new(config.storage_quota),
                scanners: ResourcePool::new(MarkupScanner::new),
                script_runtime: RwLock::new(None),
                error_listener,
                events,
                config,
            }
        });

        inner.windows.open_window(None, "")?;
        log::info!("Headless engine started");

        Ok(Self { inner })
    }

    /// Creates an engine with the default configuration.
    pub fn with_transport(transport: Arc<dyn Transport>) -> Result<Self, EngineError> {
        Self::new(EngineConfig::default(), transport)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // ****************************************
    // ** Navigation

    /// Loads `url` into `window`. Relative URLs are resolved against the window's page.
    ///
    /// Returns the page the window shows when the call completes, which differs from the
    /// loaded one when a synchronous refresh or a page script navigated further.
    pub fn load(&self, window: WindowId, url: &str) -> Result<Arc<Page>, EngineError> {
        let url = self.resolve_url(window, url)?;
        self.inner.load_request(window, Request::get(url), 0)
    }

    pub fn load_request(&self, window: WindowId, request: Request) -> Result<Arc<Page>, EngineError> {
        self.inner.load_request(window, request, 0)
    }

    /// Installs an already fetched response in `window`, exactly as if it had been loaded.
    pub fn load_response(&self, window: WindowId, response: Response) -> Result<Arc<Page>, EngineError> {
        self.inner.windows.ensure_open(window)?;
        self.inner.commit(window, Arc::new(response), 0)
    }

    /// Installs a prebuilt page in `window`. No scripts run and no refresh is followed.
    pub fn navigate(&self, window: WindowId, page: Page) -> Result<Arc<Page>, EngineError> {
        let page = Arc::new(page);
        self.inner.install(window, page.clone())?;
        Ok(page)
    }

    /// Builds a page for `window` from `response` without installing it.
    pub fn build_page(&self, window: WindowId, response: Response) -> Page {
        Page::build(window, Arc::new(response), &self.inner.scanners)
    }

    fn resolve_url(&self, window: WindowId, input: &str) -> Result<Url, EngineError> {
        match Url::parse(input) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let page = self.inner.windows.page(window)?;
                page.url().join(input).map_err(|source| EngineError::InvalidUrl {
                    input: input.to_string(),
                    source,
                })
            }
            Err(source) => Err(EngineError::InvalidUrl {
                input: input.to_string(),
                source,
            }),
        }
    }

    // ****************************************
    // ** Windows

    /// Window navigation defaults to. `None` only after every window was closed with
    /// automatic replacement turned off.
    pub fn current_window(&self) -> Option<WindowId> {
        self.inner.windows.current_window()
    }

    pub fn set_current_window(&self, window: WindowId) -> Result<(), EngineError> {
        self.inner.windows.set_current_window(window)
    }

    pub fn open_window(&self, opener: Option<WindowId>, name: &str) -> Result<WindowId, EngineError> {
        self.inner.windows.open_window(opener, name)
    }

    pub fn open_frame(&self, parent: WindowId, name: &str) -> Result<WindowId, EngineError> {
        self.inner.windows.open_frame(parent, name)
    }

    /// Closes `window` and its frames. Their pending script work, pending refreshes and
    /// session storage go with them.
    pub fn close_window(&self, window: WindowId) -> Result<(), EngineError> {
        let closed = self.inner.windows.close(window)?;
        self.inner.cleanup(&closed);
        Ok(())
    }

    /// Closes every window and opens a fresh blank one, which becomes current.
    pub fn reset(&self) -> WindowId {
        let (window, closed) = self.inner.windows.reset();
        self.inner.cleanup(&closed);
        window
    }

    pub fn page(&self, window: WindowId) -> Result<Arc<Page>, EngineError> {
        self.inner.windows.page(window)
    }

    pub fn window(&self, window: WindowId) -> Result<Window, EngineError> {
        self.inner.windows.window(window)
    }

    pub fn top_level_windows(&self) -> Vec<WindowId> {
        self.inner.windows.top_level_windows()
    }

    pub fn window_by_name(&self, name: &str) -> Option<WindowId> {
        self.inner.windows.window_by_name(name)
    }

    /// Child frames of `window`, in creation order.
    pub fn frames(&self, window: WindowId) -> Result<Vec<WindowId>, EngineError> {
        self.inner.windows.children(window)
    }

    pub fn add_window_listener(&self, listener: Arc<dyn WindowListener>) -> ListenerId {
        self.inner.windows.add_listener(listener)
    }

    pub fn remove_window_listener(&self, id: ListenerId) -> bool {
        self.inner.windows.remove_listener(id)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    // ****************************************
    // ** Scripts

    /// Schedules `task` on the background context of `window`, after `delay`.
    pub fn schedule<F>(&self, window: WindowId, delay: Duration, task: F) -> Result<JobId, EngineError>
    where
        F: FnOnce(&ScriptContext) -> Result<(), ScriptError> + Send + 'static,
    {
        self.inner.schedule(window, delay, task)
    }

    /// Blocks until all background work is done or `timeout` elapses. Returns the number
    /// of jobs still outstanding.
    pub fn wait_for_quiescence(&self, timeout: Duration) -> usize {
        self.inner.scripts.wait_for_quiescence(timeout)
    }

    pub fn wait_for_jobs_starting_before(&self, delay: Duration, timeout: Duration) -> usize {
        self.inner.scripts.wait_for_jobs_starting_before(delay, timeout)
    }

    pub fn cancel_pending(&self, window: WindowId) -> usize {
        self.inner.refresh.supersede(window);
        self.inner.scripts.cancel_pending(window)
    }

    pub fn pending_jobs(&self) -> usize {
        self.inner.scripts.pending_count()
    }

    pub fn set_script_runtime(&self, runtime: Option<Arc<dyn ScriptRuntime>>) {
        *self.inner.script_runtime.write().unwrap_or_else(PoisonError::into_inner) = runtime;
    }

    pub fn set_script_error_listener(&self, listener: Option<Arc<dyn ScriptErrorListener>>) {
        *self.inner.error_listener.write().unwrap_or_else(PoisonError::into_inner) = listener;
    }

    // ****************************************
    // ** Refresh

    /// Replaces the refresh policy chosen in the configuration.
    pub fn set_refresh_handler(&self, handler: Arc<dyn RefreshHandler>) {
        self.inner.refresh.set_handler(handler);
    }

    /// What happened to the refresh directive of the last page loaded into `window`.
    pub fn last_refresh_outcome(&self, window: WindowId) -> RefreshOutcome {
        self.inner.refresh.last_outcome(window)
    }

    // ****************************************
    // ** Storage

    pub fn local_storage(&self, origin: &Origin) -> Arc<dyn StorageArea> {
        self.inner.storage.local_for(origin)
    }

    /// Local storage of the page shown in `window`.
    pub fn local_storage_for(&self, window: WindowId) -> Result<Arc<dyn StorageArea>, EngineError> {
        let page = self.inner.windows.page(window)?;
        Ok(self.inner.storage.local_for_url(page.url())?)
    }

    pub fn session_storage(&self, window: WindowId) -> Result<Arc<dyn StorageArea>, EngineError> {
        self.inner.windows.ensure_open(window)?;
        Ok(self.inner.storage.session_for(window))
    }

    pub fn storage(&self) -> &StorageHolder {
        &self.inner.storage
    }

    pub fn scanner_stats(&self) -> PoolStats {
        self.inner.scanners.stats()
    }
}

impl std::fmt::Debug for HeadlessEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessEngine")
            .field("windows", &self.inner.windows.top_level_windows())
            .field("scripts", &self.inner.scripts)
            .finish_non_exhaustive()
    }
}

impl EngineInner {
    pub(crate) fn load_request(
        self: &Arc<Self>,
        window: WindowId,
        request: Request,
        depth: usize,
    ) -> Result<Arc<Page>, EngineError> {
        self.windows.ensure_open(window)?;

        let url = request.url.clone();
        log::info!("Window[{window}]: loading {url}");
        publish(&self.events, EngineEvent::LoadStarted { window_id: window, url: url.clone() });

        let response = match self.transport.fetch(&request) {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Window[{window}]: failed to load {url}: {e}");
                publish(
                    &self.events,
                    EngineEvent::NavigationFailed {
                        window_id: window,
                        url: url.clone(),
                        error: e.to_string(),
                    },
                );
                return Err(EngineError::Transport { url, source: e });
            }
        };

        self.commit(window, Arc::new(response), depth)
    }

    /// Turns a response into the window's page, runs page scripts, then handles the status
    /// and any refresh directive.
    fn commit(
        self: &Arc<Self>,
        window: WindowId,
        response: Arc<Response>,
        depth: usize,
    ) -> Result<Arc<Page>, EngineError> {
        let page = Arc::new(Page::build(window, response, &self.scanners));
        self.install(window, page.clone())?;

        publish(
            &self.events,
            EngineEvent::LoadFinished {
                window_id: window,
                url: page.url().clone(),
                status: page.response().status(),
            },
        );

        self.run_page_scripts(&page);

        // A page script may have navigated elsewhere or closed the window
        match self.windows.page(window) {
            Ok(current) if Arc::ptr_eq(&current, &page) => {}
            Ok(current) => return Ok(current),
            Err(_) => return Ok(page),
        }

        let response = page.response();
        if self.config.fail_on_status_code && !response.is_success() {
            log::debug!("Window[{window}]: {} answered with status {}", page.url(), response.status());
            return Err(EngineError::HttpStatus {
                status: response.status(),
                url: page.url().clone(),
                response: response.clone(),
            });
        }

        self.process_refresh(window, page, depth)
    }

    /// Atomically swaps `page` into `window`. Pending work of the previous page is
    /// cancelled first; frames of the previous page are closed.
    fn install(&self, window: WindowId, page: Arc<Page>) -> Result<(), EngineError> {
        self.windows.ensure_open(window)?;
        if page.window_id() != window {
            return Err(EngineError::ForeignPage {
                window,
                page_window: page.window_id(),
            });
        }

        self.refresh.supersede(window);
        self.scripts.cancel_pending(window);

        let discarded = self.windows.navigate(window, page)?;
        self.cleanup(&discarded);
        Ok(())
    }

    fn process_refresh(
        self: &Arc<Self>,
        window: WindowId,
        page: Arc<Page>,
        depth: usize,
    ) -> Result<Arc<Page>, EngineError> {
        let directive = match RefreshScheduler::detect(&page) {
            Ok(Some(directive)) => directive,
            Ok(None) => {
                self.refresh.record(window, RefreshOutcome::Idle);
                return Ok(page);
            }
            Err(malformed) => {
                log::warn!(
                    "Window[{window}]: ignoring malformed refresh {} '{}': {}",
                    malformed.source,
                    malformed.value,
                    malformed.error
                );
                publish(
                    &self.events,
                    EngineEvent::MalformedDirective {
                        window_id: window,
                        source: malformed.source,
                        value: malformed.value.clone(),
                        error: malformed.error.to_string(),
                    },
                );
                self.refresh.record(window, RefreshOutcome::Malformed(malformed));
                return Ok(page);
            }
        };

        let action = self.refresh.decide(&directive);
        if action != RefreshAction::Suppress && depth >= self.config.max_refresh_depth {
            log::warn!("Window[{window}]: refresh chain exceeded {} at {}", self.config.max_refresh_depth, page.url());
            return Err(EngineError::RefreshLoop {
                window,
                url: page.url().clone(),
                limit: self.config.max_refresh_depth,
            });
        }

        match action {
            RefreshAction::Execute => {
                log::debug!(
                    "Window[{window}]: refreshing to {} ({}s, {})",
                    directive.target,
                    directive.delay,
                    directive.source
                );
                publish(
                    &self.events,
                    EngineEvent::RefreshExecuted {
                        window_id: window,
                        target: directive.target.clone(),
                        source: directive.source,
                    },
                );
                let target = directive.target.clone();
                self.refresh.record(window, RefreshOutcome::Executed(directive));
                self.load_request(window, Request::get(target), depth + 1)
            }
            RefreshAction::Suppress => {
                log::debug!("Window[{window}]: suppressed refresh to {} ({}s)", directive.target, directive.delay);
                publish(
                    &self.events,
                    EngineEvent::RefreshSuppressed {
                        window_id: window,
                        target: directive.target.clone(),
                        delay: directive.delay,
                    },
                );
                self.refresh.record(window, RefreshOutcome::Suppressed(directive));
                Ok(page)
            }
            RefreshAction::Defer(delay) => {
                let job = JobId::new();
                self.refresh.track(window, job);

                let weak = Arc::downgrade(self);
                let target = directive.target.clone();
                let source = directive.source;
                self.scripts.schedule_as(
                    job,
                    window,
                    delay,
                    Box::new(move |ctx| {
                        let engine = weak.upgrade().ok_or(ScriptError::WindowGone)?;
                        if ctx.is_cancelled() {
                            return Err(ScriptError::Cancelled);
                        }

                        engine.refresh.complete(window, ctx.job());
                        log::debug!("Window[{window}]: deferred refresh to {target}");
                        publish(
                            &engine.events,
                            EngineEvent::RefreshExecuted {
                                window_id: window,
                                target: target.clone(),
                                source,
                            },
                        );

                        engine
                            .load_request(window, Request::get(target.clone()), depth + 1)
                            .map(|_| ())
                            .map_err(|e| ScriptError::Navigation {
                                url: target.to_string(),
                                message: e.to_string(),
                            })
                    }),
                );

                publish(
                    &self.events,
                    EngineEvent::RefreshScheduled {
                        window_id: window,
                        target: directive.target.clone(),
                        delay: directive.delay,
                        job,
                    },
                );
                self.refresh.record(window, RefreshOutcome::Deferred { directive, job });
                Ok(page)
            }
        }
    }

    fn run_page_scripts(self: &Arc<Self>, page: &Arc<Page>) {
        if !self.config.javascript_enabled {
            return;
        }
        let runtime = self.script_runtime.read().unwrap_or_else(PoisonError::into_inner).clone();
        let Some(runtime) = runtime else {
            return;
        };

        let window = page.window_id();
        let ctx = ScriptContext::new(window, Arc::downgrade(self), None);
        let outcome = match catch_unwind(AssertUnwindSafe(|| runtime.on_page_loaded(page, &ctx))) {
            Ok(result) => result,
            Err(panic) => Err(ScriptError::Panicked {
                message: panic_message(panic.as_ref()),
            }),
        };

        match outcome {
            Ok(()) | Err(ScriptError::Cancelled) => {}
            Err(error) => self.scripts.report(ScriptFailure {
                window,
                job: None,
                url: Some(page.url().clone()),
                error,
            }),
        }
    }

    pub(crate) fn schedule<F>(
        self: &Arc<Self>,
        window: WindowId,
        delay: Duration,
        task: F,
    ) -> Result<JobId, EngineError>
    where
        F: FnOnce(&ScriptContext) -> Result<(), ScriptError> + Send + 'static,
    {
        self.windows.ensure_open(window)?;

        let weak = Arc::downgrade(self);
        Ok(self.scripts.schedule(
            window,
            delay,
            Box::new(move |job| {
                let ctx = ScriptContext::new(window, weak, Some(job.clone()));
                task(&ctx)
            }),
        ))
    }

    /// Releases everything bound to closed windows.
    fn cleanup(&self, closed: &[WindowId]) {
        for window in closed {
            self.scripts.forget_window(*window);
            self.refresh.forget_window(*window);
            self.storage.drop_window(*window);
        }
    }
}

/// Builds the reporter the script coordinator calls for every failure: log it, broadcast it
/// and hand it to the registered listener.
fn error_reporter(
    engine: Weak<EngineInner>,
    events: EventSender,
    listener: SharedListener,
) -> Arc<dyn Fn(ScriptFailure) + Send + Sync> {
    Arc::new(move |mut failure: ScriptFailure| {
        if failure.url.is_none() {
            failure.url = engine
                .upgrade()
                .and_then(|e| e.windows.page(failure.window).ok())
                .map(|page| page.url().clone());
        }

        log::warn!(
            "Window[{}]: script error at {}: {}",
            failure.window,
            failure.url.as_ref().map(Url::as_str).unwrap_or("<unknown>"),
            failure.error
        );
        publish(
            &events,
            EngineEvent::ScriptError {
                window_id: failure.window,
                url: failure.url.clone(),
                message: failure.error.to_string(),
            },
        );

        let listener = listener.read().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(listener) = listener {
            if catch_unwind(AssertUnwindSafe(|| listener.on_script_error(&failure))).is_err() {
                log::error!("Window[{}]: script error listener panicked", failure.window);
            }
        }
    })
}
