//! Refresh directive detection and policies.
//!
//! After a page is swapped into a window, the engine asks the [`RefreshScheduler`] whether
//! the page requests a follow-up navigation. The in-document `<meta http-equiv="refresh">`
//! is checked first, then the `Refresh` response header. The configured
//! [`RefreshHandler`] then decides whether the directive executes now, later, or not at all.
//!
//! Per window the scheduler walks `Idle -> DirectiveDetected -> {Executing | Suppressed} -> Idle`.
//! Only the most recently detected directive of a window is live: a deferred refresh is
//! superseded by any later navigation of that window.

mod handler;
mod parse;

pub use handler::{
    ImmediateRefreshHandler, NoRefreshHandler, RefreshAction, RefreshHandler, RefreshPolicy,
    ThresholdRefreshHandler, WaitingRefreshHandler,
};
pub use parse::{parse_refresh, DirectiveSource, RefreshDirective, RefreshParseError};

use crate::engine::page::Page;
use crate::engine::script::JobId;
use crate::engine::window::WindowId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

/// A refresh value that could not be parsed. Reported, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedDirective {
    pub source: DirectiveSource,
    pub value: String,
    pub error: RefreshParseError,
}

/// What happened to the last directive detected in a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The page carried no directive
    Idle,
    Executed(RefreshDirective),
    Suppressed(RefreshDirective),
    /// Scheduled on the window's background context
    Deferred { directive: RefreshDirective, job: JobId },
    Malformed(MalformedDirective),
}

pub struct RefreshScheduler {
    handler: RwLock<Arc<dyn RefreshHandler>>,
    pending: Mutex<HashMap<WindowId, JobId>>,
    outcomes: Mutex<HashMap<WindowId, RefreshOutcome>>,
}

impl RefreshScheduler {
    pub fn new(handler: Arc<dyn RefreshHandler>) -> Self {
        Self {
            handler: RwLock::new(handler),
            pending: Mutex::new(HashMap::new()),
            outcomes: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_handler(&self, handler: Arc<dyn RefreshHandler>) {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = handler;
    }

    pub fn handler(&self) -> Arc<dyn RefreshHandler> {
        self.handler.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Finds the refresh directive of a page: meta declaration first, then the response header.
    pub fn detect(page: &Page) -> Result<Option<RefreshDirective>, MalformedDirective> {
        let (source, value) = match page.meta_refresh() {
            Some(value) => (DirectiveSource::Meta, value),
            None => match page.response().header("refresh") {
                Some(value) => (DirectiveSource::Header, value),
                None => return Ok(None),
            },
        };

        parse_refresh(value, page.url(), source)
            .map(Some)
            .map_err(|error| MalformedDirective {
                source,
                value: value.to_string(),
                error,
            })
    }

    pub fn decide(&self, directive: &RefreshDirective) -> RefreshAction {
        self.handler().handle(directive)
    }

    /// Records a deferred refresh as the live directive of `window`.
    pub fn track(&self, window: WindowId, job: JobId) {
        self.pending().insert(window, job);
    }

    /// Drops the live deferred refresh of `window`, returning its job.
    pub fn supersede(&self, window: WindowId) -> Option<JobId> {
        self.pending().remove(&window)
    }

    /// Marks a deferred refresh as done. Ignored when a newer one has replaced it.
    pub fn complete(&self, window: WindowId, job: JobId) {
        let mut pending = self.pending();
        if pending.get(&window) == Some(&job) {
            pending.remove(&window);
        }
    }

    pub fn pending_job(&self, window: WindowId) -> Option<JobId> {
        self.pending().get(&window).copied()
    }

    pub fn record(&self, window: WindowId, outcome: RefreshOutcome) {
        self.outcomes().insert(window, outcome);
    }

    pub fn last_outcome(&self, window: WindowId) -> RefreshOutcome {
        self.outcomes().get(&window).cloned().unwrap_or(RefreshOutcome::Idle)
    }

    pub fn forget_window(&self, window: WindowId) {
        self.pending().remove(&window);
        self.outcomes().remove(&window);
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<WindowId, JobId>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn outcomes(&self) -> MutexGuard<'_, HashMap<WindowId, RefreshOutcome>> {
        self.outcomes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RefreshScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshScheduler")
            .field("handler", &self.handler())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::net::Response;
    use crate::engine::page::MarkupScanner;
    use crate::engine::pool::ResourcePool;
    use url::Url;

    fn page(html: &str, refresh_header: Option<&str>) -> Page {
        let mut builder = Response::builder(Url::parse("https://a.test/p").unwrap())
            .header("content-type", "text/html")
            .body(html);
        if let Some(value) = refresh_header {
            builder = builder.header("Refresh", value);
        }
        let pool = ResourcePool::new(MarkupScanner::new);
        Page::build(WindowId::new(), Arc::new(builder.build()), &pool)
    }

    #[test]
    fn meta_takes_precedence_over_header() {
        let p = page(r#"<meta http-equiv="refresh" content="1; url=/meta">"#, Some("2; url=/header"));
        let d = RefreshScheduler::detect(&p).unwrap().unwrap();
        assert_eq!(d.source, DirectiveSource::Meta);
        assert_eq!(d.target.path(), "/meta");
    }

    #[test]
    fn header_used_without_meta() {
        let p = page("<p>hi</p>", Some("2; url=/header"));
        let d = RefreshScheduler::detect(&p).unwrap().unwrap();
        assert_eq!(d.source, DirectiveSource::Header);
        assert_eq!(d.delay, 2);
    }

    #[test]
    fn no_directive() {
        assert_eq!(RefreshScheduler::detect(&page("<p>hi</p>", None)), Ok(None));
    }

    #[test]
    fn malformed_directive_is_reported() {
        let p = page("", Some("later; url=/x"));
        let err = RefreshScheduler::detect(&p).unwrap_err();
        assert_eq!(err.source, DirectiveSource::Header);
        assert_eq!(err.value, "later; url=/x");
    }

    #[test]
    fn only_latest_deferred_refresh_is_live() {
        let scheduler = RefreshScheduler::new(RefreshPolicy::Waiting.handler());
        let window = WindowId::new();
        let (first, second) = (JobId::new(), JobId::new());

        scheduler.track(window, first);
        scheduler.track(window, second);
        scheduler.complete(window, first);
        assert_eq!(scheduler.pending_job(window), Some(second));

        assert_eq!(scheduler.supersede(window), Some(second));
        assert_eq!(scheduler.pending_job(window), None);
    }

    #[test]
    fn handler_can_be_swapped() {
        let scheduler = RefreshScheduler::new(RefreshPolicy::Immediate.handler());
        let d = RefreshDirective {
            target: Url::parse("https://a.test/").unwrap(),
            delay: 10,
            source: DirectiveSource::Header,
        };
        assert_eq!(scheduler.decide(&d), RefreshAction::Execute);

        scheduler.set_handler(Arc::new(ThresholdRefreshHandler::new(5)));
        assert_eq!(scheduler.decide(&d), RefreshAction::Suppress);
    }
}
