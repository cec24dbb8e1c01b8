//! Background script coordination.
//!
//! Script work that does not run inside a navigation call (timers, deferred refreshes,
//! callbacks) is scheduled on the [`ScriptCoordinator`]. It owns a dedicated tokio runtime,
//! separate from whatever thread drives navigation, and runs each job on a blocking worker
//! thread once its delay has elapsed.
//!
//! Every window has its own execution lane: jobs of one window never run concurrently,
//! jobs of different windows may. Cancellation is cooperative. [`ScriptCoordinator::cancel_pending`]
//! voids every job of a window that has not started yet and flags the running one through
//! its [`JobContext`]; a job already past its cancellation check finishes normally.
//!
//! A failing or panicking job is reported as a [`ScriptFailure`] and never takes the worker
//! down.

mod context;

pub use context::ScriptContext;

use crate::engine::config::EngineConfig;
use crate::engine::errors::{EngineError, ScriptError};
use crate::engine::page::Page;
use crate::engine::window::WindowId;
use std::collections::HashMap;
use std::fmt::Display;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::runtime::{Handle, Runtime};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Identifier of a scheduled job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    pub(crate) fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handed to a running job.
#[derive(Debug, Clone)]
pub struct JobContext {
    window: WindowId,
    job: JobId,
    token: CancellationToken,
}

impl JobContext {
    pub fn window(&self) -> WindowId {
        self.window
    }

    pub fn job(&self) -> JobId {
        self.job
    }

    /// True once the job's window was navigated away, closed or had its work cancelled.
    /// Long-running jobs should check this and return [`ScriptError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }
}

pub type Job = Box<dyn FnOnce(&JobContext) -> Result<(), ScriptError> + Send + 'static>;

/// A failure inside script work, attributed to its window and location.
#[derive(Debug, Clone)]
pub struct ScriptFailure {
    pub window: WindowId,
    /// `None` for script work that ran synchronously during a navigation
    pub job: Option<JobId>,
    /// URL of the page the work belonged to, when known
    pub url: Option<Url>,
    pub error: ScriptError,
}

/// Runs the scripts of a freshly loaded page. The engine calls it synchronously, on the
/// navigating thread, right after the page is installed in its window.
pub trait ScriptRuntime: Send + Sync {
    fn on_page_loaded(&self, page: &Page, ctx: &ScriptContext) -> Result<(), ScriptError>;
}

/// Receives every script failure, synchronous or scheduled.
pub trait ScriptErrorListener: Send + Sync {
    fn on_script_error(&self, failure: &ScriptFailure);
}

pub(crate) type ErrorReporter = Arc<dyn Fn(ScriptFailure) + Send + Sync>;

struct WindowSlot {
    token: CancellationToken,
    lane: Arc<tokio::sync::Mutex<()>>,
}

impl WindowSlot {
    fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            lane: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

struct Tracked {
    window: WindowId,
    /// `None` when the delay is too large to be represented
    due: Option<Instant>,
    started: bool,
}

#[derive(Default)]
struct Tracker {
    jobs: Mutex<HashMap<JobId, Tracked>>,
    changed: Condvar,
}

impl Tracker {
    fn jobs(&self) -> MutexGuard<'_, HashMap<JobId, Tracked>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_started(&self, job: JobId) {
        if let Some(tracked) = self.jobs().get_mut(&job) {
            tracked.started = true;
        }
    }

    fn finish(&self, job: JobId) {
        self.jobs().remove(&job);
        self.changed.notify_all();
    }
}

/// Removes a job from the tracker however its task ends (completion, cancellation, shutdown).
struct Completion {
    tracker: Arc<Tracker>,
    job: JobId,
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.tracker.finish(self.job);
    }
}

pub struct ScriptCoordinator {
    runtime: Option<Runtime>,
    handle: Handle,
    slots: Mutex<HashMap<WindowId, WindowSlot>>,
    tracker: Arc<Tracker>,
    reporter: Arc<RwLock<Option<ErrorReporter>>>,
}

impl ScriptCoordinator {
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads)
            .thread_name("gosub-script")
            .enable_all()
            .build()
            .map_err(|e| EngineError::Runtime(e.to_string()))?;

        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
            slots: Mutex::new(HashMap::new()),
            tracker: Arc::new(Tracker::default()),
            reporter: Arc::new(RwLock::new(None)),
        })
    }

    pub(crate) fn set_error_reporter(&self, reporter: ErrorReporter) {
        *self.reporter.write().unwrap_or_else(PoisonError::into_inner) = Some(reporter);
    }

    /// Reports a failure through the registered reporter, or logs it when there is none.
    pub(crate) fn report(&self, failure: ScriptFailure) {
        report(&self.reporter, failure);
    }

    /// Runs `job` on the background context of `window`, no earlier than `delay` from now.
    pub fn schedule(&self, window: WindowId, delay: Duration, job: Job) -> JobId {
        let id = JobId::new();
        self.schedule_as(id, window, delay, job);
        id
    }

    /// Like [`schedule`](Self::schedule) with an id allocated by the caller, so the id can
    /// be recorded before the job gets a chance to run.
    pub(crate) fn schedule_as(&self, id: JobId, window: WindowId, delay: Duration, job: Job) {
        let (token, lane) = {
            let mut slots = self.slots();
            let slot = slots.entry(window).or_insert_with(WindowSlot::new);
            (slot.token.clone(), slot.lane.clone())
        };

        self.tracker.jobs().insert(
            id,
            Tracked {
                window,
                due: Instant::now().checked_add(delay),
                started: false,
            },
        );
        log::trace!("Window[{window}]: scheduled job {id} in {delay:?}");

        let completion = Completion {
            tracker: self.tracker.clone(),
            job: id,
        };
        let tracker = self.tracker.clone();
        let reporter = self.reporter.clone();

        self.handle.spawn(async move {
            let _completion = completion;

            tokio::select! {
                _ = token.cancelled() => {
                    log::trace!("Window[{window}]: job {id} cancelled before start");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            // One job per window at a time
            let _lane = tokio::select! {
                _ = token.cancelled() => return,
                guard = lane.lock_owned() => guard,
            };
            tracker.mark_started(id);
            if token.is_cancelled() {
                return;
            }

            let ctx = JobContext { window, job: id, token };
            let joined = tokio::task::spawn_blocking(move || {
                let outcome = match catch_unwind(AssertUnwindSafe(|| job(&ctx))) {
                    Ok(result) => result,
                    Err(panic) => Err(ScriptError::Panicked {
                        message: panic_message(panic.as_ref()),
                    }),
                };

                match outcome {
                    Ok(()) | Err(ScriptError::Cancelled) => {}
                    Err(error) => report(
                        &reporter,
                        ScriptFailure {
                            window,
                            job: Some(id),
                            url: None,
                            error,
                        },
                    ),
                }
            })
            .await;

            if let Err(e) = joined {
                log::error!("Window[{window}]: job {id} did not complete: {e}");
            }
        });
    }

    /// Blocks until no job is pending in any window, or `timeout` elapses.
    /// Returns the number of jobs still outstanding, `0` on full quiescence.
    ///
    /// Must not be called from inside a job: the calling job counts as outstanding.
    pub fn wait_for_quiescence(&self, timeout: Duration) -> usize {
        let jobs = self.tracker.jobs();
        let (jobs, _) = self
            .tracker
            .changed
            .wait_timeout_while(jobs, timeout, |jobs| !jobs.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
        jobs.len()
    }

    /// Blocks until every job due to start within `delay` from now has finished, or
    /// `timeout` elapses. Jobs due later are left alone. Returns the number of jobs still
    /// outstanding in total.
    pub fn wait_for_jobs_starting_before(&self, delay: Duration, timeout: Duration) -> usize {
        let limit = Instant::now().checked_add(delay);
        let jobs = self.tracker.jobs();
        let (jobs, _) = self
            .tracker
            .changed
            .wait_timeout_while(jobs, timeout, |jobs| {
                jobs.values().any(|t| {
                    t.started
                        || match (t.due, limit) {
                            (_, None) => true,
                            (None, Some(_)) => false,
                            (Some(due), Some(limit)) => due <= limit,
                        }
                })
            })
            .unwrap_or_else(PoisonError::into_inner);
        jobs.len()
    }

    /// Voids every job of `window` that has not started and flags the running one.
    /// Returns how many jobs were voided.
    pub fn cancel_pending(&self, window: WindowId) -> usize {
        {
            let mut slots = self.slots();
            let Some(slot) = slots.get_mut(&window) else {
                return 0;
            };
            slot.token.cancel();
            // Later jobs get a fresh token but keep the lane, so they still wait for a
            // cancelled job that is already running.
            slot.token = CancellationToken::new();
        }

        let voided = {
            let mut jobs = self.tracker.jobs();
            let before = jobs.len();
            jobs.retain(|_, t| t.window != window || t.started);
            before - jobs.len()
        };
        self.tracker.changed.notify_all();

        if voided > 0 {
            log::debug!("Window[{window}]: cancelled {voided} pending job(s)");
        }
        voided
    }

    /// Cancels the work of a closed window and drops its execution lane.
    pub fn forget_window(&self, window: WindowId) {
        self.cancel_pending(window);
        self.slots().remove(&window);
    }

    /// Number of jobs scheduled or running across all windows.
    pub fn pending_count(&self) -> usize {
        self.tracker.jobs().len()
    }

    pub fn pending_for(&self, window: WindowId) -> usize {
        self.tracker.jobs().values().filter(|t| t.window == window).count()
    }

    /// Cancels all outstanding work. Jobs already running are flagged and left to finish.
    pub fn shutdown(&self) {
        let windows: Vec<WindowId> = self.slots().keys().copied().collect();
        for window in windows {
            self.cancel_pending(window);
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<WindowId, WindowSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ScriptCoordinator {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(runtime) = self.runtime.take() {
            // Does not wait for blocking workers, so this is safe from any thread
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for ScriptCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptCoordinator")
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

fn report(reporter: &RwLock<Option<ErrorReporter>>, failure: ScriptFailure) {
    let reporter = reporter.read().unwrap_or_else(PoisonError::into_inner).clone();
    match reporter {
        Some(reporter) => reporter(failure),
        None => log::error!("Window[{}]: script error: {}", failure.window, failure.error),
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
