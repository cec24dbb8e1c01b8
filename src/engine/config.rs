//! Engine configuration.
//!
//! `EngineConfig` controls how a [`HeadlessEngine`](crate::HeadlessEngine) loads pages,
//! follows refresh directives and runs background script work.
//!
//! `EngineConfig` provides sensible defaults via [`Default`] and a fluent
//! [`EngineConfig::builder()`] for customization with validation.
//!
//! # Examples
//!
//! ## Use defaults
//! ```rust
//! use gosub_headless::config::EngineConfig;
//! let cfg = EngineConfig::default();
//! assert_eq!(cfg.max_refresh_depth, 20);
//! ```
//!
//! ## Customize with the builder
//! ```rust
//! use gosub_headless::config::EngineConfig;
//! use gosub_headless::refresh::RefreshPolicy;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = EngineConfig::builder()
//!     .refresh_policy(RefreshPolicy::Waiting)
//!     .worker_threads(2)
//!     .fail_on_status_code(true)
//!     .build()?; // returns Result<EngineConfig, EngineConfigError>
//! # Ok(()) }
//! ```
//!
//! # Fields (summary)
//! - `user_agent`: UA string handed to transports that send one.
//! - `refresh_policy`: how refresh directives are followed (default: threshold of 2 seconds).
//! - `max_refresh_depth`: maximum number of chained refreshes before giving up (default: 20).
//! - `worker_threads`: worker threads for background script work (default: number of CPUs, at most 4).
//! - `javascript_enabled`: run the page script runtime after each navigation.
//! - `fail_on_status_code`: report non-success statuses as [`EngineError::HttpStatus`](crate::EngineError::HttpStatus).
//! - `replace_last_window`: open a fresh blank window when the last top-level window closes.
//! - `storage_quota`: maximum items per storage area, `0` means unlimited.
//! - `event_channel_capacity`: capacity of the engine event broadcast channel.
//!
//! # Errors
//!
//! Builder validation returns [`EngineConfigError`] for zero worker threads, a zero
//! refresh depth or a zero channel capacity.

use crate::engine::refresh::RefreshPolicy;
use crate::engine::DEFAULT_CHANNEL_CAPACITY;
use serde::{Deserialize, Serialize};
use std::fmt;

const DEFAULT_USER_AGENT: &str = "Gosub/1.0 (X11; Linux x86_64) GosubHeadless/1.0";

/// Engine settings. Deserializes from partial input: missing fields keep their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub user_agent: String,
    pub refresh_policy: RefreshPolicy,
    pub max_refresh_depth: usize,
    pub worker_threads: usize,
    pub javascript_enabled: bool,
    pub fail_on_status_code: bool,
    pub replace_last_window: bool,
    pub storage_quota: usize,
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            refresh_policy: RefreshPolicy::Threshold { max_delay_secs: 2 },
            max_refresh_depth: 20,
            worker_threads: num_cpus::get().clamp(1, 4),
            javascript_enabled: true,
            fail_on_status_code: false,
            replace_last_window: true,
            storage_quota: 0,
            event_channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    inner: EngineConfig,
}

impl EngineConfigBuilder {
    #[inline]
    fn map(mut self, f: impl FnOnce(&mut EngineConfig)) -> Self {
        f(&mut self.inner);
        self
    }

    pub fn user_agent<S: Into<String>>(self, ua: S) -> Self { self.map(|c| c.user_agent = ua.into()) }
    pub fn refresh_policy(self, policy: RefreshPolicy) -> Self { self.map(|c| c.refresh_policy = policy) }
    pub fn max_refresh_depth(self, n: usize) -> Self { self.map(|c| c.max_refresh_depth = n) }
    pub fn worker_threads(self, n: usize) -> Self { self.map(|c| c.worker_threads = n) }
    pub fn javascript_enabled(self, on: bool) -> Self { self.map(|c| c.javascript_enabled = on) }
    pub fn fail_on_status_code(self, on: bool) -> Self { self.map(|c| c.fail_on_status_code = on) }
    pub fn replace_last_window(self, on: bool) -> Self { self.map(|c| c.replace_last_window = on) }
    pub fn storage_quota(self, items: usize) -> Self { self.map(|c| c.storage_quota = items) }
    pub fn event_channel_capacity(self, n: usize) -> Self { self.map(|c| c.event_channel_capacity = n) }

    /// Apply multiple changes in one go.
    pub fn with(self, f: impl FnOnce(&mut EngineConfig)) -> Self { self.map(f) }

    /// Validate and build the final config.
    pub fn build(self) -> Result<EngineConfig, EngineConfigError> {
        validate(&self.inner)?;
        Ok(self.inner)
    }
}

// ---------- Validation ----------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineConfigError {
    ZeroWorkers,
    ZeroRefreshDepth,
    ZeroChannelCapacity,
}

impl fmt::Display for EngineConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineConfigError::ZeroWorkers =>
                write!(f, "worker_threads must be at least 1"),
            EngineConfigError::ZeroRefreshDepth =>
                write!(f, "max_refresh_depth must be at least 1"),
            EngineConfigError::ZeroChannelCapacity =>
                write!(f, "event_channel_capacity must be at least 1"),
        }
    }
}
impl std::error::Error for EngineConfigError {}

fn validate(c: &EngineConfig) -> Result<(), EngineConfigError> {
    if c.worker_threads == 0 {
        return Err(EngineConfigError::ZeroWorkers);
    }
    if c.max_refresh_depth == 0 {
        return Err(EngineConfigError::ZeroRefreshDepth);
    }
    if c.event_channel_capacity == 0 {
        return Err(EngineConfigError::ZeroChannelCapacity);
    }
    Ok(())
}
