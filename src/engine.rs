//! Navigation and window orchestration core of the Gosub headless engine.
//!
//! The [`HeadlessEngine`] turns fetched responses into pages, swaps them into windows,
//! follows refresh directives and coordinates background script work per window.
//!
//! # Main Types
//!
//! - [`HeadlessEngine`]: entry point wiring transport, windows, refresh and scripts together.
//! - [`EngineConfig`]: engine configuration with a validating builder.
//! - [`WindowManager`](window::WindowManager): tree of windows and frames plus listener fan-out.
//! - [`ScriptCoordinator`](script::ScriptCoordinator): per-window background job execution.
//! - [`ResourcePool`](pool::ResourcePool): thread-safe LIFO pool of reusable helpers.
//! - [`StorageHolder`](storage::StorageHolder): origin and window scoped key/value storage.
//!
//! # Example
//!
//! ```no_run
//! use gosub_headless::{EngineConfig, HeadlessEngine};
//! use gosub_headless::net::HttpTransport;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default();
//! let transport = Arc::new(HttpTransport::new(&config.user_agent)?);
//! let engine = HeadlessEngine::new(config, transport)?;
//!
//! let window = engine.current_window().ok_or("no open window")?;
//! let page = engine.load(window, "https://example.com/")?;
//! println!("{}: {}", page.url(), page.title());
//! # Ok(()) }
//! ```

/// Content type and charset resolution
pub mod charset;
/// Engine configuration
pub mod config;
#[allow(clippy::module_inception)]
mod engine;
/// Errors returned by the engine
pub mod errors;
/// Window events, listeners and the engine event bus
pub mod events;
/// Network boundary: requests, responses and transports
pub mod net;
/// Page model
pub mod page;
/// Reusable resource pool
pub mod pool;
/// Refresh directive detection and policies
pub mod refresh;
/// Background script coordination
pub mod script;
/// Local and session storage
pub mod storage;
/// Window lifecycle management
pub mod window;

pub use config::EngineConfig;
pub use engine::HeadlessEngine;
pub use errors::EngineError;
pub use events::{EngineEvent, WindowEvent, WindowEventKind, WindowListener};
pub use page::Page;
pub use window::WindowId;

/// Default capacity of broadcast channels used for engine and storage events.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 128;
