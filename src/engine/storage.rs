//! Storage for the headless engine.
//!
//! This module provides HTML5 **LocalStorage** and **SessionStorage** semantics:
//!
//! - **Local storage**: key/value data per origin, shared by every window showing a page of
//!   that origin. Survives window destruction for the lifetime of the engine.
//! - **Session storage**: key/value data per window, dropped when the window closes.
//!
//! All areas implement the [`StorageArea`] trait. The [`StorageHolder`] hands them out and
//! guarantees that the same scope always yields the same area instance. Every mutation is
//! published as a [`StorageEvent`] to subscribers.
//!
//! Nothing is persisted; all data lives in memory.

/// Storage area interface
pub mod area;
/// Storage change events
pub mod event;
mod holder;
mod memory;

pub use area::{StorageArea, StorageError};
pub use event::{StorageEvent, StorageScope};
pub use holder::{StorageHolder, Subscription};
pub use memory::MemoryArea;
