use crate::engine::net::Response;
use crate::engine::storage::StorageError;
use crate::engine::window::WindowId;
use std::sync::Arc;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Transport error while loading {url}: {source}")]
    Transport {
        url: Url,
        #[source]
        source: TransportError,
    },

    /// The response was swapped into the window, but its status code signals a failure.
    #[error("HTTP status {status} for {url}")]
    HttpStatus {
        status: u16,
        url: Url,
        response: Arc<Response>,
    },

    #[error("Invalid URL '{input}': {source}")]
    InvalidUrl {
        input: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Window {0} not found")]
    WindowNotFound(WindowId),

    #[error("Window {0} is already closed")]
    WindowClosed(WindowId),

    #[error("Page belongs to window {page_window}, cannot be placed into window {window}")]
    ForeignPage {
        window: WindowId,
        page_window: WindowId,
    },

    #[error("Refresh chain in window {window} exceeded {limit} redirects at {url}")]
    RefreshLoop {
        window: WindowId,
        url: Url,
        limit: usize,
    },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl EngineError {
    /// Returns true for errors caused by calling the API incorrectly (closed or unknown
    /// windows, pages placed in the wrong window). These are never worth retrying.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            EngineError::WindowNotFound(_)
                | EngineError::WindowClosed(_)
                | EngineError::ForeignPage { .. }
        )
    }

    /// The response attached to the error, if any.
    pub fn response(&self) -> Option<&Arc<Response>> {
        match self {
            EngineError::HttpStatus { response, .. } => Some(response),
            _ => None,
        }
    }
}

/// Failures reported by a [`Transport`](crate::net::Transport).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("TLS failure: {0}")]
    Tls(String),

    #[error("proxy failure: {0}")]
    Proxy(String),

    #[error("request timed out")]
    Timeout,

    #[error("no response available for {0}")]
    NotFound(Url),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("resource #{resource} was checked out from pool #{owner}, not from pool #{pool}")]
    ForeignResource { resource: u64, owner: u64, pool: u64 },
}

/// Failure inside scheduled or synchronous script work.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    #[error("{message}")]
    Failed { message: String },

    #[error("script panicked: {message}")]
    Panicked { message: String },

    /// Returned by jobs that noticed their cancellation. Never reported as a failure.
    #[error("script job cancelled")]
    Cancelled,

    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("window is gone")]
    WindowGone,
}

impl ScriptError {
    pub fn failed(message: impl Into<String>) -> Self {
        ScriptError::Failed {
            message: message.into(),
        }
    }
}
