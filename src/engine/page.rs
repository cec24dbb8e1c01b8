//! Page model.
//!
//! A [`Page`] is the immutable result of loading a [`Response`] into a window. Pages are
//! shared as `Arc<Page>`: the window manager holds the current one, events carry old and
//! new pages, and nothing ever mutates a page after it is built.

mod scanner;

pub use scanner::{MarkupScanner, ScanResult};

use crate::engine::charset::ContentInfo;
use crate::engine::net::Response;
use crate::engine::pool::ResourcePool;
use crate::engine::window::WindowId;
use std::fmt;
use std::sync::Arc;
use url::Url;

pub const ABOUT_BLANK: &str = "about:blank";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageKind {
    /// HTML or XHTML markup
    Html,
    /// Any other textual content
    Text,
    /// Binary or unknown content
    Other,
}

pub struct Page {
    window: WindowId,
    url: Url,
    kind: PageKind,
    title: String,
    response: Arc<Response>,
    meta_refresh: Option<String>,
}

impl Page {
    /// The empty page every window starts with.
    pub fn blank(window: WindowId) -> Self {
        let url = blank_url();
        let response = Response::builder(url.clone())
            .header("content-type", "text/html; charset=utf-8")
            .build();

        Self {
            window,
            url,
            kind: PageKind::Html,
            title: String::new(),
            response: Arc::new(response),
            meta_refresh: None,
        }
    }

    /// Builds a page for `window` from a response. Markup is scanned with a pooled scanner.
    pub fn build(window: WindowId, response: Arc<Response>, scanners: &ResourcePool<MarkupScanner>) -> Self {
        let info = response.content_info();
        let kind = if info.is_markup() {
            PageKind::Html
        } else if info.is_text() {
            PageKind::Text
        } else {
            PageKind::Other
        };

        let scan = match kind {
            PageKind::Html => {
                let text = response.text();
                scanners.with(|scanner| scanner.scan(&text))
            }
            _ => ScanResult::default(),
        };

        Self {
            window,
            url: response.url().clone(),
            kind,
            title: scan.title,
            response,
            meta_refresh: scan.meta_refresh,
        }
    }

    /// Window this page was built for.
    pub fn window_id(&self) -> WindowId {
        self.window
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn kind(&self) -> PageKind {
        self.kind
    }

    /// Text of the markup `<title>`; empty for non-markup pages or when there is none.
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn response(&self) -> &Arc<Response> {
        &self.response
    }

    pub fn content_info(&self) -> &ContentInfo {
        self.response.content_info()
    }

    /// Raw `content` of the first `<meta http-equiv="refresh">`, if any.
    pub fn meta_refresh(&self) -> Option<&str> {
        self.meta_refresh.as_deref()
    }

    pub fn is_blank(&self) -> bool {
        self.url.as_str() == ABOUT_BLANK
    }

    /// Body decoded with the response charset.
    pub fn text(&self) -> String {
        self.response.text()
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("window", &self.window)
            .field("url", &self.url.as_str())
            .field("kind", &self.kind)
            .field("title", &self.title)
            .finish_non_exhaustive()
    }
}

fn blank_url() -> Url {
    match Url::parse(ABOUT_BLANK) {
        Ok(url) => url,
        Err(_) => unreachable!("about:blank is a valid url"),
    }
}
