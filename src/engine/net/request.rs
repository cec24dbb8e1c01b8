use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use url::Url;

/// A request handed to a [`Transport`](super::Transport).
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub headers: HeaderMap,
    /// Charset forced by the caller. Wins over anything the response declares.
    pub charset: Option<String>,
}

impl Request {
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            headers: HeaderMap::new(),
            charset: None,
        }
    }

    pub fn with_charset<S: Into<String>>(mut self, charset: S) -> Self {
        self.charset = Some(charset.into());
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}
