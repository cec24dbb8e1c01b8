//! Buffered HTTP response model.
//!
//! A [`Response`] is immutable once built. Its content type and charset are resolved
//! exactly once, in [`ResponseBuilder::build`], and never change afterwards.
//!
//! ## Notes
//! - The body is stored as raw bytes. Use [`Response::text`] to decode it with the
//!   resolved charset.
//! - Headers are an `http::HeaderMap`, which is **case-insensitive** for header names.
//! - `status_text` is derived from the status code's canonical reason phrase unless set
//!   explicitly, and is `"Unknown"` for non-standard codes.

use crate::engine::charset::{self, ContentInfo};
use encoding_rs::Encoding;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};
use url::Url;

#[derive(Debug, Clone)]
pub struct Response {
    url: Url,
    status: u16,
    status_text: String,
    headers: HeaderMap,
    body: Vec<u8>,
    content: ContentInfo,
}

impl Response {
    pub fn builder(url: Url) -> ResponseBuilder {
        ResponseBuilder {
            url,
            status: 200,
            status_text: None,
            headers: HeaderMap::new(),
            body: Vec::new(),
            charset: None,
        }
    }

    /// Final URL of the response (after redirects, if any).
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// 2xx and 3xx count as success.
    pub fn is_success(&self) -> bool {
        (200..400).contains(&self.status)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Value of a header as text. Values that are not visible ASCII are treated as missing.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn content_info(&self) -> &ContentInfo {
        &self.content
    }

    pub fn mime_type(&self) -> &str {
        &self.content.mime_type
    }

    pub fn charset(&self) -> &'static Encoding {
        self.content.charset
    }

    /// Body decoded with the resolved charset.
    pub fn text(&self) -> String {
        charset::decode(&self.body, self.content.charset)
    }
}

/// Builder for [`Response`]. Defaults to an empty `200 OK`.
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    url: Url,
    status: u16,
    status_text: Option<String>,
    headers: HeaderMap,
    body: Vec<u8>,
    charset: Option<String>,
}

impl ResponseBuilder {
    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn status_text<S: Into<String>>(mut self, text: S) -> Self {
        self.status_text = Some(text.into());
        self
    }

    /// Appends a header. Names or values that are not valid HTTP are skipped with a warning.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => log::warn!("Response[{}]: skipping invalid header '{}'", self.url, name),
        }
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn body<B: Into<Vec<u8>>>(mut self, body: B) -> Self {
        self.body = body.into();
        self
    }

    /// Forces the charset, overriding whatever the headers or content declare.
    pub fn charset(mut self, charset: Option<String>) -> Self {
        self.charset = charset;
        self
    }

    pub fn build(self) -> Response {
        let content = charset::resolve(self.charset.as_deref(), &self.headers, &self.body);
        let status_text = self.status_text.unwrap_or_else(|| {
            StatusCode::from_u16(self.status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("Unknown")
                .to_string()
        });

        Response {
            url: self.url,
            status: self.status,
            status_text,
            headers: self.headers,
            body: self.body,
            content,
        }
    }
}
