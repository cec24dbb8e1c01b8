use crate::engine::errors::TransportError;
use crate::engine::net::{Request, Response, Transport};
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use http::HeaderMap;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use url::Url;

#[derive(Debug, Clone)]
struct Canned {
    status: u16,
    headers: HeaderMap,
    body: Vec<u8>,
}

/// In-memory transport serving canned responses by URL.
///
/// Unknown URLs fail with [`TransportError::NotFound`]. Every request is recorded, so
/// callers can check what was fetched and in which order.
#[derive(Debug, Default)]
pub struct StaticTransport {
    responses: Mutex<HashMap<Url, Canned>>,
    requests: Mutex<Vec<Url>>,
}

impl StaticTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a `200 OK` HTML response.
    pub fn add_html(&self, url: &str, html: &str) -> &Self {
        self.add(url, 200, "text/html; charset=utf-8", html.as_bytes())
    }

    pub fn add(&self, url: &str, status: u16, content_type: &str, body: &[u8]) -> &Self {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(content_type) {
            headers.insert(CONTENT_TYPE, value);
        }
        self.add_with_headers(url, status, headers, body)
    }

    /// Registers a response with an explicit header map.
    pub fn add_with_headers(&self, url: &str, status: u16, headers: HeaderMap, body: &[u8]) -> &Self {
        match Url::parse(url) {
            Ok(url) => {
                self.responses().insert(
                    url,
                    Canned {
                        status,
                        headers,
                        body: body.to_vec(),
                    },
                );
            }
            Err(e) => log::warn!("StaticTransport: ignoring invalid url '{url}': {e}"),
        }
        self
    }

    /// Adds a header to an already registered response.
    pub fn add_header(&self, url: &str, name: HeaderName, value: HeaderValue) -> &Self {
        if let Ok(url) = Url::parse(url) {
            if let Some(canned) = self.responses().get_mut(&url) {
                canned.headers.append(name, value);
            }
        }
        self
    }

    /// All requested URLs, in request order.
    pub fn requests(&self) -> Vec<Url> {
        self.requests.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        match Url::parse(url) {
            Ok(url) => self.requests().iter().filter(|u| **u == url).count(),
            Err(_) => 0,
        }
    }

    fn responses(&self) -> MutexGuard<'_, HashMap<Url, Canned>> {
        self.responses.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Transport for StaticTransport {
    fn fetch(&self, request: &Request) -> Result<Response, TransportError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.url.clone());

        let canned = self
            .responses()
            .get(&request.url)
            .cloned()
            .ok_or_else(|| TransportError::NotFound(request.url.clone()))?;

        Ok(Response::builder(request.url.clone())
            .status(canned.status)
            .headers(canned.headers)
            .body(canned.body)
            .charset(request.charset.clone())
            .build())
    }
}
