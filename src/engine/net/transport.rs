use crate::engine::errors::TransportError;
use crate::engine::net::{Request, Response};
use std::time::Duration;

/// Fetches a request and returns the fully buffered response.
///
/// Called from the caller's thread for synchronous navigation and from blocking worker
/// threads for deferred refreshes, so implementations must be thread-safe.
pub trait Transport: Send + Sync {
    fn fetch(&self, request: &Request) -> Result<Response, TransportError>;
}

/// Transport doing real HTTP through a blocking `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .cookie_store(true)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, request: &Request) -> Result<Response, TransportError> {
        log::debug!("Fetching {} {}", request.method, request.url);

        let res = self
            .client
            .request(request.method.clone(), request.url.clone())
            .headers(request.headers.clone())
            .send()
            .map_err(classify)?;

        // Fetch results
        let final_url = res.url().clone();
        let status = res.status();
        let headers = res.headers().clone();

        // We don't do streaming
        let body = res.bytes().map_err(classify)?.to_vec();

        Ok(Response::builder(final_url)
            .status(status.as_u16())
            .status_text(status.canonical_reason().unwrap_or("Unknown"))
            .headers(headers)
            .body(body)
            .charset(request.charset.clone())
            .build())
    }
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout;
    }

    // TLS and proxy failures also count as connect errors, so they are checked first
    match failure_kind(&err) {
        Some(FailureKind::Proxy) => TransportError::Proxy(describe(&err)),
        Some(FailureKind::Tls) => TransportError::Tls(describe(&err)),
        None if err.is_connect() => TransportError::Connect(describe(&err)),
        None => TransportError::Http(err),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    Tls,
    Proxy,
}

const PROXY_MARKERS: &[&str] = &["proxy", "tunnel"];
const TLS_MARKERS: &[&str] = &["tls", "ssl", "certificate", "handshake"];

/// Finds what failed by walking the source chain. The TLS stack and hyper only expose
/// their errors as boxed sources, so the messages are inspected.
fn failure_kind(err: &(dyn std::error::Error + 'static)) -> Option<FailureKind> {
    let mut kind = None;
    let mut current = Some(err);
    while let Some(e) = current {
        let message = e.to_string().to_ascii_lowercase();
        if PROXY_MARKERS.iter().any(|m| message.contains(m)) {
            return Some(FailureKind::Proxy);
        }
        if TLS_MARKERS.iter().any(|m| message.contains(m)) {
            kind = Some(FailureKind::Tls);
        }
        current = e.source();
    }
    kind
}

/// The error and its sources on one line.
fn describe(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut current = err.source();
    while let Some(source) = current {
        parts.push(source.to_string());
        current = source.source();
    }
    parts.join(": ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt;

    #[derive(Debug)]
    struct Layer {
        message: &'static str,
        source: Option<Box<Layer>>,
    }

    impl Layer {
        fn chain(messages: &[&'static str]) -> Layer {
            let mut layer: Option<Box<Layer>> = None;
            for message in messages.iter().rev() {
                layer = Some(Box::new(Layer {
                    message: *message,
                    source: layer,
                }));
            }
            *layer.unwrap()
        }
    }

    impl fmt::Display for Layer {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.message)
        }
    }

    impl std::error::Error for Layer {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            self.source.as_deref().map(|l| l as &(dyn std::error::Error + 'static))
        }
    }

    #[test]
    fn certificate_failure_is_tls() {
        let err = Layer::chain(&[
            "error sending request for url (https://a.test/)",
            "client error (Connect)",
            "invalid peer certificate: UnknownIssuer",
        ]);
        assert_eq!(failure_kind(&err), Some(FailureKind::Tls));
    }

    #[test]
    fn tunnel_failure_is_proxy() {
        let err = Layer::chain(&[
            "error sending request for url (https://a.test/)",
            "client error (Connect)",
            "unsuccessful tunnel",
        ]);
        assert_eq!(failure_kind(&err), Some(FailureKind::Proxy));
    }

    #[test]
    fn proxy_wins_over_tls() {
        let err = Layer::chain(&["proxy handshake failed", "tls alert"]);
        assert_eq!(failure_kind(&err), Some(FailureKind::Proxy));
    }

    #[test]
    fn refused_connection_is_neither() {
        let err = Layer::chain(&["client error (Connect)", "Connection refused (os error 111)"]);
        assert_eq!(failure_kind(&err), None);
        assert_eq!(describe(&err), "client error (Connect): Connection refused (os error 111)");
    }

    #[test]
    fn unreachable_host_is_connect_error() {
        let transport = HttpTransport::new("gosub-test").unwrap();
        let err = transport.fetch(&Request::get(url::Url::parse("http://127.0.0.1:1/").unwrap())).unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)), "{err:?}");
    }
}
