//! HTTP transport seam.
//!
//! The backend surface is plain REST/JSON, so the transport is a small trait
//! over request/response values. Production uses [`ReqwestTransport`]; tests
//! script the trait with in-memory implementations so every client above the
//! transport can be exercised without a network.

use async_trait::async_trait;
use serde::Serialize;
use url::Url;

/// HTTP methods used by the backend surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Method {
    const fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// An outbound request, relative to the configured base URL.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    /// Path and query, e.g. `/cart?customerId=...`.
    pub path: String,
    /// Bearer credential attached by the authenticated wrapper.
    pub bearer: Option<String>,
    /// JSON body, if any.
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    /// Build a GET request for a path.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            bearer: None,
            body: None,
        }
    }

    /// Build a POST request with a JSON body.
    #[must_use]
    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            bearer: None,
            body: Some(body),
        }
    }

    /// Build a DELETE request for a path.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::Delete,
            path: path.into(),
            bearer: None,
            body: None,
        }
    }

    /// Attach a bearer credential.
    #[must_use]
    pub fn with_bearer(mut self, token: Option<String>) -> Self {
        self.bearer = token;
        self
    }
}

/// A raw response: status plus the body as text.
///
/// Bodies are read as text first so non-JSON error payloads survive into
/// diagnostics; JSON decoding happens a layer up.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    /// Whether the status is in the 2xx range.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// Whether the response is an authorization failure.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        self.status == 401
    }
}

/// Transport-level failures: the request never produced a backend response.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Network failure (DNS, connect, TLS, read).
    #[error("network error: {0}")]
    Network(String),

    /// The path could not be joined onto the base URL.
    #[error("invalid request URL: {0}")]
    Url(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

/// The transport seam all backend calls go through.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Issue a request and return the raw response.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when no backend response was obtained;
    /// backend-reported failures come back as an [`HttpResponse`] with a
    /// non-2xx status.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// Production transport backed by `reqwest`.
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl ReqwestTransport {
    /// Create a transport for the given base URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying client cannot be constructed.
    pub fn new(base_url: Url, timeout: std::time::Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    fn url_for(&self, path: &str) -> Result<Url, TransportError> {
        // Url::join treats the base path as a directory only with a trailing
        // slash, so splice the path directly to keep any base prefix intact.
        let mut url = self.base_url.clone();
        let joined = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        match joined.split_once('?') {
            Some((p, query)) => {
                url.set_path(p);
                url.set_query(Some(query));
            }
            None => {
                url.set_path(&joined);
                url.set_query(None);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let url = self.url_for(&request.path)?;

        let mut builder = self.client.request(request.method.as_reqwest(), url);

        if let Some(token) = &request.bearer {
            builder = builder.bearer_auth(token);
        }

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(HttpResponse { status, body })
    }
}

/// Serialize a value into a JSON body.
///
/// Serialization of our own wire types cannot fail in practice; a failure
/// is reported as an empty object with an error log rather than a panic.
pub(crate) fn json_body<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_else(|err| {
        tracing::error!(error = %err, "failed to serialize request body");
        serde_json::Value::Object(serde_json::Map::new())
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_response_status_predicates() {
        let ok = HttpResponse {
            status: 200,
            body: String::new(),
        };
        assert!(ok.is_success());
        assert!(!ok.is_unauthorized());

        let unauthorized = HttpResponse {
            status: 401,
            body: String::new(),
        };
        assert!(!unauthorized.is_success());
        assert!(unauthorized.is_unauthorized());
    }

    #[test]
    fn test_url_for_joins_path_and_query() {
        let transport = ReqwestTransport::new(
            Url::parse("https://api.example.com/v1").unwrap(),
            std::time::Duration::from_secs(5),
        )
        .unwrap();

        let url = transport.url_for("/cart?customerId=abc").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/cart?customerId=abc");

        let url = transport.url_for("customer/logout").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/customer/logout");
    }

    #[test]
    fn test_url_for_without_base_prefix() {
        let transport = ReqwestTransport::new(
            Url::parse("https://api.example.com").unwrap(),
            std::time::Duration::from_secs(5),
        )
        .unwrap();

        let url = transport.url_for("/sell_order/create").unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/sell_order/create");
    }

    #[test]
    fn test_request_builders() {
        let request = HttpRequest::post("/sell_order/create", serde_json::json!({"a": 1}))
            .with_bearer(Some("token".to_owned()));
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.path, "/sell_order/create");
        assert_eq!(request.bearer.as_deref(), Some("token"));
        assert!(request.body.is_some());
    }
}
