//! Authenticated REST client for the Kirana backend.
//!
//! [`ApiClient`] wraps the transport with credential handling: it attaches
//! the current bearer token, and on an authorization failure runs the
//! refresh protocol at most once and retries the original request at most
//! once. Concurrent callers that hit 401 together are deduplicated behind a
//! single refresh: the session generation counter tells a waiting caller
//! that someone else already obtained a fresh token.
//!
//! Responses are read as text and decoded as JSON with the raw body
//! preserved in errors, so non-JSON error payloads stay diagnosable.

pub mod transport;

use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::session::{SessionError, SessionStore};
use transport::{HttpRequest, HttpResponse, HttpTransport, Method, TransportError};

const BODY_SNIPPET_LEN: usize = 200;

/// Errors from backend calls.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request never produced a backend response.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The backend responded with a non-success status.
    #[error("backend error ({status}): {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Message extracted from the body (JSON `message`/`error` field, or
        /// raw text when the body is not JSON).
        message: String,
    },

    /// The response body could not be decoded as the expected shape.
    #[error("response parse error: {source} (body: {body})")]
    Parse {
        /// Underlying JSON error.
        source: serde_json::Error,
        /// Truncated response body for diagnostics.
        body: String,
    },

    /// Authorization failed and could not be recovered by a refresh.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Credential storage failed.
    #[error(transparent)]
    Session(#[from] SessionError),
}

/// Raw response from the token refresh endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    expires_in: Option<i64>,
}

/// Authenticated REST client.
///
/// Cheaply cloneable via `Arc`.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ApiClientInner>,
}

struct ApiClientInner {
    transport: Arc<dyn HttpTransport>,
    session: SessionStore,
    /// Single-flight guard for the refresh protocol.
    refresh_lock: tokio::sync::Mutex<()>,
}

impl ApiClient {
    /// Create a client over a transport and session store.
    #[must_use]
    pub fn new(transport: Arc<dyn HttpTransport>, session: SessionStore) -> Self {
        Self {
            inner: Arc::new(ApiClientInner {
                transport,
                session,
                refresh_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// The session store backing this client.
    #[must_use]
    pub fn session(&self) -> &SessionStore {
        &self.inner.session
    }

    /// Issue an authenticated GET and decode the JSON response.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, non-success status, or a body
    /// that does not decode as `T`.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.request(Method::Get, path, None).await?;
        decode_json(&response)
    }

    /// Issue an authenticated POST and decode the JSON response.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure, non-success status, or a body
    /// that does not decode as `T`.
    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T, ApiError> {
        let response = self.request(Method::Post, path, Some(body)).await?;
        decode_json(&response)
    }

    /// Issue an authenticated DELETE, ignoring the response body.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or non-success status.
    pub async fn delete(&self, path: &str) -> Result<(), ApiError> {
        self.request(Method::Delete, path, None).await?;
        Ok(())
    }

    /// Issue a request with the authorization-retry policy applied.
    ///
    /// At most one refresh and at most one retry per call: a 401 with no
    /// token attached is returned as-is (nothing to refresh); a 401 with a
    /// token triggers the refresh protocol once, and on success the
    /// original request is retried exactly once with the new token. A 401
    /// on the retry is surfaced without a second refresh.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<HttpResponse, ApiError> {
        let token = self.inner.session.access_token();
        let generation = self.inner.session.generation();

        let request = HttpRequest {
            method,
            path: path.to_owned(),
            bearer: token.clone(),
            body: body.clone(),
        };
        let response = self.inner.transport.send(request).await?;

        if !response.is_unauthorized() {
            return into_api_result(response);
        }

        // A 401 without a credential attached means there is nothing to
        // refresh; the failure belongs to the caller.
        if token.is_none() {
            return into_api_result(response);
        }

        if !self.refresh_once(generation).await? {
            let message = error_message(&response);
            return Err(ApiError::Unauthorized(message));
        }

        let retry = HttpRequest {
            method,
            path: path.to_owned(),
            bearer: self.inner.session.access_token(),
            body,
        };
        let retried = self.inner.transport.send(retry).await?;
        into_api_result(retried)
    }

    /// Run the refresh protocol at most once per failure.
    ///
    /// Returns `true` when a usable token is in place afterwards, either
    /// because this caller refreshed or because a concurrent caller did (the
    /// generation counter advanced while we waited for the lock).
    async fn refresh_once(&self, failed_generation: u64) -> Result<bool, ApiError> {
        let _permit = self.inner.refresh_lock.lock().await;

        // Someone else mutated the credentials while we waited: either a
        // refresh landed (retry with the new token) or a sign-out happened
        // (no token left, give up).
        if self.inner.session.generation() != failed_generation {
            return Ok(self.inner.session.access_token().is_some());
        }

        let Some(current_token) = self.inner.session.access_token() else {
            return Ok(false);
        };

        debug!("access token rejected; attempting silent refresh");
        let request = HttpRequest::post(
            "/token/refresh_token",
            serde_json::json!({ "token": current_token }),
        );

        let refreshed = match self.inner.transport.send(request).await {
            Ok(response) if response.is_success() => decode_json::<RefreshResponse>(&response),
            Ok(response) => Err(ApiError::Status {
                status: response.status,
                message: error_message(&response),
            }),
            Err(err) => Err(err.into()),
        };

        match refreshed {
            Ok(token) => {
                self.inner
                    .session
                    .apply_refresh(token.access_token, token.expires_in)
                    .await?;
                Ok(true)
            }
            Err(err) => {
                // Irrecoverable: treat as logged out. Redirect policy
                // belongs to the caller.
                warn!(error = %err, "token refresh failed; clearing credentials");
                self.inner.session.clear().await?;
                Ok(false)
            }
        }
    }

    /// Sign the customer out: best-effort logout call, then clear
    /// credentials.
    ///
    /// # Errors
    ///
    /// Returns an error only if credential storage fails; a failed logout
    /// call is logged and ignored (the credentials are cleared regardless).
    pub async fn sign_out(&self) -> Result<(), ApiError> {
        let request = HttpRequest::post("/customer/logout", serde_json::json!({}))
            .with_bearer(self.inner.session.access_token());
        match self.inner.transport.send(request).await {
            Ok(response) if response.is_success() => {}
            Ok(response) => {
                warn!(status = response.status, "logout call rejected");
            }
            Err(err) => {
                warn!(error = %err, "logout call failed");
            }
        }
        self.inner.session.clear().await?;
        Ok(())
    }
}

/// Map a raw response to success or a status error.
fn into_api_result(response: HttpResponse) -> Result<HttpResponse, ApiError> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(ApiError::Status {
            status: response.status,
            message: error_message(&response),
        })
    }
}

/// Decode a JSON body, preserving a snippet of the raw text on failure.
fn decode_json<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, ApiError> {
    serde_json::from_str(&response.body).map_err(|source| ApiError::Parse {
        source,
        body: snippet(&response.body),
    })
}

/// Extract a human-readable message from an error body.
///
/// Prefers a JSON `message` or `error` string field; falls back to the raw
/// text when the body is not JSON.
fn error_message(response: &HttpResponse) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: Option<String>,
        error: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(&response.body)
        && let Some(message) = parsed.message.or(parsed.error)
    {
        return message;
    }

    if response.body.trim().is_empty() {
        return format!("HTTP {}", response.status);
    }

    snippet(&response.body)
}

fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_LEN).collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::session::{MemoryCredentialStore, Session, SessionEvent};
    use async_trait::async_trait;
    use kirana_core::CustomerId;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Transport returning scripted responses per path, recording requests.
    ///
    /// Yields briefly before answering so concurrent callers interleave the
    /// way real network calls do.
    struct ScriptedTransport {
        script: Mutex<Vec<(String, HttpResponse)>>,
        requests: Mutex<Vec<HttpRequest>>,
        refresh_calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(script: Vec<(&str, u16, &str)>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(
                    script
                        .into_iter()
                        .map(|(path, status, body)| {
                            (
                                path.to_owned(),
                                HttpResponse {
                                    status,
                                    body: body.to_owned(),
                                },
                            )
                        })
                        .collect(),
                ),
                requests: Mutex::new(Vec::new()),
                refresh_calls: AtomicUsize::new(0),
            })
        }

        fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            if request.path == "/token/refresh_token" {
                self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            }
            self.requests.lock().unwrap().push(request.clone());
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;

            let mut script = self.script.lock().unwrap();
            let position = script
                .iter()
                .position(|(path, _)| *path == request.path)
                .unwrap_or_else(|| panic!("unscripted request: {}", request.path));
            Ok(script.remove(position).1)
        }
    }

    async fn signed_in_session() -> SessionStore {
        let store = SessionStore::new(Arc::new(MemoryCredentialStore::new()));
        let session = Session {
            customer_id: CustomerId::new("64a51cf2e9b4d20019f3a8c1"),
            access_token: "stale-token".to_owned(),
            issued_at: chrono::Utc::now().timestamp(),
            expires_in: None,
        };
        store.sign_in(session).await.unwrap();
        store
    }

    #[tokio::test]
    async fn successful_request_attaches_bearer() {
        let transport = ScriptedTransport::new(vec![("/cart?customerId=c1", 200, r#"{"ok":true}"#)]);
        let client = ApiClient::new(transport.clone(), signed_in_session().await);

        let body: serde_json::Value = client.get("/cart?customerId=c1").await.unwrap();
        assert_eq!(body["ok"], true);

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].bearer.as_deref(), Some("stale-token"));
    }

    #[tokio::test]
    async fn unauthorized_with_token_refreshes_and_retries_once() {
        let transport = ScriptedTransport::new(vec![
            ("/cart?customerId=c1", 401, r#"{"message":"expired"}"#),
            (
                "/token/refresh_token",
                200,
                r#"{"accessToken":"fresh-token","expiresIn":3600}"#,
            ),
            ("/cart?customerId=c1", 200, r#"{"items":[]}"#),
        ]);
        let session = signed_in_session().await;
        let client = ApiClient::new(transport.clone(), session.clone());

        let body: serde_json::Value = client.get("/cart?customerId=c1").await.unwrap();
        assert_eq!(body["items"], serde_json::json!([]));

        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(transport.refresh_calls.load(Ordering::SeqCst), 1);
        // Retry carried the refreshed token.
        assert_eq!(requests[2].bearer.as_deref(), Some("fresh-token"));
        assert_eq!(session.access_token().as_deref(), Some("fresh-token"));
    }

    #[tokio::test]
    async fn unauthorized_without_token_is_returned_as_is() {
        let transport =
            ScriptedTransport::new(vec![("/cart?customerId=c1", 401, r#"{"message":"no auth"}"#)]);
        let session = SessionStore::new(Arc::new(MemoryCredentialStore::new()));
        let client = ApiClient::new(transport.clone(), session);

        let err = client
            .get::<serde_json::Value>("/cart?customerId=c1")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 401, .. }));
        // No refresh was attempted.
        assert_eq!(transport.refresh_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn refresh_failure_clears_credentials_and_surfaces_original_failure() {
        let transport = ScriptedTransport::new(vec![
            ("/cart?customerId=c1", 401, r#"{"message":"expired"}"#),
            ("/token/refresh_token", 403, r#"{"message":"refresh denied"}"#),
        ]);
        let session = signed_in_session().await;
        let mut events = session.subscribe();
        let client = ApiClient::new(transport.clone(), session.clone());

        let err = client
            .get::<serde_json::Value>("/cart?customerId=c1")
            .await
            .unwrap_err();

        match err {
            ApiError::Unauthorized(message) => assert_eq!(message, "expired"),
            other => panic!("expected Unauthorized, got {other:?}"),
        }
        assert!(session.session().is_none());
        assert_eq!(events.recv().await.unwrap(), SessionEvent::SignedOut);
    }

    #[tokio::test]
    async fn concurrent_unauthorized_callers_share_one_refresh() {
        let transport = ScriptedTransport::new(vec![
            ("/a", 401, "{}"),
            ("/b", 401, "{}"),
            (
                "/token/refresh_token",
                200,
                r#"{"accessToken":"fresh-token","expiresIn":3600}"#,
            ),
            ("/a", 200, r#"{"from":"a"}"#),
            ("/b", 200, r#"{"from":"b"}"#),
        ]);
        let client = ApiClient::new(transport.clone(), signed_in_session().await);

        let (a, b) = tokio::join!(
            client.get::<serde_json::Value>("/a"),
            client.get::<serde_json::Value>("/b"),
        );
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(transport.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_that_fails_again_is_not_refreshed_twice() {
        let transport = ScriptedTransport::new(vec![
            ("/a", 401, "{}"),
            (
                "/token/refresh_token",
                200,
                r#"{"accessToken":"fresh-token","expiresIn":3600}"#,
            ),
            ("/a", 401, r#"{"message":"still no"}"#),
        ]);
        let client = ApiClient::new(transport.clone(), signed_in_session().await);

        let err = client.get::<serde_json::Value>("/a").await.unwrap_err();
        assert!(matches!(err, ApiError::Status { status: 401, .. }));
        assert_eq!(transport.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sign_out_clears_credentials_even_when_logout_fails() {
        let transport = ScriptedTransport::new(vec![(
            "/customer/logout",
            500,
            r#"{"message":"backend down"}"#,
        )]);
        let session = signed_in_session().await;
        let client = ApiClient::new(transport, session.clone());

        client.sign_out().await.unwrap();
        assert!(session.session().is_none());
    }

    #[test]
    fn error_message_prefers_json_fields_then_raw_text() {
        let json = HttpResponse {
            status: 400,
            body: r#"{"message":"bad address"}"#.to_owned(),
        };
        assert_eq!(error_message(&json), "bad address");

        let json_error_field = HttpResponse {
            status: 400,
            body: r#"{"error":"nope"}"#.to_owned(),
        };
        assert_eq!(error_message(&json_error_field), "nope");

        let text = HttpResponse {
            status: 502,
            body: "Bad Gateway".to_owned(),
        };
        assert_eq!(error_message(&text), "Bad Gateway");

        let empty = HttpResponse {
            status: 502,
            body: String::new(),
        };
        assert_eq!(error_message(&empty), "HTTP 502");
    }
}
