//! Favourites mirror.
//!
//! A shared, subscribable snapshot of the customer's favourited products, so
//! independent UI surfaces avoid redundant fetches. The mirror is an
//! explicit context object with its own lifecycle: construct one per
//! application (or per test) and inject it; nothing here is process-global.
//!
//! Mutations go through the backend and are followed by exactly one full
//! refresh rather than a local patch: the server owns dedup and validation
//! rules the client does not replicate. Concurrent refreshes coalesce behind
//! a single in-flight operation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, instrument, warn};

use kirana_core::{CustomerId, FavouriteId, Price, ProductId};

use crate::api::{ApiClient, ApiError};
use crate::session::SessionEvent;

/// A favourited product as mirrored from the server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavouriteEntry {
    pub favourite_id: FavouriteId,
    pub product_id: ProductId,
    pub product: ProductSummary,
    pub added_at: DateTime<Utc>,
}

/// Product snapshot carried on a favourite entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductSummary {
    pub title: String,
    pub unit_price: Price,
    #[serde(default)]
    pub image_ref: Option<String>,
}

/// Errors from favourites operations.
#[derive(Debug, thiserror::Error)]
pub enum FavouritesError {
    /// Mutations require a signed-in customer.
    #[error("sign in to manage favourites")]
    NotSignedIn,

    /// A backend call failed.
    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Shared favourites mirror.
///
/// Cheaply cloneable via `Arc`; all clones share one snapshot.
#[derive(Clone)]
pub struct Favourites {
    inner: Arc<FavouritesInner>,
}

struct FavouritesInner {
    api: ApiClient,
    entries: std::sync::RwLock<HashMap<ProductId, FavouriteEntry>>,
    /// Completed-refresh counter; lets a waiting caller detect that the
    /// refresh it queued behind already did the work.
    refresh_epoch: AtomicU64,
    refresh_lock: tokio::sync::Mutex<()>,
    version: watch::Sender<u64>,
}

impl Favourites {
    /// Create a favourites mirror over an API client.
    #[must_use]
    pub fn new(api: ApiClient) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(FavouritesInner {
                api,
                entries: std::sync::RwLock::new(HashMap::new()),
                refresh_epoch: AtomicU64::new(0),
                refresh_lock: tokio::sync::Mutex::new(()),
                version,
            }),
        }
    }

    /// Whether a product is favourited, from the snapshot alone.
    ///
    /// Never performs I/O; reflects the last completed refresh.
    #[must_use]
    pub fn is_favourite(&self, product_id: &ProductId) -> bool {
        self.inner
            .entries
            .read()
            .map(|entries| entries.contains_key(product_id))
            .unwrap_or(false)
    }

    /// Snapshot of the mirrored entries.
    #[must_use]
    pub fn entries(&self) -> Vec<FavouriteEntry> {
        self.inner
            .entries
            .read()
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Subscribe to snapshot versions; the value bumps after every refresh
    /// or clear.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.version.subscribe()
    }

    /// Add or remove a favourite based on the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error when signed out or when the mutation or the
    /// follow-up refresh fails.
    pub async fn toggle(&self, product_id: &ProductId) -> Result<(), FavouritesError> {
        if self.is_favourite(product_id) {
            self.remove(product_id).await
        } else {
            self.add(product_id).await
        }
    }

    /// Favourite a product, then refresh the snapshot once.
    ///
    /// # Errors
    ///
    /// Returns an error when signed out or when the call fails.
    #[instrument(skip(self), fields(product = %product_id))]
    pub async fn add(&self, product_id: &ProductId) -> Result<(), FavouritesError> {
        let customer_id = self.require_customer()?;
        self.inner
            .api
            .post::<serde_json::Value>(
                &format!("/customer/{customer_id}/favourites"),
                serde_json::json!({ "productId": product_id }),
            )
            .await?;

        // One full refresh instead of a local patch.
        self.refresh().await
    }

    /// Unfavourite a product, then refresh the snapshot once.
    ///
    /// Unknown products are a no-op: the snapshot may simply be behind the
    /// server, and the refresh after any other mutation will converge.
    ///
    /// # Errors
    ///
    /// Returns an error when signed out or when the call fails.
    #[instrument(skip(self), fields(product = %product_id))]
    pub async fn remove(&self, product_id: &ProductId) -> Result<(), FavouritesError> {
        let customer_id = self.require_customer()?;

        let favourite_id = self
            .inner
            .entries
            .read()
            .ok()
            .and_then(|entries| entries.get(product_id).map(|e| e.favourite_id.clone()));
        let Some(favourite_id) = favourite_id else {
            debug!("product not in snapshot; nothing to remove");
            return Ok(());
        };

        self.inner
            .api
            .delete(&format!(
                "/customer/{customer_id}/favourites/{favourite_id}"
            ))
            .await?;

        self.refresh().await
    }

    /// Rebuild the snapshot wholesale from the server.
    ///
    /// Concurrent calls coalesce: a caller that queued behind an in-flight
    /// refresh returns when that refresh completes, without issuing a second
    /// fetch.
    ///
    /// # Errors
    ///
    /// Returns an error when signed out or when the fetch fails.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<(), FavouritesError> {
        let customer_id = self.require_customer()?;

        let epoch_before = self.inner.refresh_epoch.load(Ordering::Acquire);
        let _permit = self.inner.refresh_lock.lock().await;

        // A refresh completed while we waited for the lock; its snapshot is
        // as fresh as ours would be.
        if self.inner.refresh_epoch.load(Ordering::Acquire) != epoch_before {
            return Ok(());
        }

        let fetched: Vec<FavouriteEntry> = self
            .inner
            .api
            .get(&format!("/customer/{customer_id}/favourites"))
            .await?;

        debug!(count = fetched.len(), "favourites snapshot rebuilt");
        if let Ok(mut entries) = self.inner.entries.write() {
            *entries = fetched
                .into_iter()
                .map(|entry| (entry.product_id.clone(), entry))
                .collect();
        }
        self.inner.refresh_epoch.fetch_add(1, Ordering::AcqRel);
        self.bump_version();
        Ok(())
    }

    /// Drop the snapshot (sign-out).
    pub fn clear(&self) {
        if let Ok(mut entries) = self.inner.entries.write() {
            entries.clear();
        }
        self.bump_version();
    }

    /// React to a credential change observed elsewhere: clear on sign-out,
    /// refresh on sign-in or token change.
    pub async fn apply_session_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::SignedOut => self.clear(),
            SessionEvent::SignedIn | SessionEvent::Refreshed => {
                if let Err(err) = self.refresh().await {
                    warn!(error = %err, "favourites refresh after session event failed");
                }
            }
        }
    }

    /// Spawn a task applying session events to this mirror.
    ///
    /// The task ends when the session store (and its event channel) is
    /// dropped.
    pub fn spawn_session_listener(
        &self,
        mut events: broadcast::Receiver<SessionEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let favourites = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => favourites.apply_session_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "session event stream lagged; refreshing");
                        favourites.apply_session_event(SessionEvent::Refreshed).await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn require_customer(&self) -> Result<CustomerId, FavouritesError> {
        self.inner
            .api
            .session()
            .customer_id()
            .ok_or(FavouritesError::NotSignedIn)
    }

    fn bump_version(&self) {
        self.inner.version.send_modify(|version| *version += 1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::api::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};
    use crate::session::{MemoryCredentialStore, Session, SessionStore};
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::Mutex;
    use std::time::Duration;

    const CUSTOMER: &str = "64a51cf2e9b4d20019f3a8c1";
    const PRODUCT: &str = "64a51cf2e9b4d20019f3a101";

    struct ScriptedTransport {
        script: Mutex<Vec<(String, HttpResponse)>>,
        requests: Mutex<Vec<HttpRequest>>,
        delay: Duration,
    }

    impl ScriptedTransport {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(Vec::new()),
                requests: Mutex::new(Vec::new()),
                delay,
            })
        }

        fn push(&self, path: &str, status: u16, body: serde_json::Value) {
            self.script.lock().unwrap().push((
                path.to_owned(),
                HttpResponse {
                    status,
                    body: body.to_string(),
                },
            ));
        }

        fn count(&self, path: &str) -> usize {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.path == path)
                .count()
        }
    }

    #[async_trait]
    impl HttpTransport for ScriptedTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            tokio::time::sleep(self.delay).await;
            let mut script = self.script.lock().unwrap();
            let position = script
                .iter()
                .position(|(path, _)| *path == request.path)
                .unwrap_or_else(|| panic!("unscripted request: {}", request.path));
            Ok(script.remove(position).1)
        }
    }

    async fn signed_in(transport: Arc<ScriptedTransport>) -> (Favourites, SessionStore) {
        let session = SessionStore::new(Arc::new(MemoryCredentialStore::new()));
        session
            .sign_in(Session {
                customer_id: CustomerId::new(CUSTOMER),
                access_token: "token".to_owned(),
                issued_at: chrono::Utc::now().timestamp(),
                expires_in: None,
            })
            .await
            .unwrap();
        (
            Favourites::new(ApiClient::new(transport, session.clone())),
            session,
        )
    }

    fn favourites_path() -> String {
        format!("/customer/{CUSTOMER}/favourites")
    }

    fn entry_json(product_id: &str) -> serde_json::Value {
        serde_json::json!({
            "favouriteId": "64a51cf2e9b4d20019f3ff01",
            "productId": product_id,
            "product": {
                "title": "Filter Coffee 500g",
                "unitPrice": {"amount": "500", "currency_code": "INR"},
            },
            "addedAt": "2026-08-01T10:00:00Z",
        })
    }

    #[tokio::test]
    async fn is_favourite_is_a_pure_cache_lookup() {
        let transport = ScriptedTransport::new(Duration::ZERO);
        let (favourites, _session) = signed_in(transport.clone()).await;

        let product = ProductId::new(PRODUCT);
        assert!(!favourites.is_favourite(&product));
        // No network traffic happened.
        assert_eq!(transport.count(&favourites_path()), 0);
    }

    #[tokio::test]
    async fn toggle_uncached_product_adds_then_refreshes_once() {
        let transport = ScriptedTransport::new(Duration::ZERO);
        let (favourites, _session) = signed_in(transport.clone()).await;
        let product = ProductId::new(PRODUCT);

        transport.push(&favourites_path(), 200, serde_json::json!({"ok": true}));
        transport.push(
            &favourites_path(),
            200,
            serde_json::json!([entry_json(PRODUCT)]),
        );

        assert!(!favourites.is_favourite(&product));
        favourites.toggle(&product).await.unwrap();

        // One POST (add) and exactly one GET (refresh); the snapshot
        // reflects the new state only now.
        assert_eq!(transport.count(&favourites_path()), 2);
        assert!(favourites.is_favourite(&product));
    }

    #[tokio::test]
    async fn toggle_cached_product_removes_then_refreshes_once() {
        let transport = ScriptedTransport::new(Duration::ZERO);
        let (favourites, _session) = signed_in(transport.clone()).await;
        let product = ProductId::new(PRODUCT);

        // Seed the snapshot.
        transport.push(
            &favourites_path(),
            200,
            serde_json::json!([entry_json(PRODUCT)]),
        );
        favourites.refresh().await.unwrap();
        assert!(favourites.is_favourite(&product));

        let delete_path = format!("{}/64a51cf2e9b4d20019f3ff01", favourites_path());
        transport.push(&delete_path, 200, serde_json::json!({"ok": true}));
        transport.push(&favourites_path(), 200, serde_json::json!([]));

        favourites.toggle(&product).await.unwrap();
        assert!(!favourites.is_favourite(&product));
        assert_eq!(transport.count(&delete_path), 1);
    }

    #[tokio::test]
    async fn mutations_require_sign_in() {
        let transport = ScriptedTransport::new(Duration::ZERO);
        let session = SessionStore::new(Arc::new(MemoryCredentialStore::new()));
        let favourites = Favourites::new(ApiClient::new(transport, session));

        let err = favourites.add(&ProductId::new(PRODUCT)).await.unwrap_err();
        assert!(matches!(err, FavouritesError::NotSignedIn));
    }

    #[tokio::test]
    async fn concurrent_refreshes_coalesce() {
        let transport = ScriptedTransport::new(Duration::from_millis(50));
        let (favourites, _session) = signed_in(transport.clone()).await;

        transport.push(&favourites_path(), 200, serde_json::json!([]));
        // A second response would only be consumed by a second fetch.
        transport.push(&favourites_path(), 200, serde_json::json!([]));

        let (a, b) = tokio::join!(favourites.refresh(), favourites.refresh());
        a.unwrap();
        b.unwrap();

        assert_eq!(transport.count(&favourites_path()), 1);
    }

    #[tokio::test]
    async fn session_events_clear_or_refresh_the_snapshot() {
        let transport = ScriptedTransport::new(Duration::ZERO);
        let (favourites, session) = signed_in(transport.clone()).await;
        let product = ProductId::new(PRODUCT);

        transport.push(
            &favourites_path(),
            200,
            serde_json::json!([entry_json(PRODUCT)]),
        );
        favourites.refresh().await.unwrap();
        assert!(favourites.is_favourite(&product));

        let handle = favourites.spawn_session_listener(session.subscribe());

        session.clear().await.unwrap();
        // Give the listener a beat to apply the event.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!favourites.is_favourite(&product));

        handle.abort();
    }

    #[tokio::test]
    async fn subscribe_observes_snapshot_versions() {
        let transport = ScriptedTransport::new(Duration::ZERO);
        let (favourites, _session) = signed_in(transport.clone()).await;
        let mut versions = favourites.subscribe();
        assert_eq!(*versions.borrow(), 0);

        transport.push(&favourites_path(), 200, serde_json::json!([]));
        favourites.refresh().await.unwrap();

        versions.changed().await.unwrap();
        assert_eq!(*versions.borrow(), 1);
    }
}
