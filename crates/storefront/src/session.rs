//! Customer session store.
//!
//! Holds the access token and customer identity, computes validity from the
//! stored expiry metadata, and persists credentials through the
//! [`CredentialStore`] seam. Every mutation bumps a generation counter (used
//! by the authenticated wrapper to deduplicate concurrent refreshes) and
//! emits a [`SessionEvent`] on a broadcast channel, which plays the role a
//! storage-change event plays across browser tabs: other components observe
//! sign-ins, refreshes, and sign-outs without polling.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;

use kirana_core::CustomerId;

/// Tokens are treated as expired this many seconds early, so a request never
/// goes out with a credential about to lapse mid-flight.
pub const EXPIRY_MARGIN_SECS: i64 = 2;

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// A signed-in customer session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    /// The signed-in customer.
    pub customer_id: CustomerId,
    /// The bearer credential for authenticated requests.
    pub access_token: String,
    /// Unix timestamp when the current token was issued.
    pub issued_at: i64,
    /// Token lifetime in seconds, when the backend reported one.
    pub expires_in: Option<i64>,
}

impl Session {
    /// Unix timestamp at which the token expires, when known.
    #[must_use]
    pub fn expires_at(&self) -> Option<i64> {
        self.expires_in.map(|ttl| self.issued_at + ttl)
    }
}

/// Errors from credential persistence.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The credential store failed to read or write.
    #[error("credential storage error: {0}")]
    Storage(String),
}

/// Persistence seam for session credentials.
///
/// The embedding application decides where credentials live (keychain, file,
/// browser storage). [`MemoryCredentialStore`] ships in-crate for tests and
/// short-lived processes.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the persisted session, if any.
    async fn load(&self) -> Result<Option<Session>, SessionError>;

    /// Persist a session, replacing any previous one.
    async fn save(&self, session: &Session) -> Result<(), SessionError>;

    /// Remove the persisted session.
    async fn delete(&self) -> Result<(), SessionError>;
}

/// In-memory credential store.
#[derive(Default)]
pub struct MemoryCredentialStore {
    session: std::sync::RwLock<Option<Session>>,
}

impl MemoryCredentialStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<Session>, SessionError> {
        Ok(self
            .session
            .read()
            .map_err(|e| SessionError::Storage(e.to_string()))?
            .clone())
    }

    async fn save(&self, session: &Session) -> Result<(), SessionError> {
        *self
            .session
            .write()
            .map_err(|e| SessionError::Storage(e.to_string()))? = Some(session.clone());
        Ok(())
    }

    async fn delete(&self) -> Result<(), SessionError> {
        *self
            .session
            .write()
            .map_err(|e| SessionError::Storage(e.to_string()))? = None;
        Ok(())
    }
}

/// Credential lifecycle events, broadcast to interested components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A customer signed in.
    SignedIn,
    /// The access token was silently refreshed.
    Refreshed,
    /// Credentials were cleared (logout or irrecoverable refresh failure).
    SignedOut,
}

/// Shared session state.
///
/// Cheaply cloneable via `Arc`; all clones observe the same session.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<SessionStoreInner>,
}

struct SessionStoreInner {
    store: Arc<dyn CredentialStore>,
    current: std::sync::RwLock<Option<Session>>,
    /// Bumped on every credential mutation. The authenticated wrapper
    /// compares generations to detect that a concurrent caller already
    /// refreshed the token.
    generation: AtomicU64,
    missing_expiry_warned: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionStore {
    /// Create a session store over a credential store.
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(SessionStoreInner {
                store,
                current: std::sync::RwLock::new(None),
                generation: AtomicU64::new(0),
                missing_expiry_warned: AtomicBool::new(false),
                events,
            }),
        }
    }

    /// Load any persisted session into memory.
    ///
    /// Call once at startup; a session persisted by an earlier process (or
    /// another tab's store implementation) becomes current without emitting
    /// a sign-in event.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential store fails to read.
    pub async fn restore(&self) -> Result<(), SessionError> {
        let persisted = self.inner.store.load().await?;
        if let Some(session) = persisted {
            self.set_current(Some(session));
        }
        Ok(())
    }

    /// The current session, if any.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.inner
            .current
            .read()
            .ok()
            .and_then(|guard| guard.clone())
    }

    /// The signed-in customer, if any.
    #[must_use]
    pub fn customer_id(&self) -> Option<CustomerId> {
        self.session().map(|s| s.customer_id)
    }

    /// The current access token, if any.
    #[must_use]
    pub fn access_token(&self) -> Option<String> {
        self.session().map(|s| s.access_token)
    }

    /// Generation counter value; bumped on every credential mutation.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }

    /// Whether the current session is valid.
    ///
    /// Expiry is computed from the stored metadata with a small safety
    /// margin ([`EXPIRY_MARGIN_SECS`]). When the backend issued no expiry
    /// metadata, a present token is treated as valid; that fallback is
    /// logged once so a misconfigured session is visible.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        let Some(session) = self.session() else {
            return false;
        };

        match session.expires_at() {
            Some(expires_at) => {
                let now = chrono::Utc::now().timestamp();
                now < expires_at - EXPIRY_MARGIN_SECS
            }
            None => {
                if !self.inner.missing_expiry_warned.swap(true, Ordering::Relaxed) {
                    warn!("session has no expiry metadata; treating token presence as validity");
                }
                true
            }
        }
    }

    /// Install a new session after login.
    ///
    /// # Errors
    ///
    /// Returns an error if the credential store fails to write; the
    /// in-memory session is installed regardless, so the running process
    /// stays signed in.
    pub async fn sign_in(&self, session: Session) -> Result<(), SessionError> {
        self.set_current(Some(session.clone()));
        let _ = self.inner.events.send(SessionEvent::SignedIn);
        self.inner.store.save(&session).await
    }

    /// Apply a silent refresh: replace the token, keep the customer.
    ///
    /// # Errors
    ///
    /// Returns an error if no session exists or the store fails to write.
    pub async fn apply_refresh(
        &self,
        access_token: String,
        expires_in: Option<i64>,
    ) -> Result<(), SessionError> {
        let refreshed = {
            let Some(mut session) = self.session() else {
                return Err(SessionError::Storage(
                    "no session to refresh".to_owned(),
                ));
            };
            session.access_token = access_token;
            session.issued_at = chrono::Utc::now().timestamp();
            session.expires_in = expires_in;
            session
        };

        self.set_current(Some(refreshed.clone()));
        let _ = self.inner.events.send(SessionEvent::Refreshed);
        self.inner.store.save(&refreshed).await
    }

    /// Clear credentials (logout or irrecoverable auth failure).
    ///
    /// # Errors
    ///
    /// Returns an error if the credential store fails to delete; the
    /// in-memory session is cleared regardless.
    pub async fn clear(&self) -> Result<(), SessionError> {
        self.set_current(None);
        let _ = self.inner.events.send(SessionEvent::SignedOut);
        self.inner.store.delete().await
    }

    /// Subscribe to credential lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    fn set_current(&self, session: Option<Session>) {
        if let Ok(mut guard) = self.inner.current.write() {
            *guard = session;
        }
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
    }
}
