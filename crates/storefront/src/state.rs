//! Storefront facade wiring configuration into the component clients.

use std::sync::Arc;

use crate::api::ApiClient;
use crate::api::transport::{HttpTransport, ReqwestTransport, TransportError};
use crate::cart::CartClient;
use crate::checkout::Checkout;
use crate::checkout::payment::PaymentCollector;
use crate::config::StorefrontConfig;
use crate::customer::AddressBook;
use crate::favourites::Favourites;
use crate::logistics::LogisticsClient;
use crate::session::{CredentialStore, MemoryCredentialStore, SessionStore};

/// The assembled storefront client.
///
/// This struct is cheaply cloneable via `Arc` and provides access to the
/// shared session store and component clients.
#[derive(Clone)]
pub struct Storefront {
    inner: Arc<StorefrontInner>,
}

struct StorefrontInner {
    config: StorefrontConfig,
    session: SessionStore,
    api: ApiClient,
    addresses: AddressBook,
    logistics: LogisticsClient,
    cart: CartClient,
    favourites: Favourites,
    checkout: Checkout,
}

impl Storefront {
    /// Create a storefront over the production transport and an in-memory
    /// credential store.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        config: StorefrontConfig,
        collector: Arc<dyn PaymentCollector>,
    ) -> Result<Self, TransportError> {
        let transport = Arc::new(ReqwestTransport::new(
            config.api_base_url.clone(),
            config.http_timeout,
        )?);
        Ok(Self::with_parts(
            config,
            transport,
            Arc::new(MemoryCredentialStore::new()),
            collector,
        ))
    }

    /// Create a storefront from injected parts.
    ///
    /// Embedders supply a durable credential store; tests supply scripted
    /// transports and collectors.
    #[must_use]
    pub fn with_parts(
        config: StorefrontConfig,
        transport: Arc<dyn HttpTransport>,
        credentials: Arc<dyn CredentialStore>,
        collector: Arc<dyn PaymentCollector>,
    ) -> Self {
        let session = SessionStore::new(credentials);
        let api = ApiClient::new(transport, session.clone());
        let addresses = AddressBook::new(api.clone());
        let logistics = LogisticsClient::new(api.clone());
        let cart = CartClient::new(api.clone());
        let favourites = Favourites::new(api.clone());
        let checkout = Checkout::new(
            api.clone(),
            addresses.clone(),
            logistics.clone(),
            collector,
            config.payment_timeout,
        );

        Self {
            inner: Arc::new(StorefrontInner {
                config,
                session,
                api,
                addresses,
                logistics,
                cart,
                favourites,
                checkout,
            }),
        }
    }

    /// Get a reference to the configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get a reference to the session store.
    #[must_use]
    pub fn session(&self) -> &SessionStore {
        &self.inner.session
    }

    /// Get a reference to the authenticated API client.
    #[must_use]
    pub fn api(&self) -> &ApiClient {
        &self.inner.api
    }

    /// Get a reference to the address directory.
    #[must_use]
    pub fn addresses(&self) -> &AddressBook {
        &self.inner.addresses
    }

    /// Get a reference to the logistics lookup client.
    #[must_use]
    pub fn logistics(&self) -> &LogisticsClient {
        &self.inner.logistics
    }

    /// Get a reference to the cart client.
    #[must_use]
    pub fn cart(&self) -> &CartClient {
        &self.inner.cart
    }

    /// Get a reference to the favourites mirror.
    #[must_use]
    pub fn favourites(&self) -> &Favourites {
        &self.inner.favourites
    }

    /// Get a reference to the checkout orchestrator.
    #[must_use]
    pub fn checkout(&self) -> &Checkout {
        &self.inner.checkout
    }
}
