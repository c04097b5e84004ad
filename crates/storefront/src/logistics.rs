//! Serviceability and delivery-charge lookups.
//!
//! Both lookups are memoized per postal code: concurrent callers for the
//! same pincode coalesce into a single network call, and a resolved entry is
//! cached whether it succeeded or failed, so a pincode is queried at most
//! once per cache lifetime. Invalid postal codes cannot reach this client at
//! all: the [`Pincode`] type is validated at parse time.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, instrument};

use kirana_core::{CurrencyCode, Pincode, Price};

use crate::api::{ApiClient, ApiError};

const LOOKUP_CACHE_CAPACITY: u64 = 1000;
const LOOKUP_CACHE_TTL: Duration = Duration::from_secs(600);

/// Whether a carrier can fulfill prepaid delivery to a pincode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Serviceability {
    /// Prepaid orders can be delivered.
    pub prepaid: bool,
}

/// Errors from logistics lookups.
///
/// Failures are cached alongside successes, so a repeated call for the same
/// pincode returns the remembered failure without a new request.
#[derive(Debug, thiserror::Error)]
pub enum LogisticsError {
    /// The serviceability lookup failed.
    #[error("serviceability lookup failed: {0}")]
    Serviceability(String),

    /// The delivery-charge lookup failed.
    #[error("delivery charge lookup failed: {0}")]
    DeliveryCharge(String),
}

#[derive(Debug, Deserialize)]
struct ServiceabilityResponse {
    prepaid: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeliveryChargeResponse {
    total_delivery_charge: Decimal,
}

/// Logistics lookup client.
///
/// Cheaply cloneable via `Arc`; all clones share the caches.
#[derive(Clone)]
pub struct LogisticsClient {
    inner: Arc<LogisticsClientInner>,
}

struct LogisticsClientInner {
    api: ApiClient,
    serviceability: moka::future::Cache<Pincode, Result<Serviceability, String>>,
    charges: moka::future::Cache<Pincode, Result<Price, String>>,
}

impl LogisticsClient {
    /// Create a logistics client over an API client.
    #[must_use]
    pub fn new(api: ApiClient) -> Self {
        fn build<V: Clone + Send + Sync + 'static>() -> moka::future::Cache<Pincode, V> {
            moka::future::Cache::builder()
                .max_capacity(LOOKUP_CACHE_CAPACITY)
                .time_to_live(LOOKUP_CACHE_TTL)
                .build()
        }

        Self {
            inner: Arc::new(LogisticsClientInner {
                api,
                serviceability: build(),
                charges: build(),
            }),
        }
    }

    /// Whether prepaid delivery is available for a pincode.
    ///
    /// Memoized: at most one request per pincode is in flight, and a
    /// resolved lookup (success or failure) is never repeated while cached.
    ///
    /// # Errors
    ///
    /// Returns the (possibly cached) lookup failure.
    #[instrument(skip(self), fields(pincode = %pincode))]
    pub async fn serviceability(
        &self,
        pincode: &Pincode,
    ) -> Result<Serviceability, LogisticsError> {
        let outcome = self
            .inner
            .serviceability
            .get_with(pincode.clone(), async {
                self.fetch_serviceability(pincode)
                    .await
                    .map_err(|err| err.to_string())
            })
            .await;

        outcome.map_err(LogisticsError::Serviceability)
    }

    /// The delivery charge for a pincode.
    ///
    /// Memoized with the same policy as [`Self::serviceability`].
    ///
    /// # Errors
    ///
    /// Returns the (possibly cached) lookup failure.
    #[instrument(skip(self), fields(pincode = %pincode))]
    pub async fn delivery_charge(&self, pincode: &Pincode) -> Result<Price, LogisticsError> {
        let outcome = self
            .inner
            .charges
            .get_with(pincode.clone(), async {
                self.fetch_delivery_charge(pincode)
                    .await
                    .map_err(|err| err.to_string())
            })
            .await;

        outcome.map_err(LogisticsError::DeliveryCharge)
    }

    /// The cached serviceability outcome, without triggering a lookup.
    #[must_use = "a cache miss is not the same as non-serviceable"]
    pub async fn serviceability_cached(
        &self,
        pincode: &Pincode,
    ) -> Option<Result<Serviceability, String>> {
        self.inner.serviceability.get(pincode).await
    }

    /// The cached delivery charge, without triggering a lookup.
    pub async fn delivery_charge_cached(&self, pincode: &Pincode) -> Option<Price> {
        match self.inner.charges.get(pincode).await {
            Some(Ok(price)) => Some(price),
            _ => None,
        }
    }

    async fn fetch_serviceability(
        &self,
        pincode: &Pincode,
    ) -> Result<Serviceability, ApiError> {
        let response: ServiceabilityResponse = self
            .inner
            .api
            .get(&format!(
                "/logistic_partner/get_pincode_serviceability/{pincode}"
            ))
            .await?;

        debug!(prepaid = response.prepaid, "serviceability resolved");
        Ok(Serviceability {
            prepaid: response.prepaid,
        })
    }

    async fn fetch_delivery_charge(&self, pincode: &Pincode) -> Result<Price, ApiError> {
        let response: DeliveryChargeResponse = self
            .inner
            .api
            .get(&format!("/logistic_partner/get_delivery_charge/{pincode}"))
            .await?;

        debug!(charge = %response.total_delivery_charge, "delivery charge resolved");
        Ok(Price::new(
            response.total_delivery_charge,
            CurrencyCode::INR,
        ))
    }
}
