//! Checkout orchestration.
//!
//! Validates preconditions, keeps the delivery selection serviceable,
//! submits order creation, and branches into the hosted payment flow or the
//! direct success path. Submission runs under a re-entrancy lock: the lock
//! is acquired synchronously before any asynchronous work and released on
//! every exit path, so a double-trigger is a no-op and a failed attempt can
//! always be retried. The lock is scoped to this process; cross-process
//! idempotency belongs to the order-creation endpoint.

pub mod payment;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use kirana_core::{
    AddressId, CorrelationToken, CustomerId, OrderId, PaymentStatus, Price, ProductId,
};

use crate::api::{ApiClient, ApiError};
use crate::api::transport::json_body;
use crate::cart::Cart;
use crate::customer::addresses::{Address, AddressBook};
use crate::logistics::LogisticsClient;
use payment::{GatewayOrder, PaymentCallback, PaymentCollector, PaymentSession};

const VERIFY_ORDER_NOT_FOUND: &str = "order_not_found";

/// Terminal checkout failure, carrying what the failure view needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutFailure {
    /// Human-readable reason.
    pub reason: String,
    /// Order reference for support follow-up, when one was issued.
    pub order_ref: Option<OrderId>,
}

/// Checkout errors.
///
/// The first five variants are local validation stops surfaced inline; no
/// network call has been made when they are returned. [`Self::Failed`] is
/// the terminal branch routed to the failure view.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CheckoutError {
    /// No signed-in customer identity.
    #[error("sign in to place an order")]
    NotSignedIn,

    /// No delivery address is selected.
    #[error("select a delivery address")]
    NoAddressSelected,

    /// The selected address is marked non-serviceable for prepaid orders.
    #[error("delivery is not available at the selected address")]
    AddressNotServiceable,

    /// The selected address exists only locally; it must be saved first.
    #[error("save the delivery address before placing the order")]
    AddressNotSaved,

    /// The chosen billing address exists only locally.
    #[error("save the billing address before placing the order")]
    BillingAddressNotSaved,

    /// An order submission is already in flight.
    #[error("an order is already being placed")]
    InFlight,

    /// Order creation, payment, or verification failed.
    #[error("checkout failed: {}", .0.reason)]
    Failed(CheckoutFailure),
}

/// A confirmed order, carrying what the success view needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderConfirmation {
    pub order_id: Option<OrderId>,
    pub order_number: Option<i64>,
    /// Subtotal plus the cached delivery charge.
    pub total: Price,
    pub payment: PaymentStatus,
}

/// Which address settles the bill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BillingChoice {
    /// Bill to the delivery address.
    #[default]
    SameAsDelivery,
    /// Bill to a separately selected address.
    Separate(CorrelationToken),
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderLine<'a> {
    product_id: &'a ProductId,
    quantity: u32,
    unit_price: Price,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrderRequest<'a> {
    customer_id: &'a CustomerId,
    delivery_address_id: &'a AddressId,
    billing_address_id: &'a AddressId,
    /// Correlation token so the backend can dedupe a resubmission.
    client_reference: CorrelationToken,
    items: Vec<OrderLine<'a>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrderResponse {
    #[serde(default)]
    order_id: Option<OrderId>,
    #[serde(default)]
    order_number: Option<i64>,
    /// Present when the order needs a hosted payment; absent on direct
    /// success.
    #[serde(default)]
    payment: Option<GatewayOrder>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyPaymentRequest<'a> {
    payment_id: &'a str,
    gateway_order_id: &'a str,
    signature: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    order_id: Option<&'a OrderId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyPaymentResponse {
    verified: bool,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Submission lock
// ─────────────────────────────────────────────────────────────────────────────

/// RAII re-entrancy lock: acquired synchronously, released on drop, so every
/// exit path (validation stop, transport failure, completion, panic) frees
/// the next attempt.
struct SubmissionGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> SubmissionGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for SubmissionGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Checkout
// ─────────────────────────────────────────────────────────────────────────────

/// Checkout orchestrator.
///
/// Cheaply cloneable via `Arc`; all clones share the selection state and the
/// submission lock.
#[derive(Clone)]
pub struct Checkout {
    inner: Arc<CheckoutInner>,
}

struct CheckoutInner {
    api: ApiClient,
    addresses: AddressBook,
    logistics: LogisticsClient,
    collector: Arc<dyn PaymentCollector>,
    payment_timeout: Duration,
    selected_delivery: std::sync::RwLock<Option<CorrelationToken>>,
    billing: std::sync::RwLock<BillingChoice>,
    submitting: AtomicBool,
}

impl Checkout {
    /// Create a checkout over the component clients.
    #[must_use]
    pub fn new(
        api: ApiClient,
        addresses: AddressBook,
        logistics: LogisticsClient,
        collector: Arc<dyn PaymentCollector>,
        payment_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(CheckoutInner {
                api,
                addresses,
                logistics,
                collector,
                payment_timeout,
                selected_delivery: std::sync::RwLock::new(None),
                billing: std::sync::RwLock::new(BillingChoice::default()),
                submitting: AtomicBool::new(false),
            }),
        }
    }

    /// The currently selected delivery address, if any.
    #[must_use]
    pub fn selected_delivery(&self) -> Option<Address> {
        let token = self
            .inner
            .selected_delivery
            .read()
            .ok()
            .and_then(|guard| *guard)?;
        self.inner.addresses.find(token)
    }

    /// Select a delivery address, keeping the serviceability invariant.
    ///
    /// The address's serviceability is re-validated; if it turns out
    /// non-serviceable for prepaid orders (or the lookup fails), selection
    /// falls back to the first serviceable address in the directory, or to
    /// no selection if none qualify. The checkout never leaves a
    /// non-serviceable address selected.
    ///
    /// Returns the resulting selection.
    #[instrument(skip(self))]
    pub async fn select_delivery(&self, local_id: CorrelationToken) -> Option<Address> {
        if let Some(address) = self.inner.addresses.find(local_id) {
            if self.is_prepaid_serviceable(&address).await {
                self.set_selected(Some(local_id));
                return Some(address);
            }
            warn!("selected address not serviceable; falling back");
        }

        for address in self.inner.addresses.addresses() {
            if self.is_prepaid_serviceable(&address).await {
                self.set_selected(Some(address.local_id));
                return Some(address);
            }
        }

        self.set_selected(None);
        None
    }

    /// Select the directory's default address (the flagged entry, else the
    /// first), subject to the same serviceability fallback.
    pub async fn select_default(&self) -> Option<Address> {
        let default = self.inner.addresses.default_address()?;
        self.select_delivery(default.local_id).await
    }

    /// Bill to the delivery address (the default).
    pub fn set_billing_same_as_delivery(&self) {
        if let Ok(mut guard) = self.inner.billing.write() {
            *guard = BillingChoice::SameAsDelivery;
        }
    }

    /// Bill to a separately selected address.
    pub fn set_billing(&self, local_id: CorrelationToken) {
        if let Ok(mut guard) = self.inner.billing.write() {
            *guard = BillingChoice::Separate(local_id);
        }
    }

    /// Place an order for the cart.
    ///
    /// Runs the full orchestration: precondition checks (no network),
    /// order creation, and either the hosted payment flow with verification
    /// or the direct success path.
    ///
    /// # Errors
    ///
    /// Validation stops are returned as their own variants; everything after
    /// submission begins is [`CheckoutError::Failed`] with a reason and,
    /// when known, an order reference. A second call while one is in flight
    /// returns [`CheckoutError::InFlight`].
    #[instrument(skip(self, cart), fields(items = cart.items.len()))]
    pub async fn place_order(&self, cart: &Cart) -> Result<OrderConfirmation, CheckoutError> {
        // Synchronous acquire, before any await.
        let _guard = SubmissionGuard::try_acquire(&self.inner.submitting)
            .ok_or(CheckoutError::InFlight)?;

        let customer_id = self
            .inner
            .api
            .session()
            .customer_id()
            .ok_or(CheckoutError::NotSignedIn)?;

        let delivery = self.selected_delivery().ok_or(CheckoutError::NoAddressSelected)?;

        // "Marked non-serviceable" means a resolved lookup said so (or
        // failed); an unresolved pincode is not a marker. Cache read only,
        // never a new request.
        if let Some(outcome) = self
            .inner
            .logistics
            .serviceability_cached(&delivery.pincode)
            .await
            && !matches!(outcome, Ok(s) if s.prepaid)
        {
            return Err(CheckoutError::AddressNotServiceable);
        }

        let delivery_id = delivery
            .server_id
            .clone()
            .filter(AddressId::is_server_issued)
            .ok_or(CheckoutError::AddressNotSaved)?;

        let billing_choice = self
            .inner
            .billing
            .read()
            .map(|guard| *guard)
            .unwrap_or_default();
        let billing_id = match billing_choice {
            BillingChoice::SameAsDelivery => delivery_id.clone(),
            BillingChoice::Separate(token) => self
                .inner
                .addresses
                .find(token)
                .and_then(|address| address.server_id)
                .filter(AddressId::is_server_issued)
                .ok_or(CheckoutError::BillingAddressNotSaved)?,
        };

        let request = CreateOrderRequest {
            customer_id: &customer_id,
            delivery_address_id: &delivery_id,
            billing_address_id: &billing_id,
            client_reference: CorrelationToken::generate(),
            items: cart
                .items
                .iter()
                .map(|item| OrderLine {
                    product_id: &item.product_id,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                })
                .collect(),
        };

        let response: CreateOrderResponse = self
            .inner
            .api
            .post("/sell_order/create", json_body(&request))
            .await
            .map_err(|err| {
                CheckoutError::Failed(CheckoutFailure {
                    reason: err.to_string(),
                    order_ref: None,
                })
            })?;

        let subtotal = cart.subtotal();
        let delivery_charge = self
            .inner
            .logistics
            .delivery_charge_cached(&delivery.pincode)
            .await
            .unwrap_or_else(|| Price::zero(subtotal.currency_code));
        let total = cart.total(delivery_charge);

        match response.payment {
            Some(gateway) => {
                self.run_payment_flow(
                    gateway,
                    total,
                    response.order_id,
                    response.order_number,
                )
                .await
            }
            None => {
                debug!("order confirmed without payment payload");
                Ok(OrderConfirmation {
                    order_id: response.order_id,
                    order_number: response.order_number,
                    total,
                    payment: PaymentStatus::Pending,
                })
            }
        }
    }

    /// Drive the hosted payment widget and verify the result.
    async fn run_payment_flow(
        &self,
        gateway: GatewayOrder,
        total: Price,
        order_id: Option<OrderId>,
        order_number: Option<i64>,
    ) -> Result<OrderConfirmation, CheckoutError> {
        let session = PaymentSession {
            gateway,
            amount: total,
            order_id: order_id.clone(),
        };

        let collected = tokio::time::timeout(
            self.inner.payment_timeout,
            self.inner.collector.collect(&session),
        )
        .await;

        let callback = match collected {
            Ok(Ok(callback)) => callback,
            Ok(Err(err)) => {
                return Err(CheckoutError::Failed(CheckoutFailure {
                    reason: err.to_string(),
                    order_ref: order_id,
                }));
            }
            Err(_) => {
                return Err(CheckoutError::Failed(CheckoutFailure {
                    reason: format!(
                        "payment collection timed out after {}s",
                        self.inner.payment_timeout.as_secs()
                    ),
                    order_ref: order_id,
                }));
            }
        };

        self.verify_payment(&callback, order_id.as_ref())
            .await
            .map_err(|reason| {
                CheckoutError::Failed(CheckoutFailure {
                    reason,
                    order_ref: order_id.clone(),
                })
            })?;

        Ok(OrderConfirmation {
            order_id,
            order_number,
            total,
            payment: PaymentStatus::Captured,
        })
    }

    /// Verify a collected payment.
    ///
    /// If the backend rejects verification specifically because the order
    /// could not be located under the internal identifier, the call is
    /// retried once with that identifier omitted (the gateway identifiers
    /// alone must suffice) and the second response is authoritative.
    async fn verify_payment(
        &self,
        callback: &PaymentCallback,
        order_id: Option<&OrderId>,
    ) -> Result<(), String> {
        let first = self.post_verification(callback, order_id).await?;

        if first.verified {
            return Ok(());
        }

        if order_id.is_some()
            && first.error_code.as_deref() == Some(VERIFY_ORDER_NOT_FOUND)
        {
            warn!("verification could not locate the internal order; retrying without it");
            let second = self.post_verification(callback, None).await?;
            if second.verified {
                return Ok(());
            }
            return Err(rejection_reason(&second));
        }

        Err(rejection_reason(&first))
    }

    async fn post_verification(
        &self,
        callback: &PaymentCallback,
        order_id: Option<&OrderId>,
    ) -> Result<VerifyPaymentResponse, String> {
        let request = VerifyPaymentRequest {
            payment_id: &callback.payment_id,
            gateway_order_id: &callback.gateway_order_id,
            signature: &callback.signature,
            order_id,
        };

        self.inner
            .api
            .post::<VerifyPaymentResponse>("/sell_order/verify_payment", json_body(&request))
            .await
            .map_err(|err: ApiError| err.to_string())
    }

    async fn is_prepaid_serviceable(&self, address: &Address) -> bool {
        match self.inner.logistics.serviceability(&address.pincode).await {
            Ok(serviceability) => serviceability.prepaid,
            Err(err) => {
                warn!(error = %err, "treating unresolvable pincode as non-serviceable");
                false
            }
        }
    }

    fn set_selected(&self, token: Option<CorrelationToken>) {
        if let Ok(mut guard) = self.inner.selected_delivery.write() {
            *guard = token;
        }
    }
}

fn rejection_reason(response: &VerifyPaymentResponse) -> String {
    response
        .message
        .clone()
        .or_else(|| response.error_code.clone())
        .unwrap_or_else(|| "payment verification rejected".to_owned())
}
