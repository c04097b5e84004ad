//! Hosted payment collection seam.
//!
//! The payment widget is an external collaborator: the backend creates a
//! gateway order, the widget collects the payment, and its completion
//! callback carries the identifiers the verification endpoint needs. The
//! orchestrator drives the widget through [`PaymentCollector`] and bounds
//! the wait with a timeout, treating a load failure or timeout as a
//! checkout failure.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use kirana_core::{OrderId, Price};

/// A gateway order handed to the hosted payment widget.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayOrder {
    /// The gateway's order reference.
    pub gateway_order_id: String,
    /// Public key identifying the merchant to the widget.
    pub key_id: String,
}

/// Everything the widget needs to collect a payment.
#[derive(Debug, Clone)]
pub struct PaymentSession {
    pub gateway: GatewayOrder,
    /// Amount being collected.
    pub amount: Price,
    /// Internal order reference, when the backend issued one.
    pub order_id: Option<OrderId>,
}

/// The widget's completion callback payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCallback {
    /// The gateway's payment reference.
    pub payment_id: String,
    /// The gateway's order reference (echoed from the session).
    pub gateway_order_id: String,
    /// Gateway signature over the payment/order pair.
    pub signature: String,
}

/// Payment collection failures.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// The widget script failed to load.
    #[error("payment widget failed to load: {0}")]
    WidgetLoad(String),

    /// The customer dismissed the widget or the gateway declined.
    #[error("payment not completed: {0}")]
    Abandoned(String),
}

/// Drives the hosted payment widget.
///
/// Implementations surface whatever the embedding environment provides: a
/// browser widget, a redirect flow, or a scripted double in tests. The
/// orchestrator applies its own timeout around `collect`, so implementations
/// do not need one.
#[async_trait]
pub trait PaymentCollector: Send + Sync {
    /// Collect a payment for the session and return the gateway callback.
    async fn collect(&self, session: &PaymentSession) -> Result<PaymentCallback, PaymentError>;
}
