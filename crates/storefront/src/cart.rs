//! Cart snapshot.
//!
//! The server cart is authoritative. The client fetches it fresh on session
//! entry and derives display values from the snapshot; nothing is persisted
//! locally beyond the item count exposed for badge mirrors.

use serde::Deserialize;
use tracing::instrument;

use kirana_core::{CurrencyCode, CustomerId, Price, ProductId};

use crate::api::{ApiClient, ApiError};

/// One cart line.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: ProductId,
    pub title: String,
    pub unit_price: Price,
    pub quantity: u32,
    #[serde(default)]
    pub image_ref: Option<String>,
}

impl CartItem {
    /// Line total: unit price times quantity.
    #[must_use]
    pub fn line_total(&self) -> Price {
        self.unit_price
            .checked_mul_quantity(self.quantity)
            .unwrap_or(self.unit_price)
    }
}

/// A snapshot of the server cart.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Cart {
    pub items: Vec<CartItem>,
}

impl Cart {
    /// Sum of line totals.
    ///
    /// Carts are single-currency; lines in a different currency than the
    /// first are skipped rather than summed incorrectly.
    #[must_use]
    pub fn subtotal(&self) -> Price {
        let currency = self
            .items
            .first()
            .map_or(CurrencyCode::INR, |item| item.unit_price.currency_code);

        self.items
            .iter()
            .map(CartItem::line_total)
            .fold(Price::zero(currency), |acc, line| {
                acc.checked_add(line).unwrap_or(acc)
            })
    }

    /// Subtotal plus the delivery charge.
    #[must_use]
    pub fn total(&self, delivery_charge: Price) -> Price {
        let subtotal = self.subtotal();
        subtotal.checked_add(delivery_charge).unwrap_or(subtotal)
    }

    /// Total number of units, for the badge mirror.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    /// Whether the cart holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Cart client.
#[derive(Clone)]
pub struct CartClient {
    api: ApiClient,
}

impl CartClient {
    /// Create a cart client over an API client.
    #[must_use]
    pub const fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Fetch the authoritative cart for a customer.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    #[instrument(skip(self), fields(customer = %customer_id))]
    pub async fn fetch(&self, customer_id: &CustomerId) -> Result<Cart, ApiError> {
        self.api
            .get(&format!("/cart?customerId={customer_id}"))
            .await
    }
}
