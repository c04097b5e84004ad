//! Status enums shared across storefront components.

use serde::{Deserialize, Serialize};

/// Payment state of an order as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Order created; payment not yet collected.
    #[default]
    Pending,
    /// Payment collected and verified.
    Captured,
    /// Payment attempted and rejected.
    Failed,
}

/// How an order settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Collected up front through the hosted gateway.
    Prepaid,
    /// Collected on delivery.
    CashOnDelivery,
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Captured => write!(f, "captured"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
