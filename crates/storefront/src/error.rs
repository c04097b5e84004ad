//! Unified error type for the storefront client.
//!
//! Each component defines its own error enum close to the code; this module
//! unifies them for embedders that handle everything in one place.

use thiserror::Error;

use crate::api::ApiError;
use crate::checkout::CheckoutError;
use crate::config::ConfigError;
use crate::favourites::FavouritesError;
use crate::logistics::LogisticsError;
use crate::session::SessionError;

/// Top-level error for the storefront client.
#[derive(Debug, Error)]
pub enum StorefrontError {
    /// Configuration loading failed.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// A backend call failed.
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Credential storage failed.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// A logistics lookup failed.
    #[error("Logistics error: {0}")]
    Logistics(#[from] LogisticsError),

    /// Checkout was blocked or failed.
    #[error("Checkout error: {0}")]
    Checkout(#[from] CheckoutError),

    /// A favourites operation failed.
    #[error("Favourites error: {0}")]
    Favourites(#[from] FavouritesError),
}

/// Result type alias for `StorefrontError`.
pub type Result<T> = std::result::Result<T, StorefrontError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_source_message() {
        let err = StorefrontError::from(CheckoutError::NotSignedIn);
        assert_eq!(err.to_string(), "Checkout error: sign in to place an order");

        let err = StorefrontError::from(SessionError::Storage("disk full".to_string()));
        assert_eq!(
            err.to_string(),
            "Session error: credential storage error: disk full"
        );
    }
}
