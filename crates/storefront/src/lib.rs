//! Kirana storefront client library.
//!
//! A typed client for the Kirana commerce REST backend: session management,
//! authenticated requests with transparent token refresh, the saved-address
//! directory, serviceability and delivery-charge lookups, cart snapshots,
//! checkout orchestration with a hosted payment gateway, and a favourites
//! mirror. The backend owns all business logic (pricing, inventory, order
//! processing, payment capture); this crate renders state, sequences calls,
//! and keeps local caches honest.
//!
//! # Example
//!
//! ```rust,ignore
//! use kirana_storefront::config::StorefrontConfig;
//! use kirana_storefront::state::Storefront;
//!
//! let config = StorefrontConfig::from_env()?;
//! let storefront = Storefront::new(config, collector)?;
//!
//! storefront.session().restore().await?;
//! let cart = storefront.cart().fetch(&customer_id).await?;
//! storefront.checkout().select_default().await;
//! let confirmation = storefront.checkout().place_order(&cart).await?;
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod cart;
pub mod checkout;
pub mod config;
pub mod customer;
pub mod error;
pub mod favourites;
pub mod logistics;
pub mod session;
pub mod state;
