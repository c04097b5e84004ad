//! Core types for the Kirana storefront client.
//!
//! This module provides type-safe wrappers for common domain concepts.

pub mod correlation;
pub mod id;
pub mod pincode;
pub mod price;
pub mod status;

pub use correlation::CorrelationToken;
pub use id::*;
pub use pincode::{Pincode, PincodeError};
pub use price::{CurrencyCode, Price};
pub use status::*;
