//! Kirana Core - Shared types library.
//!
//! This crate provides the domain types used across the Kirana storefront
//! client:
//! - `storefront` - Typed client for the Kirana commerce REST backend
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no HTTP clients, no caches.
//! This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for type-safe IDs, postal codes, prices,
//!   statuses, and correlation tokens

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
