//! Newtype IDs for type-safe entity references.
//!
//! Use the `define_id!` macro to create type-safe ID wrappers that prevent
//! accidentally mixing IDs from different entity types. The backend issues
//! string identifiers (24-character lowercase hex object references), so the
//! wrappers are string-backed.

/// Length of a server-issued object reference.
pub const OBJECT_ID_LENGTH: usize = 24;

/// Check whether a string follows the server-issued identifier convention:
/// exactly 24 lowercase hexadecimal characters.
///
/// Records created locally (and not yet persisted) carry no such identifier,
/// so this is the test for "the server knows about this record".
#[must_use]
pub fn is_object_id(s: &str) -> bool {
    s.len() == OBJECT_ID_LENGTH && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Macro to define a type-safe ID wrapper.
///
/// Creates a newtype wrapper around `String` with:
/// - `Serialize`/`Deserialize` with `#[serde(transparent)]`
/// - `Debug`, `Clone`, `PartialEq`, `Eq`, `Hash`
/// - Conversion methods: `new()`, `as_str()`, `into_inner()`
/// - `is_server_issued()` checking the 24-hex object reference convention
/// - `From<String>` and `From<&str>` implementations
///
/// # Example
///
/// ```rust
/// # use kirana_core::define_id;
/// define_id!(CustomerId);
/// define_id!(OrderId);
///
/// let customer_id = CustomerId::new("64a51cf2e9b4d20019f3a8c1");
/// let order_id = OrderId::new("64a51cf2e9b4d20019f3a8c2");
///
/// // These are different types, so this won't compile:
/// // let _: CustomerId = order_id;
/// ```
#[macro_export]
macro_rules! define_id {
    ($name:ident) => {
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new ID from a string value.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Get the underlying string value.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the ID and return its inner string.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }

            /// Whether this ID follows the server-issued identifier
            /// convention (24 lowercase hex characters).
            #[must_use]
            pub fn is_server_issued(&self) -> bool {
                $crate::types::id::is_object_id(&self.0)
            }
        }

        impl ::core::fmt::Display for $name {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

// Define standard entity IDs
define_id!(CustomerId);
define_id!(ProductId);
define_id!(AddressId);
define_id!(OrderId);
define_id!(CartId);
define_id!(FavouriteId);
define_id!(CountryId);
define_id!(StateId);
define_id!(CityId);
define_id!(PaymentId);
