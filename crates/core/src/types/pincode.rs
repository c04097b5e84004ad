//! Postal code type.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing a [`Pincode`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PincodeError {
    /// The input string is empty.
    #[error("pincode cannot be empty")]
    Empty,
    /// The input is not exactly six characters.
    #[error("pincode must be exactly {expected} digits (got {got})")]
    InvalidLength {
        /// Required number of digits.
        expected: usize,
        /// Number of characters provided.
        got: usize,
    },
    /// The input contains a non-digit character.
    #[error("pincode must contain only digits")]
    InvalidDigit,
    /// The first digit is zero.
    #[error("pincode cannot start with 0")]
    LeadingZero,
}

/// A delivery postal code.
///
/// Serviceability and delivery-charge lookups are keyed by pincode, so the
/// type is validated at the boundary: a [`Pincode`] that exists is always a
/// well-formed code, and invalid input never reaches the network.
///
/// ## Constraints
///
/// - Exactly 6 ASCII digits
/// - First digit in 1-9
///
/// ## Examples
///
/// ```
/// use kirana_core::Pincode;
///
/// assert!(Pincode::parse("560034").is_ok());
/// assert!(Pincode::parse("110001").is_ok());
///
/// assert!(Pincode::parse("").is_err());        // empty
/// assert!(Pincode::parse("56003").is_err());   // too short
/// assert!(Pincode::parse("5600a4").is_err());  // non-digit
/// assert!(Pincode::parse("060034").is_err());  // leading zero
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct Pincode(String);

impl Pincode {
    /// Number of digits in a pincode.
    pub const LENGTH: usize = 6;

    /// Parse a `Pincode` from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input:
    /// - Is empty
    /// - Is not exactly 6 characters
    /// - Contains a non-digit character
    /// - Starts with 0
    pub fn parse(s: &str) -> Result<Self, PincodeError> {
        if s.is_empty() {
            return Err(PincodeError::Empty);
        }

        if s.len() != Self::LENGTH {
            return Err(PincodeError::InvalidLength {
                expected: Self::LENGTH,
                got: s.len(),
            });
        }

        if !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(PincodeError::InvalidDigit);
        }

        if s.starts_with('0') {
            return Err(PincodeError::LeadingZero);
        }

        Ok(Self(s.to_owned()))
    }

    /// Returns the pincode as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the `Pincode` and returns its inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Pincode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Pincode {
    type Err = PincodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Pincode {
    type Error = PincodeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Pincode> for String {
    fn from(pincode: Pincode) -> Self {
        pincode.0
    }
}

impl AsRef<str> for Pincode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
