//! Correlation tokens for optimistic-record reconciliation.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A client-generated token identifying an optimistic record.
///
/// Generated when a record is created locally, before the server has issued
/// an identifier for it. The token is echoed through the create request so a
/// confirmation can be matched back to the optimistic entry it confirms,
/// replacing the entry in place instead of appending a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationToken(Uuid);

impl CorrelationToken {
    /// Generate a fresh token.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CorrelationToken {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}
