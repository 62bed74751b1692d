//! Correlation ID for request/response matching.
//!
//! Uses random UUID v4 values. Both ends of a duplex connection originate
//! calls independently, so ids must not depend on a shared counter.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Correlation ID linking an outbound request to its eventual response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Generate a new random correlation ID (UUID v4)
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from the wire representation
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}
