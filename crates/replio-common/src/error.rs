//! Error types for replio
//!
//! One shared error enum covering the PG write path and the object store
//! boundary. Suspension-style conditions (missing objects, write locks)
//! are not errors; they park the op and never surface here.

use crate::types::{Epoch, ObjectId, PgId};
use thiserror::Error;

/// Common result type for replio operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for replio
#[derive(Debug, Error)]
pub enum Error {
    /// The request was built against an older cluster map than the PG
    /// requires; the caller must refresh its map and retry.
    #[error("stale map epoch {request}, pg membership changed at {required}")]
    StaleEpoch { request: Epoch, required: Epoch },

    #[error("object not found: {0}")]
    NoSuchObject(ObjectId),

    #[error("no stored revision satisfies {0}")]
    NoSuchRevision(ObjectId),

    #[error("unknown placement group: {0}")]
    UnknownPg(PgId),

    #[error("object store error: {0}")]
    Store(String),

    #[error("corrupt persisted state: {0}")]
    Corrupt(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),
}

impl Error {
    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a corrupt-state error
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    /// Create a not implemented error
    pub fn not_implemented(feature: impl Into<String>) -> Self {
        Self::NotImplemented(feature.into())
    }

    /// Check if this error clears after the caller refreshes its map
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StaleEpoch { .. })
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NoSuchObject(_) | Self::NoSuchRevision(_) | Self::UnknownPg(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectName;

    #[test]
    fn test_error_retryable() {
        let e = Error::StaleEpoch {
            request: 3,
            required: 5,
        };
        assert!(e.is_retryable());
        assert!(!Error::store("boom").is_retryable());
    }

    #[test]
    fn test_error_not_found() {
        let oid = ObjectId::head(ObjectName::new(7));
        assert!(Error::NoSuchObject(oid).is_not_found());
        assert!(Error::NoSuchRevision(oid).is_not_found());
        assert!(!Error::store("boom").is_not_found());
    }
}
