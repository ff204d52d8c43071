//! Error types for chainstate
//!
//! A single taxonomy covers every mutating and reading operation. We use
//! `thiserror` for `Display` and `Error` implementations.
//!
//! | Variant | Retry safe | Meaning |
//! |---|---|---|
//! | `OutOfOrderWrite` | no | `valid_from` does not advance the identity's chain |
//! | `IdentityConflict` | yes | another writer holds the identity |
//! | `Persistence` | yes | storage unavailable; nothing was committed |
//! | `AuditWrite` | no | audit append failed; the mutation was aborted |
//! | `InvalidInput` | no | malformed request or configuration |
//! | `NotFound` | no | no open version to act on |

use crate::entity::EntityRef;
use crate::timestamp::Timestamp;
use std::io;
use thiserror::Error;

/// Result type alias for chainstate operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Error type for chainstate operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// `valid_from` precedes (or repeats) the latest version of the identity
    #[error("out-of-order write on {entity}: valid_from {valid_from} does not follow {latest}")]
    OutOfOrderWrite {
        /// Identity written to
        entity: EntityRef,
        /// Rejected `valid_from`
        valid_from: Timestamp,
        /// Bound the write had to exceed
        latest: Timestamp,
    },

    /// The identity's writer lock could not be acquired in time
    #[error("identity conflict on {entity}: a concurrent write is in progress")]
    IdentityConflict {
        /// Contended identity
        entity: EntityRef,
    },

    /// Underlying storage failed or is unavailable
    #[error("persistence failure: {message}")]
    Persistence {
        /// Failure description
        message: String,
    },

    /// Appending to the audit log failed; the enclosing mutation was aborted
    #[error("audit write failure: {message}")]
    AuditWrite {
        /// Failure description
        message: String,
    },

    /// Malformed request or configuration
    #[error("invalid input: {message}")]
    InvalidInput {
        /// Failure description
        message: String,
    },

    /// No open version exists for the identity
    #[error("not found: {entity}")]
    NotFound {
        /// Missing identity
        entity: EntityRef,
    },
}

impl StoreError {
    /// Out-of-order write
    pub fn out_of_order(entity: EntityRef, valid_from: Timestamp, latest: Timestamp) -> Self {
        StoreError::OutOfOrderWrite {
            entity,
            valid_from,
            latest,
        }
    }

    /// Contention on an identity
    pub fn identity_conflict(entity: EntityRef) -> Self {
        StoreError::IdentityConflict { entity }
    }

    /// Storage failure
    pub fn persistence(message: impl Into<String>) -> Self {
        StoreError::Persistence {
            message: message.into(),
        }
    }

    /// Audit append failure
    pub fn audit_write(message: impl Into<String>) -> Self {
        StoreError::AuditWrite {
            message: message.into(),
        }
    }

    /// Invalid input
    pub fn invalid_input(message: impl Into<String>) -> Self {
        StoreError::InvalidInput {
            message: message.into(),
        }
    }

    /// Missing identity
    pub fn not_found(entity: EntityRef) -> Self {
        StoreError::NotFound { entity }
    }

    /// Whether re-issuing the same request unchanged is safe
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::IdentityConflict { .. } | StoreError::Persistence { .. }
        )
    }

    /// Whether the error indicates an infrastructure fault rather than a caller error
    pub fn is_serious(&self) -> bool {
        matches!(
            self,
            StoreError::AuditWrite { .. } | StoreError::Persistence { .. }
        )
    }

    /// The identity the error refers to, if any
    pub fn entity(&self) -> Option<&EntityRef> {
        match self {
            StoreError::OutOfOrderWrite { entity, .. }
            | StoreError::IdentityConflict { entity }
            | StoreError::NotFound { entity } => Some(entity),
            _ => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::persistence(e.to_string())
    }
}
