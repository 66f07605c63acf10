//! Error taxonomy shared by the repository, the HTTP boundary and the worker.

use thiserror::Error;

use crate::id::EntityId;

/// Result type used by repository and store operations.
pub type CrudResult<T> = Result<T, CrudError>;

/// Failure of a CRUD or unit-of-work operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CrudError {
    /// Malformed input, rejected before touching storage.
    #[error("validation failed: {0}")]
    Validation(String),

    /// No row matched an identifier-based lookup.
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: EntityId },

    /// The entity type lacks the capability the operation needs.
    #[error("{operation} is not supported for {entity}")]
    Unsupported {
        entity: &'static str,
        operation: &'static str,
    },

    /// A process-wide resource was used before connect or after disconnect.
    #[error("{0} is not initialized")]
    NotInitialized(&'static str),

    /// Commit or rollback failed; the unit of work did not apply.
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// Any other storage failure (query, decode, connection).
    #[error("storage error: {0}")]
    Storage(String),
}

impl CrudError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(entity: &'static str, id: EntityId) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn unsupported(entity: &'static str, operation: &'static str) -> Self {
        Self::Unsupported { entity, operation }
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn transaction(msg: impl Into<String>) -> Self {
        Self::Transaction(msg.into())
    }

    /// Errors a client can act on (as opposed to server-side failures).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotFound { .. } | Self::Unsupported { .. }
        )
    }
}
