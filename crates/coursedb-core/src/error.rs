//! Core error types.

use thiserror::Error;

/// Result alias used throughout the core.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Core errors returned to callers.
#[derive(Debug, Error)]
pub enum Error {
    /// Entity declarations are malformed; raised while building the registry.
    #[error("schema description error: {0}")]
    SchemaDescription(String),

    /// Entity kind is not registered.
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    /// A field path segment does not resolve.
    #[error("unknown field '{segment}' on entity '{entity}' in path '{path}'")]
    UnknownField {
        entity: String,
        segment: String,
        path: String,
    },

    /// A between clause has lower > upper.
    #[error("invalid range for '{path}': lower bound is greater than upper bound")]
    InvalidRange { path: String },

    /// Operand does not fit the operator or the field type.
    #[error("invalid operand for '{path}': {reason}")]
    InvalidOperand { path: String, reason: String },

    /// Fetch joins may not continue past a polymorphic boundary.
    #[error("unsupported fetch join '{path}' across polymorphic entity '{entity}'")]
    UnsupportedPolymorphicJoin { path: String, entity: String },

    /// Operation needs a concrete entity but got an abstract base type.
    #[error("entity '{0}' is abstract; use one of its concrete subtypes")]
    AbstractEntity(String),

    /// Storage rejected a write because of a constraint on `field`.
    #[error("constraint violation on {entity}.{field}: {message}")]
    ConstraintViolation {
        entity: String,
        field: String,
        message: String,
    },

    /// The row changed or vanished underneath a write.
    #[error("concurrent modification of {entity}: {message}")]
    ConcurrentModification { entity: String, message: String },

    /// Storage could not be reached after retrying.
    #[error("storage unavailable after {attempts} attempt(s): {message}")]
    StorageUnavailable { attempts: u32, message: String },

    /// The planner produced a statement storage could not run.
    #[error("internal plan error: {message}")]
    InternalPlan { message: String, statement: String },

    /// Entity with the given identity does not exist.
    #[error("{entity} with identity {identity} not found")]
    NotFound { entity: String, identity: String },

    /// Entity data does not match its declaration.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl Error {
    /// Errors the caller can fix by changing the request.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownEntity(_)
                | Error::UnknownField { .. }
                | Error::InvalidRange { .. }
                | Error::InvalidOperand { .. }
                | Error::UnsupportedPolymorphicJoin { .. }
                | Error::AbstractEntity(_)
        )
    }

    /// Errors worth retrying with the same or corrected data.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConcurrentModification { .. } | Error::StorageUnavailable { .. }
        )
    }

    pub(crate) fn unknown_field(
        entity: impl Into<String>,
        segment: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Error::UnknownField {
            entity: entity.into(),
            segment: segment.into(),
            path: path.into(),
        }
    }

    pub(crate) fn invalid_operand(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidOperand {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Failures reported by a storage backend.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// A storage constraint (unique, not-null, ...) rejected the statement.
    #[error("constraint failed on {table:?}.{column:?}: {message}")]
    Constraint {
        table: Option<String>,
        column: Option<String>,
        message: String,
    },

    /// A write did not touch the rows it expected to.
    #[error("conflicting modification: {0}")]
    Conflict(String),

    /// Transient failure; the request may succeed if retried.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The connection was closed or the request interrupted.
    #[error("connection closed: {0}")]
    Closed(String),

    /// The statement itself is invalid.
    #[error("malformed statement: {0}")]
    Malformed(String),
}

impl StorageError {
    /// Whether the executor should retry the request.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Unavailable(_))
    }
}
