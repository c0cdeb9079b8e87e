//! Error types for the unit-of-work runtime.

use thiserror::Error;
use uowdb_store::{EntityReference, StoreError};

/// Result type for unit-of-work operations.
pub type UowResult<T> = Result<T, UowError>;

/// Errors that can occur in unit-of-work operations.
#[derive(Debug, Error)]
pub enum UowError {
    /// The requested reference is absent from every candidate store.
    ///
    /// Recoverable: the caller may treat this as "does not exist".
    #[error("entity not found: {reference}")]
    EntityNotFound {
        /// The reference that could not be resolved.
        reference: EntityReference,
    },

    /// The reference exists but not as the expected entity type.
    ///
    /// Caller error, not retryable.
    #[error("entity {reference} is not a {expected} (found {actual})")]
    WrongEntityType {
        /// The resolved reference.
        reference: EntityReference,
        /// The type the caller expected.
        expected: String,
        /// The type the store declared.
        actual: String,
    },

    /// A version mismatch was detected while staging changes.
    ///
    /// Carries the full set of conflicting references. The session has
    /// been discarded; retry the whole operation in a fresh session.
    #[error("concurrent modification of {} entity(ies)", references.len())]
    ConcurrentModification {
        /// Every entity whose version no longer matched the store.
        references: Vec<EntityReference>,
    },

    /// Completion failed for a reason other than a version conflict.
    ///
    /// The session has been discarded; not retryable without
    /// investigation.
    #[error("unit of work completion failed: {message}")]
    CompletionFailure {
        /// Description of the failure.
        message: String,
    },

    /// An operation was invoked on a closed session.
    #[error("unit of work has been closed")]
    SessionClosed,

    /// `pause` was invoked on an already paused session.
    #[error("unit of work is already paused")]
    AlreadyPaused,

    /// `resume` was invoked on a session that is not paused.
    #[error("unit of work has not been paused")]
    NotPaused,

    /// An entity builder was used after `new_instance`.
    #[error("entity builder has already been consumed")]
    BuilderInvalidated,

    /// A creation lifecycle hook or validity constraint rejected the
    /// entity.
    #[error("lifecycle constraint violation: {message}")]
    Lifecycle {
        /// Description of the violation.
        message: String,
    },

    /// An unclassified store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl UowError {
    /// Creates an entity-not-found error.
    pub fn not_found(reference: EntityReference) -> Self {
        Self::EntityNotFound { reference }
    }

    /// Creates a completion failure.
    pub fn completion_failure(message: impl Into<String>) -> Self {
        Self::CompletionFailure {
            message: message.into(),
        }
    }

    /// Creates a lifecycle constraint violation.
    pub fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle {
            message: message.into(),
        }
    }

    /// Classifies a store error raised while staging changes.
    ///
    /// Version conflicts become [`UowError::ConcurrentModification`]
    /// carrying the full conflicting set; everything else is wrapped as a
    /// generic completion failure.
    pub(crate) fn classify_completion(error: StoreError) -> Self {
        match error {
            StoreError::VersionConflict { references } => {
                Self::ConcurrentModification { references }
            }
            other => Self::completion_failure(other.to_string()),
        }
    }
}
