//! Error types for store operations.

use crate::reference::EntityReference;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur at the store boundary.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested entity does not exist in this store.
    #[error("entity not found: {reference}")]
    EntityNotFound {
        /// The reference that was not found.
        reference: EntityReference,
    },

    /// An entity with this reference already exists.
    #[error("entity already exists: {reference}")]
    EntityAlreadyExists {
        /// The reference that is already taken.
        reference: EntityReference,
    },

    /// One or more entities were modified concurrently.
    ///
    /// The store rejects the whole `apply_changes` call, not just the
    /// offending entities, because a partially staged backend transaction
    /// is not resumable.
    #[error("concurrent modification of {} entity(ies)", references.len())]
    VersionConflict {
        /// Every reference whose captured version no longer matches the
        /// version persisted in the store.
        references: Vec<EntityReference>,
    },

    /// The entity state has been removed and may not be mutated.
    #[error("entity state is removed: {reference}")]
    StateRemoved {
        /// The removed entity.
        reference: EntityReference,
    },

    /// The store unit of work has already been applied or discarded.
    #[error("store unit of work is closed")]
    UnitOfWorkClosed,

    /// An internal backend failure.
    #[error("backend error: {message}")]
    Backend {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Creates an entity-not-found error.
    pub fn not_found(reference: EntityReference) -> Self {
        Self::EntityNotFound { reference }
    }

    /// Creates an already-exists error.
    pub fn already_exists(reference: EntityReference) -> Self {
        Self::EntityAlreadyExists { reference }
    }

    /// Creates a version conflict carrying every conflicting reference.
    pub fn version_conflict(references: Vec<EntityReference>) -> Self {
        Self::VersionConflict { references }
    }

    /// Creates a removed-state error.
    pub fn state_removed(reference: EntityReference) -> Self {
        Self::StateRemoved { reference }
    }

    /// Creates a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }

    /// Returns `true` if this error is an entity-not-found.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::EntityNotFound { .. })
    }
}
