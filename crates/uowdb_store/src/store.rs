//! Store contract consumed by the unit-of-work runtime.

use crate::error::StoreResult;
use crate::reference::EntityReference;
use crate::state::SharedEntityState;
use crate::types::LogicalTime;

/// A pluggable persistence backend.
///
/// Stores are shared across many concurrent sessions and must provide
/// their own internal concurrency control (typically a per-record version
/// check). The unit-of-work runtime only coordinates; it never locks
/// store internals.
pub trait EntityStore: Send + Sync {
    /// Returns the unique name of this store.
    ///
    /// The session keys its open backend transactions by this name, so
    /// two stores participating in the same session must not share one.
    fn name(&self) -> &str;

    /// Opens a new backend transaction for one session.
    ///
    /// Called lazily on the first touch of this store within a session.
    /// `usecase` and `now` describe the logical operation and its clock
    /// value; backends may record both on committed entities.
    fn new_unit_of_work(&self, usecase: &str, now: LogicalTime) -> Box<dyn EntityStoreUnitOfWork>;
}

/// One open backend transaction.
///
/// The transaction owns the subset of entity states it loaded or will
/// persist. Its lifecycle is `open → applied | discarded`; after
/// `apply_changes` or `discard` every operation fails with
/// `UnitOfWorkClosed`.
pub trait EntityStoreUnitOfWork {
    /// Loads the state of an entity.
    ///
    /// Preloading is idempotent: repeated calls for the same reference
    /// return the same shared state without duplicating side effects.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if the store has no such entity.
    fn entity_state_of(&mut self, reference: &EntityReference) -> StoreResult<SharedEntityState>;

    /// Allocates a fresh, uncommitted state for entity creation.
    ///
    /// # Errors
    ///
    /// Returns `EntityAlreadyExists` if the reference is already taken in
    /// this store or this transaction.
    fn new_entity_state(
        &mut self,
        reference: EntityReference,
        entity_type: &str,
    ) -> StoreResult<SharedEntityState>;

    /// Validates all buffered changes and stages them for commit.
    ///
    /// Compares the captured version of every modified state against the
    /// version currently persisted. On success the transaction is spent
    /// and the returned committer must be driven to exactly one of
    /// `commit` or `cancel`.
    ///
    /// # Errors
    ///
    /// Returns `VersionConflict` carrying **every** conflicting reference
    /// if any version check fails, or another store error if staging
    /// fails. The transaction is spent either way.
    fn apply_changes(&mut self) -> StoreResult<Box<dyn StateCommitter>>;

    /// Drops all buffered state without persisting anything.
    ///
    /// Safe to call on an already spent transaction.
    fn discard(&mut self);
}

/// Two-phase commit handle returned by a successful `apply_changes`.
///
/// Exactly one of the two methods must be invoked; consuming `self`
/// makes double use a compile error rather than a runtime contract.
pub trait StateCommitter {
    /// Makes the staged changes durable.
    ///
    /// # Errors
    ///
    /// Returns a store error if the backend fails to persist. Staged
    /// changes of other backends may already be committed by then; the
    /// orchestrator reports, it cannot undo.
    fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Abandons the staged changes.
    ///
    /// Must not fail; cancellation is the abort path and has nothing
    /// sensible to do with an error.
    fn cancel(self: Box<Self>);
}

impl core::fmt::Debug for dyn StateCommitter {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("StateCommitter")
    }
}
