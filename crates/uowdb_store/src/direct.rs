//! In-memory entity store with write-through (direct) state.

use crate::error::{StoreError, StoreResult};
use crate::reference::EntityReference;
use crate::state::{EntityState, EntityStatus, SharedEntityState};
use crate::store::{EntityStore, EntityStoreUnitOfWork, StateCommitter};
use crate::types::LogicalTime;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// An in-memory store using the **direct** state strategy.
///
/// Sessions mutate the store's live entity states; every write is
/// immediately visible to concurrent sessions and `commit` is a
/// formality that finalizes statuses and bumps versions. This trades
/// isolation for simplicity:
///
/// - there is no all-changes-together validation before writes take
///   effect
/// - `discard` removes entities created by the transaction but cannot
///   undo property or association writes
///
/// This is the documented weaker-consistency configuration; prefer
/// [`crate::MemoryEntityStore`] when real optimistic concurrency is
/// needed.
pub struct DirectMemoryStore {
    name: String,
    records: Arc<RwLock<HashMap<EntityReference, SharedEntityState>>>,
}

impl DirectMemoryStore {
    /// Creates an empty store with the given unique name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Returns the number of live entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.records.read().len()
    }
}

impl EntityStore for DirectMemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn new_unit_of_work(&self, usecase: &str, now: LogicalTime) -> Box<dyn EntityStoreUnitOfWork> {
        tracing::debug!(store = %self.name, usecase, %now, "opening direct store unit of work");
        Box::new(DirectUnitOfWork {
            records: Arc::clone(&self.records),
            touched: HashMap::new(),
            created: Vec::new(),
            open: true,
        })
    }
}

impl std::fmt::Debug for DirectMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectMemoryStore")
            .field("name", &self.name)
            .field("entity_count", &self.entity_count())
            .finish()
    }
}

struct DirectUnitOfWork {
    records: Arc<RwLock<HashMap<EntityReference, SharedEntityState>>>,
    /// Live states this transaction handed out.
    touched: HashMap<EntityReference, SharedEntityState>,
    /// References created by this transaction, removable on discard.
    created: Vec<EntityReference>,
    open: bool,
}

impl DirectUnitOfWork {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(StoreError::UnitOfWorkClosed)
        }
    }
}

impl EntityStoreUnitOfWork for DirectUnitOfWork {
    fn entity_state_of(&mut self, reference: &EntityReference) -> StoreResult<SharedEntityState> {
        self.ensure_open()?;

        if let Some(state) = self.touched.get(reference) {
            return Ok(Arc::clone(state));
        }

        let records = self.records.read();
        let state = records
            .get(reference)
            .map(Arc::clone)
            .ok_or_else(|| StoreError::not_found(reference.clone()))?;
        drop(records);

        self.touched.insert(reference.clone(), Arc::clone(&state));
        Ok(state)
    }

    fn new_entity_state(
        &mut self,
        reference: EntityReference,
        entity_type: &str,
    ) -> StoreResult<SharedEntityState> {
        self.ensure_open()?;

        let mut records = self.records.write();
        if records.contains_key(&reference) {
            return Err(StoreError::already_exists(reference));
        }

        // Write-through: the new state is live in the store immediately.
        let shared: SharedEntityState =
            Arc::new(RwLock::new(EntityState::new(reference.clone(), entity_type)));
        records.insert(reference.clone(), Arc::clone(&shared));
        drop(records);

        self.created.push(reference.clone());
        self.touched.insert(reference, Arc::clone(&shared));
        Ok(shared)
    }

    fn apply_changes(&mut self) -> StoreResult<Box<dyn StateCommitter>> {
        self.ensure_open()?;
        self.open = false;

        // All mutations already took effect; staging only gathers the
        // finalization work (status reset, version bump, removals).
        let mut finalize = Vec::new();
        for state in self.touched.values() {
            if state.read().is_modified() {
                finalize.push(Arc::clone(state));
            }
        }

        Ok(Box::new(DirectCommitter {
            records: Arc::clone(&self.records),
            finalize,
        }))
    }

    fn discard(&mut self) {
        if !self.open && self.touched.is_empty() {
            return;
        }
        self.open = false;

        // Creations can be taken back; in-place mutations cannot.
        let mut records = self.records.write();
        for reference in self.created.drain(..) {
            records.remove(&reference);
        }
        drop(records);

        let leaked = self
            .touched
            .values()
            .filter(|s| s.read().status() == EntityStatus::Updated)
            .count();
        if leaked > 0 {
            tracing::warn!(
                entities = leaked,
                "direct store discard cannot undo write-through mutations"
            );
        }
        self.touched.clear();
    }
}

struct DirectCommitter {
    records: Arc<RwLock<HashMap<EntityReference, SharedEntityState>>>,
    finalize: Vec<SharedEntityState>,
}

impl StateCommitter for DirectCommitter {
    fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut records = self.records.write();
        for shared in self.finalize {
            let mut state = shared.write();
            match state.status() {
                EntityStatus::Removed => {
                    let reference = state.reference().clone();
                    records.remove(&reference);
                }
                _ => {
                    let next = state.version().next();
                    state.commit_as_loaded(next);
                }
            }
        }
        Ok(())
    }

    fn cancel(self: Box<Self>) {
        // Mutations already reached the live states and stay there.
        if !self.finalize.is_empty() {
            tracing::warn!(
                entities = self.finalize.len(),
                "direct store cancel cannot undo write-through mutations"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::PropertyValue;
    use crate::Version;

    #[test]
    fn writes_are_visible_before_commit() {
        let store = DirectMemoryStore::new("direct");
        let reference = EntityReference::new("p-1");

        let mut writer = store.new_unit_of_work("writer", LogicalTime::new(0));
        let state = writer.new_entity_state(reference.clone(), "Person").unwrap();
        state.write().set_property("name", "Alice").unwrap();

        // A concurrent transaction sees the uncommitted entity.
        let mut reader = store.new_unit_of_work("reader", LogicalTime::new(0));
        let seen = reader.entity_state_of(&reference).unwrap();
        assert_eq!(
            seen.read().property("name").and_then(PropertyValue::as_text),
            Some("Alice")
        );
    }

    #[test]
    fn commit_finalizes_status_and_version() {
        let store = DirectMemoryStore::new("direct");
        let reference = EntityReference::new("p-1");

        let mut uow = store.new_unit_of_work("create", LogicalTime::new(0));
        uow.new_entity_state(reference.clone(), "Person").unwrap();
        uow.apply_changes().unwrap().commit().unwrap();

        let mut check = store.new_unit_of_work("read", LogicalTime::new(1));
        let state = check.entity_state_of(&reference).unwrap();
        assert_eq!(state.read().status(), EntityStatus::Loaded);
        assert_eq!(state.read().version(), Version::new(1));
    }

    #[test]
    fn commit_applies_removal() {
        let store = DirectMemoryStore::new("direct");
        let reference = EntityReference::new("p-1");
        {
            let mut uow = store.new_unit_of_work("create", LogicalTime::new(0));
            uow.new_entity_state(reference.clone(), "Person").unwrap();
            uow.apply_changes().unwrap().commit().unwrap();
        }

        let mut uow = store.new_unit_of_work("remove", LogicalTime::new(1));
        let state = uow.entity_state_of(&reference).unwrap();
        state.write().remove().unwrap();
        uow.apply_changes().unwrap().commit().unwrap();

        assert_eq!(store.entity_count(), 0);
    }

    #[test]
    fn discard_removes_creations_only() {
        let store = DirectMemoryStore::new("direct");
        let existing = EntityReference::new("old");
        {
            let mut uow = store.new_unit_of_work("seed", LogicalTime::new(0));
            uow.new_entity_state(existing.clone(), "Person").unwrap();
            uow.apply_changes().unwrap().commit().unwrap();
        }

        let mut uow = store.new_unit_of_work("abort", LogicalTime::new(1));
        uow.new_entity_state(EntityReference::new("fresh"), "Person")
            .unwrap();
        let state = uow.entity_state_of(&existing).unwrap();
        state.write().set_property("name", "Mallory").unwrap();
        uow.discard();

        // The creation is gone, the write-through mutation is not.
        assert_eq!(store.entity_count(), 1);
        let mut check = store.new_unit_of_work("read", LogicalTime::new(2));
        let state = check.entity_state_of(&existing).unwrap();
        assert_eq!(
            state.read().property("name").and_then(PropertyValue::as_text),
            Some("Mallory")
        );
    }
}
