//! In-memory entity store with buffered (indirect) state.

use crate::error::{StoreError, StoreResult};
use crate::reference::EntityReference;
use crate::state::{EntityState, EntityStatus, SharedEntityState};
use crate::store::{EntityStore, EntityStoreUnitOfWork, StateCommitter};
use crate::types::{LogicalTime, Version};
use crate::value::PropertyValue;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// One committed entity record.
#[derive(Debug, Clone)]
struct StoredEntity {
    entity_type: String,
    version: Version,
    last_modified: LogicalTime,
    properties: HashMap<String, PropertyValue>,
    associations: HashMap<String, EntityReference>,
    many_associations: HashMap<String, Vec<EntityReference>>,
    named_associations: HashMap<String, HashMap<String, EntityReference>>,
}

/// An in-memory store using the **indirect** state strategy.
///
/// Session mutations are buffered in per-transaction shadow states;
/// nothing touches the committed records until `apply_changes`, which
/// re-checks every captured version and stages only the changed
/// entities. Aborting is free: the shadow is simply dropped.
///
/// `apply_changes` takes the store's commit lock and the returned
/// committer holds it until `commit` or `cancel`, so the version check
/// and the write-back are one atomic step with respect to other
/// sessions committing against this store.
pub struct MemoryEntityStore {
    name: String,
    records: Arc<RwLock<HashMap<EntityReference, StoredEntity>>>,
    commit_lock: Arc<Mutex<()>>,
}

impl MemoryEntityStore {
    /// Creates an empty store with the given unique name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Arc::new(RwLock::new(HashMap::new())),
            commit_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Returns the number of committed entities.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.records.read().len()
    }

    /// Returns the committed version of an entity, if present.
    #[must_use]
    pub fn version_of(&self, reference: &EntityReference) -> Option<Version> {
        self.records.read().get(reference).map(|r| r.version)
    }
}

impl EntityStore for MemoryEntityStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn new_unit_of_work(&self, usecase: &str, now: LogicalTime) -> Box<dyn EntityStoreUnitOfWork> {
        tracing::debug!(store = %self.name, usecase, %now, "opening store unit of work");
        Box::new(MemoryUnitOfWork {
            records: Arc::clone(&self.records),
            commit_lock: Arc::clone(&self.commit_lock),
            now,
            states: HashMap::new(),
            open: true,
        })
    }
}

impl std::fmt::Debug for MemoryEntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEntityStore")
            .field("name", &self.name)
            .field("entity_count", &self.entity_count())
            .finish()
    }
}

/// One buffered transaction against a [`MemoryEntityStore`].
struct MemoryUnitOfWork {
    records: Arc<RwLock<HashMap<EntityReference, StoredEntity>>>,
    commit_lock: Arc<Mutex<()>>,
    now: LogicalTime,
    /// Shadow states loaded or allocated by this transaction.
    states: HashMap<EntityReference, SharedEntityState>,
    open: bool,
}

impl MemoryUnitOfWork {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(StoreError::UnitOfWorkClosed)
        }
    }
}

impl EntityStoreUnitOfWork for MemoryUnitOfWork {
    fn entity_state_of(&mut self, reference: &EntityReference) -> StoreResult<SharedEntityState> {
        self.ensure_open()?;

        // Preload is idempotent: a reference already shadowed in this
        // transaction is returned as-is.
        if let Some(state) = self.states.get(reference) {
            return Ok(Arc::clone(state));
        }

        let records = self.records.read();
        let record = records
            .get(reference)
            .ok_or_else(|| StoreError::not_found(reference.clone()))?;

        let state = EntityState::loaded(
            reference.clone(),
            record.entity_type.clone(),
            record.version,
            record.properties.clone(),
            record.associations.clone(),
            record.many_associations.clone(),
            record.named_associations.clone(),
        );
        drop(records);

        let shared: SharedEntityState = Arc::new(RwLock::new(state));
        self.states.insert(reference.clone(), Arc::clone(&shared));
        Ok(shared)
    }

    fn new_entity_state(
        &mut self,
        reference: EntityReference,
        entity_type: &str,
    ) -> StoreResult<SharedEntityState> {
        self.ensure_open()?;

        if self.states.contains_key(&reference) || self.records.read().contains_key(&reference) {
            return Err(StoreError::already_exists(reference));
        }

        let shared: SharedEntityState =
            Arc::new(RwLock::new(EntityState::new(reference.clone(), entity_type)));
        self.states.insert(reference, Arc::clone(&shared));
        Ok(shared)
    }

    fn apply_changes(&mut self) -> StoreResult<Box<dyn StateCommitter>> {
        self.ensure_open()?;
        self.open = false;

        // Held until the committer resolves, making version check plus
        // write-back atomic against other committing sessions.
        let guard = self.commit_lock.lock_arc();

        let mut conflicts = Vec::new();
        let mut staged = Vec::new();
        {
            let records = self.records.read();
            for (reference, shared) in &self.states {
                let state = shared.read();
                match state.status() {
                    EntityStatus::Loaded => {
                        // Unmodified: nothing to validate, nothing to write.
                    }
                    EntityStatus::New => {
                        // Somebody else may have won the race on this identity.
                        if records.contains_key(reference) {
                            conflicts.push(reference.clone());
                        } else {
                            staged.push(StagedWrite::Put {
                                reference: reference.clone(),
                                record: snapshot(&state, state.version().next(), self.now),
                            });
                        }
                    }
                    EntityStatus::Updated => match records.get(reference) {
                        Some(record) if record.version == state.version() => {
                            staged.push(StagedWrite::Put {
                                reference: reference.clone(),
                                record: snapshot(&state, state.version().next(), self.now),
                            });
                        }
                        _ => conflicts.push(reference.clone()),
                    },
                    EntityStatus::Removed => match records.get(reference) {
                        Some(record) if record.version == state.version() => {
                            staged.push(StagedWrite::Delete {
                                reference: reference.clone(),
                            });
                        }
                        // Created and removed within this transaction;
                        // there is nothing to delete.
                        None if state.version() == Version::ZERO => {}
                        _ => conflicts.push(reference.clone()),
                    },
                }
            }
        }

        if !conflicts.is_empty() {
            conflicts.sort();
            return Err(StoreError::version_conflict(conflicts));
        }

        Ok(Box::new(MemoryCommitter {
            records: Arc::clone(&self.records),
            staged,
            _guard: guard,
        }))
    }

    fn discard(&mut self) {
        self.open = false;
        self.states.clear();
    }
}

fn snapshot(state: &EntityState, version: Version, now: LogicalTime) -> StoredEntity {
    StoredEntity {
        entity_type: state.entity_type().to_owned(),
        version,
        last_modified: now,
        properties: state.properties().clone(),
        associations: state.associations().clone(),
        many_associations: state.many_associations().clone(),
        named_associations: state.named_associations().clone(),
    }
}

enum StagedWrite {
    Put {
        reference: EntityReference,
        record: StoredEntity,
    },
    Delete {
        reference: EntityReference,
    },
}

struct MemoryCommitter {
    records: Arc<RwLock<HashMap<EntityReference, StoredEntity>>>,
    staged: Vec<StagedWrite>,
    _guard: ArcMutexGuard<RawMutex, ()>,
}

impl StateCommitter for MemoryCommitter {
    fn commit(self: Box<Self>) -> StoreResult<()> {
        let mut records = self.records.write();
        for write in self.staged {
            match write {
                StagedWrite::Put { reference, record } => {
                    records.insert(reference, record);
                }
                StagedWrite::Delete { reference } => {
                    records.remove(&reference);
                }
            }
        }
        Ok(())
    }

    fn cancel(self: Box<Self>) {
        // Abort is free: drop the stage and release the commit lock.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_entity(reference: &EntityReference) -> MemoryEntityStore {
        let store = MemoryEntityStore::new("mem");
        let mut uow = store.new_unit_of_work("seed", LogicalTime::new(0));
        let state = uow
            .new_entity_state(reference.clone(), "Person")
            .unwrap();
        state.write().set_property("name", "Alice").unwrap();
        uow.apply_changes().unwrap().commit().unwrap();
        store
    }

    #[test]
    fn create_and_reload() {
        let reference = EntityReference::new("p-1");
        let store = store_with_entity(&reference);

        let mut uow = store.new_unit_of_work("read", LogicalTime::new(1));
        let state = uow.entity_state_of(&reference).unwrap();
        let state = state.read();

        assert_eq!(state.status(), EntityStatus::Loaded);
        assert_eq!(state.version(), Version::new(1));
        assert_eq!(
            state.property("name").and_then(PropertyValue::as_text),
            Some("Alice")
        );
    }

    #[test]
    fn preload_is_idempotent() {
        let reference = EntityReference::new("p-1");
        let store = store_with_entity(&reference);

        let mut uow = store.new_unit_of_work("read", LogicalTime::new(1));
        let first = uow.entity_state_of(&reference).unwrap();
        let second = uow.entity_state_of(&reference).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn missing_entity_is_not_found() {
        let store = MemoryEntityStore::new("mem");
        let mut uow = store.new_unit_of_work("read", LogicalTime::new(0));

        let err = uow.entity_state_of(&EntityReference::new("ghost")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn duplicate_creation_rejected() {
        let reference = EntityReference::new("p-1");
        let store = store_with_entity(&reference);

        let mut uow = store.new_unit_of_work("dup", LogicalTime::new(1));
        let err = uow.new_entity_state(reference, "Person").unwrap_err();
        assert!(matches!(err, StoreError::EntityAlreadyExists { .. }));
    }

    #[test]
    fn update_bumps_version() {
        let reference = EntityReference::new("p-1");
        let store = store_with_entity(&reference);

        let mut uow = store.new_unit_of_work("edit", LogicalTime::new(2));
        let state = uow.entity_state_of(&reference).unwrap();
        state.write().set_property("name", "Bob").unwrap();
        uow.apply_changes().unwrap().commit().unwrap();

        assert_eq!(store.version_of(&reference), Some(Version::new(2)));
    }

    #[test]
    fn cancel_leaves_records_untouched() {
        let reference = EntityReference::new("p-1");
        let store = store_with_entity(&reference);

        let mut uow = store.new_unit_of_work("edit", LogicalTime::new(2));
        let state = uow.entity_state_of(&reference).unwrap();
        state.write().set_property("name", "Bob").unwrap();
        uow.apply_changes().unwrap().cancel();

        let mut check = store.new_unit_of_work("read", LogicalTime::new(3));
        let state = check.entity_state_of(&reference).unwrap();
        assert_eq!(
            state.read().property("name").and_then(PropertyValue::as_text),
            Some("Alice")
        );
        assert_eq!(store.version_of(&reference), Some(Version::new(1)));
    }

    #[test]
    fn stale_update_conflicts() {
        let reference = EntityReference::new("p-1");
        let store = store_with_entity(&reference);

        let mut first = store.new_unit_of_work("first", LogicalTime::new(2));
        let mut second = store.new_unit_of_work("second", LogicalTime::new(2));
        let s1 = first.entity_state_of(&reference).unwrap();
        let s2 = second.entity_state_of(&reference).unwrap();

        s1.write().set_property("name", "Bob").unwrap();
        first.apply_changes().unwrap().commit().unwrap();

        s2.write().set_property("name", "Carol").unwrap();
        let err = second.apply_changes().unwrap_err();
        match err {
            StoreError::VersionConflict { references } => {
                assert_eq!(references, vec![reference]);
            }
            other => panic!("expected version conflict, got {other}"),
        }
    }

    #[test]
    fn conflict_reports_every_stale_entity() {
        let r1 = EntityReference::new("a");
        let r2 = EntityReference::new("b");
        let store = MemoryEntityStore::new("mem");
        {
            let mut seed = store.new_unit_of_work("seed", LogicalTime::new(0));
            seed.new_entity_state(r1.clone(), "Person").unwrap();
            seed.new_entity_state(r2.clone(), "Person").unwrap();
            seed.apply_changes().unwrap().commit().unwrap();
        }

        let mut loser = store.new_unit_of_work("loser", LogicalTime::new(1));
        let l1 = loser.entity_state_of(&r1).unwrap();
        let l2 = loser.entity_state_of(&r2).unwrap();

        {
            let mut winner = store.new_unit_of_work("winner", LogicalTime::new(1));
            winner
                .entity_state_of(&r1)
                .unwrap()
                .write()
                .set_property("n", 1i64)
                .unwrap();
            winner
                .entity_state_of(&r2)
                .unwrap()
                .write()
                .set_property("n", 1i64)
                .unwrap();
            winner.apply_changes().unwrap().commit().unwrap();
        }

        l1.write().set_property("n", 2i64).unwrap();
        l2.write().set_property("n", 2i64).unwrap();
        let err = loser.apply_changes().unwrap_err();
        match err {
            StoreError::VersionConflict { mut references } => {
                references.sort();
                assert_eq!(references, vec![r1, r2]);
            }
            other => panic!("expected version conflict, got {other}"),
        }
    }

    #[test]
    fn remove_deletes_record() {
        let reference = EntityReference::new("p-1");
        let store = store_with_entity(&reference);

        let mut uow = store.new_unit_of_work("rm", LogicalTime::new(2));
        let state = uow.entity_state_of(&reference).unwrap();
        state.write().remove().unwrap();
        uow.apply_changes().unwrap().commit().unwrap();

        assert_eq!(store.entity_count(), 0);
        let mut check = store.new_unit_of_work("read", LogicalTime::new(3));
        assert!(check.entity_state_of(&reference).unwrap_err().is_not_found());
    }

    #[test]
    fn create_then_remove_in_one_transaction_commits_cleanly() {
        let store = MemoryEntityStore::new("mem");

        let mut uow = store.new_unit_of_work("ephemeral", LogicalTime::new(0));
        let reference = EntityReference::new("temp");
        let state = uow.new_entity_state(reference.clone(), "Person").unwrap();
        state.write().remove().unwrap();
        uow.apply_changes().unwrap().commit().unwrap();

        assert_eq!(store.entity_count(), 0);
        assert_eq!(store.version_of(&reference), None);
    }

    #[test]
    fn removing_a_never_persisted_entity_does_not_mask_real_conflicts() {
        let reference = EntityReference::new("p-1");
        let store = store_with_entity(&reference);

        let mut loser = store.new_unit_of_work("loser", LogicalTime::new(1));
        let stale = loser.entity_state_of(&reference).unwrap();
        let ephemeral = loser
            .new_entity_state(EntityReference::new("temp"), "Person")
            .unwrap();
        ephemeral.write().remove().unwrap();

        {
            let mut winner = store.new_unit_of_work("winner", LogicalTime::new(1));
            winner
                .entity_state_of(&reference)
                .unwrap()
                .write()
                .set_property("name", "Bob")
                .unwrap();
            winner.apply_changes().unwrap().commit().unwrap();
        }

        stale.write().remove().unwrap();
        let err = loser.apply_changes().unwrap_err();
        match err {
            StoreError::VersionConflict { references } => {
                assert_eq!(references, vec![reference]);
            }
            other => panic!("expected version conflict, got {other}"),
        }
    }

    #[test]
    fn spent_transaction_rejects_use() {
        let store = MemoryEntityStore::new("mem");
        let mut uow = store.new_unit_of_work("spent", LogicalTime::new(0));
        uow.apply_changes().unwrap().commit().unwrap();

        let err = uow.entity_state_of(&EntityReference::new("x")).unwrap_err();
        assert!(matches!(err, StoreError::UnitOfWorkClosed));
        assert!(uow.apply_changes().is_err());
    }

    #[test]
    fn discard_drops_shadow() {
        let reference = EntityReference::new("p-1");
        let store = store_with_entity(&reference);

        let mut uow = store.new_unit_of_work("edit", LogicalTime::new(2));
        let state = uow.entity_state_of(&reference).unwrap();
        state.write().set_property("name", "Bob").unwrap();
        uow.discard();

        assert_eq!(store.version_of(&reference), Some(Version::new(1)));
        assert!(uow.apply_changes().is_err());
    }

    #[test]
    fn unmodified_state_is_not_validated_or_written() {
        let reference = EntityReference::new("p-1");
        let store = store_with_entity(&reference);

        // Reader loads, a writer commits in between, reader still applies
        // cleanly because it carries no changes.
        let mut reader = store.new_unit_of_work("reader", LogicalTime::new(2));
        reader.entity_state_of(&reference).unwrap();

        let mut writer = store.new_unit_of_work("writer", LogicalTime::new(2));
        writer
            .entity_state_of(&reference)
            .unwrap()
            .write()
            .set_property("name", "Bob")
            .unwrap();
        writer.apply_changes().unwrap().commit().unwrap();

        reader.apply_changes().unwrap().commit().unwrap();
        assert_eq!(store.version_of(&reference), Some(Version::new(2)));
    }
}
