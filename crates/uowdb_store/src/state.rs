//! Entity state and its lifecycle.

use crate::error::{StoreError, StoreResult};
use crate::reference::EntityReference;
use crate::types::Version;
use crate::value::PropertyValue;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Lifecycle status of an entity state within one session.
///
/// Legal transitions:
/// - `New` stays `New` under mutation and either commits (reloads as
///   `Loaded`) or is discarded with the session
/// - `Loaded` becomes `Updated` on first mutation
/// - any status becomes `Removed`, which is terminal for the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityStatus {
    /// Created in this session, not yet committed.
    New,
    /// Loaded from a store and unmodified.
    Loaded,
    /// Loaded from a store and modified in this session.
    Updated,
    /// Marked for removal; no further mutation allowed.
    Removed,
}

/// One entity state shared between a session instance and the backend
/// transaction that owns it.
pub type SharedEntityState = Arc<RwLock<EntityState>>;

/// Mutable per-entity bag of property and association values.
///
/// An `EntityState` is owned by exactly one backend transaction. Mutators
/// enforce the status machine: the first mutation of a `Loaded` state
/// promotes it to `Updated`, and a `Removed` state rejects all mutation.
#[derive(Debug, Clone)]
pub struct EntityState {
    reference: EntityReference,
    entity_type: String,
    status: EntityStatus,
    version: Version,
    properties: HashMap<String, PropertyValue>,
    associations: HashMap<String, EntityReference>,
    many_associations: HashMap<String, Vec<EntityReference>>,
    named_associations: HashMap<String, HashMap<String, EntityReference>>,
}

impl EntityState {
    /// Creates a fresh, uncommitted state for entity creation.
    #[must_use]
    pub fn new(reference: EntityReference, entity_type: impl Into<String>) -> Self {
        Self {
            reference,
            entity_type: entity_type.into(),
            status: EntityStatus::New,
            version: Version::ZERO,
            properties: HashMap::new(),
            associations: HashMap::new(),
            many_associations: HashMap::new(),
            named_associations: HashMap::new(),
        }
    }

    /// Creates a state loaded from a store at a captured version.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn loaded(
        reference: EntityReference,
        entity_type: impl Into<String>,
        version: Version,
        properties: HashMap<String, PropertyValue>,
        associations: HashMap<String, EntityReference>,
        many_associations: HashMap<String, Vec<EntityReference>>,
        named_associations: HashMap<String, HashMap<String, EntityReference>>,
    ) -> Self {
        Self {
            reference,
            entity_type: entity_type.into(),
            status: EntityStatus::Loaded,
            version,
            properties,
            associations,
            many_associations,
            named_associations,
        }
    }

    /// Returns the entity reference.
    #[must_use]
    pub fn reference(&self) -> &EntityReference {
        &self.reference
    }

    /// Returns the declared entity type.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> EntityStatus {
        self.status
    }

    /// Returns the version captured when this state was loaded.
    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns `true` if this state carries changes the store has not seen.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.status != EntityStatus::Loaded
    }

    /// Returns a named property value.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties.get(name)
    }

    /// Sets a named property value.
    ///
    /// # Errors
    ///
    /// Returns `StateRemoved` if the state has been removed.
    pub fn set_property(
        &mut self,
        name: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> StoreResult<()> {
        self.mark_mutated()?;
        self.properties.insert(name.into(), value.into());
        Ok(())
    }

    /// Returns a named single association.
    #[must_use]
    pub fn association(&self, name: &str) -> Option<&EntityReference> {
        self.associations.get(name)
    }

    /// Sets a named single association. `None` clears it.
    ///
    /// # Errors
    ///
    /// Returns `StateRemoved` if the state has been removed.
    pub fn set_association(
        &mut self,
        name: impl Into<String>,
        target: Option<EntityReference>,
    ) -> StoreResult<()> {
        self.mark_mutated()?;
        let name = name.into();
        match target {
            Some(reference) => {
                self.associations.insert(name, reference);
            }
            None => {
                self.associations.remove(&name);
            }
        }
        Ok(())
    }

    /// Returns a named many-association as an ordered slice.
    #[must_use]
    pub fn many_association(&self, name: &str) -> &[EntityReference] {
        self.many_associations.get(name).map_or(&[], Vec::as_slice)
    }

    /// Appends a reference to a named many-association.
    ///
    /// # Errors
    ///
    /// Returns `StateRemoved` if the state has been removed.
    pub fn add_many_association(
        &mut self,
        name: impl Into<String>,
        target: EntityReference,
    ) -> StoreResult<()> {
        self.mark_mutated()?;
        self.many_associations.entry(name.into()).or_default().push(target);
        Ok(())
    }

    /// Removes every occurrence of a reference from a many-association.
    ///
    /// # Errors
    ///
    /// Returns `StateRemoved` if the state has been removed.
    pub fn remove_many_association(
        &mut self,
        name: &str,
        target: &EntityReference,
    ) -> StoreResult<()> {
        self.mark_mutated()?;
        if let Some(targets) = self.many_associations.get_mut(name) {
            targets.retain(|r| r != target);
        }
        Ok(())
    }

    /// Returns one entry of a named (mapped) association.
    #[must_use]
    pub fn named_association(&self, name: &str, key: &str) -> Option<&EntityReference> {
        self.named_associations.get(name).and_then(|m| m.get(key))
    }

    /// Sets one entry of a named (mapped) association. `None` clears it.
    ///
    /// # Errors
    ///
    /// Returns `StateRemoved` if the state has been removed.
    pub fn set_named_association(
        &mut self,
        name: impl Into<String>,
        key: impl Into<String>,
        target: Option<EntityReference>,
    ) -> StoreResult<()> {
        self.mark_mutated()?;
        let entries = self.named_associations.entry(name.into()).or_default();
        match target {
            Some(reference) => {
                entries.insert(key.into(), reference);
            }
            None => {
                entries.remove(&key.into());
            }
        }
        Ok(())
    }

    /// Marks this state removed. Terminal for the session.
    ///
    /// # Errors
    ///
    /// Returns `StateRemoved` if the state was already removed.
    pub fn remove(&mut self) -> StoreResult<()> {
        if self.status == EntityStatus::Removed {
            return Err(StoreError::state_removed(self.reference.clone()));
        }
        self.status = EntityStatus::Removed;
        Ok(())
    }

    /// Copies property and association values from a prototype state.
    ///
    /// Status, reference, type and version of `self` are kept. Used when a
    /// builder's working state is transferred onto a store-allocated state.
    pub fn copy_values_from(&mut self, prototype: &EntityState) {
        self.properties = prototype.properties.clone();
        self.associations = prototype.associations.clone();
        self.many_associations = prototype.many_associations.clone();
        self.named_associations = prototype.named_associations.clone();
    }

    /// Returns all properties.
    #[must_use]
    pub fn properties(&self) -> &HashMap<String, PropertyValue> {
        &self.properties
    }

    /// Returns all single associations.
    #[must_use]
    pub fn associations(&self) -> &HashMap<String, EntityReference> {
        &self.associations
    }

    /// Returns all many-associations.
    #[must_use]
    pub fn many_associations(&self) -> &HashMap<String, Vec<EntityReference>> {
        &self.many_associations
    }

    /// Returns all named (mapped) associations.
    #[must_use]
    pub fn named_associations(&self) -> &HashMap<String, HashMap<String, EntityReference>> {
        &self.named_associations
    }

    /// Finalizes a committed state as `Loaded` at the given version.
    ///
    /// Used by direct-write backends whose live states survive the commit.
    pub(crate) fn commit_as_loaded(&mut self, version: Version) {
        self.status = EntityStatus::Loaded;
        self.version = version;
    }

    fn mark_mutated(&mut self) -> StoreResult<()> {
        match self.status {
            EntityStatus::Removed => Err(StoreError::state_removed(self.reference.clone())),
            EntityStatus::Loaded => {
                self.status = EntityStatus::Updated;
                Ok(())
            }
            EntityStatus::New | EntityStatus::Updated => Ok(()),
        }
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}] {:?} {}",
            self.entity_type, self.reference, self.status, self.version
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn loaded_state() -> EntityState {
        EntityState::loaded(
            EntityReference::new("e-1"),
            "Person",
            Version::new(3),
            HashMap::new(),
            HashMap::new(),
            HashMap::new(),
            HashMap::new(),
        )
    }

    #[test]
    fn new_state_starts_at_version_zero() {
        let state = EntityState::new(EntityReference::generate(), "Person");
        assert_eq!(state.status(), EntityStatus::New);
        assert_eq!(state.version(), Version::ZERO);
        assert!(state.is_modified());
    }

    #[test]
    fn mutation_promotes_loaded_to_updated() {
        let mut state = loaded_state();
        assert!(!state.is_modified());

        state.set_property("name", "Alice").unwrap();

        assert_eq!(state.status(), EntityStatus::Updated);
        assert!(state.is_modified());
    }

    #[test]
    fn mutation_keeps_new_status() {
        let mut state = EntityState::new(EntityReference::generate(), "Person");
        state.set_property("name", "Bob").unwrap();
        assert_eq!(state.status(), EntityStatus::New);
    }

    #[test]
    fn removed_state_rejects_mutation() {
        let mut state = loaded_state();
        state.remove().unwrap();

        let err = state.set_property("name", "x").unwrap_err();
        assert!(matches!(err, StoreError::StateRemoved { .. }));

        let err = state.add_many_association("friends", EntityReference::new("e-2"));
        assert!(err.is_err());
    }

    #[test]
    fn remove_is_terminal() {
        let mut state = loaded_state();
        state.remove().unwrap();
        assert!(state.remove().is_err());
        assert_eq!(state.status(), EntityStatus::Removed);
    }

    #[test]
    fn many_association_preserves_order() {
        let mut state = loaded_state();
        let a = EntityReference::new("a");
        let b = EntityReference::new("b");
        let c = EntityReference::new("c");

        state.add_many_association("items", a.clone()).unwrap();
        state.add_many_association("items", b.clone()).unwrap();
        state.add_many_association("items", c.clone()).unwrap();
        state.remove_many_association("items", &b).unwrap();

        assert_eq!(state.many_association("items"), &[a, c]);
    }

    #[test]
    fn named_association_set_and_clear() {
        let mut state = loaded_state();
        let target = EntityReference::new("t");

        state
            .set_named_association("roles", "admin", Some(target.clone()))
            .unwrap();
        assert_eq!(state.named_association("roles", "admin"), Some(&target));

        state.set_named_association("roles", "admin", None).unwrap();
        assert_eq!(state.named_association("roles", "admin"), None);
    }

    #[test]
    fn association_clear() {
        let mut state = loaded_state();
        let target = EntityReference::new("t");

        state.set_association("boss", Some(target.clone())).unwrap();
        assert_eq!(state.association("boss"), Some(&target));

        state.set_association("boss", None).unwrap();
        assert_eq!(state.association("boss"), None);
    }

    #[test]
    fn copy_values_keeps_identity() {
        let mut prototype = EntityState::new(EntityReference::new("proto"), "Person");
        prototype.set_property("name", "Alice").unwrap();

        let mut target = EntityState::new(EntityReference::new("real"), "Person");
        target.copy_values_from(&prototype);

        assert_eq!(target.reference().identity(), "real");
        assert_eq!(
            target.property("name").and_then(PropertyValue::as_text),
            Some("Alice")
        );
    }

    proptest! {
        // Any sequence of mutations on a loaded state lands on Updated,
        // never on New, and never resurrects a removed state.
        #[test]
        fn status_machine_is_monotone(ops in proptest::collection::vec(0u8..3, 1..20)) {
            let mut state = loaded_state();
            let mut removed = false;
            for op in ops {
                match op {
                    0 => {
                        let r = state.set_property("p", 1i64);
                        prop_assert_eq!(r.is_err(), removed);
                    }
                    1 => {
                        let r = state.add_many_association("m", EntityReference::new("x"));
                        prop_assert_eq!(r.is_err(), removed);
                    }
                    _ => {
                        let r = state.remove();
                        prop_assert_eq!(r.is_err(), removed);
                        removed = true;
                    }
                }
            }
            if removed {
                prop_assert_eq!(state.status(), EntityStatus::Removed);
            } else {
                prop_assert_eq!(state.status(), EntityStatus::Updated);
            }
        }
    }
}
