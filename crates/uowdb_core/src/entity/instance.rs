//! Entity instance handle.

use crate::callback::UnitOfWorkCallback;
use crate::error::UowResult;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use uowdb_store::{
    EntityReference, EntityStatus, PropertyValue, SharedEntityState, Version,
};

/// A session-bound wrapper around one entity state.
///
/// There is at most one live instance per reference per session; every
/// `get` for the same reference returns a handle to the same instance.
/// `Clone` is cheap and preserves instance identity, observable via
/// [`EntityInstance::same_instance`].
///
/// Mutators delegate to the underlying state and therefore enforce its
/// status machine: mutating a removed entity is an error, and the first
/// mutation of a loaded entity promotes it to updated.
#[derive(Clone)]
pub struct EntityInstance {
    inner: Arc<InstanceInner>,
}

struct InstanceInner {
    reference: EntityReference,
    entity_type: String,
    state: SharedEntityState,
    callback: Mutex<Option<Arc<dyn UnitOfWorkCallback>>>,
}

impl EntityInstance {
    /// Wraps a shared entity state.
    pub(crate) fn new(state: SharedEntityState) -> Self {
        let (reference, entity_type) = {
            let s = state.read();
            (s.reference().clone(), s.entity_type().to_owned())
        };
        Self {
            inner: Arc::new(InstanceInner {
                reference,
                entity_type,
                state,
                callback: Mutex::new(None),
            }),
        }
    }

    /// Returns the entity reference.
    #[must_use]
    pub fn reference(&self) -> &EntityReference {
        &self.inner.reference
    }

    /// Returns the declared entity type.
    #[must_use]
    pub fn entity_type(&self) -> &str {
        &self.inner.entity_type
    }

    /// Returns the current lifecycle status.
    #[must_use]
    pub fn status(&self) -> EntityStatus {
        self.inner.state.read().status()
    }

    /// Returns the version captured when the state was loaded.
    #[must_use]
    pub fn version(&self) -> Version {
        self.inner.state.read().version()
    }

    /// Returns a named property value.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<PropertyValue> {
        self.inner.state.read().property(name).cloned()
    }

    /// Sets a named property value.
    ///
    /// # Errors
    ///
    /// Fails if the entity has been removed.
    pub fn set_property(
        &self,
        name: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> UowResult<()> {
        self.inner.state.write().set_property(name, value)?;
        Ok(())
    }

    /// Returns a named single association.
    #[must_use]
    pub fn association(&self, name: &str) -> Option<EntityReference> {
        self.inner.state.read().association(name).cloned()
    }

    /// Sets a named single association. `None` clears it.
    ///
    /// # Errors
    ///
    /// Fails if the entity has been removed.
    pub fn set_association(
        &self,
        name: impl Into<String>,
        target: Option<EntityReference>,
    ) -> UowResult<()> {
        self.inner.state.write().set_association(name, target)?;
        Ok(())
    }

    /// Returns a named many-association in insertion order.
    #[must_use]
    pub fn many_association(&self, name: &str) -> Vec<EntityReference> {
        self.inner.state.read().many_association(name).to_vec()
    }

    /// Appends a reference to a many-association.
    ///
    /// # Errors
    ///
    /// Fails if the entity has been removed.
    pub fn add_many_association(
        &self,
        name: impl Into<String>,
        target: EntityReference,
    ) -> UowResult<()> {
        self.inner.state.write().add_many_association(name, target)?;
        Ok(())
    }

    /// Removes every occurrence of a reference from a many-association.
    ///
    /// # Errors
    ///
    /// Fails if the entity has been removed.
    pub fn remove_many_association(
        &self,
        name: &str,
        target: &EntityReference,
    ) -> UowResult<()> {
        self.inner
            .state
            .write()
            .remove_many_association(name, target)?;
        Ok(())
    }

    /// Returns one entry of a named (mapped) association.
    #[must_use]
    pub fn named_association(&self, name: &str, key: &str) -> Option<EntityReference> {
        self.inner.state.read().named_association(name, key).cloned()
    }

    /// Sets one entry of a named (mapped) association. `None` clears it.
    ///
    /// # Errors
    ///
    /// Fails if the entity has been removed.
    pub fn set_named_association(
        &self,
        name: impl Into<String>,
        key: impl Into<String>,
        target: Option<EntityReference>,
    ) -> UowResult<()> {
        self.inner
            .state
            .write()
            .set_named_association(name, key, target)?;
        Ok(())
    }

    /// Attaches a commit-boundary callback to this instance.
    ///
    /// The session discovers attached callbacks implicitly at completion,
    /// alongside explicitly registered ones. Removed instances are
    /// excluded from notification.
    pub fn attach_callback(&self, callback: Arc<dyn UnitOfWorkCallback>) {
        *self.inner.callback.lock() = Some(callback);
    }

    /// Returns the attached callback, if any.
    #[must_use]
    pub fn callback(&self) -> Option<Arc<dyn UnitOfWorkCallback>> {
        self.inner.callback.lock().clone()
    }

    /// Returns `true` if the two handles denote the same live instance.
    #[must_use]
    pub fn same_instance(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// The shared state backing this instance.
    pub(crate) fn shared_state(&self) -> &SharedEntityState {
        &self.inner.state
    }
}

impl fmt::Debug for EntityInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityInstance")
            .field("reference", &self.inner.reference)
            .field("entity_type", &self.inner.entity_type)
            .field("status", &self.status())
            .finish()
    }
}
