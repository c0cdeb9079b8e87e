//! Staged entity creation.

use crate::entity::EntityInstance;
use crate::error::{UowError, UowResult};
use crate::identity::{IdentityGenerator, UuidIdentityGenerator};
use crate::unit_of_work::UnitOfWork;
use std::fmt;
use std::sync::Arc;
use uowdb_store::{EntityReference, EntityState, EntityStore, PropertyValue};

/// Creation-lifecycle hook for new entities.
///
/// Invoked exactly once per built entity, after identity resolution and
/// before the entity is handed to the backend or the session cache.
/// Returning an error aborts the build and leaves both untouched.
pub trait EntityLifecycle: Send + Sync {
    /// Validates and/or initializes a freshly built entity state.
    ///
    /// # Errors
    ///
    /// Return [`UowError::Lifecycle`] (or any other error) to reject the
    /// entity.
    fn on_create(&self, state: &mut EntityState) -> UowResult<()>;
}

/// Staged factory for one new entity.
///
/// The builder holds a prototype state that is visible to nobody else in
/// the session, so half-built entities can never leak through the cache.
/// [`EntityBuilder::new_instance`] admits the finished entity; afterwards
/// the builder is spent and every further use fails with
/// [`UowError::BuilderInvalidated`].
pub struct EntityBuilder {
    uow: UnitOfWork,
    store: Arc<dyn EntityStore>,
    entity_type: String,
    identity: Option<EntityReference>,
    generator: Arc<dyn IdentityGenerator>,
    lifecycle: Option<Arc<dyn EntityLifecycle>>,
    /// `None` once `new_instance` has been called.
    prototype: Option<EntityState>,
}

impl EntityBuilder {
    pub(crate) fn new(
        uow: UnitOfWork,
        store: Arc<dyn EntityStore>,
        entity_type: impl Into<String>,
    ) -> Self {
        let entity_type = entity_type.into();
        // Placeholder identity; replaced when the real reference resolves.
        let prototype = EntityState::new(EntityReference::new("uowdb:prototype"), &entity_type);
        Self {
            uow,
            store,
            entity_type,
            identity: None,
            generator: Arc::new(UuidIdentityGenerator),
            lifecycle: None,
            prototype: Some(prototype),
        }
    }

    /// Uses a caller-supplied identity instead of a generated one.
    #[must_use]
    pub fn with_identity(mut self, reference: EntityReference) -> Self {
        self.identity = Some(reference);
        self
    }

    /// Replaces the identity generator.
    #[must_use]
    pub fn with_generator(mut self, generator: Arc<dyn IdentityGenerator>) -> Self {
        self.generator = generator;
        self
    }

    /// Installs a creation-lifecycle hook.
    #[must_use]
    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn EntityLifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    /// Returns a named property of the working prototype.
    ///
    /// # Errors
    ///
    /// Fails with `BuilderInvalidated` after `new_instance`.
    pub fn property(&self, name: &str) -> UowResult<Option<PropertyValue>> {
        Ok(self.prototype()?.property(name).cloned())
    }

    /// Sets a named property on the working prototype.
    ///
    /// # Errors
    ///
    /// Fails with `BuilderInvalidated` after `new_instance`.
    pub fn set_property(
        &mut self,
        name: impl Into<String>,
        value: impl Into<PropertyValue>,
    ) -> UowResult<()> {
        self.prototype_mut()?.set_property(name, value)?;
        Ok(())
    }

    /// Sets a named single association on the working prototype.
    ///
    /// # Errors
    ///
    /// Fails with `BuilderInvalidated` after `new_instance`.
    pub fn set_association(
        &mut self,
        name: impl Into<String>,
        target: Option<EntityReference>,
    ) -> UowResult<()> {
        self.prototype_mut()?.set_association(name, target)?;
        Ok(())
    }

    /// Appends a reference to a many-association on the prototype.
    ///
    /// # Errors
    ///
    /// Fails with `BuilderInvalidated` after `new_instance`.
    pub fn add_many_association(
        &mut self,
        name: impl Into<String>,
        target: EntityReference,
    ) -> UowResult<()> {
        self.prototype_mut()?.add_many_association(name, target)?;
        Ok(())
    }

    /// Sets one entry of a named (mapped) association on the prototype.
    ///
    /// # Errors
    ///
    /// Fails with `BuilderInvalidated` after `new_instance`.
    pub fn set_named_association(
        &mut self,
        name: impl Into<String>,
        key: impl Into<String>,
        target: Option<EntityReference>,
    ) -> UowResult<()> {
        self.prototype_mut()?
            .set_named_association(name, key, target)?;
        Ok(())
    }

    /// Returns a read view of the working prototype.
    ///
    /// # Errors
    ///
    /// Fails with `BuilderInvalidated` after `new_instance`.
    pub fn working_state(&self) -> UowResult<&EntityState> {
        self.prototype()
    }

    /// Finalizes the build: resolves identity, runs lifecycle hooks,
    /// allocates a committable state from the owning store and admits
    /// the entity into the session cache.
    ///
    /// The builder is spent after the first call, successful or not.
    ///
    /// # Errors
    ///
    /// - `BuilderInvalidated` on a second call
    /// - `Lifecycle` if a creation hook rejects the entity; the cache and
    ///   the backend transaction stay untouched
    /// - store errors if allocation fails (e.g. the identity is taken)
    pub fn new_instance(&mut self) -> UowResult<EntityInstance> {
        let prototype = self.prototype.take().ok_or(UowError::BuilderInvalidated)?;

        let reference = self
            .identity
            .take()
            .unwrap_or_else(|| self.generator.generate());

        // Hooks and constraints run on a working copy carrying the real
        // identity, before the backend sees anything.
        let mut working = EntityState::new(reference.clone(), &self.entity_type);
        working.copy_values_from(&prototype);
        if let Some(lifecycle) = &self.lifecycle {
            lifecycle.on_create(&mut working)?;
        }

        let shared = self
            .uow
            .allocate_state(&self.store, reference, &self.entity_type)?;
        shared.write().copy_values_from(&working);

        let instance = EntityInstance::new(shared);
        self.uow.add_entity(instance.clone())?;
        Ok(instance)
    }

    fn prototype(&self) -> UowResult<&EntityState> {
        self.prototype.as_ref().ok_or(UowError::BuilderInvalidated)
    }

    fn prototype_mut(&mut self) -> UowResult<&mut EntityState> {
        self.prototype.as_mut().ok_or(UowError::BuilderInvalidated)
    }
}

impl fmt::Debug for EntityBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityBuilder")
            .field("entity_type", &self.entity_type)
            .field("store", &self.store.name())
            .field("spent", &self.prototype.is_none())
            .finish()
    }
}
