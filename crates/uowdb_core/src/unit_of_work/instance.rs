//! The unit-of-work instance.

use crate::callback::{UnitOfWorkCallback, UnitOfWorkStatus};
use crate::entity::{EntityBuilder, EntityInstance};
use crate::error::{UowError, UowResult};
use crate::types::Usecase;
use crate::unit_of_work::SessionContext;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use uowdb_store::{
    EntityReference, EntityStatus, EntityStore, EntityStoreUnitOfWork, LogicalTime,
    SharedEntityState, StateCommitter,
};

/// The session: a cache of entity instances, a registry of open backend
/// transactions, and the commit/discard/pause/resume state machine.
///
/// A unit of work is the single point of identity resolution for one
/// logical operation: within the session, every `get` of a reference
/// returns the same instance, reads are repeatable, and writes stay
/// invisible to backends until [`UnitOfWork::complete`].
///
/// Handles are cheap to clone and denote the same session
/// ([`UnitOfWork::same_session`]). The session is single-owner by
/// contract — one logical thread mutates it at a time, and
/// `pause`/`resume` are the only sanctioned cross-thread handoff.
#[derive(Clone)]
pub struct UnitOfWork {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    usecase: Usecase,
    now: LogicalTime,
    open: bool,
    paused: bool,
    /// At most one live instance per reference. Ordered so callback
    /// notification and diagnostics are deterministic.
    cache: BTreeMap<EntityReference, EntityInstance>,
    /// One open transaction per touched store, keyed by store name.
    /// Ordered so multi-store staging is deterministic.
    store_uows: BTreeMap<String, Box<dyn EntityStoreUnitOfWork>>,
    callbacks: Vec<Arc<dyn UnitOfWorkCallback>>,
}

impl Inner {
    fn ensure_open(&self) -> UowResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(UowError::SessionClosed)
        }
    }

    /// Returns the open transaction for a store, creating it on first
    /// touch.
    fn store_uow(&mut self, store: &Arc<dyn EntityStore>) -> &mut Box<dyn EntityStoreUnitOfWork> {
        let usecase = self.usecase.name().to_owned();
        let now = self.now;
        self.store_uows
            .entry(store.name().to_owned())
            .or_insert_with(|| store.new_unit_of_work(&usecase, now))
    }

    /// Explicit callbacks followed by instance-attached callbacks of
    /// cached, non-removed entities, in cache iteration order.
    fn completion_callbacks(&self) -> Vec<Arc<dyn UnitOfWorkCallback>> {
        let mut callbacks = self.callbacks.clone();
        callbacks.extend(
            self.cache
                .values()
                .filter(|instance| instance.status() != EntityStatus::Removed)
                .filter_map(EntityInstance::callback),
        );
        callbacks
    }

    /// Closes the session on a failed or abandoned completion: pops it
    /// off the stack, notifies `Discarded` and releases every backend
    /// transaction.
    fn close_discarded(&mut self, this: &UnitOfWork, ctx: &mut SessionContext) {
        self.open = false;
        if !self.paused {
            ctx.remove(this);
        }
        for callback in self.completion_callbacks() {
            callback.after_completion(UnitOfWorkStatus::Discarded);
        }
        for uow in self.store_uows.values_mut() {
            uow.discard();
        }
    }
}

fn cancel_all(committers: Vec<Box<dyn StateCommitter>>) {
    // Best-effort, in collection order.
    for committer in committers {
        committer.cancel();
    }
}

impl UnitOfWork {
    pub(crate) fn new(usecase: Usecase, now: LogicalTime) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                usecase,
                now,
                open: true,
                paused: false,
                cache: BTreeMap::new(),
                store_uows: BTreeMap::new(),
                callbacks: Vec::new(),
            })),
        }
    }

    /// Returns the usecase this session executes.
    #[must_use]
    pub fn usecase(&self) -> Usecase {
        self.inner.lock().usecase.clone()
    }

    /// Returns the session's logical clock value.
    #[must_use]
    pub fn current_time(&self) -> LogicalTime {
        self.inner.lock().now
    }

    /// Returns `true` while the session accepts operations.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    /// Returns `true` while the session is paused.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    /// Returns the number of cached instances.
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.inner.lock().cache.len()
    }

    /// Returns `true` if both handles denote the same session.
    #[must_use]
    pub fn same_session(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Resolves an entity instance by reference.
    ///
    /// A cached, non-removed instance is returned as-is. Otherwise the
    /// candidate stores are probed in the given priority order; the
    /// first store that knows the reference wins, lazily opening that
    /// store's transaction on first touch.
    ///
    /// # Errors
    ///
    /// - `EntityNotFound` if no candidate store knows the reference, or
    ///   it was removed in this session
    /// - `WrongEntityType` if the stored entity is not an `expected_type`
    /// - `SessionClosed` on a closed session
    /// - `Store` for backend failures other than not-found
    pub fn get(
        &self,
        reference: &EntityReference,
        expected_type: &str,
        candidates: &[Arc<dyn EntityStore>],
    ) -> UowResult<EntityInstance> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;

        if let Some(instance) = inner.cache.get(reference) {
            if instance.status() == EntityStatus::Removed {
                return Err(UowError::not_found(reference.clone()));
            }
            return Ok(instance.clone());
        }

        let mut found: Option<SharedEntityState> = None;
        for store in candidates {
            match inner.store_uow(store).entity_state_of(reference) {
                Ok(state) => {
                    found = Some(state);
                    break;
                }
                Err(error) if error.is_not_found() => continue,
                Err(error) => return Err(error.into()),
            }
        }
        let state = found.ok_or_else(|| UowError::not_found(reference.clone()))?;

        {
            let state = state.read();
            // The store shadow may carry a removal staged earlier in this
            // session; such an entity no longer exists for callers.
            if state.status() == EntityStatus::Removed {
                return Err(UowError::not_found(reference.clone()));
            }
            if state.entity_type() != expected_type {
                return Err(UowError::WrongEntityType {
                    reference: reference.clone(),
                    expected: expected_type.to_owned(),
                    actual: state.entity_type().to_owned(),
                });
            }
        }

        let instance = EntityInstance::new(state);
        inner.cache.insert(reference.clone(), instance.clone());
        Ok(instance)
    }

    /// Starts a staged build of a new entity owned by `store`.
    ///
    /// # Errors
    ///
    /// Fails with `SessionClosed` on a closed session.
    pub fn new_entity_builder(
        &self,
        store: Arc<dyn EntityStore>,
        entity_type: impl Into<String>,
    ) -> UowResult<EntityBuilder> {
        self.inner.lock().ensure_open()?;
        Ok(EntityBuilder::new(self.clone(), store, entity_type))
    }

    /// Marks an entity removed and evicts it from the cache.
    ///
    /// The owning backend learns about the removal at commit time.
    ///
    /// # Errors
    ///
    /// - `EntityNotFound` if the reference is not cached in this session
    /// - `SessionClosed` on a closed session
    pub fn remove(&self, reference: &EntityReference) -> UowResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;

        let instance = inner
            .cache
            .remove(reference)
            .ok_or_else(|| UowError::not_found(reference.clone()))?;
        instance.shared_state().write().remove()?;
        Ok(())
    }

    /// Completes the session: stages every touched backend, runs
    /// before-hooks, commits, closes, runs after-hooks.
    ///
    /// The two-phase protocol: every backend transaction stages its
    /// changes and hands over a committer **before** any committer is
    /// told to commit, so either all backends commit or none do. Any
    /// staging failure or before-hook veto cancels all staged committers
    /// and discards the session.
    ///
    /// # Errors
    ///
    /// - `ConcurrentModification` naming every conflicting entity if a
    ///   backend detected stale versions; the session is discarded —
    ///   retry the whole operation in a fresh session
    /// - `CompletionFailure` for any other staging error, before-hook
    ///   veto or commit failure; the session is discarded
    /// - `SessionClosed` on a closed session
    pub fn complete(&self, ctx: &mut SessionContext) -> UowResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;

        let callbacks = inner.completion_callbacks();

        // Phase 1: stage every backend.
        let mut committers: Vec<Box<dyn StateCommitter>> = Vec::new();
        let mut staging_error: Option<UowError> = None;
        for uow in inner.store_uows.values_mut() {
            match uow.apply_changes() {
                Ok(committer) => committers.push(committer),
                Err(error) => {
                    staging_error = Some(UowError::classify_completion(error));
                    break;
                }
            }
        }
        if let Some(error) = staging_error {
            tracing::debug!(usecase = %inner.usecase, %error, "staging failed, cancelling committers");
            cancel_all(committers);
            inner.close_discarded(self, ctx);
            return Err(error);
        }

        // Phase 2: before-hooks may veto while nothing is committed yet.
        for callback in &callbacks {
            if let Err(error) = callback.before_completion() {
                tracing::debug!(usecase = %inner.usecase, %error, "completion vetoed by callback");
                cancel_all(committers);
                inner.close_discarded(self, ctx);
                return Err(UowError::completion_failure(format!(
                    "vetoed by callback: {error}"
                )));
            }
        }

        // Phase 3: point of no return.
        let mut commit_error: Option<UowError> = None;
        for committer in committers {
            if let Err(error) = committer.commit() {
                // Other backends may already have committed; keep going
                // to commit as much as possible, report the failure.
                tracing::warn!(usecase = %inner.usecase, %error, "backend commit failed after staging");
                commit_error
                    .get_or_insert_with(|| UowError::completion_failure(error.to_string()));
            }
        }

        // Phase 4: close and pop.
        inner.open = false;
        if !inner.paused {
            ctx.remove(self);
        }
        tracing::debug!(usecase = %inner.usecase, entities = inner.cache.len(), "unit of work completed");

        // Phase 5: the outcome is fixed; after-hooks cannot disturb it.
        for callback in callbacks {
            callback.after_completion(UnitOfWorkStatus::Completed);
        }

        match commit_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Discards the session: nothing the session did becomes visible to
    /// any backend that supports rollback.
    ///
    /// Idempotent; safe to call instead of `complete` at any point, and
    /// a no-op after either.
    pub fn discard(&self, ctx: &mut SessionContext) {
        let mut inner = self.inner.lock();
        if !inner.open {
            return;
        }
        tracing::debug!(usecase = %inner.usecase, entities = inner.cache.len(), "unit of work discarded");
        inner.close_discarded(self, ctx);
    }

    /// Pauses the session: removes it from the context stack without
    /// closing it, so an unrelated session can become current. If the
    /// usecase opts in, unmodified (`Loaded`) instances are pruned from
    /// the cache to bound memory while suspended.
    ///
    /// # Errors
    ///
    /// - `SessionClosed` on a closed session
    /// - `AlreadyPaused` if already paused
    pub fn pause(&self, ctx: &mut SessionContext) -> UowResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        if inner.paused {
            return Err(UowError::AlreadyPaused);
        }

        inner.paused = true;
        ctx.remove(self);

        if inner.usecase.options().prune_on_pause {
            let before = inner.cache.len();
            inner
                .cache
                .retain(|_, instance| instance.status() != EntityStatus::Loaded);
            tracing::debug!(
                usecase = %inner.usecase,
                pruned = before - inner.cache.len(),
                "pruned unmodified instances on pause"
            );
        }
        Ok(())
    }

    /// Resumes a paused session, pushing it back as current on `ctx`.
    ///
    /// Resuming on a different context than the one paused on is the
    /// sanctioned cross-thread handoff; ownership moves atomically at
    /// this call.
    ///
    /// # Errors
    ///
    /// Fails with `NotPaused` if the session is not paused.
    pub fn resume(&self, ctx: &mut SessionContext) -> UowResult<()> {
        let mut inner = self.inner.lock();
        if !inner.paused {
            return Err(UowError::NotPaused);
        }
        inner.paused = false;
        ctx.push(self.clone());
        Ok(())
    }

    /// Registers a commit-boundary callback.
    pub fn add_callback(&self, callback: Arc<dyn UnitOfWorkCallback>) {
        self.inner.lock().callbacks.push(callback);
    }

    /// Unregisters a previously added callback (by identity).
    pub fn remove_callback(&self, callback: &Arc<dyn UnitOfWorkCallback>) {
        self.inner
            .lock()
            .callbacks
            .retain(|registered| !Arc::ptr_eq(registered, callback));
    }

    /// Admits a freshly built instance into the cache.
    ///
    /// Called once by the builder's finalize step.
    pub(crate) fn add_entity(&self, instance: EntityInstance) -> UowResult<()> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        inner.cache.insert(instance.reference().clone(), instance);
        Ok(())
    }

    /// Allocates a committable state from a store's transaction.
    pub(crate) fn allocate_state(
        &self,
        store: &Arc<dyn EntityStore>,
        reference: EntityReference,
        entity_type: &str,
    ) -> UowResult<SharedEntityState> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        Ok(inner
            .store_uow(store)
            .new_entity_state(reference, entity_type)?)
    }
}

impl fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("UnitOfWork")
            .field("usecase", &inner.usecase.name())
            .field("open", &inner.open)
            .field("paused", &inner.paused)
            .field("entities", &inner.cache.len())
            .field("stores", &inner.store_uows.len())
            .finish()
    }
}

impl fmt::Display for UnitOfWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        write!(
            f,
            "UnitOfWork({}): entities: {}",
            inner.usecase,
            inner.cache.len()
        )
    }
}
