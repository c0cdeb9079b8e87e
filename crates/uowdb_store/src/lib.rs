//! # UowDB Store
//!
//! Entity store contract and reference backends for UowDB.
//!
//! This crate defines the narrow protocol a storage backend must expose so
//! that a unit of work can coordinate an atomic commit across several
//! independent backends:
//!
//! - [`EntityStore`] opens one [`EntityStoreUnitOfWork`] per session
//! - the store unit of work loads and allocates [`EntityState`]s
//! - `apply_changes` validates versions and stages a [`StateCommitter`]
//! - exactly one of `commit` / `cancel` consumes the committer
//!
//! Backends are **black boxes** behind this contract. They never see the
//! session cache, and the session never sees how a backend persists state.
//!
//! ## Reference backends
//!
//! - [`MemoryEntityStore`] — buffered (indirect) strategy with optimistic
//!   version checking; aborts are free
//! - [`DirectMemoryStore`] — write-through (direct) strategy; commit is a
//!   formality and discard cannot undo property writes

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod direct;
mod error;
mod memory;
mod reference;
mod state;
mod store;
mod types;
mod value;

pub use direct::DirectMemoryStore;
pub use error::{StoreError, StoreResult};
pub use memory::MemoryEntityStore;
pub use reference::EntityReference;
pub use state::{EntityState, EntityStatus, SharedEntityState};
pub use store::{EntityStore, EntityStoreUnitOfWork, StateCommitter};
pub use types::{LogicalTime, Version};
pub use value::PropertyValue;
