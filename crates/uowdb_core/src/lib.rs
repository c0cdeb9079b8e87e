//! # UowDB Core
//!
//! Unit-of-work transactional object cache.
//!
//! A [`UnitOfWork`] is the scope of one logical operation: it caches the
//! entity instances the operation loads or creates, keeps at most one
//! live instance per reference, and commits all changes atomically across
//! every storage backend the operation touched. Conflicting concurrent
//! changes are detected optimistically at commit time through per-entity
//! version tokens.
//!
//! ## Walkthrough
//!
//! ```
//! use std::sync::Arc;
//! use uowdb_core::{SessionContext, Usecase};
//! use uowdb_store::{EntityStore, LogicalTime, MemoryEntityStore, PropertyValue};
//!
//! let store: Arc<dyn EntityStore> = Arc::new(MemoryEntityStore::new("people"));
//! let mut ctx = SessionContext::new();
//!
//! // Create and commit.
//! let uow = ctx.new_unit_of_work(Usecase::new("signup"), LogicalTime::new(1));
//! let mut builder = uow.new_entity_builder(Arc::clone(&store), "Person").unwrap();
//! builder.set_property("name", "Alice").unwrap();
//! let person = builder.new_instance().unwrap();
//! let reference = person.reference().clone();
//! uow.complete(&mut ctx).unwrap();
//!
//! // Reload in a fresh session.
//! let uow = ctx.new_unit_of_work(Usecase::new("lookup"), LogicalTime::new(2));
//! let person = uow
//!     .get(&reference, "Person", &[Arc::clone(&store)])
//!     .unwrap();
//! assert_eq!(person.property("name"), Some(PropertyValue::from("Alice")));
//! uow.discard(&mut ctx);
//! ```
//!
//! Sessions are single-owner by contract: one logical thread of control
//! mutates a session at a time, and [`UnitOfWork::pause`] /
//! [`UnitOfWork::resume`] are the only sanctioned handoff points.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod callback;
mod entity;
mod error;
mod identity;
mod types;
mod unit_of_work;

pub use callback::{UnitOfWorkCallback, UnitOfWorkStatus};
pub use entity::{EntityBuilder, EntityInstance, EntityLifecycle};
pub use error::{UowError, UowResult};
pub use identity::{IdentityGenerator, UuidIdentityGenerator};
pub use types::{Usecase, UsecaseOptions};
pub use unit_of_work::{SessionContext, UnitOfWork};
