//! Session cache and commit orchestration.
//!
//! A unit of work gives one logical operation:
//! - **Identity**: at most one live instance per entity reference
//! - **Repeatable reads**: once loaded, reads are served from the cache
//! - **Write-behind**: backends see changes only at completion
//! - **Atomicity**: every touched backend stages before any commits

mod context;
mod instance;

pub use context::SessionContext;
pub use instance::UnitOfWork;
