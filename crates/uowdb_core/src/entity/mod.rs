//! Session-bound entity instances and staged creation.

mod builder;
mod instance;

pub use builder::{EntityBuilder, EntityLifecycle};
pub use instance::EntityInstance;
