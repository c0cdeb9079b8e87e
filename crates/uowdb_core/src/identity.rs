//! Identity generation for new entities.

use uowdb_store::EntityReference;
use uuid::Uuid;

/// Produces identities for entities created without a caller-supplied
/// reference.
///
/// Injected into [`crate::EntityBuilder`]; implementations must yield
/// globally unique references.
pub trait IdentityGenerator: Send + Sync {
    /// Generates a fresh, unique entity reference.
    fn generate(&self) -> EntityReference;
}

/// Default generator producing UUIDv4 identities.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIdentityGenerator;

impl IdentityGenerator for UuidIdentityGenerator {
    fn generate(&self) -> EntityReference {
        EntityReference::new(Uuid::new_v4().to_string())
    }
}
