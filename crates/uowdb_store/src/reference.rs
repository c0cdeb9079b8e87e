//! Entity reference.

use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Globally unique identity of one entity.
///
/// References are opaque strings that are:
/// - Globally unique within a deployment
/// - Immutable once created
/// - Compared by value
///
/// Cloning is cheap; the identity text is shared.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityReference(Arc<str>);

impl EntityReference {
    /// Creates a reference from a caller-supplied identity.
    pub fn new(identity: impl Into<String>) -> Self {
        Self(Arc::from(identity.into()))
    }

    /// Generates a new random reference.
    #[must_use]
    pub fn generate() -> Self {
        Self(Arc::from(Uuid::new_v4().to_string()))
    }

    /// Returns the identity text.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityReference({})", self.0)
    }
}

impl fmt::Display for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for EntityReference {
    fn from(identity: &str) -> Self {
        Self::new(identity)
    }
}

impl From<String> for EntityReference {
    fn from(identity: String) -> Self {
        Self::new(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_is_unique() {
        let r1 = EntityReference::generate();
        let r2 = EntityReference::generate();
        assert_ne!(r1, r2);
    }

    #[test]
    fn equality_by_value() {
        let r1 = EntityReference::new("customer-17");
        let r2 = EntityReference::new("customer-17");
        assert_eq!(r1, r2);
    }

    #[test]
    fn identity_roundtrip() {
        let r = EntityReference::new("order-1");
        assert_eq!(r.identity(), "order-1");
        assert_eq!(format!("{r}"), "order-1");
    }

    #[test]
    fn clones_compare_equal() {
        let r = EntityReference::generate();
        assert_eq!(r.clone(), r);
    }
}
