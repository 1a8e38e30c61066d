//! Catalog of ACL scopes declared by routes.
//!
//! Routes register scopes while services are built. Once every service is
//! built the registry is frozen into a read-only [`Scopes`] view.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("scope registry is frozen, cannot register {0:?}")]
    Frozen(String),
}

#[derive(Debug, Default)]
pub struct ScopeRegistry {
    scopes: BTreeMap<String, String>,
    frozen: bool,
}

impl ScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `scope`. Re-registering keeps the first non-empty description.
    pub fn register(&mut self, scope: &str, description: &str) -> Result<(), ScopeError> {
        if self.frozen {
            return Err(ScopeError::Frozen(scope.to_string()));
        }
        let entry = self.scopes.entry(scope.to_string()).or_default();
        if entry.is_empty() {
            *entry = description.to_string();
        }
        Ok(())
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Stop accepting registrations and hand out the final catalog.
    pub fn freeze(&mut self) -> Scopes {
        self.frozen = true;
        Scopes(Arc::new(self.scopes.clone()))
    }
}

/// Read-only scope catalog.
#[derive(Debug, Clone, Default)]
pub struct Scopes(Arc<BTreeMap<String, String>>);

impl Scopes {
    pub fn description(&self, scope: &str) -> Option<&str> {
        self.0.get(scope).map(String::as_str)
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains_key(scope)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
