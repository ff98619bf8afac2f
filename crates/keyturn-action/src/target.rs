//! Resolution of token targets.
//!
//! A token may point at any stored object through a [`TargetRef`]. Each
//! content type registers a resolver that loads the object as JSON for the
//! landing page and the admin views.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use keyturn_core::error::KeyturnError;
use keyturn_core::types::TargetRef;
use keyturn_storage::UserRepository;

/// Loads objects of one content type by id.
pub trait TargetResolver: Send + Sync {
    fn resolve(&self, object_id: i64) -> Result<Option<Value>, KeyturnError>;
}

impl TargetResolver for UserRepository {
    fn resolve(&self, object_id: i64) -> Result<Option<Value>, KeyturnError> {
        self.find_by_id(object_id)?
            .map(serde_json::to_value)
            .transpose()
            .map_err(KeyturnError::from)
    }
}

/// Resolver table keyed by content type tag.
#[derive(Default, Clone)]
pub struct TargetResolvers {
    resolvers: HashMap<String, Arc<dyn TargetResolver>>,
}

impl TargetResolvers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, content_type: impl Into<String>, resolver: Arc<dyn TargetResolver>) -> Self {
        self.insert(content_type, resolver);
        self
    }

    pub fn insert(&mut self, content_type: impl Into<String>, resolver: Arc<dyn TargetResolver>) {
        self.resolvers.insert(content_type.into(), resolver);
    }

    pub fn knows(&self, content_type: &str) -> bool {
        self.resolvers.contains_key(content_type)
    }

    /// Load the target. Unknown content types and missing objects give `None`.
    pub fn resolve(&self, target: &TargetRef) -> Result<Option<Value>, KeyturnError> {
        match self.resolvers.get(&target.content_type) {
            Some(resolver) => resolver.resolve(target.object_id),
            None => {
                tracing::debug!(target = %target, "No resolver for target content type");
                Ok(None)
            }
        }
    }
}

impl std::fmt::Debug for TargetResolvers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&String> = self.resolvers.keys().collect();
        types.sort();
        f.debug_struct("TargetResolvers").field("types", &types).finish()
    }
}
