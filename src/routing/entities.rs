//! Entity store boundary — read-only routing fields for agents, workflows
//! and tools.
//!
//! The definitions themselves live in an external persistence service; this
//! crate only ever reads the handful of fields the fallback table needs.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::types::{CacheKey, ContextKind};

/// Routing-relevant fields of a persisted entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRouting {
    /// Explicit service address (highest-priority entity field).
    #[serde(default)]
    pub service_url: Option<String>,
    /// Bare host name, composed into a URL with the kind's fixed scheme.
    #[serde(default)]
    pub dns_name: Option<String>,
    /// Generic URL field (lowest-priority entity field).
    #[serde(default)]
    pub url: Option<String>,
}

/// Read-only access to entity routing fields.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Routing fields for `(kind, id)`, or `None` if the entity is unknown.
    async fn routing_fields(&self, kind: ContextKind, id: &str) -> Option<EntityRouting>;
}

/// In-memory entity store, for embedding callers that already hold the
/// definitions and for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticEntityStore {
    entries: HashMap<CacheKey, EntityRouting>,
}

impl StaticEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, kind: ContextKind, id: &str, routing: EntityRouting) -> Self {
        self.insert(kind, id, routing);
        self
    }

    pub fn insert(&mut self, kind: ContextKind, id: &str, routing: EntityRouting) {
        self.entries.insert(CacheKey::new(kind, id), routing);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl EntityStore for StaticEntityStore {
    async fn routing_fields(&self, kind: ContextKind, id: &str) -> Option<EntityRouting> {
        self.entries.get(&CacheKey::new(kind, id)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_store_lookup_is_kind_scoped() {
        let store = StaticEntityStore::new().with(
            ContextKind::Agent,
            "a1",
            EntityRouting {
                dns_name: Some("a1.internal".into()),
                ..Default::default()
            },
        );
        assert_eq!(store.len(), 1);
        let found = store.routing_fields(ContextKind::Agent, "a1").await.unwrap();
        assert_eq!(found.dns_name.as_deref(), Some("a1.internal"));
        assert!(store.routing_fields(ContextKind::Workflow, "a1").await.is_none());
    }
}
