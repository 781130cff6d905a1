//! In-memory relationship backend for tests and local development

use crate::{
    backend::RelationshipBackend,
    check::PermissionChecker,
    error::AuthzError,
    models::*,
    schema::Schema,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Upper bound on updates in one write call, as the real backend enforces
pub const DEFAULT_MAX_UPDATES_PER_WRITE: usize = 1000;

/// In-memory backend. Writes are validated against the schema written with
/// `write_schema`, so the schema must be provisioned first, like a real backend.
pub struct InMemoryBackend {
    relationships: Arc<DashMap<String, Relationship>>,
    schema: RwLock<Option<Arc<Schema>>>,
    // Serializes writers so a multi-update write is applied as one unit
    write_gate: Mutex<()>,
    max_updates_per_write: usize,
    write_calls: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            relationships: Arc::new(DashMap::new()),
            schema: RwLock::new(None),
            write_gate: Mutex::new(()),
            max_updates_per_write: DEFAULT_MAX_UPDATES_PER_WRITE,
            write_calls: AtomicUsize::new(0),
        }
    }

    /// Start with an already provisioned schema
    pub fn with_schema(schema: Schema) -> Self {
        let backend = Self::new();
        *backend.schema.write() = Some(Arc::new(schema));
        backend
    }

    pub fn with_max_updates_per_write(mut self, limit: usize) -> Self {
        self.max_updates_per_write = limit;
        self
    }

    /// Number of relationships currently stored
    pub fn len(&self) -> usize {
        self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relationships.is_empty()
    }

    /// Number of successful `write_relationships` calls so far
    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::SeqCst)
    }

    fn schema(&self) -> Result<Arc<Schema>, AuthzError> {
        self.schema.read().clone().ok_or(AuthzError::SchemaMissing)
    }

    fn matching(&self, filter: &RelationshipFilter) -> Vec<Relationship> {
        self.relationships
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelationshipBackend for InMemoryBackend {
    async fn write_relationships(&self, updates: Vec<RelationshipUpdate>) -> Result<(), AuthzError> {
        if updates.len() > self.max_updates_per_write {
            return Err(AuthzError::TooManyUpdates {
                count: updates.len(),
                limit: self.max_updates_per_write,
            });
        }

        // Validate everything before touching the store
        let schema = self.schema()?;
        let mut seen = HashSet::with_capacity(updates.len());
        for update in &updates {
            schema.validate_relationship(&update.relationship)?;
            if !seen.insert(update.relationship.key()) {
                return Err(AuthzError::InvalidRelationship(format!(
                    "{}: updated twice in one write",
                    update.relationship
                )));
            }
        }

        let _gate = self.write_gate.lock();
        for update in updates {
            let key = update.relationship.key();
            match update.operation {
                Operation::Touch => {
                    self.relationships.insert(key, update.relationship);
                }
                Operation::Delete => {
                    self.relationships.remove(&key);
                }
            }
        }
        self.write_calls.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }

    async fn delete_relationships(&self, filter: RelationshipFilter) -> Result<(), AuthzError> {
        let _gate = self.write_gate.lock();
        let before = self.relationships.len();
        self.relationships.retain(|_, rel| !filter.matches(rel));
        debug!(
            "Deleted {} relationships of type {}",
            before.saturating_sub(self.relationships.len()),
            filter.resource_type
        );
        Ok(())
    }

    async fn read_relationships(
        &self,
        filter: RelationshipFilter,
        _consistency: Consistency,
    ) -> Result<Vec<Relationship>, AuthzError> {
        let mut relationships = self.matching(&filter);
        relationships.sort_by_key(Relationship::key);
        Ok(relationships)
    }

    async fn check_permission(&self, request: CheckRequest) -> Result<Permissionship, AuthzError> {
        let schema = self.schema()?;
        let checker = PermissionChecker::new(&schema, &self.relationships);
        if checker.check(&request.resource, &request.permission, &request.subject)? {
            Ok(Permissionship::HasPermission)
        } else {
            Ok(Permissionship::NoPermission)
        }
    }

    async fn lookup_resources(&self, request: LookupResourcesRequest) -> Result<Vec<String>, AuthzError> {
        let schema = self.schema()?;
        let checker = PermissionChecker::new(&schema, &self.relationships);
        checker.lookup(&request.resource_type, &request.permission, &request.subject)
    }

    async fn write_schema(&self, schema: &str) -> Result<(), AuthzError> {
        let parsed = Schema::parse(schema)?;
        *self.schema.write() = Some(Arc::new(parsed));
        Ok(())
    }
}
