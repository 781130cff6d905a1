//! Backend interface for storing relationships and answering permission queries

pub mod memory;
pub mod spicedb;

use crate::{error::AuthzError, models::*};
use async_trait::async_trait;

pub use memory::InMemoryBackend;
pub use spicedb::{SpiceDbBackend, SpiceDbConfig};

/// Relationship store and permission evaluator behind the authorization layer
#[async_trait]
pub trait RelationshipBackend: Send + Sync {
    /// Apply the updates atomically, in order. TOUCH is an upsert and DELETE
    /// of a missing relationship is a no-op, so replaying a write is harmless.
    async fn write_relationships(&self, updates: Vec<RelationshipUpdate>) -> Result<(), AuthzError>;

    /// Delete every relationship matching the filter. Unbounded; on a large
    /// store this can run for a long time.
    async fn delete_relationships(&self, filter: RelationshipFilter) -> Result<(), AuthzError>;

    /// Read relationships matching the filter
    async fn read_relationships(
        &self,
        filter: RelationshipFilter,
        consistency: Consistency,
    ) -> Result<Vec<Relationship>, AuthzError>;

    /// Check a single permission
    async fn check_permission(&self, request: CheckRequest) -> Result<Permissionship, AuthzError>;

    /// Ids of resources on which the subject has the permission
    async fn lookup_resources(&self, request: LookupResourcesRequest) -> Result<Vec<String>, AuthzError>;

    /// Replace the backend schema
    async fn write_schema(&self, schema: &str) -> Result<(), AuthzError>;
}
