//! Relationship-based authorization for the rift scheduling service
//!
//! This crate holds everything that talks to the ReBAC backend:
//! - The relationship model (objects, subjects, updates, filters)
//! - The bundled schema and a validator for it
//! - The `RelationshipBackend` trait with an HTTP client for the SpiceDB
//!   gateway and an in-memory backend for tests
//! - `AuthzClient`, the permission client request handlers use
//!
//! # Example
//!
//! ```rust
//! use authz_relationships::{AuthzClient, InMemoryBackend};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = AuthzClient::new(Arc::new(InMemoryBackend::new()));
//!     client.migrate_schema().await?;
//!
//!     client.write_organization_admin("rift", "alice").await?;
//!     client.write_offday_organization("o1", "rift").await?;
//!
//!     client.can_edit_offday("o1", "alice").await?;
//!     assert!(client.can_edit_offday("o1", "bob").await.is_err());
//!
//!     Ok(())
//! }
//! ```

pub mod backend;
mod check;
pub mod client;
pub mod error;
pub mod models;
pub mod schema;

pub use backend::{InMemoryBackend, RelationshipBackend, SpiceDbBackend, SpiceDbConfig};
pub use client::{AuthzClient, OffDay, Organization};
pub use error::AuthzError;
pub use models::*;
pub use schema::{Schema, SCHEMA_V1};
