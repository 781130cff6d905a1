//! Authorization relationship synchronizer
//!
//! Mirrors membership roles and off-day ownership from the primary database
//! into the ReBAC backend so permission checks see the current facts:
//! - Only one sync runs at a time across the fleet (`DistributedLock`)
//! - Runs are gated on source changes (`SourceDatabase::should_sync`)
//! - Writes are upserts sent in bounded chunks, so an interrupted run is
//!   repaired by the next one
//! - `resync` wipes each tracked resource type before rebuilding it
//!
//! # Example
//!
//! ```rust
//! use authz_relationships::{InMemoryBackend, Schema};
//! use authz_sync::{Member, MemoryLock, MemorySource, OffDay, Role, SyncEngine, SyncOutcome};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Arc::new(InMemoryBackend::with_schema(Schema::v1()?));
//!     let source = Arc::new(MemorySource::new());
//!     source.upsert_member(Member::new("alice", "rift", Role::Admin));
//!     source.upsert_off_day(OffDay::new("offday", "rift"));
//!
//!     let engine = SyncEngine::new(backend.clone(), source, Arc::new(MemoryLock::default()));
//!     let report = engine.sync().await?;
//!
//!     assert_eq!(report.outcome, SyncOutcome::Completed);
//!     assert_eq!(backend.len(), 2);
//!     Ok(())
//! }
//! ```

pub mod category;
pub mod chunk;
pub mod config;
pub mod engine;
pub mod error;
pub mod lock;
pub mod source;

pub use self::config::SyncConfig;
pub use engine::{CategoryReport, SyncEngine, SyncMode, SyncOutcome, SyncReport};
pub use error::{LockError, SourceError, SyncError, SyncResult};
pub use lock::{Acquisition, DistributedLock, LockGuard, LockToken, MemoryLock, RedisLock};
pub use source::{AlwaysSync, Entity, Member, MemorySource, OffDay, PgSource, Role, SourceDatabase};
