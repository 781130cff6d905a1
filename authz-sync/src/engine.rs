//! Sync engine
//!
//! Reconciles the source of truth into the relationship backend:
//! lock, gate, then for each category enumerate, map and write in chunks,
//! and finally mark completion. `resync` clears each category's resource type
//! first. Deleting every relationship of a type can take hours on a large
//! store, so resync is a rare, operator-triggered operation.

use crate::{
    category::{Category, CATEGORIES},
    chunk::{self, DEFAULT_CHUNK_SIZE, MIN_CHUNK_SIZE},
    error::{SyncError, SyncResult},
    lock::{acquire_guard, DistributedLock, LockGuard},
    source::SourceDatabase,
};
use authz_relationships::{RelationshipBackend, RelationshipFilter};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Upsert current facts over whatever the backend holds
    Incremental,
    /// Delete every tracked relationship, then upsert current facts
    Rebuild,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every category was written and completion was recorded
    Completed,
    /// Another instance holds the lock
    AlreadyRunning,
    /// Nothing changed since the last completed sync
    UpToDate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryReport {
    pub name: &'static str,
    pub entities: usize,
    pub updates: usize,
    pub chunks: usize,
}

/// Result of one `sync` or `resync` call
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub mode: SyncMode,
    pub outcome: SyncOutcome,
    pub categories: Vec<CategoryReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl SyncReport {
    fn new(mode: SyncMode) -> Self {
        let now = Utc::now();
        Self {
            mode,
            outcome: SyncOutcome::UpToDate,
            categories: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    pub fn lock_acquired(&self) -> bool {
        self.outcome != SyncOutcome::AlreadyRunning
    }

    pub fn total_updates(&self) -> usize {
        self.categories.iter().map(|c| c.updates).sum()
    }

    pub fn total_chunks(&self) -> usize {
        self.categories.iter().map(|c| c.chunks).sum()
    }

    fn finish(mut self, outcome: SyncOutcome) -> Self {
        self.outcome = outcome;
        self.finished_at = Utc::now();
        self
    }
}

pub struct SyncEngine {
    backend: Arc<dyn RelationshipBackend>,
    source: Arc<dyn SourceDatabase>,
    lock: Arc<dyn DistributedLock>,
    chunk_size: usize,
    categories: &'static [Category],
}

impl SyncEngine {
    pub fn new(
        backend: Arc<dyn RelationshipBackend>,
        source: Arc<dyn SourceDatabase>,
        lock: Arc<dyn DistributedLock>,
    ) -> Self {
        Self {
            backend,
            source,
            lock,
            chunk_size: DEFAULT_CHUNK_SIZE,
            categories: CATEGORIES,
        }
    }

    /// Set the number of backend updates per write call
    pub fn with_chunk_size(mut self, chunk_size: usize) -> SyncResult<Self> {
        if chunk_size < MIN_CHUNK_SIZE {
            return Err(SyncError::Config(format!(
                "chunk size must be at least {}, got {}",
                MIN_CHUNK_SIZE, chunk_size
            )));
        }
        self.chunk_size = chunk_size;
        Ok(self)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Write current source facts into the backend
    pub async fn sync(&self) -> SyncResult<SyncReport> {
        self.run(SyncMode::Incremental).await
    }

    /// Delete all tracked relationships, then write current source facts
    pub async fn resync(&self) -> SyncResult<SyncReport> {
        self.run(SyncMode::Rebuild).await
    }

    async fn run(&self, mode: SyncMode) -> SyncResult<SyncReport> {
        let report = SyncReport::new(mode);

        let Some(guard) = acquire_guard(self.lock.clone()).await.map_err(SyncError::Lock)? else {
            debug!("Sync lock held by another instance, skipping {:?} run", mode);
            return Ok(report.finish(SyncOutcome::AlreadyRunning));
        };

        let result = self.run_locked(mode, report, &guard).await;
        guard.release().await;

        match &result {
            Ok(report) if report.outcome == SyncOutcome::Completed => info!(
                "{:?} sync completed: {} updates in {} chunks",
                mode,
                report.total_updates(),
                report.total_chunks()
            ),
            Ok(_) => debug!("Source unchanged since last sync, nothing to do"),
            Err(e) => error!("{:?} sync failed: {}", mode, e),
        }
        result
    }

    async fn run_locked(&self, mode: SyncMode, mut report: SyncReport, guard: &LockGuard) -> SyncResult<SyncReport> {
        if !self.source.should_sync().await.map_err(SyncError::ShouldSync)? {
            return Ok(report.finish(SyncOutcome::UpToDate));
        }

        info!("Starting {:?} sync", mode);
        if mode == SyncMode::Rebuild {
            ensure_held(guard)?;
            self.delete_all().await?;
        }

        for category in self.categories {
            report.categories.push(self.reconcile(category, guard).await?);
        }

        // Another instance may be writing now; leave the watermark to it
        ensure_held(guard)?;
        self.source
            .sync_completed()
            .await
            .map_err(SyncError::MarkCompleted)?;

        Ok(report.finish(SyncOutcome::Completed))
    }

    /// One filter per resource type. Any failure aborts before a single write.
    async fn delete_all(&self) -> SyncResult<()> {
        for category in self.categories {
            info!("Deleting all {} relationships", category.resource_type);
            self.backend
                .delete_relationships(RelationshipFilter::resource_type(category.resource_type))
                .await
                .map_err(|source| SyncError::Delete {
                    category: category.name,
                    source,
                })?;
        }
        Ok(())
    }

    async fn reconcile(&self, category: &Category, guard: &LockGuard) -> SyncResult<CategoryReport> {
        let entities = (category.enumerate)(self.source.as_ref())
            .await
            .map_err(|source| SyncError::Enumerate {
                category: category.name,
                source,
            })?;

        let chunks = chunk::pack(&entities, self.chunk_size);
        let mut report = CategoryReport {
            name: category.name,
            entities: entities.len(),
            updates: 0,
            chunks: 0,
        };

        // Sequential, in enumeration order. A failed chunk aborts the run and
        // leaves earlier chunks applied; TOUCH makes the rerun converge.
        for (index, updates) in chunks.into_iter().enumerate() {
            ensure_held(guard)?;
            let count = updates.len();
            debug!("Writing {} chunk {} ({} updates)", category.name, index, count);
            self.backend
                .write_relationships(updates)
                .await
                .map_err(|source| SyncError::Write {
                    category: category.name,
                    chunk: index,
                    source,
                })?;
            report.updates += count;
            report.chunks += 1;
        }

        info!(
            "Synced {} {} as {} updates in {} chunks",
            report.entities, category.name, report.updates, report.chunks
        );
        Ok(report)
    }
}

fn ensure_held(guard: &LockGuard) -> SyncResult<()> {
    if guard.is_lost() {
        return Err(SyncError::LockLost);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{LockError, SourceError};
    use crate::lock::{Acquisition, LockToken, MockDistributedLock};
    use crate::source::{Member, MockSourceDatabase, OffDay, Role};
    use async_trait::async_trait;
    use authz_relationships::{
        AuthzError, CheckRequest, Consistency, InMemoryBackend, LookupResourcesRequest, Permissionship,
        Relationship, RelationshipUpdate, Schema,
    };
    use mockall::Sequence;
    use std::time::Duration;

    fn backend() -> Arc<InMemoryBackend> {
        Arc::new(InMemoryBackend::with_schema(Schema::v1().unwrap()))
    }

    fn granting_lock() -> MockDistributedLock {
        let mut lock = MockDistributedLock::new();
        lock.expect_acquire()
            .times(1)
            .returning(|| Ok(Acquisition::Acquired(LockToken::generate())));
        lock.expect_ttl().return_const(std::time::Duration::from_secs(30));
        lock.expect_release().times(1).returning(|_| Ok(()));
        lock
    }

    fn rift_source() -> MockSourceDatabase {
        let mut source = MockSourceDatabase::new();
        source.expect_members().returning(|| {
            Ok(vec![
                Member::new("alice", "rift", Role::Admin),
                Member::new("bob", "rift", Role::Sdr),
            ])
        });
        source
            .expect_off_days()
            .returning(|| Ok(vec![OffDay::new("offday", "rift")]));
        source
    }

    #[tokio::test]
    async fn test_contention_is_a_silent_no_op() {
        let mut lock = MockDistributedLock::new();
        lock.expect_acquire().returning(|| Ok(Acquisition::AlreadyHeld));
        lock.expect_release().never();

        let mut source = MockSourceDatabase::new();
        source.expect_should_sync().never();

        let engine = SyncEngine::new(backend(), Arc::new(source), Arc::new(lock));
        let report = engine.sync().await.unwrap();
        assert_eq!(report.outcome, SyncOutcome::AlreadyRunning);
        assert!(!report.lock_acquired());
    }

    #[tokio::test]
    async fn test_lock_failure_is_fatal() {
        let mut lock = MockDistributedLock::new();
        lock.expect_acquire()
            .returning(|| Err(LockError::Internal("connection refused".to_string())));

        let engine = SyncEngine::new(backend(), Arc::new(MockSourceDatabase::new()), Arc::new(lock));
        let err = engine.resync().await.unwrap_err();
        assert!(matches!(err, SyncError::Lock(_)));
        assert!(err.to_string().starts_with("failed to lock"));
    }

    #[tokio::test]
    async fn test_gate_closed_releases_lock_without_writes() {
        let mut source = MockSourceDatabase::new();
        source.expect_should_sync().returning(|| Ok(false));
        source.expect_members().never();
        source.expect_sync_completed().never();

        let backend = backend();
        let engine = SyncEngine::new(backend.clone(), Arc::new(source), Arc::new(granting_lock()));
        let report = engine.sync().await.unwrap();

        assert_eq!(report.outcome, SyncOutcome::UpToDate);
        assert_eq!(backend.write_calls(), 0);
    }

    #[tokio::test]
    async fn test_gate_failure_releases_lock() {
        let mut source = MockSourceDatabase::new();
        source
            .expect_should_sync()
            .returning(|| Err(SourceError::Internal("timeout".to_string())));

        let engine = SyncEngine::new(backend(), Arc::new(source), Arc::new(granting_lock()));
        let err = engine.sync().await.unwrap_err();
        assert!(matches!(err, SyncError::ShouldSync(_)));
    }

    #[tokio::test]
    async fn test_phases_run_in_order() {
        let mut seq = Sequence::new();
        let mut source = MockSourceDatabase::new();
        source
            .expect_should_sync()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(true));
        source
            .expect_members()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(vec![Member::new("alice", "rift", Role::Admin)]));
        source
            .expect_off_days()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(vec![OffDay::new("offday", "rift")]));
        source
            .expect_sync_completed()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));

        let backend = backend();
        let engine = SyncEngine::new(backend.clone(), Arc::new(source), Arc::new(granting_lock()));
        let report = engine.sync().await.unwrap();

        assert_eq!(report.outcome, SyncOutcome::Completed);
        assert_eq!(
            report.categories,
            vec![
                CategoryReport {
                    name: "members",
                    entities: 1,
                    updates: 2,
                    chunks: 1,
                },
                CategoryReport {
                    name: "off days",
                    entities: 1,
                    updates: 1,
                    chunks: 1,
                },
            ]
        );
        assert_eq!(backend.len(), 2);
    }

    #[tokio::test]
    async fn test_enumeration_failure_names_category() {
        let mut source = MockSourceDatabase::new();
        source.expect_should_sync().returning(|| Ok(true));
        source.expect_members().returning(|| {
            Err(SourceError::InvalidRole {
                member_id: "carol".to_string(),
                role: "owner".to_string(),
            })
        });
        source.expect_off_days().never();
        source.expect_sync_completed().never();

        let engine = SyncEngine::new(backend(), Arc::new(source), Arc::new(granting_lock()));
        let err = engine.sync().await.unwrap_err();
        assert!(matches!(err, SyncError::Enumerate { category: "members", .. }));
    }

    #[tokio::test]
    async fn test_completion_failure_is_reported() {
        let mut source = rift_source();
        source.expect_should_sync().returning(|| Ok(true));
        source
            .expect_sync_completed()
            .returning(|| Err(SourceError::Internal("read only".to_string())));

        let backend = backend();
        let engine = SyncEngine::new(backend.clone(), Arc::new(source), Arc::new(granting_lock()));
        let err = engine.sync().await.unwrap_err();

        assert!(matches!(err, SyncError::MarkCompleted(_)));
        // Writes stay applied
        assert_eq!(backend.len(), 3);
    }

    #[test]
    fn test_chunk_size_must_fit_a_role_pair() {
        let engine = SyncEngine::new(
            backend(),
            Arc::new(MockSourceDatabase::new()),
            Arc::new(MockDistributedLock::new()),
        );
        assert!(matches!(engine.with_chunk_size(1), Err(SyncError::Config(_))));
    }

    /// Takes `delay` per write call
    struct SlowBackend {
        inner: Arc<InMemoryBackend>,
        delay: Duration,
    }

    #[async_trait]
    impl RelationshipBackend for SlowBackend {
        async fn write_relationships(&self, updates: Vec<RelationshipUpdate>) -> Result<(), AuthzError> {
            tokio::time::sleep(self.delay).await;
            self.inner.write_relationships(updates).await
        }

        async fn delete_relationships(&self, filter: RelationshipFilter) -> Result<(), AuthzError> {
            self.inner.delete_relationships(filter).await
        }

        async fn read_relationships(
            &self,
            filter: RelationshipFilter,
            consistency: Consistency,
        ) -> Result<Vec<Relationship>, AuthzError> {
            self.inner.read_relationships(filter, consistency).await
        }

        async fn check_permission(&self, request: CheckRequest) -> Result<Permissionship, AuthzError> {
            self.inner.check_permission(request).await
        }

        async fn lookup_resources(&self, request: LookupResourcesRequest) -> Result<Vec<String>, AuthzError> {
            self.inner.lookup_resources(request).await
        }

        async fn write_schema(&self, schema: &str) -> Result<(), AuthzError> {
            self.inner.write_schema(schema).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_lock_stops_writes_and_keeps_watermark() {
        let mut lock = MockDistributedLock::new();
        lock.expect_acquire()
            .times(1)
            .returning(|| Ok(Acquisition::Acquired(LockToken::generate())));
        lock.expect_ttl().return_const(Duration::from_millis(150));
        // Someone else owns the entry by the first extension
        lock.expect_extend().times(1).returning(|_| Ok(false));
        lock.expect_release().times(1).returning(|_| Ok(()));

        let mut source = MockSourceDatabase::new();
        source.expect_should_sync().returning(|| Ok(true));
        source.expect_members().returning(|| {
            Ok((0..20)
                .map(|i| Member::new(&format!("member-{:02}", i), "rift", Role::Sdr))
                .collect())
        });
        source.expect_off_days().never();
        source.expect_sync_completed().never();

        let inner = backend();
        let slow = Arc::new(SlowBackend {
            inner: inner.clone(),
            delay: Duration::from_millis(20),
        });
        let engine = SyncEngine::new(slow, Arc::new(source), Arc::new(lock))
            .with_chunk_size(2)
            .unwrap();

        let err = engine.sync().await.unwrap_err();
        assert!(matches!(err, SyncError::LockLost));
        // Keep-alive fires at 50ms, so only the first few chunks made it
        assert!(inner.write_calls() < 20, "wrote {} chunks", inner.write_calls());
    }
}
