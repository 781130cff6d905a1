//! Postgres source adapter
//!
//! Gating reads the `authz_sync_state` watermark row that the shipped
//! migration keeps current through statement triggers on the tracked tables.

use super::{Member, OffDay, Role, SourceDatabase};
use crate::error::SourceError;
use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::{debug, info};

pub struct PgSource {
    pool: PgPool,
    observed: Mutex<Option<i64>>,
}

impl PgSource {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            observed: Mutex::new(None),
        }
    }

    /// Create a connection pool for the source database
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, SourceError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await?;

        info!("Source database connection pool created");
        Ok(Self::new(pool))
    }

    /// Apply the schema migrations for the tracked tables and watermark
    pub async fn migrate(&self) -> Result<(), SourceError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Source database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SourceDatabase for PgSource {
    async fn should_sync(&self) -> Result<bool, SourceError> {
        let (revision, synced_revision): (i64, i64) =
            sqlx::query_as("SELECT revision, synced_revision FROM authz_sync_state WHERE id = 1")
                .fetch_one(&self.pool)
                .await?;

        *self.observed.lock() = Some(revision);
        debug!(revision, synced_revision, "Checked sync watermark");
        Ok(revision > synced_revision)
    }

    async fn sync_completed(&self) -> Result<(), SourceError> {
        let observed = self.observed.lock().take();
        let Some(observed) = observed else {
            debug!("No observed revision, leaving sync watermark unchanged");
            return Ok(());
        };

        sqlx::query(
            r#"
            UPDATE authz_sync_state
            SET synced_revision = GREATEST(synced_revision, $1), synced_at = now()
            WHERE id = 1
            "#,
        )
        .bind(observed)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn members(&self) -> Result<Vec<Member>, SourceError> {
        let rows: Vec<(String, String, String)> =
            sqlx::query_as("SELECT id, organization_id, role FROM members ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(id, organization_id, role)| {
                let role = role
                    .parse::<Role>()
                    .map_err(|role| SourceError::InvalidRole {
                        member_id: id.clone(),
                        role,
                    })?;
                Ok(Member {
                    id,
                    organization_id,
                    role,
                })
            })
            .collect()
    }

    async fn off_days(&self) -> Result<Vec<OffDay>, SourceError> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT id, organization_id FROM off_days ORDER BY id")
                .fetch_all(&self.pool)
                .await?;

        Ok(rows
            .into_iter()
            .map(|(id, organization_id)| OffDay { id, organization_id })
            .collect())
    }
}
