//! Source-of-truth facts that drive the authorization relationships

pub mod memory;
pub mod postgres;

use crate::error::SourceError;
use async_trait::async_trait;
use authz_relationships::{
    client::{grant_admin, grant_sdr, offday_organization},
    RelationshipUpdate,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use self::memory::MemorySource;
pub use self::postgres::PgSource;

/// Organization role of a member. Admin and SDR are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Sdr,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Sdr => "sdr",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "sdr" => Ok(Role::Sdr),
            other => Err(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub organization_id: String,
    pub role: Role,
}

impl Member {
    pub fn new(id: &str, organization_id: &str, role: Role) -> Self {
        Self {
            id: id.to_string(),
            organization_id: organization_id.to_string(),
            role,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffDay {
    pub id: String,
    pub organization_id: String,
}

impl OffDay {
    pub fn new(id: &str, organization_id: &str) -> Self {
        Self {
            id: id.to_string(),
            organization_id: organization_id.to_string(),
        }
    }
}

/// One source row of any tracked category
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    Member(Member),
    OffDay(OffDay),
}

impl Entity {
    /// Backend updates that make the relationship store reflect this entity.
    /// A member yields the pair (DELETE other role, TOUCH own role), which must
    /// land in the same write call.
    pub fn updates(&self) -> Vec<RelationshipUpdate> {
        match self {
            Entity::Member(member) => match member.role {
                Role::Admin => grant_admin(&member.organization_id, &member.id),
                Role::Sdr => grant_sdr(&member.organization_id, &member.id),
            },
            Entity::OffDay(off_day) => vec![RelationshipUpdate::touch(offday_organization(
                &off_day.id,
                &off_day.organization_id,
            ))],
        }
    }
}

/// The primary datastore, as seen by the sync engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceDatabase: Send + Sync {
    /// True when tracked data changed since the last completed sync
    async fn should_sync(&self) -> Result<bool, SourceError>;

    /// Record that the data observed by the last `should_sync` is in the backend
    async fn sync_completed(&self) -> Result<(), SourceError>;

    /// Every member, in a stable order
    async fn members(&self) -> Result<Vec<Member>, SourceError>;

    /// Every off-day, in a stable order
    async fn off_days(&self) -> Result<Vec<OffDay>, SourceError>;
}

/// Bypasses gating. The inner predicate still runs so the source records the
/// revision this run covers, and completion advances the watermark as usual.
pub struct AlwaysSync {
    inner: Arc<dyn SourceDatabase>,
}

impl AlwaysSync {
    pub fn new(inner: Arc<dyn SourceDatabase>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl SourceDatabase for AlwaysSync {
    async fn should_sync(&self) -> Result<bool, SourceError> {
        self.inner.should_sync().await?;
        Ok(true)
    }

    async fn sync_completed(&self) -> Result<(), SourceError> {
        self.inner.sync_completed().await
    }

    async fn members(&self) -> Result<Vec<Member>, SourceError> {
        self.inner.members().await
    }

    async fn off_days(&self) -> Result<Vec<OffDay>, SourceError> {
        self.inner.off_days().await
    }
}
