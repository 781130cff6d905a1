//! Tracked categories, in the order every pass processes them

use crate::error::SourceError;
use crate::source::{Entity, SourceDatabase};
use authz_relationships::schema::definition;
use futures::future::BoxFuture;

/// Lists every current entity of one category from the source
pub type Enumerate = for<'a> fn(&'a dyn SourceDatabase) -> BoxFuture<'a, Result<Vec<Entity>, SourceError>>;

/// One tracked category: where its entities come from and which backend
/// resource type holds their relationships. Entities map themselves to
/// backend updates through `Entity::updates`.
#[derive(Clone, Copy)]
pub struct Category {
    pub name: &'static str,
    /// Resource type cleared for this category by a resync
    pub resource_type: &'static str,
    pub enumerate: Enumerate,
}

impl std::fmt::Debug for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Category")
            .field("name", &self.name)
            .field("resource_type", &self.resource_type)
            .finish()
    }
}

pub const MEMBERS: Category = Category {
    name: "members",
    resource_type: definition::ORGANIZATION,
    enumerate: enumerate_members,
};

pub const OFF_DAYS: Category = Category {
    name: "off days",
    resource_type: definition::OFFDAY,
    enumerate: enumerate_off_days,
};

/// Members first, then off-days
pub const CATEGORIES: &[Category] = &[MEMBERS, OFF_DAYS];

fn enumerate_members(source: &dyn SourceDatabase) -> BoxFuture<'_, Result<Vec<Entity>, SourceError>> {
    Box::pin(async move {
        let members = source.members().await?;
        Ok(members.into_iter().map(Entity::Member).collect())
    })
}

fn enumerate_off_days(source: &dyn SourceDatabase) -> BoxFuture<'_, Result<Vec<Entity>, SourceError>> {
    Box::pin(async move {
        let off_days = source.off_days().await?;
        Ok(off_days.into_iter().map(Entity::OffDay).collect())
    })
}
