use crate::{
    backend::RelationshipBackend,
    error::AuthzError,
    models::*,
    schema::{definition, permission, relation, SCHEMA_V1},
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Permission client used by request handlers. Every read asks the backend
/// for full consistency: a stale answer here is an authorization bug.
#[derive(Clone)]
pub struct AuthzClient {
    backend: Arc<dyn RelationshipBackend>,
}

/// What a member may do in their organization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Organization {
    pub id: String,
    pub access: bool,
    pub view_settings: bool,
    pub edit_settings: bool,
    pub invite_member: bool,
    pub edit_member: bool,
    pub delete_member: bool,
    pub create_offday: bool,
}

/// What a member may do with one off-day
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffDay {
    pub id: String,
    pub view: bool,
    pub edit: bool,
    pub delete: bool,
}

// =============================================================================
// Relationship builders
// =============================================================================

pub fn organization_admin(organization_id: &str, member_id: &str) -> Relationship {
    Relationship::new(
        ObjectRef::new(definition::ORGANIZATION, organization_id),
        relation::ADMIN,
        SubjectRef::new(definition::MEMBER, member_id),
    )
}

pub fn organization_sdr(organization_id: &str, member_id: &str) -> Relationship {
    Relationship::new(
        ObjectRef::new(definition::ORGANIZATION, organization_id),
        relation::SDR,
        SubjectRef::new(definition::MEMBER, member_id),
    )
}

pub fn organization_apikey(organization_id: &str, apikey_id: &str) -> Relationship {
    Relationship::new(
        ObjectRef::new(definition::ORGANIZATION, organization_id),
        relation::APIKEY,
        SubjectRef::new(definition::APIKEY, apikey_id),
    )
}

pub fn offday_organization(offday_id: &str, organization_id: &str) -> Relationship {
    Relationship::new(
        ObjectRef::new(definition::OFFDAY, offday_id),
        relation::ORGANIZATION,
        SubjectRef::new(definition::ORGANIZATION, organization_id),
    )
}

/// Admin and SDR are mutually exclusive: granting one removes the other in
/// the same write call.
pub fn grant_admin(organization_id: &str, member_id: &str) -> Vec<RelationshipUpdate> {
    vec![
        RelationshipUpdate::delete(organization_sdr(organization_id, member_id)),
        RelationshipUpdate::touch(organization_admin(organization_id, member_id)),
    ]
}

pub fn grant_sdr(organization_id: &str, member_id: &str) -> Vec<RelationshipUpdate> {
    vec![
        RelationshipUpdate::delete(organization_admin(organization_id, member_id)),
        RelationshipUpdate::touch(organization_sdr(organization_id, member_id)),
    ]
}

fn member(member_id: &str) -> SubjectRef {
    SubjectRef::new(definition::MEMBER, member_id)
}

impl AuthzClient {
    pub fn new(backend: Arc<dyn RelationshipBackend>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> Arc<dyn RelationshipBackend> {
        self.backend.clone()
    }

    /// Provision the bundled schema
    pub async fn migrate_schema(&self) -> Result<(), AuthzError> {
        info!("Migrating authorization schema");
        self.backend.write_schema(SCHEMA_V1).await
    }

    // =============================================================================
    // Writes
    // =============================================================================

    async fn write(&self, updates: Vec<RelationshipUpdate>) -> Result<(), AuthzError> {
        self.backend.write_relationships(updates).await
    }

    pub async fn write_organization_admin(&self, organization_id: &str, member_id: &str) -> Result<(), AuthzError> {
        self.write(grant_admin(organization_id, member_id)).await
    }

    pub async fn write_organization_sdr(&self, organization_id: &str, member_id: &str) -> Result<(), AuthzError> {
        self.write(grant_sdr(organization_id, member_id)).await
    }

    pub async fn delete_organization_admin(&self, organization_id: &str, member_id: &str) -> Result<(), AuthzError> {
        self.write(vec![RelationshipUpdate::delete(organization_admin(organization_id, member_id))])
            .await
    }

    pub async fn delete_organization_sdr(&self, organization_id: &str, member_id: &str) -> Result<(), AuthzError> {
        self.write(vec![RelationshipUpdate::delete(organization_sdr(organization_id, member_id))])
            .await
    }

    pub async fn write_organization_apikey(&self, organization_id: &str, apikey_id: &str) -> Result<(), AuthzError> {
        self.write(vec![RelationshipUpdate::touch(organization_apikey(organization_id, apikey_id))])
            .await
    }

    pub async fn delete_organization_apikey(&self, organization_id: &str, apikey_id: &str) -> Result<(), AuthzError> {
        self.write(vec![RelationshipUpdate::delete(organization_apikey(organization_id, apikey_id))])
            .await
    }

    pub async fn write_offday_organization(&self, offday_id: &str, organization_id: &str) -> Result<(), AuthzError> {
        self.write(vec![RelationshipUpdate::touch(offday_organization(offday_id, organization_id))])
            .await
    }

    pub async fn delete_offday_organization(&self, offday_id: &str, organization_id: &str) -> Result<(), AuthzError> {
        self.write(vec![RelationshipUpdate::delete(offday_organization(offday_id, organization_id))])
            .await
    }

    // =============================================================================
    // Checks
    // =============================================================================

    /// Ok when the permission is held, `AuthzError::Denied` when it is not
    async fn check(&self, resource: ObjectRef, permission: &str, subject: SubjectRef) -> Result<(), AuthzError> {
        let request = CheckRequest::new(resource, permission, subject);
        let described = request.to_string();
        debug!("Checking permission: {}", described);

        match self.backend.check_permission(request).await? {
            Permissionship::HasPermission => Ok(()),
            Permissionship::NoPermission | Permissionship::ConditionalPermission => {
                Err(AuthzError::Denied(described))
            }
        }
    }

    async fn has(&self, resource: ObjectRef, permission: &str, subject: SubjectRef) -> Result<bool, AuthzError> {
        match self.check(resource, permission, subject).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_denied() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn lookup(&self, resource_type: &str, permission: &str, subject: SubjectRef) -> Result<Vec<String>, AuthzError> {
        let request = LookupResourcesRequest::new(resource_type, permission, subject);
        self.backend.lookup_resources(request).await
    }

    fn org(organization_id: &str) -> ObjectRef {
        ObjectRef::new(definition::ORGANIZATION, organization_id)
    }

    fn offday(offday_id: &str) -> ObjectRef {
        ObjectRef::new(definition::OFFDAY, offday_id)
    }

    pub async fn can_access_organization(&self, organization_id: &str, member_id: &str) -> Result<(), AuthzError> {
        self.check(Self::org(organization_id), permission::ACCESS, member(member_id)).await
    }

    pub async fn can_view_organization_settings(&self, organization_id: &str, member_id: &str) -> Result<(), AuthzError> {
        self.check(Self::org(organization_id), permission::VIEW_SETTINGS, member(member_id)).await
    }

    pub async fn can_edit_organization_settings(&self, organization_id: &str, member_id: &str) -> Result<(), AuthzError> {
        self.check(Self::org(organization_id), permission::EDIT_SETTINGS, member(member_id)).await
    }

    pub async fn can_invite_organization_member(&self, organization_id: &str, member_id: &str) -> Result<(), AuthzError> {
        self.check(Self::org(organization_id), permission::INVITE_MEMBER, member(member_id)).await
    }

    pub async fn can_edit_organization_member(&self, organization_id: &str, member_id: &str) -> Result<(), AuthzError> {
        self.check(Self::org(organization_id), permission::EDIT_MEMBER, member(member_id)).await
    }

    pub async fn can_delete_organization_member(&self, organization_id: &str, member_id: &str) -> Result<(), AuthzError> {
        self.check(Self::org(organization_id), permission::DELETE_MEMBER, member(member_id)).await
    }

    pub async fn can_create_organization_offday(&self, organization_id: &str, member_id: &str) -> Result<(), AuthzError> {
        self.check(Self::org(organization_id), permission::CREATE_OFFDAY, member(member_id)).await
    }

    pub async fn is_organization_admin(&self, organization_id: &str, member_id: &str) -> Result<(), AuthzError> {
        self.check(Self::org(organization_id), permission::ORGANIZATION_ADMIN, member(member_id)).await
    }

    pub async fn can_use_organization_apikey(&self, organization_id: &str, apikey_id: &str) -> Result<(), AuthzError> {
        self.check(
            Self::org(organization_id),
            permission::ORGANIZATION_APIKEY,
            SubjectRef::new(definition::APIKEY, apikey_id),
        )
        .await
    }

    pub async fn can_view_offday(&self, offday_id: &str, member_id: &str) -> Result<(), AuthzError> {
        self.check(Self::offday(offday_id), permission::VIEW, member(member_id)).await
    }

    pub async fn can_edit_offday(&self, offday_id: &str, member_id: &str) -> Result<(), AuthzError> {
        self.check(Self::offday(offday_id), permission::EDIT, member(member_id)).await
    }

    pub async fn can_delete_offday(&self, offday_id: &str, member_id: &str) -> Result<(), AuthzError> {
        self.check(Self::offday(offday_id), permission::DELETE, member(member_id)).await
    }

    // =============================================================================
    // Lookups
    // =============================================================================

    pub async fn list_view_offdays(&self, member_id: &str) -> Result<Vec<String>, AuthzError> {
        self.lookup(definition::OFFDAY, permission::VIEW, member(member_id)).await
    }

    pub async fn list_edit_offdays(&self, member_id: &str) -> Result<Vec<String>, AuthzError> {
        self.lookup(definition::OFFDAY, permission::EDIT, member(member_id)).await
    }

    pub async fn list_delete_offdays(&self, member_id: &str) -> Result<Vec<String>, AuthzError> {
        self.lookup(definition::OFFDAY, permission::DELETE, member(member_id)).await
    }

    /// The member's organization with every organization-level permission
    /// resolved. Denied when the member belongs to none; a member in several
    /// organizations is an inconsistency and reported as an error.
    pub async fn organization(&self, member_id: &str) -> Result<Organization, AuthzError> {
        let request = LookupResourcesRequest::new(definition::ORGANIZATION, permission::ACCESS, member(member_id));
        let described = request.to_string();
        let ids = self.backend.lookup_resources(request).await?;

        let id = match ids.as_slice() {
            [] => return Err(AuthzError::Denied(described)),
            [id] => id.clone(),
            _ => {
                return Err(AuthzError::Internal(format!(
                    "{}: member belongs to {} organizations",
                    described,
                    ids.len()
                )))
            }
        };

        let org = Self::org(&id);
        let subject = member(member_id);
        Ok(Organization {
            access: true,
            view_settings: self.has(org.clone(), permission::VIEW_SETTINGS, subject.clone()).await?,
            edit_settings: self.has(org.clone(), permission::EDIT_SETTINGS, subject.clone()).await?,
            invite_member: self.has(org.clone(), permission::INVITE_MEMBER, subject.clone()).await?,
            edit_member: self.has(org.clone(), permission::EDIT_MEMBER, subject.clone()).await?,
            delete_member: self.has(org.clone(), permission::DELETE_MEMBER, subject.clone()).await?,
            create_offday: self.has(org, permission::CREATE_OFFDAY, subject).await?,
            id,
        })
    }

    /// Every off-day the member can view, with edit/delete resolved
    pub async fn off_days(&self, member_id: &str) -> Result<BTreeMap<String, OffDay>, AuthzError> {
        let mut off_days = BTreeMap::new();
        for id in self.list_view_offdays(member_id).await? {
            let resource = Self::offday(&id);
            let off_day = OffDay {
                view: true,
                edit: self.has(resource.clone(), permission::EDIT, member(member_id)).await?,
                delete: self.has(resource, permission::DELETE, member(member_id)).await?,
                id: id.clone(),
            };
            off_days.insert(id, off_day);
        }
        Ok(off_days)
    }

    /// Relationships matching the filter, read with full consistency
    pub async fn read_relationships(&self, filter: RelationshipFilter) -> Result<Vec<Relationship>, AuthzError> {
        self.backend
            .read_relationships(filter, Consistency::FullyConsistent)
            .await
    }
}
