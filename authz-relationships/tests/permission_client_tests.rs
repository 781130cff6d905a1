//! Permission client tests against the in-memory backend
//!
//! These walk the organization and off-day permission model:
//! 1. Admins manage settings and members, SDRs only view
//! 2. Admin and SDR roles replace each other
//! 3. Off-days inherit visibility from their organization
//! 4. Aggregate lookups resolve every permission at once

use authz_relationships::*;
use std::sync::Arc;

const ORG: &str = "rift";
const ADMIN: &str = "alice";
const SDR: &str = "bob";
const OFFDAY: &str = "offday";

async fn create_test_client() -> AuthzClient {
    let client = AuthzClient::new(Arc::new(InMemoryBackend::new()));
    client.migrate_schema().await.unwrap();
    client
}

async fn seeded_client() -> AuthzClient {
    let client = create_test_client().await;
    client.write_organization_apikey(ORG, "key").await.unwrap();
    client.write_organization_sdr(ORG, SDR).await.unwrap();
    client.write_organization_admin(ORG, ADMIN).await.unwrap();
    client.write_offday_organization(OFFDAY, ORG).await.unwrap();
    client
}

fn assert_denied(result: Result<(), AuthzError>) {
    match result {
        Err(e) => assert!(e.is_denied(), "expected denial, got {e}"),
        Ok(()) => panic!("expected denial, got access"),
    }
}

// ============================================================================
// Organization
// ============================================================================

#[tokio::test]
async fn test_organization_permissions() {
    let client = seeded_client().await;

    client.can_access_organization(ORG, SDR).await.unwrap();
    client.can_access_organization(ORG, ADMIN).await.unwrap();
    assert_denied(client.can_access_organization(ORG, "mallory").await);

    client.can_view_organization_settings(ORG, SDR).await.unwrap();
    client.can_view_organization_settings(ORG, ADMIN).await.unwrap();

    assert_denied(client.can_edit_organization_settings(ORG, SDR).await);
    client.can_edit_organization_settings(ORG, ADMIN).await.unwrap();

    assert_denied(client.can_invite_organization_member(ORG, SDR).await);
    client.can_invite_organization_member(ORG, ADMIN).await.unwrap();

    assert_denied(client.can_edit_organization_member(ORG, SDR).await);
    client.can_edit_organization_member(ORG, ADMIN).await.unwrap();

    assert_denied(client.can_delete_organization_member(ORG, SDR).await);
    client.can_delete_organization_member(ORG, ADMIN).await.unwrap();

    assert_denied(client.can_create_organization_offday(ORG, SDR).await);
    client.can_create_organization_offday(ORG, ADMIN).await.unwrap();

    client.is_organization_admin(ORG, ADMIN).await.unwrap();
    assert_denied(client.is_organization_admin(ORG, SDR).await);

    client.can_use_organization_apikey(ORG, "key").await.unwrap();
    assert_denied(client.can_use_organization_apikey(ORG, "other").await);
}

#[tokio::test]
async fn test_denial_names_the_checked_relationship() {
    let client = seeded_client().await;

    let err = client.can_edit_organization_settings(ORG, SDR).await.unwrap_err();
    assert!(err.to_string().contains("organization:rift#edit_settings@member:bob"));
}

#[tokio::test]
async fn test_organization_lookup() {
    let client = seeded_client().await;

    let org = client.organization(SDR).await.unwrap();
    assert_eq!(
        org,
        Organization {
            id: ORG.to_string(),
            access: true,
            view_settings: true,
            edit_settings: false,
            invite_member: false,
            edit_member: false,
            delete_member: false,
            create_offday: false,
        }
    );

    let org = client.organization(ADMIN).await.unwrap();
    assert_eq!(
        org,
        Organization {
            id: ORG.to_string(),
            access: true,
            view_settings: true,
            edit_settings: true,
            invite_member: true,
            edit_member: true,
            delete_member: true,
            create_offday: true,
        }
    );

    let err = client.organization("mallory").await.unwrap_err();
    assert!(err.is_denied());
}

#[tokio::test]
async fn test_member_in_two_organizations_is_an_error() {
    let client = seeded_client().await;
    client.write_organization_sdr("other", SDR).await.unwrap();

    let err = client.organization(SDR).await.unwrap_err();
    assert!(!err.is_denied());
    assert!(matches!(err, AuthzError::Internal(_)));
}

#[tokio::test]
async fn test_roles_replace_each_other() {
    let client = seeded_client().await;

    // Promote the SDR
    client.write_organization_admin(ORG, SDR).await.unwrap();
    client.can_edit_organization_settings(ORG, SDR).await.unwrap();

    let members = client
        .read_relationships(
            RelationshipFilter::resource_type(schema::definition::ORGANIZATION)
                .with_resource_id(ORG)
                .with_subject(schema::definition::MEMBER, Some(SDR)),
        )
        .await
        .unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].to_string(), "organization:rift#admin@member:bob");

    // And demote again
    client.write_organization_sdr(ORG, SDR).await.unwrap();
    assert_denied(client.can_edit_organization_settings(ORG, SDR).await);
    client.can_view_organization_settings(ORG, SDR).await.unwrap();
}

#[tokio::test]
async fn test_deleting_roles_revokes_access() {
    let client = seeded_client().await;

    client.delete_organization_sdr(ORG, SDR).await.unwrap();
    assert_denied(client.can_access_organization(ORG, SDR).await);

    client.delete_organization_admin(ORG, ADMIN).await.unwrap();
    assert_denied(client.can_access_organization(ORG, ADMIN).await);

    client.delete_organization_apikey(ORG, "key").await.unwrap();
    assert_denied(client.can_use_organization_apikey(ORG, "key").await);

    // Deleting twice is harmless
    client.delete_organization_sdr(ORG, SDR).await.unwrap();
}

// ============================================================================
// Off-days
// ============================================================================

#[tokio::test]
async fn test_offday_permissions() {
    let client = seeded_client().await;

    assert_denied(client.can_edit_offday(OFFDAY, SDR).await);
    assert!(client.list_edit_offdays(SDR).await.unwrap().is_empty());
    client.can_edit_offday(OFFDAY, ADMIN).await.unwrap();
    assert_eq!(client.list_edit_offdays(ADMIN).await.unwrap(), vec![OFFDAY.to_string()]);

    client.can_view_offday(OFFDAY, SDR).await.unwrap();
    client.can_view_offday(OFFDAY, ADMIN).await.unwrap();
    assert_eq!(client.list_view_offdays(SDR).await.unwrap(), vec![OFFDAY.to_string()]);
    assert_eq!(client.list_view_offdays(ADMIN).await.unwrap(), vec![OFFDAY.to_string()]);

    assert_denied(client.can_delete_offday(OFFDAY, SDR).await);
    client.can_delete_offday(OFFDAY, ADMIN).await.unwrap();
    assert_eq!(client.list_delete_offdays(ADMIN).await.unwrap(), vec![OFFDAY.to_string()]);
}

#[tokio::test]
async fn test_offday_lookup() {
    let client = seeded_client().await;

    let off_days = client.off_days(SDR).await.unwrap();
    assert_eq!(off_days.len(), 1);
    assert_eq!(
        off_days[OFFDAY],
        OffDay {
            id: OFFDAY.to_string(),
            view: true,
            edit: false,
            delete: false,
        }
    );

    let off_days = client.off_days(ADMIN).await.unwrap();
    assert_eq!(
        off_days[OFFDAY],
        OffDay {
            id: OFFDAY.to_string(),
            view: true,
            edit: true,
            delete: true,
        }
    );

    client.delete_offday_organization(OFFDAY, ORG).await.unwrap();
    assert!(client.off_days(ADMIN).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_checks_require_schema() {
    let client = AuthzClient::new(Arc::new(InMemoryBackend::new()));

    let err = client.can_view_offday(OFFDAY, SDR).await.unwrap_err();
    assert!(matches!(err, AuthzError::SchemaMissing));
}
