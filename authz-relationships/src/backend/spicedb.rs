//! SpiceDB-backed relationship backend
//!
//! Talks to the SpiceDB HTTP gateway:
//! - Bearer authentication with the preshared key
//! - Per-request timeout so a stalled backend cannot wedge a sync run
//! - Streaming endpoints (read, lookup) decoded from newline-delimited JSON

use crate::{backend::RelationshipBackend, error::AuthzError, models::*};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Connection settings for the SpiceDB HTTP gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpiceDbConfig {
    /// Base URL, e.g. `http://localhost:8443`
    pub endpoint: String,
    pub preshared_key: String,
    pub timeout: Duration,
}

impl Default for SpiceDbConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8443".to_string(),
            preshared_key: String::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

pub struct SpiceDbBackend {
    http: reqwest::Client,
    endpoint: String,
    preshared_key: String,
}

impl SpiceDbBackend {
    pub fn new(config: SpiceDbConfig) -> Result<Self, AuthzError> {
        if config.preshared_key.is_empty() {
            return Err(AuthzError::Config("SpiceDB preshared key is empty".to_string()));
        }

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AuthzError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            preshared_key: config.preshared_key,
        })
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<reqwest::Response, AuthzError> {
        let response = self
            .http
            .post(format!("{}{}", self.endpoint, path))
            .bearer_auth(&self.preshared_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<wire::ErrorBody>(&text)
            .map(|body| body.message)
            .unwrap_or(text);
        Err(AuthzError::Backend {
            status: status.as_u16(),
            message,
        })
    }

    async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, AuthzError> {
        let response = self.post(path, body).await?;
        Ok(response.json::<R>().await?)
    }

    /// Collect every `result` frame of a streaming endpoint
    async fn post_stream<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Vec<R>, AuthzError> {
        let text = self.post(path, body).await?.text().await?;

        let mut results = Vec::new();
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            let frame: wire::StreamFrame<R> = serde_json::from_str(line)?;
            if let Some(error) = frame.error {
                return Err(AuthzError::Stream {
                    code: error.code,
                    message: error.message,
                });
            }
            if let Some(result) = frame.result {
                results.push(result);
            }
        }
        Ok(results)
    }
}

#[async_trait]
impl RelationshipBackend for SpiceDbBackend {
    async fn write_relationships(&self, updates: Vec<RelationshipUpdate>) -> Result<(), AuthzError> {
        debug!("Writing {} relationship updates", updates.len());
        let body = wire::WriteRelationshipsBody {
            updates: updates.iter().map(wire::Update::from).collect(),
        };
        let _: wire::WriteRelationshipsResponse = self.post_json("/v1/relationships/write", &body).await?;
        Ok(())
    }

    async fn delete_relationships(&self, filter: RelationshipFilter) -> Result<(), AuthzError> {
        info!("Deleting all relationships of type {}", filter.resource_type);
        let body = wire::DeleteRelationshipsBody {
            relationship_filter: wire::Filter::from(&filter),
        };
        let _: wire::DeleteRelationshipsResponse = self.post_json("/v1/relationships/delete", &body).await?;
        Ok(())
    }

    async fn read_relationships(
        &self,
        filter: RelationshipFilter,
        consistency: Consistency,
    ) -> Result<Vec<Relationship>, AuthzError> {
        let body = wire::ReadRelationshipsBody {
            consistency: wire::Consistency::from(consistency),
            relationship_filter: wire::Filter::from(&filter),
        };
        let results: Vec<wire::ReadResult> = self.post_stream("/v1/relationships/read", &body).await?;
        Ok(results.into_iter().map(|r| r.relationship.into()).collect())
    }

    async fn check_permission(&self, request: CheckRequest) -> Result<Permissionship, AuthzError> {
        let body = wire::CheckPermissionBody {
            consistency: wire::Consistency::from(request.consistency),
            resource: wire::ObjectReference::from(&request.resource),
            permission: request.permission.clone(),
            subject: wire::SubjectReference::from(&request.subject),
            context: request.context.clone(),
        };
        let response: wire::CheckPermissionResponse = self.post_json("/v1/permissions/check", &body).await?;
        response.permissionship()
    }

    async fn lookup_resources(&self, request: LookupResourcesRequest) -> Result<Vec<String>, AuthzError> {
        let body = wire::LookupResourcesBody {
            consistency: wire::Consistency::from(request.consistency),
            resource_object_type: request.resource_type.clone(),
            permission: request.permission.clone(),
            subject: wire::SubjectReference::from(&request.subject),
            context: request.context.clone(),
        };
        let results: Vec<wire::LookupResult> = self.post_stream("/v1/permissions/resources", &body).await?;
        Ok(results.into_iter().map(|r| r.resource_object_id).collect())
    }

    async fn write_schema(&self, schema: &str) -> Result<(), AuthzError> {
        info!("Writing backend schema");
        let body = wire::WriteSchemaBody { schema };
        let _: serde_json::Value = self.post_json("/v1/schema/write", &body).await?;
        Ok(())
    }
}

/// JSON shapes of the HTTP gateway
mod wire {
    use crate::error::AuthzError;
    use crate::models;
    use serde::{Deserialize, Serialize};

    type Context = serde_json::Map<String, serde_json::Value>;

    #[derive(Debug, Deserialize)]
    pub struct ErrorBody {
        #[serde(default)]
        pub code: i32,
        #[serde(default)]
        pub message: String,
    }

    #[derive(Debug, Deserialize)]
    pub struct StreamFrame<R> {
        pub result: Option<R>,
        pub error: Option<ErrorBody>,
    }

    #[derive(Debug, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ObjectReference {
        pub object_type: String,
        pub object_id: String,
    }

    impl From<&models::ObjectRef> for ObjectReference {
        fn from(object: &models::ObjectRef) -> Self {
            Self {
                object_type: object.object_type.clone(),
                object_id: object.object_id.clone(),
            }
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SubjectReference {
        pub object: ObjectReference,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        pub optional_relation: String,
    }

    impl From<&models::SubjectRef> for SubjectReference {
        fn from(subject: &models::SubjectRef) -> Self {
            Self {
                object: ObjectReference::from(&subject.object),
                optional_relation: subject.relation.clone().unwrap_or_default(),
            }
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ContextualizedCaveat {
        pub caveat_name: String,
        #[serde(default)]
        pub context: Context,
    }

    #[derive(Debug, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Relationship {
        pub resource: ObjectReference,
        pub relation: String,
        pub subject: SubjectReference,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub optional_caveat: Option<ContextualizedCaveat>,
    }

    impl From<&models::Relationship> for Relationship {
        fn from(rel: &models::Relationship) -> Self {
            Self {
                resource: ObjectReference::from(&rel.resource),
                relation: rel.relation.clone(),
                subject: SubjectReference::from(&rel.subject),
                optional_caveat: rel.caveat.as_ref().map(|c| ContextualizedCaveat {
                    caveat_name: c.name.clone(),
                    context: c.context.clone(),
                }),
            }
        }
    }

    impl From<Relationship> for models::Relationship {
        fn from(rel: Relationship) -> Self {
            Self {
                resource: models::ObjectRef {
                    object_type: rel.resource.object_type,
                    object_id: rel.resource.object_id,
                },
                relation: rel.relation,
                subject: models::SubjectRef {
                    object: models::ObjectRef {
                        object_type: rel.subject.object.object_type,
                        object_id: rel.subject.object.object_id,
                    },
                    relation: Some(rel.subject.optional_relation).filter(|r| !r.is_empty()),
                },
                caveat: rel.optional_caveat.map(|c| models::Caveat {
                    name: c.caveat_name,
                    context: c.context,
                }),
            }
        }
    }

    #[derive(Debug, Serialize)]
    pub struct Update {
        pub operation: &'static str,
        pub relationship: Relationship,
    }

    impl From<&models::RelationshipUpdate> for Update {
        fn from(update: &models::RelationshipUpdate) -> Self {
            Self {
                operation: match update.operation {
                    models::Operation::Touch => "OPERATION_TOUCH",
                    models::Operation::Delete => "OPERATION_DELETE",
                },
                relationship: Relationship::from(&update.relationship),
            }
        }
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct SubjectFilter {
        pub subject_type: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        pub optional_subject_id: String,
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct Filter {
        pub resource_type: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        pub optional_resource_id: String,
        #[serde(skip_serializing_if = "String::is_empty")]
        pub optional_relation: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub optional_subject_filter: Option<SubjectFilter>,
    }

    impl From<&models::RelationshipFilter> for Filter {
        fn from(filter: &models::RelationshipFilter) -> Self {
            Self {
                resource_type: filter.resource_type.clone(),
                optional_resource_id: filter.resource_id.clone().unwrap_or_default(),
                optional_relation: filter.relation.clone().unwrap_or_default(),
                optional_subject_filter: filter.subject_type.as_ref().map(|subject_type| SubjectFilter {
                    subject_type: subject_type.clone(),
                    optional_subject_id: filter.subject_id.clone().unwrap_or_default(),
                }),
            }
        }
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub enum Consistency {
        FullyConsistent(bool),
        MinimizeLatency(bool),
    }

    impl From<models::Consistency> for Consistency {
        fn from(consistency: models::Consistency) -> Self {
            match consistency {
                models::Consistency::FullyConsistent => Consistency::FullyConsistent(true),
                models::Consistency::MinimizeLatency => Consistency::MinimizeLatency(true),
            }
        }
    }

    #[derive(Debug, Deserialize)]
    pub struct ZedToken {
        #[allow(dead_code)]
        pub token: String,
    }

    #[derive(Debug, Serialize)]
    pub struct WriteRelationshipsBody {
        pub updates: Vec<Update>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct WriteRelationshipsResponse {
        #[allow(dead_code)]
        pub written_at: Option<ZedToken>,
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct DeleteRelationshipsBody {
        pub relationship_filter: Filter,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct DeleteRelationshipsResponse {
        #[allow(dead_code)]
        pub deleted_at: Option<ZedToken>,
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ReadRelationshipsBody {
        pub consistency: Consistency,
        pub relationship_filter: Filter,
    }

    #[derive(Debug, Deserialize)]
    pub struct ReadResult {
        pub relationship: Relationship,
    }

    #[derive(Debug, Serialize)]
    pub struct CheckPermissionBody {
        pub consistency: Consistency,
        pub resource: ObjectReference,
        pub permission: String,
        pub subject: SubjectReference,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub context: Option<Context>,
    }

    #[derive(Debug, Deserialize)]
    pub struct CheckPermissionResponse {
        pub permissionship: String,
    }

    impl CheckPermissionResponse {
        pub fn permissionship(&self) -> Result<models::Permissionship, AuthzError> {
            match self.permissionship.as_str() {
                "PERMISSIONSHIP_HAS_PERMISSION" => Ok(models::Permissionship::HasPermission),
                "PERMISSIONSHIP_NO_PERMISSION" => Ok(models::Permissionship::NoPermission),
                "PERMISSIONSHIP_CONDITIONAL_PERMISSION" => Ok(models::Permissionship::ConditionalPermission),
                other => Err(AuthzError::Decode(format!("unexpected permissionship '{}'", other))),
            }
        }
    }

    #[derive(Debug, Serialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LookupResourcesBody {
        pub consistency: Consistency,
        pub resource_object_type: String,
        pub permission: String,
        pub subject: SubjectReference,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub context: Option<Context>,
    }

    #[derive(Debug, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct LookupResult {
        pub resource_object_id: String,
    }

    #[derive(Debug, Serialize)]
    pub struct WriteSchemaBody<'a> {
        pub schema: &'a str,
    }
}
