use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to an object (resource) in the authorization backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub object_type: String,
    pub object_id: String,
}

impl ObjectRef {
    pub fn new(object_type: &str, object_id: &str) -> Self {
        Self {
            object_type: object_type.to_string(),
            object_id: object_id.to_string(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.object_type, self.object_id)
    }
}

/// Represents a subject: an object, optionally narrowed to a relation on it
/// (a userset such as `organization:rift#admin`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectRef {
    pub object: ObjectRef,
    pub relation: Option<String>,
}

impl SubjectRef {
    pub fn new(object_type: &str, object_id: &str) -> Self {
        Self {
            object: ObjectRef::new(object_type, object_id),
            relation: None,
        }
    }

    pub fn userset(object_type: &str, object_id: &str, relation: &str) -> Self {
        Self {
            object: ObjectRef::new(object_type, object_id),
            relation: Some(relation.to_string()),
        }
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.relation {
            Some(ref relation) => write!(f, "{}#{}", self.object, relation),
            None => write!(f, "{}", self.object),
        }
    }
}

/// Named caveat with its stored context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caveat {
    pub name: String,
    pub context: serde_json::Map<String, serde_json::Value>,
}

impl fmt::Display for Caveat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            return write!(f, "[{}]", self.name);
        }
        let context = serde_json::Value::Object(self.context.clone());
        write!(f, "[{}:{}]", self.name, context)
    }
}

/// A relationship tuple: subject has relation to resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub resource: ObjectRef,
    pub relation: String,
    pub subject: SubjectRef,
    pub caveat: Option<Caveat>,
}

impl Relationship {
    pub fn new(resource: ObjectRef, relation: &str, subject: SubjectRef) -> Self {
        Self {
            resource,
            relation: relation.to_string(),
            subject,
            caveat: None,
        }
    }

    pub fn with_caveat(mut self, caveat: Caveat) -> Self {
        self.caveat = Some(caveat);
        self
    }

    /// Identity of the tuple as the backend sees it. The caveat is not part
    /// of it: writing the same tuple with another caveat replaces it.
    pub fn key(&self) -> String {
        format!("{}#{}@{}", self.resource, self.relation, self.subject)
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())?;
        if let Some(ref caveat) = self.caveat {
            write!(f, "{}", caveat)?;
        }
        Ok(())
    }
}

/// Operation applied to a single relationship within a write call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Create the relationship, or leave it as is when it already exists
    Touch,
    /// Remove the relationship; a no-op when it does not exist
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipUpdate {
    pub operation: Operation,
    pub relationship: Relationship,
}

impl RelationshipUpdate {
    pub fn touch(relationship: Relationship) -> Self {
        Self {
            operation: Operation::Touch,
            relationship,
        }
    }

    pub fn delete(relationship: Relationship) -> Self {
        Self {
            operation: Operation::Delete,
            relationship,
        }
    }
}

/// Filter selecting relationships by resource type and optional narrower fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipFilter {
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub relation: Option<String>,
    pub subject_type: Option<String>,
    pub subject_id: Option<String>,
}

impl RelationshipFilter {
    pub fn resource_type(resource_type: &str) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            ..Default::default()
        }
    }

    pub fn with_resource_id(mut self, resource_id: &str) -> Self {
        self.resource_id = Some(resource_id.to_string());
        self
    }

    pub fn with_relation(mut self, relation: &str) -> Self {
        self.relation = Some(relation.to_string());
        self
    }

    pub fn with_subject(mut self, subject_type: &str, subject_id: Option<&str>) -> Self {
        self.subject_type = Some(subject_type.to_string());
        self.subject_id = subject_id.map(str::to_string);
        self
    }

    pub fn matches(&self, relationship: &Relationship) -> bool {
        if relationship.resource.object_type != self.resource_type {
            return false;
        }
        if let Some(ref id) = self.resource_id {
            if &relationship.resource.object_id != id {
                return false;
            }
        }
        if let Some(ref relation) = self.relation {
            if &relationship.relation != relation {
                return false;
            }
        }
        if let Some(ref subject_type) = self.subject_type {
            if &relationship.subject.object.object_type != subject_type {
                return false;
            }
        }
        if let Some(ref subject_id) = self.subject_id {
            if &relationship.subject.object.object_id != subject_id {
                return false;
            }
        }
        true
    }
}

/// Read consistency requested from the backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Consistency {
    /// Reflects every write committed before the request. Slower, never stale.
    #[default]
    FullyConsistent,
    /// Whatever the backend has cached
    MinimizeLatency,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Permissionship {
    HasPermission,
    NoPermission,
    /// Depends on caveat context that was not supplied
    ConditionalPermission,
}

/// Single-object permission check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRequest {
    pub resource: ObjectRef,
    pub permission: String,
    pub subject: SubjectRef,
    pub consistency: Consistency,
    pub context: Option<serde_json::Map<String, serde_json::Value>>,
}

impl CheckRequest {
    pub fn new(resource: ObjectRef, permission: &str, subject: SubjectRef) -> Self {
        Self {
            resource,
            permission: permission.to_string(),
            subject,
            consistency: Consistency::FullyConsistent,
            context: None,
        }
    }
}

impl fmt::Display for CheckRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.resource, self.permission, self.subject)
    }
}

/// Lists ids of resources of one type on which the subject has a permission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupResourcesRequest {
    pub resource_type: String,
    pub permission: String,
    pub subject: SubjectRef,
    pub consistency: Consistency,
    pub context: Option<serde_json::Map<String, serde_json::Value>>,
}

impl LookupResourcesRequest {
    pub fn new(resource_type: &str, permission: &str, subject: SubjectRef) -> Self {
        Self {
            resource_type: resource_type.to_string(),
            permission: permission.to_string(),
            subject,
            consistency: Consistency::FullyConsistent,
            context: None,
        }
    }
}

impl fmt::Display for LookupResourcesRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:*#{}@{}", self.resource_type, self.permission, self.subject)
    }
}
