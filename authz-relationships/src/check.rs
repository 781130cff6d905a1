use crate::{
    error::AuthzError,
    models::*,
    schema::{PermissionTerm, Schema},
};
use dashmap::DashMap;
use std::collections::HashSet;
use tracing::debug;

/// Depth at which a check gives up, matching the backend's dispatch limit
const MAX_DEPTH: u32 = 50;

/// Permission checker used by the in-memory backend. Resolves:
/// - Direct relationships
/// - Usersets (`organization:rift#admin` as a subject)
/// - Computed permissions (unions of relations and permissions)
/// - Arrows (`organization->access`)
///
/// Caveats are treated as satisfied.
pub(crate) struct PermissionChecker<'a> {
    schema: &'a Schema,
    relationships: &'a DashMap<String, Relationship>,
}

impl<'a> PermissionChecker<'a> {
    pub fn new(schema: &'a Schema, relationships: &'a DashMap<String, Relationship>) -> Self {
        Self {
            schema,
            relationships,
        }
    }

    /// Check if subject has the permission or relation on the resource
    pub fn check(
        &self,
        resource: &ObjectRef,
        permission: &str,
        subject: &SubjectRef,
    ) -> Result<bool, AuthzError> {
        let definition = self.schema.definitions.get(&resource.object_type).ok_or_else(|| {
            AuthzError::InvalidRelationship(format!("unknown object type '{}'", resource.object_type))
        })?;
        if definition.relation(permission).is_none() && definition.permission(permission).is_none() {
            return Err(AuthzError::InvalidRelationship(format!(
                "'{}' is not a relation or permission of '{}'",
                permission, definition.name
            )));
        }

        let mut visited = HashSet::new();
        self.check_recursive(resource, permission, subject, &mut visited, 0)
    }

    /// Ids of every resource of `resource_type` on which subject has the permission
    pub fn lookup(
        &self,
        resource_type: &str,
        permission: &str,
        subject: &SubjectRef,
    ) -> Result<Vec<String>, AuthzError> {
        let candidates: HashSet<String> = self
            .relationships
            .iter()
            .filter(|entry| entry.value().resource.object_type == resource_type)
            .map(|entry| entry.value().resource.object_id.clone())
            .collect();

        let mut ids = Vec::new();
        for id in candidates {
            if self.check(&ObjectRef::new(resource_type, &id), permission, subject)? {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn check_recursive(
        &self,
        resource: &ObjectRef,
        name: &str,
        subject: &SubjectRef,
        visited: &mut HashSet<String>,
        depth: u32,
    ) -> Result<bool, AuthzError> {
        if depth > MAX_DEPTH {
            return Err(AuthzError::MaxDepthExceeded(format!("{}#{}@{}", resource, name, subject)));
        }

        let check_key = format!("{}#{}", resource, name);
        if !visited.insert(check_key) {
            return Ok(false);
        }

        let Some(definition) = self.schema.definitions.get(&resource.object_type) else {
            return Ok(false);
        };

        if definition.relation(name).is_some() {
            for related in self.subjects_of(resource, name) {
                if related == *subject {
                    debug!("Direct relationship found: {}#{}@{}", resource, name, subject);
                    return Ok(true);
                }

                // A userset subject grants the relation to everyone holding it
                if let Some(ref userset_relation) = related.relation {
                    if self.check_recursive(
                        &related.object,
                        userset_relation,
                        subject,
                        visited,
                        depth + 1,
                    )? {
                        return Ok(true);
                    }
                }
            }
            return Ok(false);
        }

        let Some(permission) = definition.permission(name) else {
            return Ok(false);
        };

        for term in &permission.terms {
            let found = match term {
                PermissionTerm::Computed(computed) => {
                    self.check_recursive(resource, computed, subject, visited, depth + 1)?
                }
                PermissionTerm::Arrow { tupleset, computed } => {
                    let mut found = false;
                    for related in self.subjects_of(resource, tupleset) {
                        if self.check_recursive(&related.object, computed, subject, visited, depth + 1)? {
                            found = true;
                            break;
                        }
                    }
                    found
                }
            };
            if found {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn subjects_of(&self, resource: &ObjectRef, relation: &str) -> Vec<SubjectRef> {
        self.relationships
            .iter()
            .filter(|entry| {
                let rel = entry.value();
                rel.resource == *resource && rel.relation == relation
            })
            .map(|entry| entry.value().subject.clone())
            .collect()
    }
}
