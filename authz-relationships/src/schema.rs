//! Bundled backend schema and the names the code relies on.
//!
//! Every definition, relation and permission referenced from Rust goes
//! through the constants below; the tests make sure they match the bundled
//! schema text, so a rename in one place cannot silently drift.

use crate::{error::AuthzError, models::Relationship};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Schema provisioned into the backend by `migrate_schema`
pub const SCHEMA_V1: &str = include_str!("../schema/v1.zed");

pub mod definition {
    pub const MEMBER: &str = "member";
    pub const APIKEY: &str = "apikey";
    pub const ORGANIZATION: &str = "organization";
    pub const OFFDAY: &str = "offday";
}

pub mod relation {
    pub const ADMIN: &str = "admin";
    pub const SDR: &str = "sdr";
    pub const APIKEY: &str = "apikey";
    pub const ORGANIZATION: &str = "organization";
}

pub mod permission {
    pub const ORGANIZATION_ADMIN: &str = "organization_admin";
    pub const ORGANIZATION_APIKEY: &str = "organization_apikey";
    pub const ACCESS: &str = "access";
    pub const VIEW_SETTINGS: &str = "view_settings";
    pub const EDIT_SETTINGS: &str = "edit_settings";
    pub const INVITE_MEMBER: &str = "invite_member";
    pub const EDIT_MEMBER: &str = "edit_member";
    pub const DELETE_MEMBER: &str = "delete_member";
    pub const CREATE_OFFDAY: &str = "create_offday";
    pub const VIEW: &str = "view";
    pub const EDIT: &str = "edit";
    pub const DELETE: &str = "delete";
}

/// Parsed schema, used by the in-memory backend to validate writes and
/// answer checks. Only unions of relations and arrows are understood.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    pub definitions: HashMap<String, Definition>,
}

/// Definition of an object type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Definition {
    pub name: String,
    pub relations: Vec<RelationDefinition>,
    pub permissions: Vec<PermissionDefinition>,
}

impl Definition {
    pub fn relation(&self, name: &str) -> Option<&RelationDefinition> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn permission(&self, name: &str) -> Option<&PermissionDefinition> {
        self.permissions.iter().find(|p| p.name == name)
    }

    fn has_member(&self, name: &str) -> bool {
        self.relation(name).is_some() || self.permission(name).is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDefinition {
    pub name: String,
    pub allowed_subjects: Vec<AllowedSubject>,
}

/// Subject type accepted by a relation, e.g. `member` or `organization#admin`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowedSubject {
    pub object_type: String,
    pub relation: Option<String>,
}

/// Permission computed as the union of its terms
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionDefinition {
    pub name: String,
    pub terms: Vec<PermissionTerm>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionTerm {
    /// Relation or permission on the same object
    Computed(String),
    /// Follow `tupleset` to its subjects, then evaluate `computed` on them
    Arrow { tupleset: String, computed: String },
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// The bundled schema
    pub fn v1() -> Result<Self, AuthzError> {
        Self::parse(SCHEMA_V1)
    }

    /// Parse schema text. Anything outside definitions, relations and union
    /// permissions is rejected rather than misread.
    pub fn parse(text: &str) -> Result<Self, AuthzError> {
        let mut schema = Schema::new();
        let mut current: Option<Definition> = None;

        for (line_no, raw) in text.lines().enumerate() {
            let line = raw.split("//").next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let at = |msg: String| AuthzError::InvalidSchema(format!("line {}: {}", line_no + 1, msg));

            if let Some(rest) = line.strip_prefix("definition ") {
                if current.is_some() {
                    return Err(at("nested definition".to_string()));
                }
                let (name, body) = rest
                    .split_once('{')
                    .ok_or_else(|| at(format!("expected '{{' after definition in '{}'", line)))?;
                let definition = Definition {
                    name: name.trim().to_string(),
                    relations: Vec::new(),
                    permissions: Vec::new(),
                };
                if body.trim() == "}" {
                    schema.insert(definition).map_err(|e| at(e.to_string()))?;
                } else if body.trim().is_empty() {
                    current = Some(definition);
                } else {
                    return Err(at(format!("unexpected content '{}'", body.trim())));
                }
                continue;
            }

            if line == "}" {
                let definition = current
                    .take()
                    .ok_or_else(|| at("unmatched '}'".to_string()))?;
                schema.insert(definition).map_err(|e| at(e.to_string()))?;
                continue;
            }

            let definition = current
                .as_mut()
                .ok_or_else(|| at(format!("'{}' outside of a definition", line)))?;

            if let Some(rest) = line.strip_prefix("relation ") {
                let (name, subjects) = rest
                    .split_once(':')
                    .ok_or_else(|| at(format!("expected ':' in relation '{}'", line)))?;
                let allowed_subjects = subjects
                    .split('|')
                    .map(|s| {
                        let s = s.trim();
                        match s.split_once('#') {
                            Some((object_type, relation)) => AllowedSubject {
                                object_type: object_type.to_string(),
                                relation: Some(relation.to_string()),
                            },
                            None => AllowedSubject {
                                object_type: s.to_string(),
                                relation: None,
                            },
                        }
                    })
                    .collect();
                definition.relations.push(RelationDefinition {
                    name: name.trim().to_string(),
                    allowed_subjects,
                });
            } else if let Some(rest) = line.strip_prefix("permission ") {
                let (name, expr) = rest
                    .split_once('=')
                    .ok_or_else(|| at(format!("expected '=' in permission '{}'", line)))?;
                if expr.contains(" - ") || expr.contains(" & ") || expr.contains('(') {
                    return Err(at(format!("only unions are supported in '{}'", line)));
                }
                let terms = expr
                    .split('+')
                    .map(|term| {
                        let term = term.trim();
                        match term.split_once("->") {
                            Some((tupleset, computed)) => PermissionTerm::Arrow {
                                tupleset: tupleset.trim().to_string(),
                                computed: computed.trim().to_string(),
                            },
                            None => PermissionTerm::Computed(term.to_string()),
                        }
                    })
                    .collect();
                definition.permissions.push(PermissionDefinition {
                    name: name.trim().to_string(),
                    terms,
                });
            } else {
                return Err(at(format!("unsupported statement '{}'", line)));
            }
        }

        if let Some(definition) = current {
            return Err(AuthzError::InvalidSchema(format!(
                "definition '{}' is not closed",
                definition.name
            )));
        }

        schema.validate()?;
        Ok(schema)
    }

    fn insert(&mut self, definition: Definition) -> Result<(), AuthzError> {
        if self.definitions.contains_key(&definition.name) {
            return Err(AuthzError::InvalidSchema(format!(
                "duplicate definition '{}'",
                definition.name
            )));
        }
        self.definitions.insert(definition.name.clone(), definition);
        Ok(())
    }

    /// Validate that a relationship conforms to the schema
    pub fn validate_relationship(&self, relationship: &Relationship) -> Result<(), AuthzError> {
        let definition = self
            .definitions
            .get(&relationship.resource.object_type)
            .ok_or_else(|| {
                AuthzError::InvalidRelationship(format!(
                    "{}: unknown object type '{}'",
                    relationship, relationship.resource.object_type
                ))
            })?;

        let relation = definition.relation(&relationship.relation).ok_or_else(|| {
            AuthzError::InvalidRelationship(format!(
                "{}: '{}' is not a relation of '{}'",
                relationship, relationship.relation, definition.name
            ))
        })?;

        let allowed = relation.allowed_subjects.iter().any(|s| {
            s.object_type == relationship.subject.object.object_type
                && s.relation == relationship.subject.relation
        });
        if !allowed {
            return Err(AuthzError::InvalidRelationship(format!(
                "{}: subject type not allowed on relation '{}'",
                relationship, relation.name
            )));
        }

        Ok(())
    }

    /// Validate the entire schema is well-formed
    pub fn validate(&self) -> Result<(), AuthzError> {
        for definition in self.definitions.values() {
            let mut seen = Vec::new();
            let names = definition
                .relations
                .iter()
                .map(|r| &r.name)
                .chain(definition.permissions.iter().map(|p| &p.name));
            for name in names {
                if seen.contains(&name) {
                    return Err(AuthzError::InvalidSchema(format!(
                        "'{}' declared twice in '{}'",
                        name, definition.name
                    )));
                }
                seen.push(name);
            }

            for relation in &definition.relations {
                for subject in &relation.allowed_subjects {
                    let target = self.definitions.get(&subject.object_type).ok_or_else(|| {
                        AuthzError::InvalidSchema(format!(
                            "relation '{}#{}' refers to unknown type '{}'",
                            definition.name, relation.name, subject.object_type
                        ))
                    })?;
                    if let Some(ref rel) = subject.relation {
                        if !target.has_member(rel) {
                            return Err(AuthzError::InvalidSchema(format!(
                                "relation '{}#{}' refers to unknown '{}#{}'",
                                definition.name, relation.name, target.name, rel
                            )));
                        }
                    }
                }
            }

            for permission in &definition.permissions {
                for term in &permission.terms {
                    let referenced = match term {
                        PermissionTerm::Computed(name) => name,
                        PermissionTerm::Arrow { tupleset, .. } => {
                            if definition.relation(tupleset).is_none() {
                                return Err(AuthzError::InvalidSchema(format!(
                                    "arrow in '{}#{}' must start from a relation, got '{}'",
                                    definition.name, permission.name, tupleset
                                )));
                            }
                            tupleset
                        }
                    };
                    if !definition.has_member(referenced) {
                        return Err(AuthzError::InvalidSchema(format!(
                            "permission '{}#{}' refers to unknown '{}'",
                            definition.name, permission.name, referenced
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ObjectRef, SubjectRef};

    fn declared(keyword: &str) -> Vec<String> {
        let mut names: Vec<String> = SCHEMA_V1
            .lines()
            .filter_map(|line| line.trim().strip_prefix(keyword))
            .filter_map(|rest| rest.split([' ', ':', '=', '{']).next())
            .map(str::to_string)
            .collect();
        names.sort();
        names.dedup();
        names
    }

    fn sorted(names: &[&str]) -> Vec<String> {
        let mut names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        names.sort();
        names
    }

    #[test]
    fn test_constants_match_schema_text() {
        assert_eq!(
            declared("definition "),
            sorted(&[
                definition::MEMBER,
                definition::APIKEY,
                definition::ORGANIZATION,
                definition::OFFDAY,
            ])
        );
        assert_eq!(
            declared("relation "),
            sorted(&[relation::ADMIN, relation::SDR, relation::APIKEY, relation::ORGANIZATION])
        );
        assert_eq!(
            declared("permission "),
            sorted(&[
                permission::ORGANIZATION_ADMIN,
                permission::ORGANIZATION_APIKEY,
                permission::ACCESS,
                permission::VIEW_SETTINGS,
                permission::EDIT_SETTINGS,
                permission::INVITE_MEMBER,
                permission::EDIT_MEMBER,
                permission::DELETE_MEMBER,
                permission::CREATE_OFFDAY,
                permission::VIEW,
                permission::EDIT,
                permission::DELETE,
            ])
        );
    }

    #[test]
    fn test_parse_bundled_schema() {
        let schema = Schema::v1().unwrap();
        assert_eq!(schema.definitions.len(), 4);

        let offday = &schema.definitions[definition::OFFDAY];
        assert_eq!(
            offday.permission(permission::VIEW).unwrap().terms,
            vec![PermissionTerm::Arrow {
                tupleset: relation::ORGANIZATION.to_string(),
                computed: permission::ACCESS.to_string(),
            }]
        );
    }

    #[test]
    fn test_validate_relationship() {
        let schema = Schema::v1().unwrap();
        let valid = Relationship::new(
            ObjectRef::new(definition::ORGANIZATION, "rift"),
            relation::ADMIN,
            SubjectRef::new(definition::MEMBER, "alice"),
        );
        assert!(schema.validate_relationship(&valid).is_ok());

        let permission_as_relation = Relationship::new(
            ObjectRef::new(definition::ORGANIZATION, "rift"),
            permission::ACCESS,
            SubjectRef::new(definition::MEMBER, "alice"),
        );
        assert!(schema.validate_relationship(&permission_as_relation).is_err());

        let wrong_subject = Relationship::new(
            ObjectRef::new(definition::OFFDAY, "o1"),
            relation::ORGANIZATION,
            SubjectRef::new(definition::MEMBER, "alice"),
        );
        assert!(schema.validate_relationship(&wrong_subject).is_err());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Schema::parse("definition a {\n relation b: missing\n}").is_err());
        assert!(Schema::parse("definition a {\n permission p = q\n}").is_err());
        assert!(Schema::parse("definition a {\n relation r: a\n permission p = r - r\n}").is_err());
        assert!(Schema::parse("definition a {\n relation r: a\n").is_err());
        assert!(Schema::parse("definition a {}\ndefinition a {}").is_err());
    }
}
