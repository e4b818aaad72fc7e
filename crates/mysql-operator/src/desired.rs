//! Desired state snapshot taken from a `Mysql` resource at the start of a pass

use crate::crd::{Mysql, SecretReference};
use crate::error::{OperatorError, Result};
use crate::grants::PrivilegeSet;
use crate::secrets::SecretKey;
use crate::security::validate_schema_name;
use kube::ResourceExt;
use std::fmt;
use validator::Validate;

/// Identity of a resource: namespace and name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Identity of a fetched resource
    pub fn of(resource: &Mysql) -> Self {
        Self::new(
            resource.namespace().unwrap_or_else(|| "default".to_string()),
            resource.name_any(),
        )
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Host and port of the MySQL server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEndpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for BackendEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Validated desired state for one pass
#[derive(Debug, Clone)]
pub struct DesiredState {
    pub endpoint: BackendEndpoint,
    pub backend_credentials: SecretKey,
    /// Schema name; always the resource name
    pub database_name: String,
    pub character_set: String,
    pub collation: String,
    /// Host part of the managed account
    pub grant_host: String,
    pub user_credentials: SecretKey,
    pub privileges: PrivilegeSet,
}

impl DesiredState {
    /// Validate the resource and take a snapshot of its spec
    pub fn from_resource(resource: &Mysql) -> Result<Self> {
        let id = ResourceId::of(resource);

        if let Err(errors) = resource.spec.validate() {
            return Err(OperatorError::InvalidConfig(format_validation_errors(&errors)));
        }
        validate_schema_name(&id.name)?;

        let spec = &resource.spec;
        Ok(Self {
            endpoint: BackendEndpoint {
                host: spec.backend.host.clone(),
                port: spec.backend.port,
            },
            backend_credentials: secret_key(&id, &spec.backend.credentials),
            database_name: id.name.clone(),
            character_set: spec.database.character_set.clone(),
            collation: spec.database.collation.clone(),
            grant_host: spec.database.host.clone(),
            user_credentials: secret_key(&id, &spec.database.credentials),
            privileges: PrivilegeSet::from_spec(&spec.database.privileges)?,
        })
    }
}

fn secret_key(id: &ResourceId, reference: &SecretReference) -> SecretKey {
    SecretKey {
        namespace: reference
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| id.namespace.clone()),
        name: reference.name.clone(),
    }
}

/// Flatten validator errors into one line, nested fields as `a.b`
fn format_validation_errors(errors: &validator::ValidationErrors) -> String {
    let mut messages = Vec::new();
    collect_validation_errors("", errors, &mut messages);
    messages.sort();
    messages.join("; ")
}

fn collect_validation_errors(
    prefix: &str,
    errors: &validator::ValidationErrors,
    out: &mut Vec<String>,
) {
    use validator::ValidationErrorsKind;

    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{}.{}", prefix, field)
        };
        match kind {
            ValidationErrorsKind::Field(errs) => {
                for e in errs {
                    let message = e
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string());
                    out.push(format!("{}: {}", path, message));
                }
            }
            ValidationErrorsKind::Struct(nested) => collect_validation_errors(&path, nested, out),
            ValidationErrorsKind::List(items) => {
                for (index, nested) in items {
                    collect_validation_errors(&format!("{}[{}]", path, index), nested, out);
                }
            }
        }
    }
}
