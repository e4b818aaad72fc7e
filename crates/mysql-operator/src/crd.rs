//! Custom Resource Definition for the MySQL operator
//!
//! A `Mysql` resource declares one database on a remote MySQL server together
//! with the account that owns it. The resource name is the database name.

use crate::security::{
    normalize_privilege, validate_account_host, validate_charset_name, DATABASE_PRIVILEGES,
};
use kube::CustomResource;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use validator::{Validate, ValidationError};

/// Regex for validating Kubernetes names (RFC 1123 subdomain)
static NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").unwrap()
});

/// Regex for backend host names and IP addresses
static BACKEND_HOST_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9.:\-]*[A-Za-z0-9])?$").unwrap());

/// Validate a Kubernetes object name used as a Secret reference
fn validate_k8s_name(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::new("empty_name").with_message("name is required".into()));
    }
    if value.len() > 253 {
        return Err(
            ValidationError::new("name_too_long").with_message("name exceeds 253 characters".into())
        );
    }
    if !NAME_REGEX.is_match(value) {
        return Err(ValidationError::new("invalid_name").with_message(
            format!("'{}' is not a valid Kubernetes name (RFC 1123)", value).into(),
        ));
    }
    Ok(())
}

fn validate_backend_host(value: &str) -> Result<(), ValidationError> {
    if value.len() > 255 || !BACKEND_HOST_REGEX.is_match(value) {
        return Err(ValidationError::new("invalid_host")
            .with_message(format!("'{}' is not a valid host name or address", value).into()));
    }
    Ok(())
}

fn validate_grant_host(value: &str) -> Result<(), ValidationError> {
    validate_account_host(value).map_err(|e| {
        ValidationError::new("invalid_grant_host").with_message(e.to_string().into())
    })
}

fn validate_character_set(value: &str) -> Result<(), ValidationError> {
    validate_charset_name("characterSet", value).map_err(|e| {
        ValidationError::new("invalid_character_set").with_message(e.to_string().into())
    })
}

fn validate_collation(value: &str) -> Result<(), ValidationError> {
    validate_charset_name("collate", value)
        .map_err(|e| ValidationError::new("invalid_collation").with_message(e.to_string().into()))
}

fn validate_privileges(privileges: &[String]) -> Result<(), ValidationError> {
    if privileges.len() > DATABASE_PRIVILEGES.len() {
        return Err(ValidationError::new("too_many_privileges").with_message(
            format!(
                "at most {} distinct privileges exist",
                DATABASE_PRIVILEGES.len()
            )
            .into(),
        ));
    }
    for privilege in privileges {
        normalize_privilege(privilege).map_err(|e| {
            ValidationError::new("invalid_privilege").with_message(e.to_string().into())
        })?;
    }
    Ok(())
}

/// Mysql custom resource definition
///
/// ```yaml
/// apiVersion: mysql.kdichalas.net/v1alpha1
/// kind: Mysql
/// metadata:
///   name: orders
///   namespace: shop
/// spec:
///   backend:
///     host: mysql.databases.svc.cluster.local
///     port: 3306
///     credentials:
///       name: mysql-admin
///   database:
///     characterSet: utf8mb4
///     collate: utf8mb4_general_ci
///     host: "%"
///     credentials:
///       name: orders-user
///     privileges: ["SELECT", "INSERT"]
/// ```
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[kube(
    group = "mysql.kdichalas.net",
    version = "v1alpha1",
    kind = "Mysql",
    plural = "mysqls",
    shortname = "mysqldb",
    namespaced,
    status = "MysqlStatus",
    printcolumn = r#"{"name":"Backend","type":"string","jsonPath":".spec.backend.host"}"#,
    printcolumn = r#"{"name":"Stage","type":"string","jsonPath":".status.stage"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MysqlSpec {
    /// MySQL server that hosts the database
    #[validate(nested)]
    pub backend: BackendSpec,

    /// Database and owning account
    #[validate(nested)]
    pub database: DatabaseSpec,
}

/// Connection details of the MySQL server
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BackendSpec {
    /// Host name or IP address
    #[validate(custom(function = "validate_backend_host"))]
    pub host: String,

    /// TCP port
    #[serde(default = "default_port")]
    #[validate(range(min = 1, message = "port must be between 1 and 65535"))]
    pub port: u16,

    /// Secret with administrative `user` and `password` keys
    #[validate(nested)]
    pub credentials: SecretReference,
}

/// Desired database and account
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSpec {
    /// Default character set of the database
    #[serde(default = "default_character_set")]
    #[validate(custom(function = "validate_character_set"))]
    pub character_set: String,

    /// Default collation of the database
    #[serde(rename = "collate", default = "default_collation")]
    #[validate(custom(function = "validate_collation"))]
    pub collation: String,

    /// Secret with the owning account's `user` and `password` keys
    #[validate(nested)]
    pub credentials: SecretReference,

    /// Privileges granted on `<database>.*`
    #[serde(default)]
    #[validate(custom(function = "validate_privileges"))]
    pub privileges: Vec<String>,

    /// Host part of the account (`%` matches any client)
    #[serde(default = "default_grant_host")]
    #[validate(custom(function = "validate_grant_host"))]
    pub host: String,
}

/// Reference to a Secret, defaulting to the resource's namespace
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, Validate, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    /// Secret name
    #[validate(custom(function = "validate_k8s_name"))]
    pub name: String,

    /// Secret namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

fn default_port() -> u16 {
    3306
}

fn default_character_set() -> String {
    "utf8mb4".to_string()
}

fn default_collation() -> String {
    "utf8mb4_general_ci".to_string()
}

fn default_grant_host() -> String {
    "%".to_string()
}

/// Observed state of a Mysql resource
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MysqlStatus {
    /// Progress marker, last error message, or `Completed`
    #[serde(default)]
    pub stage: String,
}
