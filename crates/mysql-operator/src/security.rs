//! SQL injection prevention for statements sent to the MySQL backend.
//!
//! Catalog lookups use bound parameters. DDL and account management
//! statements cannot be parameterized in MySQL, so every name that ends up in
//! statement text goes through one of these helpers first:
//! - schema names are validated and backtick-quoted
//! - character sets and collations must match a strict allow pattern
//! - account names and passwords are escaped as single-quoted literals
//! - privileges must come from a fixed keyword list

use crate::error::{OperatorError, Result};

/// Maximum length of a MySQL schema name
pub const MAX_SCHEMA_NAME_LEN: usize = 64;

/// Maximum length of a MySQL user name
pub const MAX_USER_NAME_LEN: usize = 32;

/// Maximum length of a MySQL account host
pub const MAX_HOST_LEN: usize = 255;

/// Privileges that may be granted at database level (`db.*`)
pub const DATABASE_PRIVILEGES: &[&str] = &[
    "ALL PRIVILEGES",
    "ALTER",
    "ALTER ROUTINE",
    "CREATE",
    "CREATE ROUTINE",
    "CREATE TEMPORARY TABLES",
    "CREATE VIEW",
    "DELETE",
    "DROP",
    "EVENT",
    "EXECUTE",
    "GRANT OPTION",
    "INDEX",
    "INSERT",
    "LOCK TABLES",
    "REFERENCES",
    "SELECT",
    "SHOW VIEW",
    "TRIGGER",
    "UPDATE",
];

/// Validate a schema name.
///
/// Kubernetes names may contain `-` and `.`, which MySQL accepts inside a
/// quoted identifier, so the rule is looser than a bare SQL identifier:
/// 1-64 characters, ASCII alphanumerics plus `_`, `-`, `.` and `$`.
///
/// ```
/// use mysql_operator::security::validate_schema_name;
///
/// assert!(validate_schema_name("orders").is_ok());
/// assert!(validate_schema_name("orders-prod").is_ok());
/// assert!(validate_schema_name("x`; DROP DATABASE mysql; --").is_err());
/// ```
pub fn validate_schema_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(OperatorError::ValidationError(
            "database name cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_SCHEMA_NAME_LEN {
        return Err(OperatorError::ValidationError(format!(
            "database name too long: {} chars (max {})",
            name.len(),
            MAX_SCHEMA_NAME_LEN
        )));
    }

    for c in name.chars() {
        if !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '$')) {
            return Err(OperatorError::ValidationError(format!(
                "Invalid database name '{}': contains invalid character '{}'",
                name, c
            )));
        }
    }

    Ok(())
}

/// Quote a schema name as a MySQL identifier.
///
/// ```
/// use mysql_operator::security::quote_identifier;
///
/// assert_eq!(quote_identifier("orders"), "`orders`");
/// assert_eq!(quote_identifier("a`b"), "`a``b`");
/// ```
pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Validate a character set or collation name (`utf8mb4`, `utf8mb4_0900_ai_ci`).
pub fn validate_charset_name(kind: &str, value: &str) -> Result<()> {
    if value.is_empty() || value.len() > 64 {
        return Err(OperatorError::ValidationError(format!(
            "{} must be 1-64 characters",
            kind
        )));
    }

    if !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(OperatorError::ValidationError(format!(
            "Invalid {} '{}': only letters, digits and underscores are allowed",
            kind, value
        )));
    }

    Ok(())
}

/// Validate the user part of a MySQL account name.
pub fn validate_user_name(user: &str) -> Result<()> {
    if user.is_empty() {
        return Err(OperatorError::ValidationError(
            "user name cannot be empty".to_string(),
        ));
    }

    if user.chars().count() > MAX_USER_NAME_LEN {
        return Err(OperatorError::ValidationError(format!(
            "user name too long: {} chars (max {})",
            user.chars().count(),
            MAX_USER_NAME_LEN
        )));
    }

    if user.chars().any(|c| c.is_control()) {
        return Err(OperatorError::ValidationError(
            "user name contains control characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate the host part of a MySQL account name.
///
/// Accepts host names, IP addresses, netmasks and the `%`/`_` wildcards.
pub fn validate_account_host(host: &str) -> Result<()> {
    if host.is_empty() || host.len() > MAX_HOST_LEN {
        return Err(OperatorError::ValidationError(format!(
            "host must be 1-{} characters",
            MAX_HOST_LEN
        )));
    }

    for c in host.chars() {
        if !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '%' | ':' | '/')) {
            return Err(OperatorError::ValidationError(format!(
                "Invalid host '{}': contains invalid character '{}'",
                host, c
            )));
        }
    }

    Ok(())
}

/// Escape a value for a single-quoted MySQL string literal.
///
/// Backslashes are escaped as well as quotes; the connector clears
/// `NO_BACKSLASH_ESCAPES` for its session so this escaping is unambiguous.
///
/// ```
/// use mysql_operator::security::escape_string_literal;
///
/// assert_eq!(escape_string_literal("app"), "app");
/// assert_eq!(escape_string_literal("o'brien"), "o''brien");
/// assert_eq!(escape_string_literal(r"a\"), r"a\\");
/// ```
pub fn escape_string_literal(value: &str) -> String {
    if !value.contains(['\'', '\\', '\0']) {
        return value.to_string();
    }

    let mut escaped = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        match c {
            '\'' => escaped.push_str("''"),
            '\\' => escaped.push_str("\\\\"),
            '\0' => escaped.push_str("\\0"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Normalize one privilege keyword and check it against [`DATABASE_PRIVILEGES`].
///
/// Case and inner whitespace are ignored and `ALL` is an alias of
/// `ALL PRIVILEGES`.
///
/// ```
/// use mysql_operator::security::normalize_privilege;
///
/// assert_eq!(normalize_privilege(" select ").unwrap(), "SELECT");
/// assert_eq!(normalize_privilege("all").unwrap(), "ALL PRIVILEGES");
/// assert!(normalize_privilege("SELECT; DROP TABLE x").is_err());
/// ```
pub fn normalize_privilege(privilege: &str) -> Result<String> {
    let normalized = privilege
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_uppercase();

    let normalized = if normalized == "ALL" {
        "ALL PRIVILEGES".to_string()
    } else {
        normalized
    };

    if DATABASE_PRIVILEGES.contains(&normalized.as_str()) {
        Ok(normalized)
    } else {
        Err(OperatorError::ValidationError(format!(
            "Unsupported privilege '{}'",
            privilege.trim()
        )))
    }
}
