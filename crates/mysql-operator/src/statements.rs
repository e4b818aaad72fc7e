//! SQL text for every statement the operator sends to MySQL
//!
//! Builders validate their inputs before formatting. Catalog lookups are
//! constants used with bound parameters.

use crate::error::Result;
use crate::grants::PrivilegeSet;
use crate::security::{
    escape_string_literal, quote_identifier, validate_account_host, validate_charset_name,
    validate_schema_name, validate_user_name,
};

/// Schema existence lookup, bound to the schema name
pub const SCHEMA_EXISTS_SQL: &str =
    "SELECT SCHEMA_NAME FROM INFORMATION_SCHEMA.SCHEMATA WHERE SCHEMA_NAME = ?";

/// Account existence lookup, bound to user and host
pub const USER_EXISTS_SQL: &str = "SELECT 1 FROM mysql.user WHERE User = ? AND Host = ?";

/// Reload grant tables
pub const FLUSH_PRIVILEGES_SQL: &str = "FLUSH PRIVILEGES";

/// Keep backslash escaping enabled for this session so literal escaping is well defined
pub const SESSION_SQL_MODE_SQL: &str =
    "SET SESSION sql_mode = REPLACE(@@SESSION.sql_mode, 'NO_BACKSLASH_ESCAPES', '')";

/// `'user'@'host'` with both parts escaped
pub fn account(user: &str, host: &str) -> Result<String> {
    validate_user_name(user)?;
    validate_account_host(host)?;
    Ok(format!(
        "'{}'@'{}'",
        escape_string_literal(user),
        escape_string_literal(host)
    ))
}

fn schema_options(name: &str, character_set: &str, collation: &str) -> Result<String> {
    validate_schema_name(name)?;
    validate_charset_name("characterSet", character_set)?;
    validate_charset_name("collate", collation)?;
    Ok(format!(
        "{} CHARACTER SET {} COLLATE {}",
        quote_identifier(name),
        character_set,
        collation
    ))
}

/// `CREATE DATABASE`
pub fn create_database(name: &str, character_set: &str, collation: &str) -> Result<String> {
    Ok(format!(
        "CREATE DATABASE {}",
        schema_options(name, character_set, collation)?
    ))
}

/// `ALTER DATABASE`
pub fn alter_database(name: &str, character_set: &str, collation: &str) -> Result<String> {
    Ok(format!(
        "ALTER DATABASE {}",
        schema_options(name, character_set, collation)?
    ))
}

/// `DROP DATABASE IF EXISTS`
pub fn drop_database(name: &str) -> Result<String> {
    validate_schema_name(name)?;
    Ok(format!("DROP DATABASE IF EXISTS {}", quote_identifier(name)))
}

/// `CREATE USER ... IDENTIFIED BY`
pub fn create_user(user: &str, host: &str, password: &str) -> Result<String> {
    Ok(format!(
        "CREATE USER {} IDENTIFIED BY '{}'",
        account(user, host)?,
        escape_string_literal(password)
    ))
}

/// `ALTER USER ... IDENTIFIED BY`
pub fn alter_user(user: &str, host: &str, password: &str) -> Result<String> {
    Ok(format!(
        "ALTER USER {} IDENTIFIED BY '{}'",
        account(user, host)?,
        escape_string_literal(password)
    ))
}

/// `DROP USER IF EXISTS`
pub fn drop_user(user: &str, host: &str) -> Result<String> {
    Ok(format!("DROP USER IF EXISTS {}", account(user, host)?))
}

/// `SHOW GRANTS FOR`
pub fn show_grants(user: &str, host: &str) -> Result<String> {
    Ok(format!("SHOW GRANTS FOR {}", account(user, host)?))
}

/// `GRANT <privileges> ON db.*`; `None` when there is nothing to grant
pub fn grant(
    database: &str,
    user: &str,
    host: &str,
    privileges: &PrivilegeSet,
) -> Result<Option<String>> {
    validate_schema_name(database)?;
    let account = account(user, host)?;
    if privileges.is_empty() {
        return Ok(None);
    }
    let grant_option = if privileges.with_grant_option() {
        " WITH GRANT OPTION"
    } else {
        ""
    };
    Ok(Some(format!(
        "GRANT {} ON {}.* TO {}{}",
        privileges.to_sql_list(),
        quote_identifier(database),
        account,
        grant_option
    )))
}

/// `REVOKE ALL PRIVILEGES ON db.*`
pub fn revoke_all(database: &str, user: &str, host: &str) -> Result<String> {
    validate_schema_name(database)?;
    Ok(format!(
        "REVOKE ALL PRIVILEGES ON {}.* FROM {}",
        quote_identifier(database),
        account(user, host)?
    ))
}

/// `REVOKE GRANT OPTION ON db.*`, which `REVOKE ALL PRIVILEGES` keeps
pub fn revoke_grant_option(database: &str, user: &str, host: &str) -> Result<String> {
    validate_schema_name(database)?;
    Ok(format!(
        "REVOKE GRANT OPTION ON {}.* FROM {}",
        quote_identifier(database),
        account(user, host)?
    ))
}
