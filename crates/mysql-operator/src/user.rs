//! User synchronization
//!
//! Ensures the owning account exists with the current password and exactly
//! the declared privileges on the managed schema.

use crate::backend::Backend;
use crate::error::Result;
use crate::grants::PrivilegeSet;
use crate::secrets::Credentials;
use tracing::{debug, info};

/// What the synchronizer did to the account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserOutcome {
    /// Account was created and granted
    Created,
    /// Password re-applied; grants already matched
    Unchanged,
    /// Password re-applied and grants replaced
    Regranted,
}

/// Account to synchronize
#[derive(Debug)]
pub struct UserRequest<'a> {
    pub database: &'a str,
    pub credentials: &'a Credentials,
    pub host: &'a str,
    pub privileges: &'a PrivilegeSet,
}

/// Create the account or bring its password and grants up to date
pub async fn sync_user(backend: &dyn Backend, request: &UserRequest<'_>) -> Result<UserOutcome> {
    let user = request.credentials.username.as_str();
    let password = request.credentials.expose_password();

    if !backend.user_exists(user, request.host).await? {
        backend.create_user(user, request.host, password).await?;
        backend
            .grant(request.database, user, request.host, request.privileges)
            .await?;
        backend.flush_privileges().await?;
        info!(
            user = %user,
            host = %request.host,
            privileges = %request.privileges,
            "Created user"
        );
        return Ok(UserOutcome::Created);
    }

    backend.alter_user_password(user, request.host, password).await?;

    let lines = backend.show_grants(user, request.host).await?;
    let current = PrivilegeSet::from_grant_lines(&lines, request.database)?;
    if &current == request.privileges {
        debug!(user = %user, host = %request.host, "Grants up to date");
        return Ok(UserOutcome::Unchanged);
    }

    info!(
        user = %user,
        host = %request.host,
        current = %current,
        desired = %request.privileges,
        "Grants drifted, re-granting"
    );
    // REVOKE fails on an account holding nothing, and it leaves GRANT OPTION
    if current.has_privileges() {
        backend.revoke_all(request.database, user, request.host).await?;
    }
    if current.with_grant_option() {
        backend
            .revoke_grant_option(request.database, user, request.host)
            .await?;
    }
    backend
        .grant(request.database, user, request.host, request.privileges)
        .await?;
    backend.flush_privileges().await?;
    Ok(UserOutcome::Regranted)
}
