//! Credential resolution from Kubernetes Secrets
//!
//! Credentials are looked up on every pass and never cached, so a rotated
//! Secret is picked up by the next reconciliation.

use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::Client;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use tracing::debug;

/// Secret key holding the user name
pub const USER_KEY: &str = "user";

/// Secret key holding the password
pub const PASSWORD_KEY: &str = "password";

/// A fully resolved Secret location
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SecretKey {
    pub namespace: String,
    pub name: String,
}

impl fmt::Display for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Username/password pair read from a Secret
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// Password in clear text; only for building statements and connection options
    pub fn expose_password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Lookup of credentials by Secret location
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// `Ok(None)` when the Secret does not exist
    async fn resolve(&self, key: &SecretKey) -> Result<Option<Credentials>>;
}

/// [`CredentialStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct SecretCredentialStore {
    client: Client,
}

impl SecretCredentialStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CredentialStore for SecretCredentialStore {
    async fn resolve(&self, key: &SecretKey) -> Result<Option<Credentials>> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &key.namespace);

        debug!(secret = %key, "Fetching credentials");

        match secrets.get_opt(&key.name).await? {
            Some(secret) => credentials_from_secret(key, &secret).map(Some),
            None => Ok(None),
        }
    }
}

/// Extract the `user` and `password` keys of a Secret
pub fn credentials_from_secret(key: &SecretKey, secret: &Secret) -> Result<Credentials> {
    let field = |name: &str| -> Result<String> {
        if let Some(value) = secret.data.as_ref().and_then(|d| d.get(name)) {
            return String::from_utf8(value.0.clone()).map_err(|_| {
                OperatorError::InvalidConfig(format!(
                    "Secret {} key '{}' is not valid UTF-8",
                    key, name
                ))
            });
        }
        if let Some(value) = secret.string_data.as_ref().and_then(|d| d.get(name)) {
            return Ok(value.clone());
        }
        Err(OperatorError::InvalidConfig(format!(
            "Secret {} is missing key '{}'",
            key, name
        )))
    };

    let username = field(USER_KEY)?;
    if username.is_empty() {
        return Err(OperatorError::InvalidConfig(format!(
            "Secret {} has an empty '{}'",
            key, USER_KEY
        )));
    }

    Ok(Credentials::new(username, field(PASSWORD_KEY)?))
}
