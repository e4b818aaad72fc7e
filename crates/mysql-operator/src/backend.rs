//! MySQL backend access
//!
//! [`Backend`] is the set of administrative operations the synchronizers
//! need; [`Connector`] opens one [`Backend`] handle per reconcile pass.
//! [`MysqlConnector`] and [`MysqlBackend`] implement them on top of
//! `mysql_async`.

use crate::desired::BackendEndpoint;
use crate::error::{OperatorError, Result};
use crate::grants::PrivilegeSet;
use crate::secrets::Credentials;
use crate::statements;
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, OptsBuilder};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Default connection timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a single statement
const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Schema the administrative connection is opened against; the managed
/// schema may not exist yet
const ADMIN_SCHEMA: &str = "information_schema";

/// Administrative operations on one MySQL server
#[async_trait]
pub trait Backend: Send + Sync {
    /// Whether a schema with exactly this name exists
    async fn schema_exists(&self, name: &str) -> Result<bool>;

    /// Create a schema with the given defaults
    async fn create_schema(&self, name: &str, character_set: &str, collation: &str) -> Result<()>;

    /// Re-apply character set and collation to an existing schema
    async fn alter_schema(&self, name: &str, character_set: &str, collation: &str) -> Result<()>;

    /// Drop the schema; an absent schema is not an error
    async fn drop_schema(&self, name: &str) -> Result<()>;

    /// Whether the account `user@host` exists
    async fn user_exists(&self, user: &str, host: &str) -> Result<bool>;

    async fn create_user(&self, user: &str, host: &str, password: &str) -> Result<()>;

    async fn alter_user_password(&self, user: &str, host: &str, password: &str) -> Result<()>;

    /// Raw `SHOW GRANTS` lines for the account
    async fn show_grants(&self, user: &str, host: &str) -> Result<Vec<String>>;

    /// Grant privileges on `database.*`; an empty set grants nothing
    async fn grant(
        &self,
        database: &str,
        user: &str,
        host: &str,
        privileges: &PrivilegeSet,
    ) -> Result<()>;

    /// Revoke every privilege on `database.*` except `GRANT OPTION`
    async fn revoke_all(&self, database: &str, user: &str, host: &str) -> Result<()>;

    async fn revoke_grant_option(&self, database: &str, user: &str, host: &str) -> Result<()>;

    /// Drop the account; an absent account is not an error
    async fn drop_user(&self, user: &str, host: &str) -> Result<()>;

    async fn flush_privileges(&self) -> Result<()>;

    /// Release the connection; calling it twice is harmless
    async fn close(&self) -> Result<()>;
}

/// Opens backend handles
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &BackendEndpoint,
        credentials: &Credentials,
    ) -> Result<Box<dyn Backend>>;
}

/// Timeouts for backend access
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Timeout for each statement
    pub statement_timeout: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
        }
    }
}

/// [`Connector`] for real MySQL servers
#[derive(Debug, Clone, Default)]
pub struct MysqlConnector {
    config: ConnectorConfig,
}

impl MysqlConnector {
    /// Create a new connector with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new connector with custom configuration
    pub fn with_config(config: ConnectorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Connector for MysqlConnector {
    async fn connect(
        &self,
        endpoint: &BackendEndpoint,
        credentials: &Credentials,
    ) -> Result<Box<dyn Backend>> {
        debug!(endpoint = %endpoint, user = %credentials.username, "Connecting to MySQL");

        let opts = OptsBuilder::default()
            .ip_or_hostname(endpoint.host.clone())
            .tcp_port(endpoint.port)
            .user(Some(credentials.username.clone()))
            .pass(Some(credentials.expose_password().to_string()))
            .db_name(Some(ADMIN_SCHEMA));

        let conn = match timeout(self.config.connect_timeout, Conn::new(opts)).await {
            Ok(Ok(conn)) => conn,
            Ok(Err(e)) => {
                warn!(endpoint = %endpoint, error = %e, "Failed to connect to MySQL");
                return Err(OperatorError::ConnectionFailed(format!(
                    "{}: {}",
                    endpoint, e
                )));
            }
            Err(_) => {
                warn!(endpoint = %endpoint, "Connection to MySQL timed out");
                return Err(OperatorError::Timeout(format!(
                    "connecting to {} after {:?}",
                    endpoint, self.config.connect_timeout
                )));
            }
        };

        let backend = MysqlBackend::new(conn, self.config.statement_timeout);
        backend
            .execute("Configure session", statements::SESSION_SQL_MODE_SQL.to_string())
            .await?;

        info!(endpoint = %endpoint, "Connected to MySQL");
        Ok(Box::new(backend))
    }
}

type ConnFuture<'c, T> = Pin<Box<dyn Future<Output = mysql_async::Result<T>> + Send + 'c>>;

/// One administrative connection
pub struct MysqlBackend {
    conn: Mutex<Option<Conn>>,
    statement_timeout: Duration,
}

impl MysqlBackend {
    /// Wrap an open connection
    pub fn new(conn: Conn, statement_timeout: Duration) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
            statement_timeout,
        }
    }

    /// Take the inner connection
    async fn take_conn(&self) -> Result<Conn> {
        self.conn
            .lock()
            .await
            .take()
            .ok_or_else(|| OperatorError::ConnectionFailed("connection not available".to_string()))
    }

    /// Put back the connection
    async fn put_conn(&self, conn: Conn) {
        *self.conn.lock().await = Some(conn);
    }

    /// Run one operation with the statement timeout applied.
    ///
    /// A timed-out connection is dropped instead of returned, since the
    /// protocol state is unknown.
    async fn run<T, F>(&self, operation: &str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: for<'c> FnOnce(&'c mut Conn) -> ConnFuture<'c, T> + Send,
    {
        let mut conn = self.take_conn().await?;

        match timeout(self.statement_timeout, f(&mut conn)).await {
            Ok(result) => {
                self.put_conn(conn).await;
                result.map_err(|e| OperatorError::backend(operation, e))
            }
            Err(_) => Err(OperatorError::Timeout(format!(
                "{} after {:?}",
                operation, self.statement_timeout
            ))),
        }
    }

    async fn execute(&self, operation: &str, sql: String) -> Result<()> {
        debug!(operation, "Executing statement");
        self.run(operation, move |conn| conn.query_drop(sql)).await
    }
}

#[async_trait]
impl Backend for MysqlBackend {
    async fn schema_exists(&self, name: &str) -> Result<bool> {
        let name = name.to_string();
        let row: Option<String> = self
            .run("Check database", move |conn| {
                conn.exec_first(statements::SCHEMA_EXISTS_SQL, (name,))
            })
            .await?;
        Ok(row.is_some())
    }

    async fn create_schema(&self, name: &str, character_set: &str, collation: &str) -> Result<()> {
        let sql = statements::create_database(name, character_set, collation)?;
        self.execute("Create database", sql).await
    }

    async fn alter_schema(&self, name: &str, character_set: &str, collation: &str) -> Result<()> {
        let sql = statements::alter_database(name, character_set, collation)?;
        self.execute("Alter database", sql).await
    }

    async fn drop_schema(&self, name: &str) -> Result<()> {
        let sql = statements::drop_database(name)?;
        self.execute("Drop database", sql).await
    }

    async fn user_exists(&self, user: &str, host: &str) -> Result<bool> {
        let params = (user.to_string(), host.to_string());
        let row: Option<u8> = self
            .run("Check user", move |conn| {
                conn.exec_first(statements::USER_EXISTS_SQL, params)
            })
            .await?;
        Ok(row.is_some())
    }

    async fn create_user(&self, user: &str, host: &str, password: &str) -> Result<()> {
        let sql = statements::create_user(user, host, password)?;
        self.execute("Create user", sql).await
    }

    async fn alter_user_password(&self, user: &str, host: &str, password: &str) -> Result<()> {
        let sql = statements::alter_user(user, host, password)?;
        self.execute("Alter user", sql).await
    }

    async fn show_grants(&self, user: &str, host: &str) -> Result<Vec<String>> {
        let sql = statements::show_grants(user, host)?;
        self.run("Show grants", move |conn| conn.query(sql)).await
    }

    async fn grant(
        &self,
        database: &str,
        user: &str,
        host: &str,
        privileges: &PrivilegeSet,
    ) -> Result<()> {
        match statements::grant(database, user, host, privileges)? {
            Some(sql) => self.execute("Grant privileges", sql).await,
            None => Ok(()),
        }
    }

    async fn revoke_all(&self, database: &str, user: &str, host: &str) -> Result<()> {
        let sql = statements::revoke_all(database, user, host)?;
        self.execute("Revoke privileges", sql).await
    }

    async fn revoke_grant_option(&self, database: &str, user: &str, host: &str) -> Result<()> {
        let sql = statements::revoke_grant_option(database, user, host)?;
        self.execute("Revoke grant option", sql).await
    }

    async fn drop_user(&self, user: &str, host: &str) -> Result<()> {
        let sql = statements::drop_user(user, host)?;
        self.execute("Drop user", sql).await
    }

    async fn flush_privileges(&self) -> Result<()> {
        self.execute("Flush privileges", statements::FLUSH_PRIVILEGES_SQL.to_string())
            .await
    }

    async fn close(&self) -> Result<()> {
        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn {
            conn.disconnect()
                .await
                .map_err(|e| OperatorError::backend("Close connection", e))?;
            debug!("MySQL connection closed");
        }
        Ok(())
    }
}
