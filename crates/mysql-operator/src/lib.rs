//! # MySQL Kubernetes Operator
//!
//! Kubernetes operator that keeps a database and its owning account on a
//! remote MySQL server in line with a `Mysql` custom resource.
//!
//! ## Features
//!
//! - **Custom Resource Definition**: `Mysql` (`mysql.kdichalas.net/v1alpha1`)
//!   with validated backend, character set, collation, account host and
//!   privilege fields
//! - **Idempotent Reconciliation**: every pass creates or alters the schema,
//!   creates the account or re-applies its password, and converges grants
//! - **Safe Teardown**: a finalizer keeps the resource until the account and
//!   then the schema have been dropped
//! - **Credential Rotation**: Secrets are read on every pass, never cached
//! - **Observability**: Prometheus-compatible operator metrics
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mysql_operator::prelude::*;
//! use kube::Client;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::try_default().await?;
//!
//!     let reconciler = Reconciler::new(
//!         Arc::new(KubeResourceStore::new(client.clone())),
//!         Arc::new(SecretCredentialStore::new(client.clone())),
//!         Arc::new(MysqlConnector::new()),
//!         ReconcilerConfig::default(),
//!     );
//!
//!     run_controller(client, None, reconciler).await
//! }
//! ```
//!
//! ## Custom Resource Definition
//!
//! ```yaml
//! apiVersion: mysql.kdichalas.net/v1alpha1
//! kind: Mysql
//! metadata:
//!   name: orders            # also the database name
//! spec:
//!   backend:
//!     host: mysql.databases.svc.cluster.local
//!     port: 3306
//!     credentials:
//!       name: mysql-admin   # Secret with `user` and `password`
//!   database:
//!     characterSet: utf8mb4
//!     collate: utf8mb4_general_ci
//!     host: "%"
//!     credentials:
//!       name: orders-user
//!     privileges: ["SELECT", "INSERT"]
//! ```
//!
//! ## Modules
//!
//! - [`crd`] - Custom Resource Definition types with validation
//! - [`controller`] - Reconcile pass and controller setup
//! - [`database`] - Schema synchronization
//! - [`user`] - Account and grant synchronization
//! - [`teardown`] - Ordered removal on deletion
//! - [`backend`] - MySQL connection and administrative statements
//! - [`grants`] - `SHOW GRANTS` parsing and privilege sets
//! - [`error`] - Error types for operator operations
//!
//! ## Metrics
//!
//! - `mysql_operator_reconciliations_total` - Total reconciliation attempts
//! - `mysql_operator_reconciliation_errors_total` - Reconciliation errors
//! - `mysql_operator_reconciliation_duration_seconds` - Reconciliation latency
//! - `mysql_operator_teardowns_total` - Completed teardowns

pub mod backend;
pub mod controller;
pub mod crd;
pub mod database;
pub mod desired;
pub mod error;
pub mod grants;
pub mod secrets;
pub mod security;
pub mod statements;
pub mod store;
pub mod teardown;
pub mod user;

pub mod prelude {
    //! Re-exports for convenient usage
    pub use crate::backend::{Backend, Connector, ConnectorConfig, MysqlConnector};
    pub use crate::controller::{
        run_controller, ControllerContext, ControllerMetrics, NoOpReason, PassOutcome,
        Reconciler, ReconcilerConfig, FINALIZER,
    };
    pub use crate::crd::{BackendSpec, DatabaseSpec, Mysql, MysqlSpec, MysqlStatus, SecretReference};
    pub use crate::desired::{BackendEndpoint, DesiredState, ResourceId};
    pub use crate::error::{OperatorError, Result};
    pub use crate::grants::PrivilegeSet;
    pub use crate::secrets::{CredentialStore, Credentials, SecretCredentialStore, SecretKey};
    pub use crate::store::{KubeResourceStore, ResourceStore};
}
