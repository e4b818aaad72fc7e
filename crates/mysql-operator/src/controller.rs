//! Mysql Controller
//!
//! This module implements the reconcile pass for `Mysql` resources and wires it
//! into a `kube::runtime::Controller`. A pass runs the same sequence every
//! time:
//!
//! ```text
//! FetchResource -> FetchBackendCredentials -> FetchUserCredentials -> Connect
//!   -> SyncDatabase -> SyncUser
//!   -> deleting:     Teardown -> RemoveFinalizer
//!   -> not deleting: EnsureFinalizer -> MarkCompleted
//! ```
//!
//! Every step is idempotent, so a failed pass is simply replayed from the top
//! by the controller's error policy.

use crate::backend::{Backend, Connector};
use crate::crd::Mysql;
use crate::database::sync_database;
use crate::desired::{DesiredState, ResourceId};
use crate::error::{OperatorError, Result};
use crate::secrets::{CredentialStore, Credentials, SecretKey};
use crate::store::ResourceStore;
use crate::teardown::teardown;
use crate::user::{sync_user, UserRequest};
use futures::StreamExt;
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config;
use kube::runtime::{reflector, watcher, WatchStreamExt};
use kube::{Client, Resource, ResourceExt};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

/// Finalizer guarding backend cleanup
pub const FINALIZER: &str = "finalizer.mysql.kdichalas.net";

/// Values written to `status.stage`; failures write the error text instead
pub mod stage {
    pub const CONNECTING: &str = "Connecting to database";
    pub const SYNC_DATABASE: &str = "Synchronizing database";
    pub const SYNC_USER: &str = "Synchronizing user";
    pub const TEARDOWN: &str = "Removing database and user";
    pub const COMPLETED: &str = "Completed";
}

/// Default deadline for one pass
const DEFAULT_PASS_TIMEOUT_SECONDS: u64 = 120;

/// Default requeue interval for successful reconciliations
const DEFAULT_REQUEUE_SECONDS: u64 = 300; // 5 minutes

/// Requeue interval while a referenced Secret is missing
const MISSING_CREDENTIALS_REQUEUE_SECONDS: u64 = 30;

/// Base delay for error backoff
const ERROR_REQUEUE_SECONDS: u64 = 5;

/// Maximum requeue delay for error backoff
const MAX_ERROR_REQUEUE_SECONDS: u64 = 300;

/// Reconciler settings
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Deadline for a whole pass, backend calls included
    pub pass_timeout: Duration,
    /// Delay before a successful pass is repeated to correct drift
    pub requeue_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            pass_timeout: Duration::from_secs(DEFAULT_PASS_TIMEOUT_SECONDS),
            requeue_interval: Duration::from_secs(DEFAULT_REQUEUE_SECONDS),
        }
    }
}

/// Why a pass ended without touching the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoOpReason {
    /// The resource no longer exists
    ResourceNotFound,
    /// Deletion requested and our finalizer is already gone
    AlreadyFinalized,
    /// The backend credentials Secret does not exist yet
    BackendCredentialsNotFound(SecretKey),
    /// The user credentials Secret does not exist yet
    UserCredentialsNotFound(SecretKey),
}

/// Successful end of a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    NoOp(NoOpReason),
    /// Backend matches the resource and status is `Completed`
    Completed,
    /// Backend objects dropped and finalizer removed
    Deleted,
}

/// Runs reconcile passes against injected collaborators
pub struct Reconciler {
    store: Arc<dyn ResourceStore>,
    credentials: Arc<dyn CredentialStore>,
    connector: Arc<dyn Connector>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        credentials: Arc<dyn CredentialStore>,
        connector: Arc<dyn Connector>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            credentials,
            connector,
            config,
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Run one pass for `id`.
    ///
    /// Errors have already been written to `status.stage` when this returns.
    #[instrument(skip(self, id), fields(namespace = %id.namespace, name = %id.name))]
    pub async fn reconcile_pass(&self, id: &ResourceId) -> Result<PassOutcome> {
        match tokio::time::timeout(self.config.pass_timeout, self.run_pass(id)).await {
            Ok(result) => result,
            Err(_) => {
                let err = OperatorError::Timeout(format!(
                    "reconcile pass exceeded {:?}",
                    self.config.pass_timeout
                ));
                Err(self.fail(id, err).await)
            }
        }
    }

    async fn run_pass(&self, id: &ResourceId) -> Result<PassOutcome> {
        let Some(resource) = self.store.fetch(id).await? else {
            debug!("Resource not found, nothing to do");
            return Ok(PassOutcome::NoOp(NoOpReason::ResourceNotFound));
        };

        let deleting = resource.meta().deletion_timestamp.is_some();
        if deleting && !has_finalizer(&resource) {
            debug!("Deletion requested and already finalized");
            return Ok(PassOutcome::NoOp(NoOpReason::AlreadyFinalized));
        }

        let desired = match DesiredState::from_resource(&resource) {
            Ok(desired) => desired,
            Err(e) => return Err(self.fail(id, e).await),
        };

        let admin = match self.resolve(id, &desired.backend_credentials).await? {
            Some(credentials) => credentials,
            None => {
                return Ok(PassOutcome::NoOp(NoOpReason::BackendCredentialsNotFound(
                    desired.backend_credentials,
                )))
            }
        };
        let owner = match self.resolve(id, &desired.user_credentials).await? {
            Some(credentials) => credentials,
            None => {
                return Ok(PassOutcome::NoOp(NoOpReason::UserCredentialsNotFound(
                    desired.user_credentials,
                )))
            }
        };

        self.set_stage(id, stage::CONNECTING).await;
        let backend = match self.connector.connect(&desired.endpoint, &admin).await {
            Ok(backend) => backend,
            Err(e) => return Err(self.fail(id, e).await),
        };

        let result = self
            .synchronize(id, &resource, &desired, &owner, backend.as_ref(), deleting)
            .await;

        if let Err(e) = backend.close().await {
            warn!(error = %e, "Failed to close MySQL connection");
        }

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) => Err(self.fail(id, e).await),
        }
    }

    /// Resolve one Secret; a missing Secret is `Ok(None)`, any other failure
    /// is recorded in the status
    async fn resolve(&self, id: &ResourceId, key: &SecretKey) -> Result<Option<Credentials>> {
        match self.credentials.resolve(key).await {
            Ok(Some(credentials)) => Ok(Some(credentials)),
            Ok(None) => {
                info!(secret = %key, "Credentials Secret not found, waiting for it");
                Ok(None)
            }
            Err(e) => Err(self.fail(id, e).await),
        }
    }

    async fn synchronize(
        &self,
        id: &ResourceId,
        resource: &Mysql,
        desired: &DesiredState,
        owner: &Credentials,
        backend: &dyn Backend,
        deleting: bool,
    ) -> Result<PassOutcome> {
        self.set_stage(id, stage::SYNC_DATABASE).await;
        let database = sync_database(
            backend,
            &desired.database_name,
            &desired.character_set,
            &desired.collation,
        )
        .await?;

        self.set_stage(id, stage::SYNC_USER).await;
        let user = sync_user(
            backend,
            &UserRequest {
                database: &desired.database_name,
                credentials: owner,
                host: &desired.grant_host,
                privileges: &desired.privileges,
            },
        )
        .await?;

        debug!(?database, ?user, "Backend synchronized");

        if deleting {
            self.set_stage(id, stage::TEARDOWN).await;
            teardown(
                backend,
                &owner.username,
                &desired.grant_host,
                &desired.database_name,
            )
            .await?;

            self.store.remove_finalizer(resource, FINALIZER).await?;

            info!("Database and user removed, finalizer released");
            return Ok(PassOutcome::Deleted);
        }

        if !has_finalizer(resource) {
            self.store.add_finalizer(resource, FINALIZER).await?;
            debug!("Finalizer added");
        }

        self.store.update_stage(id, stage::COMPLETED).await?;
        info!("Reconciliation complete");
        Ok(PassOutcome::Completed)
    }

    /// Write a progress marker; a failed write does not stop the pass
    async fn set_stage(&self, id: &ResourceId, value: &str) {
        if let Err(e) = self.store.update_stage(id, value).await {
            warn!(stage = %value, error = %e, "Failed to update status");
        }
    }

    /// Record a fatal error in the status and hand it back
    async fn fail(&self, id: &ResourceId, err: OperatorError) -> OperatorError {
        warn!(error = %err, "Reconcile pass failed");
        self.set_stage(id, &err.to_string()).await;
        err
    }
}

fn has_finalizer(resource: &Mysql) -> bool {
    resource.finalizers().iter().any(|f| f == FINALIZER)
}

/// Context passed to the controller
pub struct ControllerContext {
    /// Pass implementation
    pub reconciler: Reconciler,
    /// Metrics recorder (optional)
    pub metrics: Option<ControllerMetrics>,
    /// Per-resource error retry counts for exponential backoff
    pub error_counts: dashmap::DashMap<String, u32>,
}

impl ControllerContext {
    pub fn new(reconciler: Reconciler) -> Self {
        Self {
            reconciler,
            metrics: Some(ControllerMetrics::new()),
            error_counts: dashmap::DashMap::new(),
        }
    }
}

/// Metrics for the controller
#[derive(Clone)]
pub struct ControllerMetrics {
    /// Counter for reconciliation attempts
    pub reconciliations: metrics::Counter,
    /// Counter for reconciliation errors
    pub errors: metrics::Counter,
    /// Histogram for reconciliation duration
    pub duration: metrics::Histogram,
}

impl ControllerMetrics {
    /// Create new controller metrics
    pub fn new() -> Self {
        Self {
            reconciliations: metrics::counter!("mysql_operator_reconciliations_total"),
            errors: metrics::counter!("mysql_operator_reconciliation_errors_total"),
            duration: metrics::histogram!("mysql_operator_reconciliation_duration_seconds"),
        }
    }
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the Mysql controller.
///
/// The runtime controller never runs two passes for the same object at once,
/// which is what keeps backend operations for one resource sequential.
pub async fn run_controller(
    client: Client,
    namespace: Option<String>,
    reconciler: Reconciler,
) -> Result<()> {
    let resources: Api<Mysql> = match &namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    let ctx = Arc::new(ControllerContext::new(reconciler));

    info!(
        namespace = namespace.as_deref().unwrap_or("all"),
        "Starting Mysql controller"
    );

    // Status and finalizer writes from our own passes do not retrigger
    let (reader, writer) = reflector::store();
    let events = watcher(resources, Config::default())
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .predicate_filter(watch_key);

    Controller::for_stream(events, reader)
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    debug!(
                        name = obj.name,
                        namespace = obj.namespace,
                        ?action,
                        "Reconciliation completed"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation failed");
                }
            }
        })
        .await;

    Ok(())
}

/// Change key for watch events: the spec generation and whether deletion
/// was requested
fn watch_key(resource: &Mysql) -> Option<u64> {
    let mut hasher = DefaultHasher::new();
    resource.meta().generation?.hash(&mut hasher);
    resource.meta().deletion_timestamp.is_some().hash(&mut hasher);
    Some(hasher.finish())
}

/// Controller entry point: one pass per trigger
async fn reconcile(resource: Arc<Mysql>, ctx: Arc<ControllerContext>) -> Result<Action> {
    let start = std::time::Instant::now();

    if let Some(ref metrics) = ctx.metrics {
        metrics.reconciliations.increment(1);
    }

    let id = ResourceId::of(&resource);
    let result = ctx.reconciler.reconcile_pass(&id).await;

    if let Some(ref metrics) = ctx.metrics {
        metrics.duration.record(start.elapsed().as_secs_f64());
    }

    match result {
        Ok(outcome) => {
            // Reset error backoff counter on success
            ctx.error_counts.remove(&id.to_string());
            Ok(action_for(&outcome, ctx.reconciler.config()))
        }
        Err(e) => {
            if let Some(ref metrics) = ctx.metrics {
                metrics.errors.increment(1);
            }
            Err(e)
        }
    }
}

/// Requeue decision after a successful pass
fn action_for(outcome: &PassOutcome, config: &ReconcilerConfig) -> Action {
    match outcome {
        PassOutcome::Completed => Action::requeue(config.requeue_interval),
        PassOutcome::NoOp(NoOpReason::BackendCredentialsNotFound(_))
        | PassOutcome::NoOp(NoOpReason::UserCredentialsNotFound(_)) => {
            Action::requeue(Duration::from_secs(MISSING_CREDENTIALS_REQUEUE_SECONDS))
        }
        PassOutcome::NoOp(_) | PassOutcome::Deleted => Action::await_change(),
    }
}

/// Backoff for the given retry attempt: 5s, 10s, 20s, ... capped at 300s
fn backoff_delay(retries: u32) -> Duration {
    let base = Duration::from_secs(ERROR_REQUEUE_SECONDS);
    let backoff = base * 2u32.saturating_pow(retries.saturating_sub(1).min(6));
    backoff.min(Duration::from_secs(MAX_ERROR_REQUEUE_SECONDS))
}

/// Error policy for the controller with exponential backoff.
fn error_policy(resource: Arc<Mysql>, error: &OperatorError, ctx: Arc<ControllerContext>) -> Action {
    let key = ResourceId::of(&resource).to_string();
    let retries = {
        let mut entry = ctx.error_counts.entry(key.clone()).or_insert(0);
        *entry += 1;
        *entry
    };

    let delay = error
        .requeue_delay()
        .unwrap_or_else(|| backoff_delay(retries));

    warn!(
        error = %error,
        retry = retries,
        delay_secs = delay.as_secs(),
        "Reconciliation error for '{}', will retry",
        key
    );

    Action::requeue(delay)
}
