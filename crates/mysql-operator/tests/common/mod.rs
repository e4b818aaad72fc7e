//! In-memory fakes for driving the reconciler without a cluster or a server

#![allow(dead_code)]

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use mysql_operator::prelude::*;
use mysql_operator::grants::GRANT_OPTION;
use mysql_operator::store;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Ordered log shared by all fakes
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    /// Events coming from the MySQL server
    pub fn sql(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| e.strip_prefix("sql: ").map(str::to_string))
            .collect()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

pub fn create_test_resource(name: &str, privileges: &[&str]) -> Mysql {
    Mysql {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("shop".to_string()),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: MysqlSpec {
            backend: BackendSpec {
                host: "mysql.databases.svc".to_string(),
                port: 3306,
                credentials: SecretReference {
                    name: "mysql-admin".to_string(),
                    namespace: Some("databases".to_string()),
                },
            },
            database: DatabaseSpec {
                character_set: "utf8mb4".to_string(),
                collation: "utf8mb4_general_ci".to_string(),
                credentials: SecretReference {
                    name: "orders-user".to_string(),
                    namespace: None,
                },
                privileges: privileges.iter().map(|p| p.to_string()).collect(),
                host: "%".to_string(),
            },
        },
        status: None,
    }
}

/// Resource store that behaves like the API server for one namespace
#[derive(Clone)]
pub struct FakeStore {
    resources: Arc<Mutex<HashMap<ResourceId, Mysql>>>,
    log: EventLog,
}

impl FakeStore {
    pub fn new(log: EventLog) -> Self {
        Self {
            resources: Arc::default(),
            log,
        }
    }

    pub fn insert(&self, resource: Mysql) {
        self.resources
            .lock()
            .unwrap()
            .insert(ResourceId::of(&resource), resource);
    }

    pub fn get(&self, id: &ResourceId) -> Option<Mysql> {
        self.resources.lock().unwrap().get(id).cloned()
    }

    pub fn stage(&self, id: &ResourceId) -> Option<String> {
        self.get(id).and_then(|r| r.status).map(|s| s.stage)
    }

    pub fn finalizers(&self, id: &ResourceId) -> Vec<String> {
        self.get(id)
            .and_then(|r| r.metadata.finalizers)
            .unwrap_or_default()
    }

    /// Mark the resource for deletion the way the API server does
    pub fn request_deletion(&self, id: &ResourceId) {
        let mut resources = self.resources.lock().unwrap();
        if let Some(resource) = resources.get_mut(id) {
            resource.metadata.deletion_timestamp = Some(Time(Default::default()));
        }
    }

    /// Stage writes seen so far
    pub fn stage_writes(&self) -> Vec<String> {
        self.log
            .events()
            .into_iter()
            .filter_map(|e| e.strip_prefix("stage: ").map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl ResourceStore for FakeStore {
    async fn fetch(&self, id: &ResourceId) -> Result<Option<Mysql>> {
        Ok(self.get(id))
    }

    async fn update_stage(&self, id: &ResourceId, stage: &str) -> Result<()> {
        self.log.push(format!("stage: {}", stage));
        let mut resources = self.resources.lock().unwrap();
        if let Some(resource) = resources.get_mut(id) {
            resource.status = Some(MysqlStatus {
                stage: stage.to_string(),
            });
            bump_version(resource);
        }
        Ok(())
    }

    async fn add_finalizer(&self, resource: &Mysql, finalizer: &str) -> Result<()> {
        self.apply_finalizer_patch(resource, store::add_finalizer_patch(resource, finalizer))
    }

    async fn remove_finalizer(&self, resource: &Mysql, finalizer: &str) -> Result<()> {
        match store::remove_finalizer_patch(resource, finalizer) {
            Some(patch) => self.apply_finalizer_patch(resource, patch),
            None => Ok(()),
        }
    }
}

impl FakeStore {
    /// Apply a JSON patch to the stored finalizer list, all or nothing
    fn apply_finalizer_patch(&self, resource: &Mysql, patch: Value) -> Result<()> {
        let id = ResourceId::of(resource);
        let mut resources = self.resources.lock().unwrap();
        let stored = resources
            .get_mut(&id)
            .ok_or_else(|| OperatorError::FinalizerError(format!("{} not found", id)))?;

        let mut finalizers = stored.metadata.finalizers.clone().unwrap_or_default();
        for operation in patch.as_array().cloned().unwrap_or_default() {
            apply_operation(&mut finalizers, &operation)
                .map_err(|reason| OperatorError::FinalizerError(format!("{}: {}", id, reason)))?;
        }

        self.log.push(format!("finalizers: {:?}", finalizers));
        bump_version(stored);

        let deleting = stored.metadata.deletion_timestamp.is_some();
        if deleting && finalizers.is_empty() {
            resources.remove(&id);
        } else {
            stored.metadata.finalizers = Some(finalizers);
        }
        Ok(())
    }
}

fn bump_version(resource: &mut Mysql) {
    let version: u64 = resource
        .metadata
        .resource_version
        .as_deref()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    resource.metadata.resource_version = Some((version + 1).to_string());
}

/// One `test`/`add`/`remove` operation on `/metadata/finalizers`
fn apply_operation(
    finalizers: &mut Vec<String>,
    operation: &Value,
) -> std::result::Result<(), String> {
    let op = operation["op"].as_str().unwrap_or_default();
    let path = operation["path"].as_str().unwrap_or_default();
    let value = &operation["value"];

    let suffix = path
        .strip_prefix("/metadata/finalizers")
        .ok_or_else(|| format!("unexpected path {}", path))?;

    match (op, suffix) {
        ("test", "") => {
            let current = if finalizers.is_empty() {
                Value::Null
            } else {
                json!(finalizers)
            };
            if &current != value {
                return Err(format!("test failed: {} != {}", current, value));
            }
        }
        ("add", "") => {
            *finalizers = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;
        }
        ("add", "/-") => {
            finalizers.push(value.as_str().unwrap_or_default().to_string());
        }
        (op, index) => {
            let index: usize = index
                .trim_start_matches('/')
                .parse()
                .map_err(|_| format!("unexpected path {}", path))?;
            let entry = finalizers
                .get(index)
                .ok_or_else(|| format!("no finalizer at {}", index))?;
            match op {
                "test" if value.as_str() == Some(entry.as_str()) => {}
                "test" => return Err(format!("test failed: {} != {}", entry, value)),
                "remove" => {
                    finalizers.remove(index);
                }
                _ => return Err(format!("unsupported operation {}", op)),
            }
        }
    }
    Ok(())
}

/// Secrets by location
#[derive(Clone, Default)]
pub struct FakeSecrets {
    secrets: Arc<Mutex<HashMap<SecretKey, Credentials>>>,
    failing: Arc<Mutex<bool>>,
}

impl FakeSecrets {
    pub fn insert(&self, namespace: &str, name: &str, user: &str, password: &str) {
        self.secrets.lock().unwrap().insert(
            SecretKey {
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            Credentials::new(user, password),
        );
    }

    pub fn fail_lookups(&self) {
        *self.failing.lock().unwrap() = true;
    }
}

#[async_trait]
impl CredentialStore for FakeSecrets {
    async fn resolve(&self, key: &SecretKey) -> Result<Option<Credentials>> {
        if *self.failing.lock().unwrap() {
            return Err(OperatorError::InvalidConfig(format!(
                "Secret {} is missing key 'password'",
                key
            )));
        }
        Ok(self.secrets.lock().unwrap().get(key).cloned())
    }
}

/// State of the fake MySQL server
#[derive(Default)]
pub struct ServerState {
    pub schemas: BTreeMap<String, (String, String)>,
    pub users: BTreeMap<(String, String), String>,
    /// Privileges on `<schema>.*` per account
    pub grants: BTreeMap<(String, String), BTreeMap<String, BTreeSet<String>>>,
    /// Extra raw lines returned by SHOW GRANTS
    pub extra_grant_lines: Vec<String>,
    /// Operations that fail
    pub failing: BTreeSet<&'static str>,
    /// Operations that never complete
    pub hanging: BTreeSet<&'static str>,
    pub refuse_connections: bool,
    pub open_connections: usize,
}

/// Connector to the fake server
#[derive(Clone)]
pub struct FakeServer {
    pub state: Arc<Mutex<ServerState>>,
    log: EventLog,
}

impl FakeServer {
    pub fn new(log: EventLog) -> Self {
        Self {
            state: Arc::default(),
            log,
        }
    }

    pub fn fail_on(&self, op: &'static str) {
        self.state.lock().unwrap().failing.insert(op);
    }

    pub fn hang_on(&self, op: &'static str) {
        self.state.lock().unwrap().hanging.insert(op);
    }

    pub fn has_schema(&self, name: &str) -> bool {
        self.state.lock().unwrap().schemas.contains_key(name)
    }

    pub fn password(&self, user: &str, host: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .users
            .get(&(user.to_string(), host.to_string()))
            .cloned()
    }

    pub fn privileges(&self, user: &str, host: &str, schema: &str) -> BTreeSet<String> {
        self.state
            .lock()
            .unwrap()
            .grants
            .get(&(user.to_string(), host.to_string()))
            .and_then(|g| g.get(schema))
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_privileges(&self, user: &str, host: &str, schema: &str, privileges: &[&str]) {
        self.state
            .lock()
            .unwrap()
            .grants
            .entry((user.to_string(), host.to_string()))
            .or_default()
            .insert(
                schema.to_string(),
                privileges.iter().map(|p| p.to_string()).collect(),
            );
    }

    pub fn open_connections(&self) -> usize {
        self.state.lock().unwrap().open_connections
    }
}

#[async_trait]
impl Connector for FakeServer {
    async fn connect(
        &self,
        endpoint: &BackendEndpoint,
        credentials: &Credentials,
    ) -> Result<Box<dyn Backend>> {
        {
            let mut state = self.state.lock().unwrap();
            if state.refuse_connections {
                return Err(OperatorError::ConnectionFailed(format!(
                    "{}: Connection refused",
                    endpoint
                )));
            }
            state.open_connections += 1;
        }
        self.log
            .push(format!("connect: {}@{}", credentials.username, endpoint));
        Ok(Box::new(FakeConnection {
            server: self.clone(),
            closed: Mutex::new(false),
        }))
    }
}

pub struct FakeConnection {
    server: FakeServer,
    closed: Mutex<bool>,
}

impl FakeConnection {
    async fn op(&self, name: &'static str, detail: String) -> Result<()> {
        self.server
            .log
            .push(format!("sql: {} {}", name, detail).trim_end().to_string());
        let (fails, hangs) = {
            let state = self.server.state.lock().unwrap();
            (state.failing.contains(name), state.hanging.contains(name))
        };
        if hangs {
            std::future::pending::<()>().await;
        }
        if fails {
            return Err(OperatorError::backend(name, "Lost connection to MySQL server"));
        }
        Ok(())
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ServerState> {
        self.server.state.lock().unwrap()
    }
}

fn account(user: &str, host: &str) -> (String, String) {
    (user.to_string(), host.to_string())
}

#[async_trait]
impl Backend for FakeConnection {
    async fn schema_exists(&self, name: &str) -> Result<bool> {
        self.op("schema_exists", name.to_string()).await?;
        Ok(self.state().schemas.contains_key(name))
    }

    async fn create_schema(&self, name: &str, character_set: &str, collation: &str) -> Result<()> {
        self.op("create_schema", name.to_string()).await?;
        let mut state = self.state();
        if state.schemas.contains_key(name) {
            return Err(OperatorError::backend(
                "create_schema",
                format!("Can't create database '{}'; database exists", name),
            ));
        }
        state.schemas.insert(
            name.to_string(),
            (character_set.to_string(), collation.to_string()),
        );
        Ok(())
    }

    async fn alter_schema(&self, name: &str, character_set: &str, collation: &str) -> Result<()> {
        self.op("alter_schema", name.to_string()).await?;
        self.state().schemas.insert(
            name.to_string(),
            (character_set.to_string(), collation.to_string()),
        );
        Ok(())
    }

    async fn drop_schema(&self, name: &str) -> Result<()> {
        self.op("drop_schema", name.to_string()).await?;
        self.state().schemas.remove(name);
        Ok(())
    }

    async fn user_exists(&self, user: &str, host: &str) -> Result<bool> {
        self.op("user_exists", format!("{}@{}", user, host)).await?;
        Ok(self.state().users.contains_key(&account(user, host)))
    }

    async fn create_user(&self, user: &str, host: &str, password: &str) -> Result<()> {
        self.op("create_user", format!("{}@{}", user, host)).await?;
        self.state()
            .users
            .insert(account(user, host), password.to_string());
        Ok(())
    }

    async fn alter_user_password(&self, user: &str, host: &str, password: &str) -> Result<()> {
        self.op("alter_user", format!("{}@{}", user, host)).await?;
        self.state()
            .users
            .insert(account(user, host), password.to_string());
        Ok(())
    }

    async fn show_grants(&self, user: &str, host: &str) -> Result<Vec<String>> {
        self.op("show_grants", format!("{}@{}", user, host)).await?;
        let state = self.state();
        let mut lines = vec![format!("GRANT USAGE ON *.* TO `{}`@`{}`", user, host)];
        if let Some(grants) = state.grants.get(&account(user, host)) {
            for (schema, privileges) in grants {
                if privileges.is_empty() {
                    continue;
                }
                // Server order differs from declaration order
                let list: Vec<&str> = privileges
                    .iter()
                    .rev()
                    .map(String::as_str)
                    .filter(|p| *p != GRANT_OPTION)
                    .collect();
                let list = if list.is_empty() {
                    "USAGE".to_string()
                } else {
                    list.join(", ")
                };
                let grant_option = if privileges.contains(GRANT_OPTION) {
                    " WITH GRANT OPTION"
                } else {
                    ""
                };
                lines.push(format!(
                    "GRANT {} ON `{}`.* TO `{}`@`{}`{}",
                    list, schema, user, host, grant_option
                ));
            }
        }
        lines.extend(state.extra_grant_lines.iter().cloned());
        Ok(lines)
    }

    async fn grant(
        &self,
        database: &str,
        user: &str,
        host: &str,
        privileges: &PrivilegeSet,
    ) -> Result<()> {
        if privileges.is_empty() {
            return Ok(());
        }
        self.op("grant", format!("{} ON {}.* TO {}@{}", privileges, database, user, host))
            .await?;
        let mut state = self.state();
        let granted = state
            .grants
            .entry(account(user, host))
            .or_default()
            .entry(database.to_string())
            .or_default();
        granted.extend(privileges.iter().map(str::to_string));
        Ok(())
    }

    async fn revoke_all(&self, database: &str, user: &str, host: &str) -> Result<()> {
        self.op("revoke_all", format!("ON {}.* FROM {}@{}", database, user, host))
            .await?;
        if let Some(grants) = self.state().grants.get_mut(&account(user, host)) {
            if let Some(privileges) = grants.get_mut(database) {
                privileges.retain(|p| p == GRANT_OPTION);
                if privileges.is_empty() {
                    grants.remove(database);
                }
            }
        }
        Ok(())
    }

    async fn revoke_grant_option(&self, database: &str, user: &str, host: &str) -> Result<()> {
        self.op(
            "revoke_grant_option",
            format!("ON {}.* FROM {}@{}", database, user, host),
        )
        .await?;
        if let Some(grants) = self.state().grants.get_mut(&account(user, host)) {
            if let Some(privileges) = grants.get_mut(database) {
                privileges.remove(GRANT_OPTION);
                if privileges.is_empty() {
                    grants.remove(database);
                }
            }
        }
        Ok(())
    }

    async fn drop_user(&self, user: &str, host: &str) -> Result<()> {
        self.op("drop_user", format!("{}@{}", user, host)).await?;
        let mut state = self.state();
        state.users.remove(&account(user, host));
        state.grants.remove(&account(user, host));
        Ok(())
    }

    async fn flush_privileges(&self) -> Result<()> {
        self.op("flush_privileges", String::new()).await
    }

    async fn close(&self) -> Result<()> {
        let mut closed = self.closed.lock().unwrap();
        if !*closed {
            *closed = true;
            self.server.state.lock().unwrap().open_connections -= 1;
            self.server.log.push("close");
        }
        Ok(())
    }
}

impl Drop for FakeConnection {
    fn drop(&mut self) {
        let closed = self.closed.get_mut().map(|c| *c).unwrap_or(true);
        if !closed {
            if let Ok(mut state) = self.server.state.lock() {
                state.open_connections -= 1;
            }
        }
    }
}

/// A wired-up reconciler and handles to its fakes
pub struct Harness {
    pub log: EventLog,
    pub store: FakeStore,
    pub secrets: FakeSecrets,
    pub server: FakeServer,
    pub reconciler: Reconciler,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(ReconcilerConfig::default())
    }

    pub fn with_pass_timeout(timeout: Duration) -> Self {
        Self::with_config(ReconcilerConfig {
            pass_timeout: timeout,
            ..ReconcilerConfig::default()
        })
    }

    fn with_config(config: ReconcilerConfig) -> Self {
        let log = EventLog::default();
        let store = FakeStore::new(log.clone());
        let secrets = FakeSecrets::default();
        let server = FakeServer::new(log.clone());

        secrets.insert("databases", "mysql-admin", "root", "admin-pw");
        secrets.insert("shop", "orders-user", "orders_app", "app-pw");

        let reconciler = Reconciler::new(
            Arc::new(store.clone()),
            Arc::new(secrets.clone()),
            Arc::new(server.clone()),
            config,
        );

        Self {
            log,
            store,
            secrets,
            server,
            reconciler,
        }
    }

    pub fn id(name: &str) -> ResourceId {
        ResourceId::new("shop", name)
    }

    pub async fn pass(&self, name: &str) -> Result<PassOutcome> {
        self.reconciler.reconcile_pass(&Self::id(name)).await
    }
}
