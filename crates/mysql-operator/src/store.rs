//! Access to `Mysql` resources in the Kubernetes API
//!
//! The reconciler only reads a resource, writes its `status.stage` and
//! adds or removes its own finalizer, so [`ResourceStore`] is kept that narrow.

use crate::crd::Mysql;
use crate::desired::ResourceId;
use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::{Client, ResourceExt};
use serde_json::{json, Value};
use tracing::debug;

/// Read and patch `Mysql` resources
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Current state of the resource; `Ok(None)` when it no longer exists
    async fn fetch(&self, id: &ResourceId) -> Result<Option<Mysql>>;

    /// Merge-patch `status.stage`
    async fn update_stage(&self, id: &ResourceId, stage: &str) -> Result<()>;

    /// Append `finalizer` to `metadata.finalizers`.
    ///
    /// Fails if the stored list no longer matches the one seen on `resource`.
    async fn add_finalizer(&self, resource: &Mysql, finalizer: &str) -> Result<()>;

    /// Remove `finalizer` from `metadata.finalizers`.
    ///
    /// Fails if the entry moved since `resource` was read. A resource that
    /// does not carry `finalizer` is left alone.
    async fn remove_finalizer(&self, resource: &Mysql, finalizer: &str) -> Result<()>;
}

/// [`ResourceStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeResourceStore {
    client: Client,
}

impl KubeResourceStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Mysql> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn patch_finalizers(&self, resource: &Mysql, operations: Value) -> Result<()> {
        let id = ResourceId::of(resource);
        let patch: json_patch::Patch = serde_json::from_value(operations).map_err(|e| {
            OperatorError::FinalizerError(format!("invalid finalizer patch for {}: {}", id, e))
        })?;

        self.api(&id.namespace)
            .patch(&id.name, &PatchParams::default(), &Patch::Json::<()>(patch))
            .await
            .map_err(|e| {
                OperatorError::FinalizerError(format!("failed to patch {}: {}", id, e))
            })?;

        Ok(())
    }
}

#[async_trait]
impl ResourceStore for KubeResourceStore {
    async fn fetch(&self, id: &ResourceId) -> Result<Option<Mysql>> {
        Ok(self.api(&id.namespace).get_opt(&id.name).await?)
    }

    async fn update_stage(&self, id: &ResourceId, stage: &str) -> Result<()> {
        debug!(resource = %id, stage = %stage, "Updating status");

        let patch = json!({
            "status": { "stage": stage }
        });

        let patch_params = PatchParams::default();
        self.api(&id.namespace)
            .patch_status(&id.name, &patch_params, &Patch::Merge(&patch))
            .await
            .map_err(OperatorError::from)?;

        Ok(())
    }

    async fn add_finalizer(&self, resource: &Mysql, finalizer: &str) -> Result<()> {
        debug!(resource = %ResourceId::of(resource), %finalizer, "Adding finalizer");
        self.patch_finalizers(resource, add_finalizer_patch(resource, finalizer))
            .await
    }

    async fn remove_finalizer(&self, resource: &Mysql, finalizer: &str) -> Result<()> {
        let Some(operations) = remove_finalizer_patch(resource, finalizer) else {
            return Ok(());
        };

        debug!(resource = %ResourceId::of(resource), %finalizer, "Removing finalizer");
        self.patch_finalizers(resource, operations).await
    }
}

/// JSON patch appending `finalizer`, guarded by a `test` of the list as read.
///
/// A missing list is tested against `null` and created in one step.
pub fn add_finalizer_patch(resource: &Mysql, finalizer: &str) -> Value {
    let current = resource.finalizers();
    if current.is_empty() {
        json!([
            { "op": "test", "path": "/metadata/finalizers", "value": null },
            { "op": "add", "path": "/metadata/finalizers", "value": [finalizer] },
        ])
    } else {
        json!([
            { "op": "test", "path": "/metadata/finalizers", "value": current },
            { "op": "add", "path": "/metadata/finalizers/-", "value": finalizer },
        ])
    }
}

/// JSON patch removing `finalizer` at the index it had when read.
///
/// `None` when the resource does not carry `finalizer`.
pub fn remove_finalizer_patch(resource: &Mysql, finalizer: &str) -> Option<Value> {
    let index = resource.finalizers().iter().position(|f| f == finalizer)?;
    let path = format!("/metadata/finalizers/{}", index);

    Some(json!([
        { "op": "test", "path": path, "value": finalizer },
        { "op": "remove", "path": path },
    ]))
}
