use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::DynamicObject;
use kube::discovery::ApiResource;
use kube::runtime::{WatchStreamExt, watcher};
use serde_json::json;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::traits::*;

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => match resp.code {
                404 => StoreError::NotFound(resp.message),
                409 if resp.reason == "AlreadyExists" => StoreError::AlreadyExists(resp.message),
                409 => StoreError::Conflict(resp.message),
                401 | 403 => StoreError::Forbidden(resp.message),
                400 | 422 => StoreError::Invalid(resp.message),
                _ => StoreError::Backend(format!("{} ({})", resp.message, resp.code)),
            },
            other => StoreError::Backend(other.to_string()),
        }
    }
}

fn api_resource(kind: &ResourceKind) -> ApiResource {
    ApiResource {
        group: kind.group.to_string(),
        version: kind.version.to_string(),
        api_version: kind.api_version(),
        kind: kind.kind.to_string(),
        plural: kind.plural.to_string(),
    }
}

/// Object store backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeObjectStore {
    client: Client,
    field_manager: String,
}

impl KubeObjectStore {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    fn api(&self, kind: &ResourceKind, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = api_resource(kind);
        match (kind.namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &ar),
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn get(&self, kind: &ResourceKind, key: &ObjectKey) -> StoreResult<DynamicObject> {
        let api = self.api(kind, key.namespace.as_deref());
        Ok(api.get(&key.name).await?)
    }

    async fn list(
        &self,
        kind: &ResourceKind,
        selector: &LabelSelector,
    ) -> StoreResult<Vec<DynamicObject>> {
        let api = self.api(kind, None);
        let mut lp = ListParams::default();
        if !selector.is_empty() {
            lp = lp.labels(&selector.to_query());
        }
        Ok(api.list(&lp).await?.items)
    }

    async fn create(&self, kind: &ResourceKind, obj: &DynamicObject) -> StoreResult<DynamicObject> {
        let key = ObjectKey::of(obj)?;
        let api = self.api(kind, key.namespace.as_deref());
        Ok(api.create(&self.post_params(), obj).await?)
    }

    async fn update(&self, kind: &ResourceKind, obj: &DynamicObject) -> StoreResult<DynamicObject> {
        let key = ObjectKey::of(obj)?;
        let api = self.api(kind, key.namespace.as_deref());
        Ok(api.replace(&key.name, &self.post_params(), obj).await?)
    }

    async fn update_status(
        &self,
        kind: &ResourceKind,
        obj: &DynamicObject,
    ) -> StoreResult<DynamicObject> {
        let key = ObjectKey::of(obj)?;
        let api = self.api(kind, key.namespace.as_deref());
        // Carrying resourceVersion turns the merge patch into a precondition.
        let patch = json!({
            "metadata": { "resourceVersion": obj.metadata.resource_version },
            "status": obj.data.get("status").cloned().unwrap_or_default(),
        });
        let pp = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        Ok(api
            .patch_status(&key.name, &pp, &Patch::Merge(&patch))
            .await?)
    }

    async fn delete(&self, kind: &ResourceKind, key: &ObjectKey) -> StoreResult<()> {
        let api = self.api(kind, key.namespace.as_deref());
        api.delete(&key.name, &DeleteParams::default()).await?;
        Ok(())
    }

    fn watch(&self, kind: &ResourceKind) -> BoxStream<'static, ChangeNotification> {
        let api = self.api(kind, None);
        let kind = *kind;
        debug!(kind = kind.kind, "k8s store: starting watch");
        watcher(api, watcher::Config::default())
            .default_backoff()
            .filter_map(move |res| {
                let item = match res {
                    Ok(watcher::Event::Apply(obj) | watcher::Event::InitApply(obj)) => {
                        Some(ChangeNotification::from_object(&kind, &obj))
                    }
                    Ok(watcher::Event::Delete(obj)) => {
                        Some(ChangeNotification::from_removed(&kind, &obj))
                    }
                    Ok(watcher::Event::Init | watcher::Event::InitDone) => None,
                    Err(e) => {
                        warn!(error = %e, kind = kind.kind, "k8s store: watch error");
                        None
                    }
                };
                async move { item }
            })
            .boxed()
    }
}
