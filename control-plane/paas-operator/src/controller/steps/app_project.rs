use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use paas_store::{ObjectKey, StoreResult};
use serde_json::json;

use super::{manifest, owner_labels, paas_name};
use crate::controller::StepContext;
use crate::controller::ensure::{EnsureMode, ensure as ensure_object, remove};
use crate::crd::{Paas, PaasStatus};
use crate::kinds::APP_PROJECT;
use crate::status::StatusLog;

const IN_CLUSTER: &str = "https://kubernetes.default.svc";

/// ArgoCD project scoped to the Paas namespaces. Left alone once it exists.
pub async fn ensure(ctx: &StepContext<'_>, paas: &Paas, status: &mut PaasStatus) -> StoreResult<()> {
    let owner = paas_name(paas)?;
    let meta = ObjectMeta {
        name: Some(owner.to_string()),
        namespace: Some(ctx.cfg.argocd_namespace.clone()),
        labels: Some(owner_labels(owner)),
        ..Default::default()
    };
    let project = manifest(
        &APP_PROJECT,
        meta,
        json!({
            "spec": {
                "description": format!("Applications of Paas {}", owner),
                "sourceRepos": ["*"],
                "destinations": [{ "server": IN_CLUSTER, "namespace": format!("{}-*", owner) }],
            }
        }),
    );
    ensure_object(ctx.store, &mut status.messages, &APP_PROJECT, project, EnsureMode::CreateOnly)
        .await
        .map(|_| ())
}

pub async fn finalize(ctx: &StepContext<'_>, paas: &Paas, log: &mut StatusLog) -> StoreResult<()> {
    let owner = paas_name(paas)?;
    let key = ObjectKey::namespaced(&ctx.cfg.argocd_namespace, owner);
    remove(ctx.store, log, &APP_PROJECT, &key).await
}
