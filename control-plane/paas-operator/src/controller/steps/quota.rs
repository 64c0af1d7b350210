use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use paas_store::{ObjectKey, StoreResult};
use serde_json::json;
use tracing::debug;

use super::{first_err, list_owned, manifest, owner_labels, paas_name};
use crate::controller::StepContext;
use crate::controller::ensure::{EnsureMode, ensure as ensure_object, remove};
use crate::crd::{LABEL_QUOTA, NamespaceSet, Paas, PaasStatus, QuotaSummary};
use crate::kinds::CLUSTER_RESOURCE_QUOTA;
use crate::status::StatusLog;

fn desired(owner: &str, set: &NamespaceSet) -> kube::core::DynamicObject {
    let meta = ObjectMeta {
        name: Some(set.name.clone()),
        labels: Some(owner_labels(owner)),
        ..Default::default()
    };
    manifest(
        &CLUSTER_RESOURCE_QUOTA,
        meta,
        json!({
            "spec": {
                "selector": { "labels": { "matchLabels": { LABEL_QUOTA: set.name } } },
                "quota": { "hard": set.quota },
            }
        }),
    )
}

/// One quota per namespace set. The hard limits land in `status.quota`.
pub async fn ensure(ctx: &StepContext<'_>, paas: &Paas, status: &mut PaasStatus) -> StoreResult<()> {
    let owner = paas_name(paas)?;
    status.quota.clear();
    for set in paas.namespace_sets() {
        ensure_object(
            ctx.store,
            &mut status.messages,
            &CLUSTER_RESOURCE_QUOTA,
            desired(owner, &set),
            EnsureMode::Converge,
        )
        .await?;
        status.quota.push(QuotaSummary {
            name: set.name,
            hard: set.quota,
        });
    }
    debug!(paas = owner, sets = status.quota.len(), "quotas converged");
    Ok(())
}

/// Delete every quota labelled as owned by the Paas, including sets the spec
/// no longer mentions.
pub async fn finalize(ctx: &StepContext<'_>, paas: &Paas, log: &mut StatusLog) -> StoreResult<()> {
    let owner = paas_name(paas)?;
    let owned = list_owned(ctx, log, &CLUSTER_RESOURCE_QUOTA, owner).await?;
    let mut failed = None;
    for quota in owned {
        let key = ObjectKey::of(&quota)?;
        first_err(
            &mut failed,
            remove(ctx.store, log, &CLUSTER_RESOURCE_QUOTA, &key).await,
        );
    }
    failed.map_or(Ok(()), Err)
}
