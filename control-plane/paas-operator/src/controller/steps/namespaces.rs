use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use paas_store::{ObjectKey, StoreResult};

use super::{first_err, from_typed, list_owned, owner_labels, paas_name};
use crate::controller::StepContext;
use crate::controller::ensure::{EnsureMode, ensure as ensure_object, remove};
use crate::crd::{LABEL_CAPABILITY, LABEL_QUOTA, NamespaceSet, Paas, PaasStatus};
use crate::kinds::NAMESPACE;
use crate::status::StatusLog;

fn desired(owner: &str, set: &NamespaceSet) -> Namespace {
    let mut labels = owner_labels(owner);
    labels.insert(LABEL_QUOTA.to_string(), set.name.clone());
    if let Some(cap) = &set.capability {
        labels.insert(LABEL_CAPABILITY.to_string(), cap.clone());
    }
    Namespace {
        metadata: ObjectMeta {
            name: Some(set.name.clone()),
            labels: Some(labels),
            ..Default::default()
        },
        ..Default::default()
    }
}

pub async fn ensure(ctx: &StepContext<'_>, paas: &Paas, status: &mut PaasStatus) -> StoreResult<()> {
    let owner = paas_name(paas)?;
    for set in paas.namespace_sets() {
        let ns = from_typed(&desired(owner, &set))?;
        ensure_object(ctx.store, &mut status.messages, &NAMESPACE, ns, EnsureMode::Converge).await?;
    }
    Ok(())
}

/// Role bindings live inside these namespaces and go with them.
pub async fn finalize(ctx: &StepContext<'_>, paas: &Paas, log: &mut StatusLog) -> StoreResult<()> {
    let owner = paas_name(paas)?;
    let owned = list_owned(ctx, log, &NAMESPACE, owner).await?;
    let mut failed = None;
    for ns in owned {
        let key = ObjectKey::of(&ns)?;
        first_err(&mut failed, remove(ctx.store, log, &NAMESPACE, &key).await);
    }
    failed.map_or(Ok(()), Err)
}
