use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::DynamicObject;
use paas_store::{LabelSelector, ObjectKey, StoreResult};
use serde_json::json;
use tracing::debug;

use super::{annotation, first_err, label, manifest, paas_name};
use crate::controller::StepContext;
use crate::controller::ensure::{EnsureMode, ensure as ensure_object, remove};
use crate::crd::{ANNOTATION_MEMBERS, LABEL_CAPABILITY, LABEL_CLUSTER_QUOTA, Paas, PaasStatus};
use crate::kinds::CLUSTER_RESOURCE_QUOTA;
use crate::status::StatusLog;

fn members(obj: &DynamicObject) -> BTreeSet<String> {
    annotation(obj, ANNOTATION_MEMBERS)
        .map(|m| {
            m.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn join(members: &BTreeSet<String>) -> String {
    members.iter().cloned().collect::<Vec<_>>().join(",")
}

/// One shared quota per enabled capability. The Paas joins its member list;
/// the hard limits are set by whichever Paas creates the quota first. Quotas
/// of capabilities the Paas no longer enables are left.
pub async fn ensure(ctx: &StepContext<'_>, paas: &Paas, status: &mut PaasStatus) -> StoreResult<()> {
    let owner = paas_name(paas)?;
    let log = &mut status.messages;
    let mut enabled = BTreeSet::new();
    for (cap, capability) in paas.enabled_capabilities() {
        enabled.insert(cap.clone());
        let name = format!("{}-{}", ctx.cfg.quota.cluster_prefix, cap);
        let key = ObjectKey::cluster(&name);
        let current = match ctx.store.get(&CLUSTER_RESOURCE_QUOTA, &key).await {
            Ok(obj) => Some(obj),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                log.error("find", CLUSTER_RESOURCE_QUOTA.kind, &name, e.to_string());
                return Err(e);
            }
        };

        let mut joined = current.as_ref().map(members).unwrap_or_default();
        joined.insert(owner.to_string());
        let hard = current
            .as_ref()
            .and_then(|q| q.data.pointer("/spec/quota/hard").cloned())
            .unwrap_or_else(|| json!(capability.quota));

        let meta = ObjectMeta {
            name: Some(name.clone()),
            labels: Some(BTreeMap::from([(LABEL_CLUSTER_QUOTA.to_string(), cap.clone())])),
            annotations: Some(BTreeMap::from([(
                ANNOTATION_MEMBERS.to_string(),
                join(&joined),
            )])),
            ..Default::default()
        };
        let desired = manifest(
            &CLUSTER_RESOURCE_QUOTA,
            meta,
            json!({
                "spec": {
                    "selector": { "labels": { "matchLabels": { LABEL_CAPABILITY: cap } } },
                    "quota": { "hard": hard },
                }
            }),
        );
        ensure_object(ctx.store, log, &CLUSTER_RESOURCE_QUOTA, desired, EnsureMode::Converge)
            .await?;
    }
    leave(ctx, owner, &enabled, log).await
}

/// Leave every cluster-wide quota this Paas is a member of.
pub async fn finalize(ctx: &StepContext<'_>, paas: &Paas, log: &mut StatusLog) -> StoreResult<()> {
    let owner = paas_name(paas)?;
    leave(ctx, owner, &BTreeSet::new(), log).await
}

/// Drop `owner` from the shared quotas of every capability not in `keep`.
/// The last member out deletes the quota.
async fn leave(
    ctx: &StepContext<'_>,
    owner: &str,
    keep: &BTreeSet<String>,
    log: &mut StatusLog,
) -> StoreResult<()> {
    let quotas = ctx
        .store
        .list(&CLUSTER_RESOURCE_QUOTA, &LabelSelector::new())
        .await
        .inspect_err(|e| log.error("list", CLUSTER_RESOURCE_QUOTA.kind, owner, e.to_string()))?;

    let mut failed = None;
    for mut quota in quotas {
        let leaving = label(&quota, LABEL_CLUSTER_QUOTA).is_some_and(|cap| !keep.contains(cap));
        let mut remaining = members(&quota);
        if !leaving || !remaining.remove(owner) {
            continue;
        }
        let key = ObjectKey::of(&quota)?;
        if remaining.is_empty() {
            first_err(
                &mut failed,
                remove(ctx.store, log, &CLUSTER_RESOURCE_QUOTA, &key).await,
            );
            continue;
        }

        debug!(quota = %key, left = remaining.len(), "leaving cluster-wide quota");
        quota
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(ANNOTATION_MEMBERS.to_string(), join(&remaining));
        let res = ctx
            .store
            .update(&CLUSTER_RESOURCE_QUOTA, &quota)
            .await
            .map(|_| log.info("update", CLUSTER_RESOURCE_QUOTA.kind, key.to_string(), "member removed"))
            .inspect_err(|e| {
                log.error("update", CLUSTER_RESOURCE_QUOTA.kind, key.to_string(), e.to_string())
            });
        first_err(&mut failed, res);
    }
    failed.map_or(Ok(()), Err)
}
