use std::collections::BTreeSet;

use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::DynamicObject;
use paas_store::{ObjectKey, StoreResult};
use tracing::debug;

use super::{first_err, from_typed, paas_name};
use crate::controller::StepContext;
use crate::controller::ensure::{EnsureMode, ensure as ensure_object, remove};
use crate::crd::{Paas, PaasStatus};
use crate::kinds::CLUSTER_ROLE_BINDING;
use crate::status::StatusLog;

const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

fn binding_name(role: &str) -> String {
    format!("paas-{}", role)
}

fn desired(role: &str, subjects: Vec<Subject>) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(binding_name(role)),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: RBAC_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: role.to_string(),
        },
        subjects: Some(subjects),
    }
}

fn subjects_of(obj: &DynamicObject) -> StoreResult<Vec<Subject>> {
    Ok(match obj.data.get("subjects") {
        Some(v) if !v.is_null() => serde_json::from_value(v.clone())?,
        _ => Vec::new(),
    })
}

/// Drop the subjects living in `ours`, add `wanted`. Sorted so that passes of
/// different Paas agree on the stored order.
fn merge(current: &[Subject], ours: &BTreeSet<String>, wanted: Vec<Subject>) -> Vec<Subject> {
    let mut merged: Vec<Subject> = current
        .iter()
        .filter(|s| {
            !(s.kind == "ServiceAccount" && s.namespace.as_ref().is_some_and(|ns| ours.contains(ns)))
        })
        .cloned()
        .chain(wanted)
        .collect();
    merged.sort_by(|a, b| (&a.namespace, &a.name, &a.kind).cmp(&(&b.namespace, &b.name, &b.kind)));
    merged.dedup();
    merged
}

/// Bring the shared binding of `role` to exactly `wanted` for this Paas,
/// leaving other subjects alone. An emptied binding is deleted.
async fn bind(
    ctx: &StepContext<'_>,
    log: &mut StatusLog,
    role: &str,
    ours: &BTreeSet<String>,
    wanted: Vec<Subject>,
) -> StoreResult<()> {
    let key = ObjectKey::cluster(binding_name(role));
    let current = match ctx.store.get(&CLUSTER_ROLE_BINDING, &key).await {
        Ok(obj) => obj,
        Err(e) if e.is_not_found() => {
            if wanted.is_empty() {
                return Ok(());
            }
            let crb = from_typed(&desired(role, merge(&[], ours, wanted)))?;
            return ensure_object(ctx.store, log, &CLUSTER_ROLE_BINDING, crb, EnsureMode::CreateOnly)
                .await
                .map(|_| ());
        }
        Err(e) => {
            log.error("find", CLUSTER_ROLE_BINDING.kind, key.to_string(), e.to_string());
            return Err(e);
        }
    };

    let present = subjects_of(&current)?;
    let binds_us = !wanted.is_empty();
    let merged = merge(&present, ours, wanted);
    if merged == present {
        if binds_us {
            log.info("create", CLUSTER_ROLE_BINDING.kind, key.to_string(), "already existed");
        }
        return Ok(());
    }
    if merged.is_empty() {
        return remove(ctx.store, log, &CLUSTER_ROLE_BINDING, &key).await;
    }

    debug!(binding = %key, subjects = merged.len(), "updating extra cluster role binding");
    let mut updated = current;
    if let Some(data) = updated.data.as_object_mut() {
        data.insert("subjects".to_string(), serde_json::to_value(&merged)?);
    }
    ctx.store
        .update(&CLUSTER_ROLE_BINDING, &updated)
        .await
        .map(|_| log.info("update", CLUSTER_ROLE_BINDING.kind, key.to_string(), "subjects updated"))
        .inspect_err(|e| {
            log.error("update", CLUSTER_ROLE_BINDING.kind, key.to_string(), e.to_string())
        })
}

/// Grant each enabled capability's service account its configured cluster
/// roles; capabilities that are not enabled lose theirs.
async fn converge(
    ctx: &StepContext<'_>,
    owner: &str,
    enabled: &BTreeSet<String>,
    log: &mut StatusLog,
) -> StoreResult<()> {
    let roles = &ctx.cfg.capabilities.cluster_roles;
    if roles.is_empty() {
        return Ok(());
    }
    // Namespaces of every configured capability this Paas could have bound.
    let ours: BTreeSet<String> = roles.iter().map(|(cap, _)| format!("{}-{}", owner, cap)).collect();

    let mut failed = None;
    for role in roles.roles() {
        let wanted: Vec<Subject> = roles
            .iter()
            .filter(|(cap, perms)| enabled.contains(*cap) && perms.roles.iter().any(|r| r == role))
            .map(|(cap, perms)| Subject {
                api_group: None,
                kind: "ServiceAccount".to_string(),
                name: perms.service_account.clone(),
                namespace: Some(format!("{}-{}", owner, cap)),
            })
            .collect();
        first_err(&mut failed, bind(ctx, log, role, &ours, wanted).await);
    }
    failed.map_or(Ok(()), Err)
}

pub async fn ensure(ctx: &StepContext<'_>, paas: &Paas, status: &mut PaasStatus) -> StoreResult<()> {
    let owner = paas_name(paas)?;
    let enabled: BTreeSet<String> = paas.enabled_capabilities().map(|(c, _)| c.clone()).collect();
    converge(ctx, owner, &enabled, &mut status.messages).await
}

pub async fn finalize(ctx: &StepContext<'_>, paas: &Paas, log: &mut StatusLog) -> StoreResult<()> {
    let owner = paas_name(paas)?;
    converge(ctx, owner, &BTreeSet::new(), log).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(ns: &str) -> Subject {
        Subject {
            api_group: None,
            kind: "ServiceAccount".to_string(),
            name: "controller".to_string(),
            namespace: Some(ns.to_string()),
        }
    }

    #[test]
    fn merge_keeps_foreign_subjects_in_stable_order() {
        let ours: BTreeSet<String> = ["demo-argocd".to_string()].into();
        let present = vec![account("other-argocd"), account("demo-argocd")];

        let joined = merge(&present, &ours, vec![account("demo-argocd")]);
        assert_eq!(joined, vec![account("demo-argocd"), account("other-argocd")]);
        assert_eq!(merge(&joined, &ours, vec![account("demo-argocd")]), joined);

        let left = merge(&joined, &ours, vec![]);
        assert_eq!(left, vec![account("other-argocd")]);
    }

    #[test]
    fn binding_is_named_after_the_role() {
        let obj = from_typed(&desired("view", vec![account("demo-argocd")])).unwrap();
        assert_eq!(obj.metadata.name.as_deref(), Some("paas-view"));
        assert_eq!(obj.data["roleRef"]["kind"], "ClusterRole");
        assert_eq!(obj.data["subjects"][0]["namespace"], "demo-argocd");
    }
}
