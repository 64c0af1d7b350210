use std::collections::BTreeSet;

use kube::core::DynamicObject;
use paas_store::{LabelSelector, ObjectKey, StoreError, StoreResult};
use serde_json::{Value, json};
use tracing::debug;

use super::{first_err, paas_name};
use crate::config::OperatorConfig;
use crate::controller::StepContext;
use crate::crd::{Paas, PaasStatus};
use crate::kinds::APPLICATION_SET;
use crate::status::StatusLog;

fn appset_key(cfg: &OperatorConfig, cap: &str) -> ObjectKey {
    ObjectKey::namespaced(
        &cfg.argocd_namespace,
        format!("{}-{}", cfg.capabilities.appset_prefix, cap),
    )
}

fn entry(paas: &Paas, owner: &str, cap: &str) -> Value {
    json!({
        "paas": owner,
        "requestor": paas.spec.requestor,
        "capability": cap,
    })
}

/// Elements of the first list generator. One is added when the set has
/// generators but no list generator yet.
fn elements(data: &mut Value) -> Option<&mut Vec<Value>> {
    let generators = data.pointer_mut("/spec/generators")?.as_array_mut()?;
    if !generators.iter().any(|g| g.get("list").is_some()) {
        generators.push(json!({ "list": { "elements": [] } }));
    }
    generators
        .iter_mut()
        .find_map(|g| g.pointer_mut("/list/elements")?.as_array_mut())
}

/// Replace the element of `owner` with `entry`, or drop it when `entry` is
/// `None`. Returns whether anything changed.
fn set_entry(elements: &mut Vec<Value>, owner: &str, entry: Option<Value>) -> bool {
    let pos = elements
        .iter()
        .position(|e| e.get("paas").and_then(Value::as_str) == Some(owner));
    match (pos, entry) {
        (Some(i), Some(entry)) if elements[i] == entry => false,
        (Some(i), Some(entry)) => {
            elements[i] = entry;
            true
        }
        (None, Some(entry)) => {
            elements.push(entry);
            true
        }
        (Some(i), None) => {
            elements.remove(i);
            true
        }
        (None, None) => false,
    }
}

async fn write(
    ctx: &StepContext<'_>,
    log: &mut StatusLog,
    appset: &DynamicObject,
    key: &ObjectKey,
    detail: &str,
) -> StoreResult<()> {
    ctx.store
        .update(&APPLICATION_SET, appset)
        .await
        .map(|_| log.info("update", APPLICATION_SET.kind, key.to_string(), detail))
        .inspect_err(|e| log.error("update", APPLICATION_SET.kind, key.to_string(), e.to_string()))
}

/// Every enabled capability lists the Paas in its ApplicationSet. The sets
/// are managed by the platform and must already exist.
pub async fn ensure(ctx: &StepContext<'_>, paas: &Paas, status: &mut PaasStatus) -> StoreResult<()> {
    let owner = paas_name(paas)?;
    let log = &mut status.messages;
    let enabled: BTreeSet<String> = paas.enabled_capabilities().map(|(c, _)| c.clone()).collect();

    for cap in &enabled {
        let key = appset_key(ctx.cfg, cap);
        let mut appset = ctx
            .store
            .get(&APPLICATION_SET, &key)
            .await
            .inspect_err(|e| log.error("find", APPLICATION_SET.kind, key.to_string(), e.to_string()))?;
        let Some(list) = elements(&mut appset.data) else {
            let err = StoreError::Invalid(format!("ApplicationSet {} has no generators", key));
            log.error("update", APPLICATION_SET.kind, key.to_string(), err.to_string());
            return Err(err);
        };
        if set_entry(list, owner, Some(entry(paas, owner, cap))) {
            write(ctx, log, &appset, &key, "entry added").await?;
        } else {
            log.info("create", APPLICATION_SET.kind, key.to_string(), "already existed");
        }
    }
    leave(ctx, owner, &enabled, log).await
}

/// Drop the Paas from every capability ApplicationSet not in `keep`.
async fn leave(
    ctx: &StepContext<'_>,
    owner: &str,
    keep: &BTreeSet<String>,
    log: &mut StatusLog,
) -> StoreResult<()> {
    let prefix = format!("{}-", ctx.cfg.capabilities.appset_prefix);
    let sets = ctx
        .store
        .list(&APPLICATION_SET, &LabelSelector::new())
        .await
        .inspect_err(|e| log.error("list", APPLICATION_SET.kind, owner, e.to_string()))?;

    let mut failed = None;
    for mut appset in sets {
        let key = ObjectKey::of(&appset)?;
        if key.namespace.as_deref() != Some(ctx.cfg.argocd_namespace.as_str()) {
            continue;
        }
        match key.name.strip_prefix(&prefix) {
            Some(cap) if !keep.contains(cap) => {}
            _ => continue,
        }
        let changed = elements(&mut appset.data).is_some_and(|list| set_entry(list, owner, None));
        if changed {
            debug!(appset = %key, "leaving capability ApplicationSet");
            first_err(&mut failed, write(ctx, log, &appset, &key, "entry removed").await);
        }
    }
    failed.map_or(Ok(()), Err)
}

pub async fn finalize(ctx: &StepContext<'_>, paas: &Paas, log: &mut StatusLog) -> StoreResult<()> {
    let owner = paas_name(paas)?;
    leave(ctx, owner, &BTreeSet::new(), log).await
}
