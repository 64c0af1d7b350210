use std::collections::BTreeSet;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::DynamicObject;
use paas_store::{ObjectKey, StoreResult};
use serde_json::{Map, Value};
use tracing::debug;

use super::manifest;
use crate::controller::StepContext;
use crate::controller::ensure::{EnsureMode, ensure as ensure_object};
use crate::crd::{Paas, PaasStatus};
use crate::kinds::CONFIG_MAP;
use crate::status::StatusLog;

fn whitelist_key(ctx: &StepContext<'_>) -> ObjectKey {
    ObjectKey::namespaced(&ctx.cfg.ldap.namespace, &ctx.cfg.ldap.configmap)
}

/// One query per line; blank lines are dropped.
fn parse(text: &str) -> BTreeSet<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn render(queries: &BTreeSet<String>) -> String {
    queries.iter().cloned().collect::<Vec<_>>().join("\n")
}

fn entries(cm: &DynamicObject, key: &str) -> BTreeSet<String> {
    cm.data
        .get("data")
        .and_then(|d| d.get(key))
        .and_then(Value::as_str)
        .map(parse)
        .unwrap_or_default()
}

/// Fetch the whitelist, treating a missing one as empty.
async fn fetch(
    ctx: &StepContext<'_>,
    log: &mut StatusLog,
) -> StoreResult<Option<DynamicObject>> {
    let key = whitelist_key(ctx);
    match ctx.store.get(&CONFIG_MAP, &key).await {
        Ok(cm) => Ok(Some(cm)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => {
            log.error("find", CONFIG_MAP.kind, key.to_string(), e.to_string());
            Err(e)
        }
    }
}

/// Merge the LDAP queries of the Paas groups into the whitelist read by the
/// external group sync. Entries of other Paas are kept.
pub async fn ensure(ctx: &StepContext<'_>, paas: &Paas, status: &mut PaasStatus) -> StoreResult<()> {
    let queries = paas.ldap_queries();
    if queries.is_empty() {
        return Ok(());
    }
    let log = &mut status.messages;
    let current = fetch(ctx, log).await?;
    let file = &ctx.cfg.ldap.key;

    let mut merged = current
        .as_ref()
        .map(|cm| entries(cm, file))
        .unwrap_or_default();
    merged.extend(queries);

    let mut data = current
        .as_ref()
        .and_then(|cm| cm.data.get("data"))
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_else(Map::new);
    data.insert(file.clone(), Value::String(render(&merged)));

    let key = whitelist_key(ctx);
    let meta = ObjectMeta {
        name: Some(key.name),
        namespace: key.namespace,
        ..Default::default()
    };
    let mut body = Map::new();
    body.insert("data".to_string(), Value::Object(data));
    let cm = manifest(&CONFIG_MAP, meta, Value::Object(body));
    ensure_object(ctx.store, log, &CONFIG_MAP, cm, EnsureMode::Converge)
        .await
        .map(|_| ())
}

/// Remove exactly `cleaned` from the whitelist.
pub async fn finalize(
    ctx: &StepContext<'_>,
    cleaned: &BTreeSet<String>,
    log: &mut StatusLog,
) -> StoreResult<()> {
    if cleaned.is_empty() {
        return Ok(());
    }
    let Some(mut cm) = fetch(ctx, log).await? else {
        return Ok(());
    };
    let file = &ctx.cfg.ldap.key;
    let before = entries(&cm, file);
    let after: BTreeSet<String> = before.difference(cleaned).cloned().collect();
    if after.len() == before.len() {
        return Ok(());
    }

    debug!(removed = before.len() - after.len(), "pruning ldap whitelist");
    if let Some(Value::Object(data)) = cm.data.get_mut("data") {
        data.insert(file.clone(), Value::String(render(&after)));
    }
    let target = whitelist_key(ctx).to_string();
    match ctx.store.update(&CONFIG_MAP, &cm).await {
        Ok(_) => {
            log.info("update", CONFIG_MAP.kind, target, "succeeded");
            Ok(())
        }
        Err(e) => {
            log.error("update", CONFIG_MAP.kind, target, e.to_string());
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelist_is_sorted_and_deduplicated() {
        let parsed = parse("b\n  a\n\nb\n");
        assert_eq!(render(&parsed), "a\nb");
    }
}
