use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use paas_store::{ObjectKey, StoreError, StoreResult};
use serde_json::json;
use tracing::debug;

use super::{annotation, first_err, label, manifest, owned_by, owner_labels, paas_name};
use crate::controller::StepContext;
use crate::controller::ensure::{EnsureMode, ensure as ensure_object, remove};
use crate::crd::{ANNOTATION_LDAP_QUERY, LABEL_PAAS, Paas, PaasGroup, PaasStatus};
use crate::kinds::GROUP;
use crate::status::StatusLog;

fn desired(owner: &str, name: &str, group: &PaasGroup) -> kube::core::DynamicObject {
    let meta = ObjectMeta {
        name: Some(name.to_string()),
        labels: Some(owner_labels(owner)),
        annotations: group
            .query
            .as_ref()
            .map(|q| BTreeMap::from([(ANNOTATION_LDAP_QUERY.to_string(), q.clone())])),
        ..Default::default()
    };
    manifest(&GROUP, meta, json!({ "users": group.users }))
}

pub async fn ensure(ctx: &StepContext<'_>, paas: &Paas, status: &mut PaasStatus) -> StoreResult<()> {
    let owner = paas_name(paas)?;
    for (name, group) in &paas.spec.groups {
        ensure_object(
            ctx.store,
            &mut status.messages,
            &GROUP,
            desired(owner, name, group),
            EnsureMode::CreateOnly,
        )
        .await?;
    }
    Ok(())
}

/// Delete the groups owned by the Paas.
///
/// Returns the LDAP queries of every group that is now gone, alongside the
/// first failure. A group that was already absent counts as gone; a group
/// that failed to delete does not.
pub async fn finalize(
    ctx: &StepContext<'_>,
    paas: &Paas,
    log: &mut StatusLog,
) -> (BTreeSet<String>, StoreResult<()>) {
    let mut cleaned = BTreeSet::new();
    let owner = match paas_name(paas) {
        Ok(owner) => owner,
        Err(e) => return (cleaned, Err(e)),
    };
    let mut failed: Option<StoreError> = None;

    // name -> query of the groups this Paas owns
    let mut owned: BTreeMap<String, Option<String>> = BTreeMap::new();
    match ctx.store.list(&GROUP, &owned_by(owner)).await {
        Ok(items) => {
            for g in items {
                if let Some(name) = g.metadata.name.clone() {
                    let query = annotation(&g, ANNOTATION_LDAP_QUERY)
                        .map(str::to_string)
                        .or_else(|| paas.spec.groups.get(&name).and_then(|s| s.query.clone()));
                    owned.insert(name, query);
                }
            }
        }
        Err(e) => {
            log.error("list", GROUP.kind, owner, e.to_string());
            failed = Some(e);
        }
    }

    // Spec groups the listing did not return: either already gone, owned by
    // someone else, or missed because the listing failed.
    for (name, group) in &paas.spec.groups {
        if owned.contains_key(name) {
            continue;
        }
        match ctx.store.get(&GROUP, &ObjectKey::cluster(name)).await {
            Ok(obj) if label(&obj, LABEL_PAAS) == Some(owner) => {
                owned.insert(name.clone(), group.query.clone());
            }
            Ok(_) => {
                debug!(group = %name, "group not owned by this Paas; leaving it");
                log.info("delete", GROUP.kind, name, "owned elsewhere, skipped");
            }
            Err(e) if e.is_not_found() => cleaned.extend(group.query.clone()),
            Err(e) => {
                log.error("find", GROUP.kind, name, e.to_string());
                first_err(&mut failed, Err(e));
            }
        }
    }

    for (name, query) in owned {
        match remove(ctx.store, log, &GROUP, &ObjectKey::cluster(&name)).await {
            Ok(()) => cleaned.extend(query),
            Err(e) => first_err(&mut failed, Err(e)),
        }
    }

    (cleaned, failed.map_or(Ok(()), Err))
}
