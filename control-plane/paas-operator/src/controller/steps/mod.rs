//! Concrete sub-reconcilers and their teardown counterparts.
//!
//! Each module owns one resource family. `ensure` converges it towards the
//! Paas spec; `finalize` removes what the Paas left behind.

pub mod app_project;
pub mod appsets;
pub mod cluster_quota;
pub mod cluster_roles;
pub mod groups;
pub mod ldap;
pub mod namespaces;
pub mod quota;
pub mod rolebindings;

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::DynamicObject;
use paas_store::{LabelSelector, ResourceKind, StoreError, StoreResult};
use serde::Serialize;
use serde_json::Value;

use crate::crd::{LABEL_PAAS, Paas};

/// Name of the Paas; steps only run on objects that have one.
pub(crate) fn paas_name(paas: &Paas) -> StoreResult<&str> {
    paas.metadata
        .name
        .as_deref()
        .ok_or_else(|| StoreError::Invalid("Paas has no name".into()))
}

pub(crate) fn owner_labels(paas: &str) -> BTreeMap<String, String> {
    [(LABEL_PAAS.to_string(), paas.to_string())].into()
}

/// Selects everything a Paas created.
pub(crate) fn owned_by(paas: &str) -> LabelSelector {
    LabelSelector::new().with(LABEL_PAAS, paas)
}

pub(crate) fn manifest(kind: &ResourceKind, metadata: ObjectMeta, data: Value) -> DynamicObject {
    DynamicObject {
        types: Some(kind.type_meta()),
        metadata,
        data,
    }
}

/// Lower a typed `k8s-openapi` object into the dynamic shape the store takes.
pub(crate) fn from_typed<T: Serialize>(obj: &T) -> StoreResult<DynamicObject> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

pub(crate) fn label<'a>(obj: &'a DynamicObject, key: &str) -> Option<&'a str> {
    obj.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(key))
        .map(String::as_str)
}

pub(crate) fn annotation<'a>(obj: &'a DynamicObject, key: &str) -> Option<&'a str> {
    obj.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(key))
        .map(String::as_str)
}

/// Keep the first error while letting later work continue.
pub(crate) fn first_err(slot: &mut Option<StoreError>, res: StoreResult<()>) {
    if let Err(e) = res {
        slot.get_or_insert(e);
    }
}

/// List what `owner` created of `kind`, mirroring a failed lookup into `log`.
pub(crate) async fn list_owned(
    ctx: &super::StepContext<'_>,
    log: &mut crate::status::StatusLog,
    kind: &ResourceKind,
    owner: &str,
) -> StoreResult<Vec<DynamicObject>> {
    ctx.store
        .list(kind, &owned_by(owner))
        .await
        .inspect_err(|e| log.error("list", kind.kind, owner, e.to_string()))
}
