use std::collections::BTreeMap;

use kube::core::DynamicObject;
use paas_store::{ObjectKey, ObjectStore, ResourceKind, StoreError, StoreResult};
use serde_json::Value;
use tracing::{debug, warn};

use crate::status::StatusLog;

/// How an existing object is treated when it is found.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnsureMode {
    /// Leave whatever is there untouched.
    CreateOnly,
    /// Bring desired fields, labels and annotations into the existing object.
    Converge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Ensured {
    Created,
    AlreadyExisted,
    Updated,
}

/// Read-then-act upsert. Every outcome is mirrored into `log`.
///
/// A lookup failure other than not-found is reported and returned without
/// attempting a create.
pub async fn ensure(
    store: &dyn ObjectStore,
    log: &mut StatusLog,
    kind: &ResourceKind,
    desired: DynamicObject,
    mode: EnsureMode,
) -> StoreResult<Ensured> {
    let key = ObjectKey::of(&desired)?;
    let target = key.to_string();

    let existing = match store.get(kind, &key).await {
        Ok(obj) => obj,
        Err(e) if e.is_not_found() => {
            return match store.create(kind, &desired).await {
                Ok(_) => {
                    debug!(kind = kind.kind, %target, "ensure: created");
                    log.info("create", kind.kind, &target, "succeeded");
                    Ok(Ensured::Created)
                }
                Err(e) => {
                    warn!(kind = kind.kind, %target, error = %e, "ensure: create failed");
                    log.error("create", kind.kind, &target, e.to_string());
                    Err(e)
                }
            };
        }
        Err(e) => {
            warn!(kind = kind.kind, %target, error = %e, "ensure: lookup failed");
            log.error("find", kind.kind, &target, e.to_string());
            return Err(e);
        }
    };

    if mode == EnsureMode::CreateOnly || is_converged(&existing, &desired) {
        log.info("create", kind.kind, &target, "already existed");
        return Ok(Ensured::AlreadyExisted);
    }

    let next = converge(existing, &desired);
    match store.update(kind, &next).await {
        Ok(_) => {
            debug!(kind = kind.kind, %target, "ensure: updated");
            log.info("update", kind.kind, &target, "succeeded");
            Ok(Ensured::Updated)
        }
        Err(e) => {
            warn!(kind = kind.kind, %target, error = %e, "ensure: update failed");
            log.error("update", kind.kind, &target, e.to_string());
            Err(e)
        }
    }
}

fn is_subset(
    wanted: Option<&BTreeMap<String, String>>,
    actual: Option<&BTreeMap<String, String>>,
) -> bool {
    wanted
        .map(|w| {
            w.iter()
                .all(|(k, v)| actual.and_then(|a| a.get(k)) == Some(v))
        })
        .unwrap_or(true)
}

/// Desired top-level fields must match exactly; fields the server adds are
/// ignored.
fn is_converged(existing: &DynamicObject, desired: &DynamicObject) -> bool {
    let fields_match = match &desired.data {
        Value::Object(fields) => fields
            .iter()
            .filter(|(k, _)| k.as_str() != "status")
            .all(|(k, v)| existing.data.get(k) == Some(v)),
        _ => true,
    };
    fields_match
        && is_subset(
            desired.metadata.labels.as_ref(),
            existing.metadata.labels.as_ref(),
        )
        && is_subset(
            desired.metadata.annotations.as_ref(),
            existing.metadata.annotations.as_ref(),
        )
}

fn converge(mut existing: DynamicObject, desired: &DynamicObject) -> DynamicObject {
    if let Some(labels) = &desired.metadata.labels {
        existing
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(labels.clone());
    }
    if let Some(annotations) = &desired.metadata.annotations {
        existing
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .extend(annotations.clone());
    }
    match (&mut existing.data, &desired.data) {
        (Value::Object(current), Value::Object(fields)) => {
            for (k, v) in fields.iter().filter(|(k, _)| k.as_str() != "status") {
                current.insert(k.clone(), v.clone());
            }
        }
        (data, Value::Object(_)) => *data = desired.data.clone(),
        _ => {}
    }
    existing
}

/// Delete one object, mirroring the outcome into `log`. An object that is
/// already gone counts as deleted.
pub async fn remove(
    store: &dyn ObjectStore,
    log: &mut StatusLog,
    kind: &ResourceKind,
    key: &ObjectKey,
) -> StoreResult<()> {
    let target = key.to_string();
    match store.delete(kind, key).await {
        Ok(()) => {
            debug!(kind = kind.kind, %target, "remove: deleted");
            log.info("delete", kind.kind, &target, "succeeded");
            Ok(())
        }
        Err(StoreError::NotFound(_)) => {
            log.info("delete", kind.kind, &target, "already gone");
            Ok(())
        }
        Err(e) => {
            warn!(kind = kind.kind, %target, error = %e, "remove: delete failed");
            log.error("delete", kind.kind, &target, e.to_string());
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paas_store::memory::{Fault, FaultKind, MemoryObjectStore, Verb};
    use serde_json::json;

    const THING: ResourceKind = ResourceKind {
        group: "example.io",
        version: "v1",
        kind: "Thing",
        plural: "things",
        namespaced: false,
    };

    fn thing(size: i64) -> DynamicObject {
        serde_json::from_value(json!({
            "apiVersion": "example.io/v1",
            "kind": "Thing",
            "metadata": { "name": "t1", "labels": { "owner": "demo" } },
            "spec": { "size": size }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn creates_then_reports_existing() {
        let store = MemoryObjectStore::new();
        let mut log = StatusLog::default();

        let first = ensure(&store, &mut log, &THING, thing(1), EnsureMode::CreateOnly).await;
        assert_eq!(first.unwrap(), Ensured::Created);
        let second = ensure(&store, &mut log, &THING, thing(2), EnsureMode::CreateOnly).await;
        assert_eq!(second.unwrap(), Ensured::AlreadyExisted);

        assert_eq!(log.messages()[0].detail, "succeeded");
        assert_eq!(log.messages()[1].detail, "already existed");
        assert_eq!(store.count(Verb::Create, &THING).await, 1);
    }

    #[tokio::test]
    async fn converge_updates_only_on_drift() {
        let store = MemoryObjectStore::new();
        let mut log = StatusLog::default();
        ensure(&store, &mut log, &THING, thing(1), EnsureMode::Converge).await.unwrap();

        let same = ensure(&store, &mut log, &THING, thing(1), EnsureMode::Converge).await;
        assert_eq!(same.unwrap(), Ensured::AlreadyExisted);

        let drift = ensure(&store, &mut log, &THING, thing(5), EnsureMode::Converge).await;
        assert_eq!(drift.unwrap(), Ensured::Updated);
        let stored = store.peek(&THING, &ObjectKey::cluster("t1")).await.unwrap();
        assert_eq!(stored.data["spec"]["size"], json!(5));
        assert_eq!(store.count(Verb::Update, &THING).await, 1);
    }

    #[tokio::test]
    async fn lookup_error_never_creates() {
        let store = MemoryObjectStore::new();
        store
            .inject_fault(Fault::new(Verb::Get, "Thing", FaultKind::Forbidden))
            .await;
        let mut log = StatusLog::default();

        let res = ensure(&store, &mut log, &THING, thing(1), EnsureMode::CreateOnly).await;
        assert!(matches!(res, Err(StoreError::Forbidden(_))));
        assert_eq!(store.count(Verb::Create, &THING).await, 0);
        assert_eq!(log.messages()[0].operation, "find");
        assert!(log.has_errors());
    }

    #[tokio::test]
    async fn failed_create_is_reported() {
        let store = MemoryObjectStore::new();
        store
            .inject_fault(Fault::new(Verb::Create, "Thing", FaultKind::Unavailable))
            .await;
        let mut log = StatusLog::default();

        let res = ensure(&store, &mut log, &THING, thing(1), EnsureMode::Converge).await;
        assert!(res.is_err());
        assert_eq!(log.messages()[0].operation, "create");
        assert_eq!(log.messages()[0].level, crate::status::MessageLevel::Error);
    }

    #[tokio::test]
    async fn remove_treats_missing_as_done() {
        let store = MemoryObjectStore::new();
        let mut log = StatusLog::default();
        remove(&store, &mut log, &THING, &ObjectKey::cluster("ghost"))
            .await
            .unwrap();
        assert_eq!(log.messages()[0].detail, "already gone");
    }
}
