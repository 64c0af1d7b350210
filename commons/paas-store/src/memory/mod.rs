use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::DynamicObject;
use serde_json::Value;
use tokio::sync::{RwLock, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tracing::trace;

use crate::error::{StoreError, StoreResult};
use crate::traits::*;

const EVENT_BUFFER: usize = 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Get,
    List,
    Create,
    Update,
    UpdateStatus,
    Delete,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verb::Get => "get",
            Verb::List => "list",
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::UpdateStatus => "update_status",
            Verb::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// One attempted store operation, recorded before any injected fault fires.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JournalEntry {
    pub verb: Verb,
    pub kind: &'static str,
    pub key: Option<ObjectKey>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultKind {
    Conflict,
    Forbidden,
    Unavailable,
}

/// Fails every matching operation until cleared.
#[derive(Clone, Debug)]
pub struct Fault {
    pub verb: Verb,
    pub kind: &'static str,
    /// `None` matches every object of the kind.
    pub name: Option<String>,
    pub error: FaultKind,
}

impl Fault {
    pub fn new(verb: Verb, kind: &'static str, error: FaultKind) -> Self {
        Self {
            verb,
            kind,
            name: None,
            error,
        }
    }

    pub fn on(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    fn matches(&self, verb: Verb, kind: &str, key: Option<&ObjectKey>) -> bool {
        self.verb == verb
            && self.kind == kind
            && match (&self.name, key) {
                (None, _) => true,
                (Some(n), Some(k)) => *n == k.name,
                (Some(_), None) => false,
            }
    }

    fn to_error(&self, target: &str) -> StoreError {
        match self.error {
            FaultKind::Conflict => StoreError::Conflict(target.to_string()),
            FaultKind::Forbidden => StoreError::Forbidden(target.to_string()),
            FaultKind::Unavailable => {
                StoreError::Backend(format!("injected failure on {}", target))
            }
        }
    }
}

type Slot = (String, ObjectKey);

#[derive(Default)]
struct Inner {
    objects: BTreeMap<Slot, DynamicObject>,
    version: u64,
    journal: Vec<JournalEntry>,
    faults: Vec<Fault>,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    /// Journal the attempt, then fail it if a fault matches.
    fn attempt(
        &mut self,
        verb: Verb,
        kind: &ResourceKind,
        key: Option<&ObjectKey>,
    ) -> StoreResult<()> {
        self.journal.push(JournalEntry {
            verb,
            kind: kind.kind,
            key: key.cloned(),
        });
        let target = key
            .map(|k| format!("{} {}", kind.kind, k))
            .unwrap_or_else(|| kind.kind.to_string());
        match self.faults.iter().find(|f| f.matches(verb, kind.kind, key)) {
            Some(fault) => Err(fault.to_error(&target)),
            None => Ok(()),
        }
    }
}

/// In-process object store with Kubernetes-like semantics: resource versions,
/// generations, finalizer-gated deletion and status kept apart from spec.
#[derive(Clone)]
pub struct MemoryObjectStore {
    inner: Arc<RwLock<Inner>>,
    events: broadcast::Sender<ChangeNotification>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            events,
        }
    }

    pub async fn inject_fault(&self, fault: Fault) {
        self.inner.write().await.faults.push(fault);
    }

    pub async fn clear_faults(&self) {
        self.inner.write().await.faults.clear();
    }

    pub async fn journal(&self) -> Vec<JournalEntry> {
        self.inner.read().await.journal.clone()
    }

    pub async fn clear_journal(&self) {
        self.inner.write().await.journal.clear();
    }

    /// Number of journaled attempts of `verb` against `kind`.
    pub async fn count(&self, verb: Verb, kind: &ResourceKind) -> usize {
        self.inner
            .read()
            .await
            .journal
            .iter()
            .filter(|e| e.verb == verb && e.kind == kind.kind)
            .count()
    }

    /// Direct read that bypasses the journal and faults.
    pub async fn peek(&self, kind: &ResourceKind, key: &ObjectKey) -> Option<DynamicObject> {
        let slot = slot_of(kind, key);
        self.inner.read().await.objects.get(&slot).cloned()
    }

    /// All objects of a kind, bypassing the journal and faults.
    pub async fn snapshot(&self, kind: &ResourceKind) -> Vec<DynamicObject> {
        let id = kind.id();
        self.inner
            .read()
            .await
            .objects
            .iter()
            .filter(|((k, _), _)| *k == id)
            .map(|(_, o)| o.clone())
            .collect()
    }

    fn notify(&self, kind: &ResourceKind, obj: &DynamicObject) {
        // No receivers is fine.
        let _ = self.events.send(ChangeNotification::from_object(kind, obj));
    }

    fn notify_removed(&self, kind: &ResourceKind, obj: &DynamicObject) {
        let _ = self.events.send(ChangeNotification::from_removed(kind, obj));
    }
}

fn slot_of(kind: &ResourceKind, key: &ObjectKey) -> Slot {
    let key = if kind.namespaced {
        key.clone()
    } else {
        ObjectKey::cluster(key.name.clone())
    };
    (kind.id(), key)
}

fn normalized_key(kind: &ResourceKind, obj: &DynamicObject) -> StoreResult<ObjectKey> {
    let key = ObjectKey::of(obj)?;
    if kind.namespaced && key.namespace.is_none() {
        return Err(StoreError::Invalid(format!(
            "{} {} requires a namespace",
            kind.kind, key.name
        )));
    }
    Ok(if kind.namespaced {
        key
    } else {
        ObjectKey::cluster(key.name)
    })
}

fn check_version(
    incoming: &DynamicObject,
    current: &DynamicObject,
    target: &str,
) -> StoreResult<()> {
    match incoming.metadata.resource_version.as_deref() {
        Some(rv) if Some(rv) != current.metadata.resource_version.as_deref() => {
            Err(StoreError::Conflict(target.to_string()))
        }
        _ => Ok(()),
    }
}

fn without_status(data: &Value) -> Value {
    let mut data = data.clone();
    if let Value::Object(map) = &mut data {
        map.remove("status");
    }
    data
}

fn status_of(data: &Value) -> Option<Value> {
    data.get("status").filter(|s| !s.is_null()).cloned()
}

fn set_status(data: &mut Value, status: Option<Value>) {
    if let Value::Object(map) = data {
        match status {
            Some(s) => {
                map.insert("status".to_string(), s);
            }
            None => {
                map.remove("status");
            }
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, kind: &ResourceKind, key: &ObjectKey) -> StoreResult<DynamicObject> {
        let mut inner = self.inner.write().await;
        inner.attempt(Verb::Get, kind, Some(key))?;
        inner
            .objects
            .get(&slot_of(kind, key))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{} {}", kind.kind, key)))
    }

    async fn list(
        &self,
        kind: &ResourceKind,
        selector: &LabelSelector,
    ) -> StoreResult<Vec<DynamicObject>> {
        let mut inner = self.inner.write().await;
        inner.attempt(Verb::List, kind, None)?;
        let id = kind.id();
        Ok(inner
            .objects
            .iter()
            .filter(|((k, _), o)| *k == id && selector.matches(o.metadata.labels.as_ref()))
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn create(&self, kind: &ResourceKind, obj: &DynamicObject) -> StoreResult<DynamicObject> {
        let key = normalized_key(kind, obj)?;
        let mut inner = self.inner.write().await;
        inner.attempt(Verb::Create, kind, Some(&key))?;
        let slot = slot_of(kind, &key);
        if inner.objects.contains_key(&slot) {
            return Err(StoreError::AlreadyExists(format!("{} {}", kind.kind, key)));
        }
        let version = inner.next_version();
        let mut stored = obj.clone();
        stored.types = Some(kind.type_meta());
        stored.metadata.namespace = key.namespace.clone();
        stored.metadata.resource_version = Some(version.clone());
        stored.metadata.uid = Some(format!("mem-{}", version));
        stored.metadata.generation = Some(1);
        stored.metadata.creation_timestamp = Some(Time(Utc::now()));
        stored.metadata.deletion_timestamp = None;
        trace!(kind = kind.kind, %key, "memory store: create");
        inner.objects.insert(slot, stored.clone());
        drop(inner);
        self.notify(kind, &stored);
        Ok(stored)
    }

    async fn update(&self, kind: &ResourceKind, obj: &DynamicObject) -> StoreResult<DynamicObject> {
        let key = normalized_key(kind, obj)?;
        let target = format!("{} {}", kind.kind, key);
        let mut inner = self.inner.write().await;
        inner.attempt(Verb::Update, kind, Some(&key))?;
        let slot = slot_of(kind, &key);
        let current = inner
            .objects
            .get(&slot)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(target.clone()))?;
        check_version(obj, &current, &target)?;

        let finalizers_empty = obj
            .metadata
            .finalizers
            .as_ref()
            .map(|f| f.is_empty())
            .unwrap_or(true);
        if current.metadata.deletion_timestamp.is_some() && finalizers_empty {
            trace!(kind = kind.kind, %key, "memory store: last finalizer removed; purging");
            inner.objects.remove(&slot);
            drop(inner);
            self.notify_removed(kind, &current);
            return Ok(current);
        }

        let mut stored = obj.clone();
        stored.types = Some(kind.type_meta());
        set_status(&mut stored.data, status_of(&current.data));
        stored.metadata.namespace = key.namespace.clone();
        stored.metadata.uid = current.metadata.uid.clone();
        stored.metadata.creation_timestamp = current.metadata.creation_timestamp.clone();
        stored.metadata.deletion_timestamp = current.metadata.deletion_timestamp.clone();
        let generation = current.metadata.generation.unwrap_or(1);
        stored.metadata.generation =
            if without_status(&stored.data) != without_status(&current.data) {
                Some(generation + 1)
            } else {
                Some(generation)
            };
        stored.metadata.resource_version = Some(inner.next_version());
        inner.objects.insert(slot, stored.clone());
        drop(inner);
        self.notify(kind, &stored);
        Ok(stored)
    }

    async fn update_status(
        &self,
        kind: &ResourceKind,
        obj: &DynamicObject,
    ) -> StoreResult<DynamicObject> {
        let key = normalized_key(kind, obj)?;
        let target = format!("{} {}", kind.kind, key);
        let mut inner = self.inner.write().await;
        inner.attempt(Verb::UpdateStatus, kind, Some(&key))?;
        let slot = slot_of(kind, &key);
        let mut stored = inner
            .objects
            .get(&slot)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(target.clone()))?;
        check_version(obj, &stored, &target)?;
        set_status(&mut stored.data, status_of(&obj.data));
        stored.metadata.resource_version = Some(inner.next_version());
        inner.objects.insert(slot, stored.clone());
        drop(inner);
        self.notify(kind, &stored);
        Ok(stored)
    }

    async fn delete(&self, kind: &ResourceKind, key: &ObjectKey) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner.attempt(Verb::Delete, kind, Some(key))?;
        let slot = slot_of(kind, key);
        let Some(current) = inner.objects.get(&slot).cloned() else {
            return Err(StoreError::NotFound(format!("{} {}", kind.kind, key)));
        };
        let pending = current
            .metadata
            .finalizers
            .as_ref()
            .map(|f| !f.is_empty())
            .unwrap_or(false);
        if !pending {
            trace!(kind = kind.kind, %key, "memory store: delete");
            inner.objects.remove(&slot);
            drop(inner);
            self.notify_removed(kind, &current);
            return Ok(());
        }
        if current.metadata.deletion_timestamp.is_some() {
            return Ok(());
        }
        let mut marked = current;
        marked.metadata.deletion_timestamp = Some(Time(Utc::now()));
        marked.metadata.generation = Some(marked.metadata.generation.unwrap_or(1) + 1);
        marked.metadata.resource_version = Some(inner.next_version());
        trace!(kind = kind.kind, %key, "memory store: finalizers pending; marked for deletion");
        inner.objects.insert(slot, marked.clone());
        drop(inner);
        self.notify(kind, &marked);
        Ok(())
    }

    fn watch(&self, kind: &ResourceKind) -> BoxStream<'static, ChangeNotification> {
        let id = kind.id();
        BroadcastStream::new(self.events.subscribe())
            .filter_map(move |item| {
                let keep = match item {
                    Ok(n) if n.kind.id() == id => Some(n),
                    _ => None,
                };
                async move { keep }
            })
            .boxed()
    }
}
