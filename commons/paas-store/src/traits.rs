use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use kube::core::{DynamicObject, TypeMeta};

use crate::error::{StoreError, StoreResult};

/// Static description of an object kind the store can hold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceKind {
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    pub plural: &'static str,
    pub namespaced: bool,
}

impl ResourceKind {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn type_meta(&self) -> TypeMeta {
        TypeMeta {
            api_version: self.api_version(),
            kind: self.kind.to_string(),
        }
    }

    /// Stable identifier used to partition objects per kind.
    pub fn id(&self) -> String {
        format!("{}/{}", self.api_version(), self.kind)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind)
    }
}

/// Identity of an object within one kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn cluster(name: impl Into<String>) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    pub fn namespaced(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Derive the key from an object's metadata. An object without a name
    /// cannot be addressed and is rejected.
    pub fn of(obj: &DynamicObject) -> StoreResult<Self> {
        let name = obj
            .metadata
            .name
            .clone()
            .ok_or_else(|| StoreError::Invalid("object has no name".into()))?;
        Ok(Self {
            namespace: obj.metadata.namespace.clone(),
            name,
        })
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Equality-based label selector; the empty selector matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LabelSelector(BTreeMap<String, String>);

impl LabelSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn matches(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        self.0.iter().all(|(k, v)| {
            labels
                .and_then(|l| l.get(k))
                .map(|actual| actual == v)
                .unwrap_or(false)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Render as a `key=value,...` query string.
    pub fn to_query(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// A change observed on a watched kind. Delivery is at-least-once; consumers
/// must tolerate redelivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeNotification {
    pub kind: ResourceKind,
    pub key: ObjectKey,
    pub generation: Option<i64>,
    pub labels: BTreeMap<String, String>,
    pub deleting: bool,
    /// The object left the store; `obj` is its last known state.
    pub removed: bool,
}

impl ChangeNotification {
    pub fn from_object(kind: &ResourceKind, obj: &DynamicObject) -> Self {
        Self {
            kind: *kind,
            key: ObjectKey {
                namespace: obj.metadata.namespace.clone(),
                name: obj.metadata.name.clone().unwrap_or_default(),
            },
            generation: obj.metadata.generation,
            labels: obj.metadata.labels.clone().unwrap_or_default(),
            deleting: obj.metadata.deletion_timestamp.is_some(),
            removed: false,
        }
    }

    pub fn from_removed(kind: &ResourceKind, obj: &DynamicObject) -> Self {
        Self {
            removed: true,
            ..Self::from_object(kind, obj)
        }
    }
}

/// Generic CRUD + watch over named, typed, versioned objects with optimistic
/// concurrency. Writes carrying a stale `resourceVersion` fail with
/// [`StoreError::Conflict`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, kind: &ResourceKind, key: &ObjectKey) -> StoreResult<DynamicObject>;

    async fn list(
        &self,
        kind: &ResourceKind,
        selector: &LabelSelector,
    ) -> StoreResult<Vec<DynamicObject>>;

    async fn create(&self, kind: &ResourceKind, obj: &DynamicObject) -> StoreResult<DynamicObject>;

    /// Replace spec and metadata. Status is left untouched.
    async fn update(&self, kind: &ResourceKind, obj: &DynamicObject) -> StoreResult<DynamicObject>;

    /// Replace status only.
    async fn update_status(
        &self,
        kind: &ResourceKind,
        obj: &DynamicObject,
    ) -> StoreResult<DynamicObject>;

    /// Request deletion. Objects with pending finalizers are only marked.
    async fn delete(&self, kind: &ResourceKind, key: &ObjectKey) -> StoreResult<()>;

    fn watch(&self, kind: &ResourceKind) -> BoxStream<'static, ChangeNotification>;
}
