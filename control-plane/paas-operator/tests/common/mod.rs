#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use envconfig::Envconfig;
use kube::core::DynamicObject;
use paas_operator::config::OperatorConfig;
use paas_operator::controller::Reconciler;
use paas_operator::crd::{Paas, PaasCapability, PaasGroup, PaasSpec};
use paas_operator::kinds::{APPLICATION_SET, CLUSTER_ROLE_BINDING, CONFIG_MAP, PAAS};
use paas_store::memory::MemoryObjectStore;
use paas_store::{ObjectKey, ObjectStore};
use serde_json::{Value, json};

pub const NAME: &str = "demo";

pub fn quota(cpu: &str) -> BTreeMap<String, String> {
    [("limits.cpu".to_string(), cpu.to_string())].into()
}

pub fn group(query: Option<&str>) -> PaasGroup {
    PaasGroup {
        query: query.map(str::to_string),
        users: vec![],
    }
}

/// Two plain namespaces, one enabled capability and two LDAP-backed groups.
pub fn sample_paas(name: &str) -> Paas {
    let mut spec = PaasSpec {
        requestor: "platform-team".into(),
        namespaces: vec!["dev".into(), "test".into()],
        quota: quota("4"),
        ..Default::default()
    };
    spec.capabilities.insert(
        "argocd".into(),
        PaasCapability {
            enabled: true,
            quota: quota("2"),
        },
    );
    spec.groups
        .insert("ops".into(), group(Some("CN=ops,OU=groups,DC=corp")));
    spec.groups
        .insert("devs".into(), group(Some("CN=devs,OU=groups,DC=corp")));
    Paas::new(name, spec)
}

pub const CONTROLLER_ACCOUNT: &str = "argocd-argocd-application-controller";

/// Defaults plus one extra cluster role for the argocd capability.
pub fn config() -> OperatorConfig {
    let env: HashMap<String, String> = HashMap::from([(
        "PAAS_CAPABILITY_CLUSTER_ROLES".to_string(),
        format!("argocd={}:monitoring-edit", CONTROLLER_ACCOUNT),
    )]);
    OperatorConfig::init_from_hashmap(&env).expect("test config")
}

/// The capability ApplicationSet the platform provides ahead of any Paas.
pub async fn seed(store: &MemoryObjectStore, cfg: &OperatorConfig) {
    let appset: DynamicObject = serde_json::from_value(json!({
        "apiVersion": "argoproj.io/v1alpha1",
        "kind": "ApplicationSet",
        "metadata": {
            "name": format!("{}-argocd", cfg.capabilities.appset_prefix),
            "namespace": cfg.argocd_namespace,
        },
        "spec": {
            "generators": [{ "list": { "elements": [] } }],
            "template": { "metadata": { "name": "{{paas}}-argocd" } },
        }
    }))
    .expect("appset manifest");
    store
        .create(&APPLICATION_SET, &appset)
        .await
        .expect("seed ApplicationSet");
}

/// `paas` values listed by the argocd capability ApplicationSet.
pub async fn appset_entries(store: &MemoryObjectStore, cfg: &OperatorConfig) -> Vec<String> {
    let key = ObjectKey::namespaced(
        &cfg.argocd_namespace,
        format!("{}-argocd", cfg.capabilities.appset_prefix),
    );
    let appset = store.peek(&APPLICATION_SET, &key).await.expect("ApplicationSet");
    appset.data["spec"]["generators"][0]["list"]["elements"]
        .as_array()
        .map(|elements| {
            elements
                .iter()
                .filter_map(|e| e["paas"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Namespaces of the service accounts bound by an extra cluster role binding.
pub async fn bound_namespaces(store: &MemoryObjectStore, role: &str) -> Option<Vec<String>> {
    let crb = store
        .peek(&CLUSTER_ROLE_BINDING, &ObjectKey::cluster(format!("paas-{}", role)))
        .await?;
    Some(
        crb.data["subjects"]
            .as_array()
            .map(|subjects| {
                subjects
                    .iter()
                    .filter_map(|s| s.get("namespace").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    )
}

pub struct Harness {
    pub store: MemoryObjectStore,
    pub cfg: OperatorConfig,
    pub reconciler: Reconciler,
}

impl Harness {
    pub async fn new() -> Self {
        let store = MemoryObjectStore::new();
        let cfg = config();
        seed(&store, &cfg).await;
        let shared: Arc<dyn ObjectStore> = Arc::new(store.clone());
        let reconciler = Reconciler::new(shared, cfg.clone());
        Self {
            store,
            cfg,
            reconciler,
        }
    }

    pub async fn submit(&self, paas: &Paas) {
        self.store
            .create(&PAAS, &paas.to_dynamic().expect("to dynamic"))
            .await
            .expect("create Paas");
    }

    pub async fn paas(&self, name: &str) -> Option<Paas> {
        self.store
            .peek(&PAAS, &ObjectKey::cluster(name))
            .await
            .map(|o| Paas::from_dynamic(&o).expect("decode Paas"))
    }

    pub async fn request_delete(&self, name: &str) {
        self.store
            .delete(&PAAS, &ObjectKey::cluster(name))
            .await
            .expect("delete Paas");
    }
}

/// Current content of the LDAP whitelist, if the ConfigMap exists.
pub async fn whitelist(store: &MemoryObjectStore, cfg: &OperatorConfig) -> Option<String> {
    let key = ObjectKey::namespaced(&cfg.ldap.namespace, &cfg.ldap.configmap);
    store.peek(&CONFIG_MAP, &key).await.map(|cm| {
        cm.data["data"][cfg.ldap.key.as_str()]
            .as_str()
            .unwrap_or_default()
            .to_string()
    })
}
