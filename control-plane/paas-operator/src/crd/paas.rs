use kube::CustomResource;
use kube::core::DynamicObject;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::status::StatusLog;

/// Labels every managed resource with the Paas that owns it.
pub const LABEL_PAAS: &str = "paas.cpet.belastingdienst.nl/paas";
/// Ties a namespace to the quota set that selects it.
pub const LABEL_QUOTA: &str = "paas.cpet.belastingdienst.nl/quota";
/// Marks capability namespaces for the shared cluster-wide quota.
pub const LABEL_CAPABILITY: &str = "paas.cpet.belastingdienst.nl/capability";
/// Present on cluster-wide quotas; value is the capability.
pub const LABEL_CLUSTER_QUOTA: &str = "paas.cpet.belastingdienst.nl/cluster-quota";
/// Comma separated Paas names sharing a cluster-wide quota.
pub const ANNOTATION_MEMBERS: &str = "paas.cpet.belastingdienst.nl/members";
/// LDAP query a group is synchronised from.
pub const ANNOTATION_LDAP_QUERY: &str = "paas.cpet.belastingdienst.nl/ldap-query";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "cpet.belastingdienst.nl",
    version = "v1alpha1",
    kind = "Paas",
    plural = "paas",
    shortname = "paas",
    status = "PaasStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct PaasSpec {
    /// Team or service that requested this Paas
    pub requestor: String,
    /// Groups granted admin access; keyed by group name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<String, PaasGroup>,
    /// Namespace suffixes; each becomes `<paas>-<suffix>`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub capabilities: BTreeMap<String, PaasCapability>,
    /// Hard limits applied to each plain namespace set
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub quota: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaasGroup {
    /// LDAP query the group is synchronised from; absent for static groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaasCapability {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub quota: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaasStatus {
    #[serde(default)]
    pub messages: StatusLog,
    /// Hard limits per quota set, written by the quota step
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quota: Vec<QuotaSummary>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct QuotaSummary {
    pub name: String,
    pub hard: BTreeMap<String, String>,
}

/// A namespace the Paas asks for, together with the quota that governs it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespaceSet {
    /// Full namespace name, also used as the quota set name
    pub name: String,
    pub quota: BTreeMap<String, String>,
    pub capability: Option<String>,
}

impl Paas {
    pub fn from_dynamic(obj: &DynamicObject) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(obj)?)
    }

    pub fn to_dynamic(&self) -> Result<DynamicObject, serde_json::Error> {
        serde_json::from_value(serde_json::to_value(self)?)
    }

    pub fn enabled_capabilities(&self) -> impl Iterator<Item = (&String, &PaasCapability)> {
        self.spec.capabilities.iter().filter(|(_, c)| c.enabled)
    }

    /// Plain namespaces first, then one per enabled capability. Duplicate
    /// names keep their first occurrence.
    pub fn namespace_sets(&self) -> Vec<NamespaceSet> {
        let base = self.metadata.name.clone().unwrap_or_default();
        let mut seen = BTreeSet::new();
        let plain = self.spec.namespaces.iter().map(|suffix| NamespaceSet {
            name: format!("{}-{}", base, suffix),
            quota: self.spec.quota.clone(),
            capability: None,
        });
        let caps = self.enabled_capabilities().map(|(cap, c)| NamespaceSet {
            name: format!("{}-{}", base, cap),
            quota: c.quota.clone(),
            capability: Some(cap.clone()),
        });
        plain
            .chain(caps)
            .filter(|set| seen.insert(set.name.clone()))
            .collect()
    }

    pub fn ldap_queries(&self) -> BTreeSet<String> {
        self.spec
            .groups
            .values()
            .filter_map(|g| g.query.clone())
            .collect()
    }

    pub fn has_finalizer(&self, token: &str) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .map(|f| f.iter().any(|x| x == token))
            .unwrap_or(false)
    }

    pub fn add_finalizer(&mut self, token: &str) {
        if !self.has_finalizer(token) {
            self.metadata
                .finalizers
                .get_or_insert_with(Vec::new)
                .push(token.to_string());
        }
    }

    pub fn remove_finalizer(&mut self, token: &str) {
        if let Some(finals) = self.metadata.finalizers.as_mut() {
            finals.retain(|f| f != token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Paas {
        let mut spec = PaasSpec {
            requestor: "team".into(),
            namespaces: vec!["dev".into(), "test".into(), "dev".into()],
            quota: [("limits.cpu".to_string(), "4".to_string())].into(),
            ..Default::default()
        };
        spec.capabilities.insert(
            "argocd".into(),
            PaasCapability {
                enabled: true,
                quota: [("limits.cpu".to_string(), "2".to_string())].into(),
            },
        );
        spec.capabilities.insert("tekton".into(), PaasCapability::default());
        spec.groups.insert(
            "admins".into(),
            PaasGroup {
                query: Some("CN=admins,OU=org".into()),
                users: vec![],
            },
        );
        Paas::new("demo", spec)
    }

    #[test]
    fn namespace_sets_cover_plain_and_enabled_capabilities() {
        let sets = sample().namespace_sets();
        let names: Vec<_> = sets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["demo-dev", "demo-test", "demo-argocd"]);
        assert_eq!(sets[2].capability.as_deref(), Some("argocd"));
        assert_eq!(sets[2].quota.get("limits.cpu").map(String::as_str), Some("2"));
    }

    #[test]
    fn finalizer_helpers_are_idempotent() {
        let mut paas = sample();
        paas.add_finalizer("x/y");
        paas.add_finalizer("x/y");
        assert_eq!(paas.metadata.finalizers.as_ref().map(Vec::len), Some(1));
        paas.remove_finalizer("x/y");
        assert!(!paas.has_finalizer("x/y"));
    }

    #[test]
    fn dynamic_conversion_keeps_spec_and_status() {
        let mut paas = sample();
        let mut status = PaasStatus::default();
        status.messages.info("reconcile", "Paas", "demo", "succeeded");
        paas.status = Some(status);

        let obj = paas.to_dynamic().unwrap();
        assert_eq!(obj.types.as_ref().map(|t| t.kind.as_str()), Some("Paas"));
        let back = Paas::from_dynamic(&obj).unwrap();
        assert_eq!(back.spec.namespaces.len(), 3);
        assert_eq!(back.status.unwrap().messages.len(), 1);
        assert_eq!(paas.ldap_queries().len(), 1);
    }
}
