use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use envconfig::Envconfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreBackend {
    Kube,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "kube" | "k8s" | "kubernetes" => Ok(StoreBackend::Kube),
            "memory" | "mem" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend: {}", other)),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Kube => write!(f, "kube"),
            StoreBackend::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct OperatorConfig {
    /// Delay before a failed pass is attempted again.
    /// Env: PAAS_REQUEUE_AFTER_SECS
    #[envconfig(from = "PAAS_REQUEUE_AFTER_SECS", default = "10")]
    pub requeue_after_secs: u64,

    /// Token recorded on every Paas this operator has started managing.
    #[envconfig(
        from = "PAAS_FINALIZER",
        default = "paas.cpet.belastingdienst.nl/finalizer"
    )]
    pub finalizer: String,

    #[envconfig(from = "PAAS_FIELD_MANAGER", default = "paas-operator")]
    pub field_manager: String,

    #[envconfig(from = "PAAS_STORE_BACKEND", default = "kube")]
    pub store_backend: StoreBackend,

    #[envconfig(from = "PAAS_ARGOCD_NAMESPACE", default = "argocd")]
    pub argocd_namespace: String,

    /// ClusterRole bound to every Paas group in each Paas namespace.
    #[envconfig(from = "PAAS_ADMIN_CLUSTER_ROLE", default = "admin")]
    pub admin_cluster_role: String,

    #[envconfig(nested)]
    pub ldap: LdapConfig,

    #[envconfig(nested)]
    pub quota: QuotaConfig,

    #[envconfig(nested)]
    pub capabilities: CapabilityConfig,
}

/// Location of the whitelist consumed by the external LDAP group sync.
#[derive(Envconfig, Clone, Debug)]
pub struct LdapConfig {
    #[envconfig(from = "PAAS_LDAP_NAMESPACE", default = "paas-system")]
    pub namespace: String,
    #[envconfig(from = "PAAS_LDAP_CONFIGMAP", default = "wlname")]
    pub configmap: String,
    #[envconfig(from = "PAAS_LDAP_CONFIGMAP_KEY", default = "whitelist.txt")]
    pub key: String,
}

#[derive(Envconfig, Clone, Debug)]
pub struct QuotaConfig {
    /// Prefix of the cluster-wide quota shared per capability.
    /// Env: PAAS_CLUSTER_QUOTA_PREFIX
    #[envconfig(from = "PAAS_CLUSTER_QUOTA_PREFIX", default = "paas")]
    pub cluster_prefix: String,
}

#[derive(Envconfig, Clone, Debug)]
pub struct CapabilityConfig {
    /// A capability `c` lists its Paas entries in ApplicationSet
    /// `<prefix>-<c>` in the ArgoCD namespace.
    #[envconfig(from = "PAAS_APPSET_PREFIX", default = "paas")]
    pub appset_prefix: String,

    /// Cluster roles granted to a capability's service account, e.g.
    /// `argocd=argocd-argocd-application-controller:view,monitoring-edit`.
    /// Capabilities are separated by `;`.
    #[envconfig(from = "PAAS_CAPABILITY_CLUSTER_ROLES", default = "")]
    pub cluster_roles: CapabilityRoles,
}

/// Service account of a capability and the cluster roles it is bound to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtraPermissions {
    pub service_account: String,
    pub roles: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CapabilityRoles(BTreeMap<String, ExtraPermissions>);

impl CapabilityRoles {
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ExtraPermissions)> {
        self.0.iter()
    }

    /// Every cluster role granted to at least one capability.
    pub fn roles(&self) -> BTreeSet<&str> {
        self.0
            .values()
            .flat_map(|p| p.roles.iter().map(String::as_str))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for CapabilityRoles {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut caps = BTreeMap::new();
        for entry in s.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (cap, rest) = entry
                .split_once('=')
                .ok_or_else(|| format!("expected <capability>=<account>:<roles>, got {}", entry))?;
            let (account, roles) = rest
                .split_once(':')
                .ok_or_else(|| format!("missing service account for capability {}", cap))?;
            let roles: Vec<String> = roles
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect();
            if cap.trim().is_empty() || account.trim().is_empty() || roles.is_empty() {
                return Err(format!("incomplete cluster role entry: {}", entry));
            }
            caps.insert(
                cap.trim().to_string(),
                ExtraPermissions {
                    service_account: account.trim().to_string(),
                    roles,
                },
            );
        }
        Ok(CapabilityRoles(caps))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("PAAS_REQUEUE_AFTER_SECS must be greater than zero")]
    ZeroRequeue,
}

impl OperatorConfig {
    /// Defaults only, ignoring the process environment.
    pub fn defaults() -> Result<Self, envconfig::Error> {
        Self::init_from_hashmap(&Default::default())
    }

    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_after_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.requeue_after_secs == 0 {
            return Err(ConfigError::ZeroRequeue);
        }
        let required = [
            ("PAAS_FINALIZER", &self.finalizer),
            ("PAAS_FIELD_MANAGER", &self.field_manager),
            ("PAAS_ARGOCD_NAMESPACE", &self.argocd_namespace),
            ("PAAS_ADMIN_CLUSTER_ROLE", &self.admin_cluster_role),
            ("PAAS_LDAP_NAMESPACE", &self.ldap.namespace),
            ("PAAS_LDAP_CONFIGMAP", &self.ldap.configmap),
            ("PAAS_LDAP_CONFIGMAP_KEY", &self.ldap.key),
            ("PAAS_CLUSTER_QUOTA_PREFIX", &self.quota.cluster_prefix),
            ("PAAS_APPSET_PREFIX", &self.capabilities.appset_prefix),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Empty(name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let cfg = OperatorConfig::defaults().unwrap();
        assert_eq!(cfg.requeue_after(), Duration::from_secs(10));
        assert_eq!(cfg.finalizer, "paas.cpet.belastingdienst.nl/finalizer");
        assert_eq!(cfg.store_backend, StoreBackend::Kube);
        assert_eq!(cfg.ldap.key, "whitelist.txt");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn overrides_from_map() {
        let env: HashMap<String, String> = [
            ("PAAS_REQUEUE_AFTER_SECS", "3"),
            ("PAAS_STORE_BACKEND", "memory"),
            ("PAAS_LDAP_CONFIGMAP", "ldap-groups"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        let cfg = OperatorConfig::init_from_hashmap(&env).unwrap();
        assert_eq!(cfg.requeue_after_secs, 3);
        assert_eq!(cfg.store_backend, StoreBackend::Memory);
        assert_eq!(cfg.ldap.configmap, "ldap-groups");
        assert_eq!(cfg.ldap.namespace, "paas-system");
    }

    #[test]
    fn validate_rejects_empty_and_zero() {
        let mut cfg = OperatorConfig::defaults().unwrap();
        cfg.requeue_after_secs = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroRequeue)));

        let mut cfg = OperatorConfig::defaults().unwrap();
        cfg.finalizer = " ".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::Empty("PAAS_FINALIZER"))));
    }

    #[test]
    fn capability_roles_parsing() {
        let roles: CapabilityRoles =
            "argocd=argocd-argocd-application-controller:view, monitoring-edit; tekton=pipeline:view"
                .parse()
                .unwrap();
        let argocd = roles.iter().find(|(c, _)| *c == "argocd").unwrap().1;
        assert_eq!(argocd.service_account, "argocd-argocd-application-controller");
        assert_eq!(argocd.roles, vec!["view", "monitoring-edit"]);
        assert_eq!(roles.roles().into_iter().collect::<Vec<_>>(), vec!["monitoring-edit", "view"]);

        assert!("".parse::<CapabilityRoles>().unwrap().is_empty());
        assert!("argocd=view".parse::<CapabilityRoles>().is_err());
        assert!("argocd=sa:".parse::<CapabilityRoles>().is_err());
        assert!(OperatorConfig::defaults().unwrap().capabilities.cluster_roles.is_empty());
    }

    #[test]
    fn backend_parsing() {
        assert_eq!("K8S".parse::<StoreBackend>(), Ok(StoreBackend::Kube));
        assert!("etcd".parse::<StoreBackend>().is_err());
    }
}
