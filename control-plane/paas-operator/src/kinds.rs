//! Object kinds the operator reads and writes.

use paas_store::ResourceKind;

pub const PAAS: ResourceKind = ResourceKind {
    group: "cpet.belastingdienst.nl",
    version: "v1alpha1",
    kind: "Paas",
    plural: "paas",
    namespaced: false,
};

pub const CLUSTER_RESOURCE_QUOTA: ResourceKind = ResourceKind {
    group: "quota.openshift.io",
    version: "v1",
    kind: "ClusterResourceQuota",
    plural: "clusterresourcequotas",
    namespaced: false,
};

pub const NAMESPACE: ResourceKind = ResourceKind {
    group: "",
    version: "v1",
    kind: "Namespace",
    plural: "namespaces",
    namespaced: false,
};

pub const APP_PROJECT: ResourceKind = ResourceKind {
    group: "argoproj.io",
    version: "v1alpha1",
    kind: "AppProject",
    plural: "appprojects",
    namespaced: true,
};

pub const GROUP: ResourceKind = ResourceKind {
    group: "user.openshift.io",
    version: "v1",
    kind: "Group",
    plural: "groups",
    namespaced: false,
};

pub const CONFIG_MAP: ResourceKind = ResourceKind {
    group: "",
    version: "v1",
    kind: "ConfigMap",
    plural: "configmaps",
    namespaced: true,
};

pub const ROLE_BINDING: ResourceKind = ResourceKind {
    group: "rbac.authorization.k8s.io",
    version: "v1",
    kind: "RoleBinding",
    plural: "rolebindings",
    namespaced: true,
};

pub const APPLICATION_SET: ResourceKind = ResourceKind {
    group: "argoproj.io",
    version: "v1alpha1",
    kind: "ApplicationSet",
    plural: "applicationsets",
    namespaced: true,
};

pub const CLUSTER_ROLE_BINDING: ResourceKind = ResourceKind {
    group: "rbac.authorization.k8s.io",
    version: "v1",
    kind: "ClusterRoleBinding",
    plural: "clusterrolebindings",
    namespaced: false,
};
