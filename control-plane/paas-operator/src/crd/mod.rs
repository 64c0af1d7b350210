pub mod paas;

pub use paas::{
    ANNOTATION_LDAP_QUERY, ANNOTATION_MEMBERS, LABEL_CAPABILITY, LABEL_CLUSTER_QUOTA, LABEL_PAAS,
    LABEL_QUOTA, NamespaceSet, Paas, PaasCapability, PaasGroup, PaasSpec, PaasStatus,
    QuotaSummary,
};
