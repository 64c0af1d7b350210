use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use paas_store::StoreResult;

use super::{from_typed, owner_labels, paas_name};
use crate::controller::StepContext;
use crate::controller::ensure::{EnsureMode, ensure as ensure_object};
use crate::crd::{Paas, PaasStatus};
use crate::kinds::ROLE_BINDING;

pub const ADMIN_BINDING: &str = "paas-admin";
const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

fn desired(owner: &str, namespace: &str, role: &str, groups: &[String]) -> RoleBinding {
    RoleBinding {
        metadata: ObjectMeta {
            name: Some(ADMIN_BINDING.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(owner_labels(owner)),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: RBAC_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: role.to_string(),
        },
        subjects: Some(
            groups
                .iter()
                .map(|g| Subject {
                    api_group: Some(RBAC_GROUP.to_string()),
                    kind: "Group".to_string(),
                    name: g.clone(),
                    namespace: None,
                })
                .collect(),
        ),
    }
}

/// Bind every Paas group to the admin cluster role in each Paas namespace.
/// A Paas without groups still gets the binding, with no subjects.
pub async fn ensure(ctx: &StepContext<'_>, paas: &Paas, status: &mut PaasStatus) -> StoreResult<()> {
    let owner = paas_name(paas)?;
    let groups: Vec<String> = paas.spec.groups.keys().cloned().collect();
    for set in paas.namespace_sets() {
        let rb = desired(owner, &set.name, &ctx.cfg.admin_cluster_role, &groups);
        ensure_object(
            ctx.store,
            &mut status.messages,
            &ROLE_BINDING,
            from_typed(&rb)?,
            EnsureMode::CreateOnly,
        )
        .await?;
    }
    Ok(())
}
