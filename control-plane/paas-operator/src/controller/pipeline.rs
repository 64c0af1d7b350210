use std::fmt;

use paas_store::StoreResult;
use tracing::{debug, instrument, warn};

use super::steps::{
    app_project, appsets, cluster_quota, cluster_roles, groups, ldap, namespaces, quota,
    rolebindings,
};
use super::{ReconcileErr, StepContext};
use crate::crd::{Paas, PaasStatus};

/// Sub-reconcilers, in the order the standard pipeline runs them. Later
/// steps rely on what earlier ones created: role bindings need their
/// namespaces, capability entries need the AppProject.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReconcileStep {
    Quotas,
    ClusterWideQuota,
    Namespaces,
    ExtraClusterRoleBindings,
    AppProject,
    CapabilityAppSets,
    Groups,
    LdapGroups,
    RoleBindings,
}

impl ReconcileStep {
    pub const ALL: [ReconcileStep; 9] = [
        ReconcileStep::Quotas,
        ReconcileStep::ClusterWideQuota,
        ReconcileStep::Namespaces,
        ReconcileStep::ExtraClusterRoleBindings,
        ReconcileStep::AppProject,
        ReconcileStep::CapabilityAppSets,
        ReconcileStep::Groups,
        ReconcileStep::LdapGroups,
        ReconcileStep::RoleBindings,
    ];

    async fn run(
        self,
        ctx: &StepContext<'_>,
        paas: &Paas,
        status: &mut PaasStatus,
    ) -> StoreResult<()> {
        match self {
            ReconcileStep::Quotas => quota::ensure(ctx, paas, status).await,
            ReconcileStep::ClusterWideQuota => cluster_quota::ensure(ctx, paas, status).await,
            ReconcileStep::Namespaces => namespaces::ensure(ctx, paas, status).await,
            ReconcileStep::ExtraClusterRoleBindings => {
                cluster_roles::ensure(ctx, paas, status).await
            }
            ReconcileStep::AppProject => app_project::ensure(ctx, paas, status).await,
            ReconcileStep::CapabilityAppSets => appsets::ensure(ctx, paas, status).await,
            ReconcileStep::Groups => groups::ensure(ctx, paas, status).await,
            ReconcileStep::LdapGroups => ldap::ensure(ctx, paas, status).await,
            ReconcileStep::RoleBindings => rolebindings::ensure(ctx, paas, status).await,
        }
    }
}

impl fmt::Display for ReconcileStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReconcileStep::Quotas => "quotas",
            ReconcileStep::ClusterWideQuota => "cluster-wide-quota",
            ReconcileStep::Namespaces => "namespaces",
            ReconcileStep::ExtraClusterRoleBindings => "extra-cluster-role-bindings",
            ReconcileStep::AppProject => "app-project",
            ReconcileStep::CapabilityAppSets => "capability-appsets",
            ReconcileStep::Groups => "groups",
            ReconcileStep::LdapGroups => "ldap-groups",
            ReconcileStep::RoleBindings => "role-bindings",
        };
        f.write_str(s)
    }
}

/// Ordered sub-reconcilers; the first failure aborts the rest.
#[derive(Clone, Debug)]
pub struct Pipeline {
    steps: Vec<ReconcileStep>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::standard()
    }
}

impl Pipeline {
    pub fn standard() -> Self {
        Self {
            steps: ReconcileStep::ALL.to_vec(),
        }
    }

    pub fn with_steps(steps: Vec<ReconcileStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[ReconcileStep] {
        &self.steps
    }

    /// Messages of steps that completed before a failure stay in `status`.
    #[instrument(skip_all, fields(paas = paas.metadata.name.as_deref().unwrap_or_default()))]
    pub async fn run(
        &self,
        ctx: &StepContext<'_>,
        paas: &Paas,
        status: &mut PaasStatus,
    ) -> Result<(), ReconcileErr> {
        for step in &self.steps {
            debug!(%step, "running step");
            if let Err(source) = step.run(ctx, paas, status).await {
                warn!(%step, error = %source, "step failed; aborting pipeline");
                return Err(ReconcileErr::Step {
                    step: *step,
                    source,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_order_puts_namespaces_before_role_bindings() {
        let p = Pipeline::standard();
        let pos = |s| p.steps().iter().position(|x| *x == s).unwrap();
        assert!(pos(ReconcileStep::Quotas) < pos(ReconcileStep::ClusterWideQuota));
        assert!(pos(ReconcileStep::ClusterWideQuota) < pos(ReconcileStep::Namespaces));
        assert!(pos(ReconcileStep::Namespaces) < pos(ReconcileStep::AppProject));
        assert!(pos(ReconcileStep::Namespaces) < pos(ReconcileStep::ExtraClusterRoleBindings));
        assert!(pos(ReconcileStep::AppProject) < pos(ReconcileStep::CapabilityAppSets));
        assert!(pos(ReconcileStep::Groups) < pos(ReconcileStep::RoleBindings));
        assert_eq!(p.steps().last(), Some(&ReconcileStep::RoleBindings));
    }
}
