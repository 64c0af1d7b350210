use std::collections::BTreeSet;
use std::fmt;

use paas_store::StoreError;
use tracing::{debug, instrument, warn};

use super::steps::{
    app_project, appsets, cluster_quota, cluster_roles, groups, ldap, namespaces, quota,
};
use super::{ReconcileErr, StepContext};
use crate::crd::Paas;
use crate::status::StatusLog;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FinalizerStep {
    CapabilityAppSets,
    AppProject,
    Quotas,
    /// Reports the LDAP queries of the groups it removed.
    Groups,
    /// Consumes exactly what `Groups` reported.
    LdapGroups,
    ExtraClusterRoleBindings,
    Namespaces,
    ClusterWideQuotas,
}

impl FinalizerStep {
    pub const ALL: [FinalizerStep; 8] = [
        FinalizerStep::CapabilityAppSets,
        FinalizerStep::AppProject,
        FinalizerStep::Quotas,
        FinalizerStep::Groups,
        FinalizerStep::LdapGroups,
        FinalizerStep::ExtraClusterRoleBindings,
        FinalizerStep::Namespaces,
        FinalizerStep::ClusterWideQuotas,
    ];
}

impl fmt::Display for FinalizerStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FinalizerStep::CapabilityAppSets => "capability-appsets",
            FinalizerStep::AppProject => "app-project",
            FinalizerStep::Quotas => "quotas",
            FinalizerStep::Groups => "groups",
            FinalizerStep::LdapGroups => "ldap-groups",
            FinalizerStep::ExtraClusterRoleBindings => "extra-cluster-role-bindings",
            FinalizerStep::Namespaces => "namespaces",
            FinalizerStep::ClusterWideQuotas => "cluster-wide-quotas",
        };
        f.write_str(s)
    }
}

/// What one teardown step did: it was attempted, it cleaned `cleaned`, and it
/// may have failed on the rest.
#[derive(Debug)]
pub struct StepOutcome {
    pub step: FinalizerStep,
    pub cleaned: BTreeSet<String>,
    pub error: Option<StoreError>,
}

impl StepOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Default)]
pub struct ChainReport {
    pub outcomes: Vec<StepOutcome>,
}

impl ChainReport {
    pub fn attempted(&self) -> Vec<FinalizerStep> {
        self.outcomes.iter().map(|o| o.step).collect()
    }

    pub fn failed_steps(&self) -> Vec<FinalizerStep> {
        self.outcomes
            .iter()
            .filter(|o| !o.succeeded())
            .map(|o| o.step)
            .collect()
    }

    pub fn outcome(&self, step: FinalizerStep) -> Option<&StepOutcome> {
        self.outcomes.iter().find(|o| o.step == step)
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(StepOutcome::succeeded)
    }

    pub fn into_result(self) -> Result<(), ReconcileErr> {
        let failed: Vec<String> = self
            .failed_steps()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        if failed.is_empty() {
            Ok(())
        } else {
            Err(ReconcileErr::Finalize { failed })
        }
    }
}

/// Ordered teardown steps run best effort: a failing step never stops the
/// ones after it.
#[derive(Clone, Debug)]
pub struct FinalizerChain {
    steps: Vec<FinalizerStep>,
}

impl Default for FinalizerChain {
    fn default() -> Self {
        Self::standard()
    }
}

impl FinalizerChain {
    pub fn standard() -> Self {
        Self {
            steps: FinalizerStep::ALL.to_vec(),
        }
    }

    pub fn with_steps(steps: Vec<FinalizerStep>) -> Self {
        Self { steps }
    }

    pub fn steps(&self) -> &[FinalizerStep] {
        &self.steps
    }

    #[instrument(skip_all, fields(paas = paas.metadata.name.as_deref().unwrap_or_default()))]
    pub async fn run(&self, ctx: &StepContext<'_>, paas: &Paas, log: &mut StatusLog) -> ChainReport {
        let mut report = ChainReport::default();
        // Groups actually removed in this pass; empty unless Groups ran first.
        let mut removed_groups = BTreeSet::new();

        for step in &self.steps {
            debug!(%step, "running teardown step");
            let (cleaned, res) = match step {
                FinalizerStep::CapabilityAppSets => {
                    (BTreeSet::new(), appsets::finalize(ctx, paas, log).await)
                }
                FinalizerStep::AppProject => {
                    (BTreeSet::new(), app_project::finalize(ctx, paas, log).await)
                }
                FinalizerStep::Quotas => (BTreeSet::new(), quota::finalize(ctx, paas, log).await),
                FinalizerStep::Groups => {
                    let (cleaned, res) = groups::finalize(ctx, paas, log).await;
                    removed_groups = cleaned.clone();
                    (cleaned, res)
                }
                FinalizerStep::LdapGroups => {
                    let res = ldap::finalize(ctx, &removed_groups, log).await;
                    let cleaned = if res.is_ok() {
                        removed_groups.clone()
                    } else {
                        BTreeSet::new()
                    };
                    (cleaned, res)
                }
                FinalizerStep::ExtraClusterRoleBindings => {
                    (BTreeSet::new(), cluster_roles::finalize(ctx, paas, log).await)
                }
                FinalizerStep::Namespaces => {
                    (BTreeSet::new(), namespaces::finalize(ctx, paas, log).await)
                }
                FinalizerStep::ClusterWideQuotas => {
                    (BTreeSet::new(), cluster_quota::finalize(ctx, paas, log).await)
                }
            };
            if let Err(e) = &res {
                warn!(%step, error = %e, "teardown step failed; continuing");
            }
            report.outcomes.push(StepOutcome {
                step: *step,
                cleaned,
                error: res.err(),
            });
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_collects_failures_without_hiding_attempts() {
        let report = ChainReport {
            outcomes: vec![
                StepOutcome {
                    step: FinalizerStep::AppProject,
                    cleaned: BTreeSet::new(),
                    error: None,
                },
                StepOutcome {
                    step: FinalizerStep::Groups,
                    cleaned: ["qA".to_string()].into(),
                    error: Some(StoreError::Forbidden("Group c".into())),
                },
                StepOutcome {
                    step: FinalizerStep::LdapGroups,
                    cleaned: ["qA".to_string()].into(),
                    error: None,
                },
            ],
        };
        assert_eq!(report.attempted().len(), 3);
        assert_eq!(report.failed_steps(), vec![FinalizerStep::Groups]);
        assert!(!report.is_success());
        match report.into_result() {
            Err(ReconcileErr::Finalize { failed }) => assert_eq!(failed, vec!["groups"]),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
