use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use paas_store::{ObjectKey, ObjectStore};
use tracing::{debug, error, info, instrument, warn};

use super::queue::Reconcile;
use super::{FinalizerChain, Pipeline, ReconcileErr, StepContext};
use crate::config::OperatorConfig;
use crate::crd::{Paas, PaasStatus};
use crate::kinds::PAAS;

/// What the scheduler should do with a key after a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileAction {
    Done,
    RequeueAfter(Duration),
}

/// Drives one Paas through its lifecycle: register the finalizer, run the
/// pipeline while active, run the finalizer chain once deletion is requested.
pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    cfg: OperatorConfig,
    pipeline: Pipeline,
    finalizers: FinalizerChain,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ObjectStore>, cfg: OperatorConfig) -> Self {
        Self {
            store,
            cfg,
            pipeline: Pipeline::standard(),
            finalizers: FinalizerChain::standard(),
        }
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn with_finalizers(mut self, finalizers: FinalizerChain) -> Self {
        self.finalizers = finalizers;
        self
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.cfg
    }

    /// Errors never escape a pass; they turn into a requeue.
    #[instrument(skip_all, fields(paas = %name))]
    pub async fn reconcile(&self, name: &str) -> ReconcileAction {
        match self.try_reconcile(name).await {
            Ok(action) => action,
            Err(e) => {
                warn!(error = %e, "reconcile failed; requeueing");
                ReconcileAction::RequeueAfter(self.cfg.requeue_after())
            }
        }
    }

    async fn try_reconcile(&self, name: &str) -> Result<ReconcileAction, ReconcileErr> {
        let obj = match self.store.get(&PAAS, &ObjectKey::cluster(name)).await {
            Ok(obj) => obj,
            Err(e) if e.is_not_found() => {
                debug!("Paas is gone; nothing to do");
                return Ok(ReconcileAction::Done);
            }
            Err(e) => return Err(e.into()),
        };
        if obj.metadata.name.is_none() {
            error!("loaded Paas carries no name; skipping");
            return Ok(ReconcileAction::Done);
        }
        let mut paas = Paas::from_dynamic(&obj)
            .map_err(|e| ReconcileErr::Invalid(format!("cannot decode Paas {}: {}", name, e)))?;
        let ctx = StepContext {
            store: self.store.as_ref(),
            cfg: &self.cfg,
        };

        if paas.metadata.deletion_timestamp.is_some() {
            return self.finalize(&ctx, paas).await;
        }

        if !paas.has_finalizer(&self.cfg.finalizer) {
            paas.add_finalizer(&self.cfg.finalizer);
            let stored = self.store.update(&PAAS, &paas.to_dynamic()?).await?;
            paas.metadata.resource_version = stored.metadata.resource_version;
            info!(finalizer = %self.cfg.finalizer, "finalizer registered");
        }

        let mut status = paas.status.take().unwrap_or_default();
        status.messages.truncate();
        let outcome = self.pipeline.run(&ctx, &paas, &mut status).await;
        if outcome.is_ok() {
            status.messages.info("reconcile", PAAS.kind, name, "succeeded");
        }
        // Written on success and failure alike.
        let persisted = self.write_status(&mut paas, status).await;
        outcome?;
        persisted?;
        Ok(ReconcileAction::Done)
    }

    async fn finalize(
        &self,
        ctx: &StepContext<'_>,
        mut paas: Paas,
    ) -> Result<ReconcileAction, ReconcileErr> {
        if !paas.has_finalizer(&self.cfg.finalizer) {
            debug!("deletion pending; no cleanup owed");
            return Ok(ReconcileAction::Done);
        }

        let mut status = paas.status.take().unwrap_or_default();
        status.messages.truncate();
        let report = self.finalizers.run(ctx, &paas, &mut status.messages).await;
        // Status shows the teardown even while a foreign finalizer holds the object.
        self.write_status(&mut paas, status).await?;
        let steps = report.outcomes.len();
        if !report.is_success() {
            warn!(failed = ?report.failed_steps(), "cleanup incomplete; keeping finalizer");
        }
        report.into_result()?;

        paas.remove_finalizer(&self.cfg.finalizer);
        self.store.update(&PAAS, &paas.to_dynamic()?).await?;
        info!(steps, "cleanup complete; finalizer released");
        Ok(ReconcileAction::Done)
    }

    async fn write_status(&self, paas: &mut Paas, status: PaasStatus) -> Result<(), ReconcileErr> {
        info!(
            messages = status.messages.len(),
            errors = status.messages.has_errors(),
            quota_sets = status.quota.len(),
            "writing status"
        );
        paas.status = Some(status);
        let stored = self
            .store
            .update_status(&PAAS, &paas.to_dynamic()?)
            .await
            .inspect_err(|e| warn!(error = %e, "status write rejected"))?;
        paas.metadata.resource_version = stored.metadata.resource_version;
        Ok(())
    }
}

#[async_trait]
impl Reconcile for Reconciler {
    async fn reconcile(&self, name: &str) -> ReconcileAction {
        Reconciler::reconcile(self, name).await
    }
}
