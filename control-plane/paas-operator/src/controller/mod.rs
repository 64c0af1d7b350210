pub mod ensure;
pub mod filter;
pub mod finalizer;
pub mod pipeline;
pub mod queue;
pub mod reconcile;
pub mod steps;

use paas_store::{ObjectStore, StoreError};

use crate::config::OperatorConfig;

pub use filter::ChangeFilter;
pub use finalizer::{ChainReport, FinalizerChain, FinalizerStep, StepOutcome};
pub use pipeline::{Pipeline, ReconcileStep};
pub use queue::{Reconcile, WorkQueue};
pub use reconcile::{ReconcileAction, Reconciler};

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("{step} step failed: {source}")]
    Step {
        step: ReconcileStep,
        #[source]
        source: StoreError,
    },
    #[error("finalizer steps failed: {}", .failed.join(", "))]
    Finalize { failed: Vec<String> },
    #[error("invalid object: {0}")]
    Invalid(String),
}

impl From<serde_json::Error> for ReconcileErr {
    fn from(e: serde_json::Error) -> Self {
        ReconcileErr::Store(StoreError::Serialization(e))
    }
}

/// Shared inputs handed to every pipeline and finalizer step.
pub struct StepContext<'a> {
    pub store: &'a dyn ObjectStore,
    pub cfg: &'a OperatorConfig,
}
