use std::sync::Arc;

use kube::Client;
use paas_store::k8s::KubeObjectStore;
use paas_store::memory::MemoryObjectStore;
use paas_store::{ChangeNotification, LabelSelector, ObjectStore};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{OperatorConfig, StoreBackend};
use crate::controller::{ChangeFilter, Reconciler, WorkQueue};
use crate::kinds::PAAS;

/// Build the configured store backend.
pub async fn build_store(cfg: &OperatorConfig) -> anyhow::Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match cfg.store_backend {
        StoreBackend::Kube => {
            let client = Client::try_default().await?;
            Arc::new(KubeObjectStore::new(client, cfg.field_manager.clone()))
        }
        StoreBackend::Memory => Arc::new(MemoryObjectStore::new()),
    };
    Ok(store)
}

/// Resync every Paas, then follow change notifications until `shutdown`.
pub async fn run(
    store: Arc<dyn ObjectStore>,
    cfg: OperatorConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    // Subscribe before listing so nothing written in between is missed.
    let events = store.watch(&PAAS);

    let queue = WorkQueue::new(Reconciler::new(store.clone(), cfg), shutdown);
    let mut filter = ChangeFilter::new();
    let existing = store.list(&PAAS, &LabelSelector::new()).await?;
    info!(count = existing.len(), "initial resync");
    for obj in &existing {
        let n = ChangeNotification::from_object(&PAAS, obj);
        filter.observe(&n);
        queue.enqueue(n.key.name);
    }

    queue.run(events, filter).await;
    queue.wait_idle().await;
    info!("operator stopped");
    Ok(())
}

pub async fn run_with_backend(cfg: OperatorConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    info!(backend = %cfg.store_backend, "starting Paas operator");
    let store = build_store(&cfg).await?;
    run(store, cfg, shutdown).await
}
