use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use paas_operator::controller::{ReconcileAction, Reconcile, WorkQueue};
use paas_operator::crd::Paas;
use paas_operator::kinds::{NAMESPACE, PAAS};
use paas_operator::runtime;
use paas_store::memory::{MemoryObjectStore, Verb};
use paas_store::{ObjectKey, ObjectStore};
use tokio_util::sync::CancellationToken;

mod common;
use common::{NAME, config, sample_paas, seed};

/// Counts passes and the highest number of passes seen running at once.
#[derive(Default)]
struct Recorder {
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    /// Number of leading passes that ask to be retried.
    failures: usize,
    /// Delay those passes ask for.
    retry: Duration,
    hold: Duration,
}

impl Recorder {
    fn holding(hold: Duration) -> Self {
        Self {
            hold,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Reconcile for Recorder {
    async fn reconcile(&self, _name: &str) -> ReconcileAction {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.hold).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            ReconcileAction::RequeueAfter(self.retry)
        } else {
            ReconcileAction::Done
        }
    }
}

struct Shared(Arc<Recorder>);

#[async_trait]
impl Reconcile for Shared {
    async fn reconcile(&self, name: &str) -> ReconcileAction {
        self.0.reconcile(name).await
    }
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test]
async fn same_key_is_serialized_and_coalesced() {
    let recorder = Arc::new(Recorder::holding(Duration::from_millis(50)));
    let queue = WorkQueue::new(Shared(recorder.clone()), CancellationToken::new());

    for _ in 0..5 {
        queue.enqueue("a");
    }
    assert_eq!(queue.in_flight(), 1);
    queue.wait_idle().await;

    assert_eq!(recorder.calls.load(Ordering::SeqCst), 2, "one pass plus one coalesced rerun");
    assert_eq!(recorder.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn distinct_keys_run_in_parallel() {
    let recorder = Arc::new(Recorder::holding(Duration::from_millis(50)));
    let queue = WorkQueue::new(Shared(recorder.clone()), CancellationToken::new());

    queue.enqueue("a");
    queue.enqueue("b");
    queue.wait_idle().await;

    assert_eq!(recorder.calls.load(Ordering::SeqCst), 2);
    assert_eq!(recorder.peak.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn requeue_after_reschedules_until_done() {
    let recorder = Arc::new(Recorder {
        failures: 2,
        retry: Duration::from_millis(20),
        ..Default::default()
    });
    let queue = WorkQueue::new(Shared(recorder.clone()), CancellationToken::new());

    queue.enqueue("a");
    assert!(eventually(|| recorder.calls.load(Ordering::SeqCst) == 3).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(recorder.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn cancelled_queue_drops_pending_requeues() {
    let recorder = Arc::new(Recorder {
        failures: usize::MAX,
        retry: Duration::from_millis(20),
        ..Default::default()
    });
    let shutdown = CancellationToken::new();
    let queue = WorkQueue::new(Shared(recorder.clone()), shutdown.clone());

    queue.enqueue("a");
    queue.wait_idle().await;
    shutdown.cancel();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);
    queue.enqueue("a");
    assert_eq!(queue.in_flight(), 0);
}

#[tokio::test]
async fn notifications_during_a_failing_pass_keep_one_retry() {
    let recorder = Arc::new(Recorder {
        failures: usize::MAX,
        retry: Duration::from_millis(300),
        hold: Duration::from_millis(20),
        ..Default::default()
    });
    let shutdown = CancellationToken::new();
    let queue = WorkQueue::new(Shared(recorder.clone()), shutdown.clone());

    // Both the first pass and its coalesced rerun fail and ask for a retry.
    queue.enqueue("a");
    tokio::time::sleep(Duration::from_millis(5)).await;
    for _ in 0..3 {
        queue.enqueue("a");
    }
    queue.wait_idle().await;
    assert_eq!(recorder.calls.load(Ordering::SeqCst), 2);
    assert_eq!(queue.pending_requeues(), 1);

    // One retry at ~320ms, the next at ~640ms.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(recorder.calls.load(Ordering::SeqCst), 3);
    tokio::time::sleep(Duration::from_millis(320)).await;
    assert_eq!(recorder.calls.load(Ordering::SeqCst), 4);
    assert_eq!(queue.pending_requeues(), 1);
    shutdown.cancel();
}

async fn wait_for(mut check: impl AsyncFnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[test_log::test(tokio::test)]
async fn runtime_follows_the_store() {
    let store = MemoryObjectStore::new();
    seed(&store, &config()).await;
    store
        .create(&PAAS, &sample_paas(NAME).to_dynamic().unwrap())
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let shared: Arc<dyn ObjectStore> = Arc::new(store.clone());
    let handle = tokio::spawn(runtime::run(shared, config(), shutdown.clone()));

    // Resync picks up the existing object.
    let ns = ObjectKey::cluster("demo-dev");
    let mut seen = false;
    for _ in 0..200 {
        if store.peek(&NAMESPACE, &ns).await.is_some() {
            seen = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(seen, "initial resync reconciled the Paas");

    // The pass's own finalizer and status writes do not trigger another one.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.count(Verb::UpdateStatus, &PAAS).await, 1);

    // A deletion marker is a change worth acting on.
    store.delete(&PAAS, &ObjectKey::cluster(NAME)).await.unwrap();
    let mut purged = false;
    for _ in 0..200 {
        if store.peek(&PAAS, &ObjectKey::cluster(NAME)).await.is_none() {
            purged = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(purged, "finalizer released after cleanup");
    assert!(store.peek(&NAMESPACE, &ns).await.is_none());

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn recreated_paas_is_reconciled_again() {
    let store = MemoryObjectStore::new();
    let cfg = config();
    seed(&store, &cfg).await;
    store
        .create(&PAAS, &sample_paas(NAME).to_dynamic().unwrap())
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let shared: Arc<dyn ObjectStore> = Arc::new(store.clone());
    let handle = tokio::spawn(runtime::run(shared, cfg.clone(), shutdown.clone()));
    assert!(wait_for(async || store.count(Verb::UpdateStatus, &PAAS).await == 1).await);

    // Someone strips our finalizer and deletes the object; it is gone at once.
    let key = ObjectKey::cluster(NAME);
    let mut paas = Paas::from_dynamic(&store.peek(&PAAS, &key).await.unwrap()).unwrap();
    paas.remove_finalizer(&cfg.finalizer);
    store.update(&PAAS, &paas.to_dynamic().unwrap()).await.unwrap();
    store.delete(&PAAS, &key).await.unwrap();
    assert!(store.peek(&PAAS, &key).await.is_none());

    // Same name, generation and labels as before.
    store
        .create(&PAAS, &sample_paas(NAME).to_dynamic().unwrap())
        .await
        .unwrap();
    assert!(wait_for(async || store.count(Verb::UpdateStatus, &PAAS).await == 2).await);
    let recreated = Paas::from_dynamic(&store.peek(&PAAS, &key).await.unwrap()).unwrap();
    assert!(recreated.has_finalizer(&cfg.finalizer));

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}
