use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use paas_store::ChangeNotification;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::filter::ChangeFilter;
use super::reconcile::ReconcileAction;

/// Anything the queue can drive, one key at a time.
#[async_trait]
pub trait Reconcile: Send + Sync + 'static {
    async fn reconcile(&self, name: &str) -> ReconcileAction;
}

/// Delayed requeue waiting for its deadline.
#[derive(Clone, Copy, Debug)]
struct Retry {
    at: Instant,
    timer: u64,
}

#[derive(Default)]
struct State {
    /// Keys with a pass in flight; `true` means run again once it finishes.
    running: HashMap<String, bool>,
    /// At most one delayed requeue per key, the earliest one asked for.
    retries: HashMap<String, Retry>,
    next_timer: u64,
}

struct Shared<R> {
    handler: R,
    state: Mutex<State>,
    idle: Notify,
    shutdown: CancellationToken,
}

impl<R: Reconcile> Shared<R> {
    fn state(&self) -> MutexGuard<'_, State> {
        // Slot state stays consistent across a panicking holder.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enqueue(self: &Arc<Self>, name: String) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let mut state = self.state();
        if let Some(rerun) = state.running.get_mut(&name) {
            trace!(paas = %name, "pass in flight; coalescing");
            *rerun = true;
            return;
        }
        state.running.insert(name.clone(), false);
        drop(state);
        tokio::spawn(work(Arc::clone(self), name));
    }

    fn schedule(self: &Arc<Self>, name: String, delay: Duration) {
        let at = Instant::now() + delay;
        let timer = {
            let mut state = self.state();
            if state.retries.get(&name).is_some_and(|r| r.at <= at) {
                trace!(paas = %name, "earlier requeue already pending");
                return;
            }
            state.next_timer += 1;
            let timer = state.next_timer;
            state.retries.insert(name.clone(), Retry { at, timer });
            timer
        };
        debug!(paas = %name, ?delay, "requeue scheduled");
        let shared = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = shared.shutdown.cancelled() => {}
                _ = tokio::time::sleep_until(at) => shared.fire(name, timer),
            }
        });
    }

    /// A superseded timer finds its entry replaced and does nothing.
    fn fire(self: &Arc<Self>, name: String, timer: u64) {
        let mut state = self.state();
        if state.retries.get(&name).is_some_and(|r| r.timer == timer) {
            state.retries.remove(&name);
            drop(state);
            self.enqueue(name);
        }
    }
}

async fn work<R: Reconcile>(shared: Arc<Shared<R>>, name: String) {
    loop {
        let action = shared.handler.reconcile(&name).await;
        if let ReconcileAction::RequeueAfter(delay) = action {
            shared.schedule(name.clone(), delay);
        }
        let mut state = shared.state();
        let rerun = state.running.get(&name).copied().unwrap_or(false);
        if rerun && !shared.shutdown.is_cancelled() {
            state.running.insert(name.clone(), false);
            continue;
        }
        state.running.remove(&name);
        break;
    }
    shared.idle.notify_waiters();
}

/// Per-key serialized scheduler. Different keys run in parallel; the same key
/// never runs twice at once, and notifications that arrive mid-pass collapse
/// into a single follow-up pass. A key holds at most one delayed requeue.
pub struct WorkQueue<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Clone for WorkQueue<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R: Reconcile> WorkQueue<R> {
    pub fn new(handler: R, shutdown: CancellationToken) -> Self {
        Self {
            shared: Arc::new(Shared {
                handler,
                state: Mutex::new(State::default()),
                idle: Notify::new(),
                shutdown,
            }),
        }
    }

    pub fn enqueue(&self, name: impl Into<String>) {
        self.shared.enqueue(name.into());
    }

    /// Keys with a pass currently running.
    pub fn in_flight(&self) -> usize {
        self.shared.state().running.len()
    }

    /// Keys waiting on a delayed requeue.
    pub fn pending_requeues(&self) -> usize {
        self.shared.state().retries.len()
    }

    /// Resolves once no pass is running. Delayed requeues are not waited for.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Feed admitted notifications into the queue until shutdown or until the
    /// stream ends.
    pub async fn run(
        &self,
        mut events: BoxStream<'static, ChangeNotification>,
        mut filter: ChangeFilter,
    ) {
        info!("work queue started");
        loop {
            tokio::select! {
                _ = self.shared.shutdown.cancelled() => {
                    info!("shutdown requested; work queue stopping");
                    break;
                }
                next = events.next() => match next {
                    Some(n) if filter.admit(&n) => self.enqueue(n.key.name),
                    Some(n) if n.removed => debug!(paas = %n.key, "Paas removed; key forgotten"),
                    Some(n) => trace!(paas = %n.key, "unchanged spec and labels; ignored"),
                    None => {
                        warn!("change stream ended; work queue stopping");
                        break;
                    }
                },
            }
        }
    }
}
