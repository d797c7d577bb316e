//! Rotation background worker.
//!
//! Owns the requeue schedule: each parent is reconciled when it becomes due,
//! then rescheduled from the pass outcome. Successful passes wake again at the
//! handover window of the instance due for renewal (or after the resync
//! period), failed passes back off exponentially.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use rotor_reconcile::{
    ParentKey, ReconcileError, ReconcileOutcome, Reconciler, RetryTracker, DEFAULT_BASE_DELAY,
};
use anyhow::Context;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

/// Longest accepted resync period. Also caps retry backoff.
pub const MAX_RESYNC_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Scheduler tick.
    pub poll_interval: Duration,

    /// Upper bound between two passes of the same parent.
    pub resync_period: Duration,

    /// Consecutive failures after which the retry delay stops growing.
    pub retry_max: u32,
}

/// Due times per parent.
#[derive(Debug)]
pub struct RequeueQueue {
    due: BTreeMap<ParentKey, Instant>,
    retries: RetryTracker<ParentKey>,
    resync_period: Duration,
}

impl RequeueQueue {
    pub fn new(resync_period: Duration, retry_max: u32) -> Self {
        let resync_period = resync_period.min(MAX_RESYNC_PERIOD);
        Self {
            due: BTreeMap::new(),
            retries: RetryTracker::new(DEFAULT_BASE_DELAY, resync_period, retry_max),
            resync_period,
        }
    }

    /// Make a parent due right away.
    pub fn enqueue(&mut self, key: ParentKey, now: Instant) {
        self.due.insert(key, now);
    }

    /// Remove and return every parent due at `now`, in key order.
    pub fn take_due(&mut self, now: Instant) -> Vec<ParentKey> {
        let ready: Vec<ParentKey> = self
            .due
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &ready {
            self.due.remove(key);
        }
        ready
    }

    /// Reschedule a parent after a pass. Returns the delay, or `None` if the
    /// parent was dropped from the schedule.
    pub fn complete(
        &mut self,
        key: ParentKey,
        result: &Result<ReconcileOutcome, ReconcileError>,
        now: Instant,
    ) -> Option<Duration> {
        let delay = match result {
            Ok(ReconcileOutcome::ParentGone) => {
                self.retries.clear(&key);
                self.due.remove(&key);
                return None;
            }
            Ok(outcome) => {
                self.retries.clear(&key);
                match outcome.requeue_after() {
                    // Overdue deadlines mean "run again now".
                    Some(after) => after.to_std().unwrap_or(Duration::ZERO),
                    None => self.resync_period,
                }
                .min(self.resync_period)
            }
            Err(_) => self.retries.record_failure(key.clone()),
        };

        let at = now
            .checked_add(delay)
            .or_else(|| now.checked_add(self.resync_period))
            .unwrap_or(now);
        // An event may already have made it due sooner.
        let entry = self.due.entry(key).or_insert(at);
        if at < *entry {
            *entry = at;
        }
        Some(delay)
    }

    pub fn next_due(&self, key: &ParentKey) -> Option<Instant> {
        self.due.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.due.len()
    }

    pub fn is_empty(&self) -> bool {
        self.due.is_empty()
    }
}

/// Worker that drives reconciliation passes.
pub struct RotationWorker {
    reconciler: Reconciler,
    config: WorkerConfig,
}

impl RotationWorker {
    pub fn new(reconciler: Reconciler, config: WorkerConfig) -> Self {
        Self { reconciler, config }
    }

    /// Run until shutdown is signaled or the shutdown sender is dropped.
    ///
    /// `initial` keys and keys received on `events` become due immediately.
    #[instrument(skip_all)]
    pub async fn run(
        &self,
        initial: impl IntoIterator<Item = ParentKey>,
        mut events: mpsc::Receiver<ParentKey>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            resync_secs = self.config.resync_period.as_secs(),
            "Starting rotation worker"
        );

        let mut queue = RequeueQueue::new(self.config.resync_period, self.config.retry_max);
        let started = Instant::now();
        for key in initial {
            queue.enqueue(key, started);
        }
        let mut interval = tokio::time::interval(self.config.poll_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_due(&mut queue).await;
                }
                Some(key) = events.recv() => {
                    debug!(parent = %key, "Parent event received");
                    queue.enqueue(key, Instant::now());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Rotation worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Reconcile every due parent once.
    async fn run_due(&self, queue: &mut RequeueQueue) {
        for key in queue.take_due(Instant::now()) {
            let result = self.reconciler.reconcile(&key).await;

            if let Err(e) = &result {
                warn!(parent = %key, error = %e, "Reconciliation failed, will retry");
            }

            match queue.complete(key.clone(), &result, Instant::now()) {
                Some(delay) => debug!(parent = %key, delay_ms = delay.as_millis() as u64, "Requeued"),
                None => debug!(parent = %key, "Parent gone, dropped from schedule"),
            }
        }
    }
}

/// Wait for a stopped worker task, reporting a panic or a missed deadline.
pub async fn wait_for_exit(handle: JoinHandle<()>, timeout: Duration) -> anyhow::Result<()> {
    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!(error = %e, "Rotation worker task failed");
            Err(e).context("rotation worker task failed")
        }
        Err(e) => {
            warn!(error = %e, "Rotation worker did not shut down in time");
            Err(e).context("rotation worker did not shut down in time")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Duration as TimeDelta;
    use rotor_reconcile::{
        Instance, MemoryStore, Parent, ParentSpec, PassSummary, RotationPolicy, Rule, StoreError,
    };
    use uuid::Uuid;

    fn key(name: &str) -> ParentKey {
        ParentKey::new("default", name)
    }

    fn reconciled(requeue_after: Option<TimeDelta>) -> Result<ReconcileOutcome, ReconcileError> {
        Ok(ReconcileOutcome::Reconciled(PassSummary {
            valid: true,
            requeue_after,
            ..PassSummary::default()
        }))
    }

    fn failed() -> Result<ReconcileOutcome, ReconcileError> {
        Err(StoreError::Backend("unavailable".to_string()).into())
    }

    #[test]
    fn test_take_due_only_returns_ready_keys() {
        let now = Instant::now();
        let mut queue = RequeueQueue::new(Duration::from_secs(300), 5);
        queue.enqueue(key("a"), now);
        queue.enqueue(key("b"), now + Duration::from_secs(10));

        assert_eq!(queue.take_due(now), vec![key("a")]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.take_due(now + Duration::from_secs(10)), vec![key("b")]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_success_requeues_at_handover() {
        let now = Instant::now();
        let mut queue = RequeueQueue::new(Duration::from_secs(300), 5);

        let delay = queue.complete(key("a"), &reconciled(Some(TimeDelta::seconds(110))), now);
        assert_eq!(delay, Some(Duration::from_secs(110)));
        assert_eq!(queue.next_due(&key("a")), Some(now + Duration::from_secs(110)));
    }

    #[test]
    fn test_success_capped_by_resync() {
        let now = Instant::now();
        let mut queue = RequeueQueue::new(Duration::from_secs(300), 5);

        let delay = queue.complete(key("a"), &reconciled(Some(TimeDelta::hours(8))), now);
        assert_eq!(delay, Some(Duration::from_secs(300)));

        let delay = queue.complete(key("b"), &reconciled(None), now);
        assert_eq!(delay, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_overdue_runs_immediately() {
        let now = Instant::now();
        let mut queue = RequeueQueue::new(Duration::from_secs(300), 5);

        let delay = queue.complete(key("a"), &reconciled(Some(TimeDelta::seconds(-15))), now);
        assert_eq!(delay, Some(Duration::ZERO));
        assert_eq!(queue.take_due(now), vec![key("a")]);
    }

    #[test]
    fn test_failures_back_off_and_reset() {
        let now = Instant::now();
        let mut queue = RequeueQueue::new(Duration::from_secs(300), 5);

        assert_eq!(queue.complete(key("a"), &failed(), now), Some(Duration::from_secs(1)));
        queue.take_due(now + Duration::from_secs(1));
        assert_eq!(queue.complete(key("a"), &failed(), now), Some(Duration::from_secs(2)));
        queue.take_due(now + Duration::from_secs(2));

        let delay = queue.complete(key("a"), &reconciled(Some(TimeDelta::seconds(60))), now);
        assert_eq!(delay, Some(Duration::from_secs(60)));
        queue.take_due(now + Duration::from_secs(60));

        assert_eq!(queue.complete(key("a"), &failed(), now), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_parent_gone_is_dropped() {
        let now = Instant::now();
        let mut queue = RequeueQueue::new(Duration::from_secs(300), 5);
        queue.enqueue(key("a"), now);

        assert_eq!(queue.complete(key("a"), &Ok(ReconcileOutcome::ParentGone), now), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_earlier_event_not_postponed() {
        let now = Instant::now();
        let mut queue = RequeueQueue::new(Duration::from_secs(300), 5);
        queue.enqueue(key("a"), now);

        queue.complete(key("a"), &reconciled(Some(TimeDelta::seconds(110))), now);
        assert_eq!(queue.next_due(&key("a")), Some(now));
    }

    #[test]
    fn test_oversized_resync_does_not_overflow() {
        let now = Instant::now();
        let mut queue = RequeueQueue::new(Duration::from_secs(u64::MAX / 2), 5);

        let delay = queue.complete(key("a"), &reconciled(None), now);
        assert_eq!(delay, Some(MAX_RESYNC_PERIOD));

        let delay = queue.complete(key("b"), &failed(), now);
        assert_eq!(delay, Some(DEFAULT_BASE_DELAY));
    }

    fn web_parent() -> Parent {
        Parent {
            key: key("web"),
            uid: Uuid::from_u128(7),
            spec: {
                let mut spec = ParentSpec::default();
                spec.template.spec.rules = vec![Rule::host("|RANDOM|.example.com")];
                spec
            },
            status: Default::default(),
        }
    }

    fn worker_for(store: Arc<MemoryStore>) -> RotationWorker {
        let policy = RotationPolicy::new(TimeDelta::minutes(2), TimeDelta::seconds(10)).unwrap();
        RotationWorker::new(
            Reconciler::new(store, policy),
            WorkerConfig {
                poll_interval: Duration::from_millis(10),
                resync_period: Duration::from_secs(300),
                retry_max: 5,
            },
        )
    }

    async fn wait_for_instances(store: &MemoryStore, count: usize) -> Vec<Instance> {
        let mut created = Vec::new();
        for _ in 0..200 {
            created = store.instances().await;
            if created.len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        created
    }

    #[tokio::test]
    async fn test_worker_creates_instance_for_event() {
        let parent = web_parent();
        let store = Arc::new(MemoryStore::with_parents([parent.clone()]));
        let worker = worker_for(store.clone());

        let (events_tx, events_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { worker.run([], events_rx, shutdown_rx).await });

        events_tx.send(parent.key.clone()).await.unwrap();
        let created = wait_for_instances(&store, 1).await;

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(created.len(), 1);
        assert!(created[0].is_owned_by(&parent));
        let status = store.parent(&parent.key).await.unwrap().status;
        assert!(status.next_renewal_time.is_some());
    }

    #[tokio::test]
    async fn test_initial_keys_beyond_channel_capacity() {
        let parents: Vec<Parent> = (0..5)
            .map(|i| {
                let mut parent = web_parent();
                parent.key = key(&format!("web{i}"));
                parent.uid = Uuid::from_u128(100 + i);
                parent
            })
            .collect();
        let keys: Vec<ParentKey> = parents.iter().map(|p| p.key.clone()).collect();
        let store = Arc::new(MemoryStore::with_parents(parents));
        let worker = worker_for(store.clone());

        // Nothing is ever sent on the events channel.
        let (_events_tx, events_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { worker.run(keys, events_rx, shutdown_rx).await });

        let created = wait_for_instances(&store, 5).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert_eq!(created.len(), 5);
    }

    #[tokio::test]
    async fn test_dropped_shutdown_sender_stops_worker() {
        let store = Arc::new(MemoryStore::new());
        let worker = worker_for(store);

        let (_events_tx, events_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move { worker.run([], events_rx, shutdown_rx).await });

        drop(shutdown_tx);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("worker kept running after the shutdown sender was dropped")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_exit_reports_panic() {
        let handle = tokio::spawn(async { panic!("renewal overflow") });
        let err = wait_for_exit(handle, Duration::from_secs(5)).await.unwrap_err();
        assert!(err.to_string().contains("task failed"));
    }

    #[tokio::test]
    async fn test_wait_for_exit_times_out() {
        let handle = tokio::spawn(async { tokio::time::sleep(Duration::from_secs(60)).await });
        let err = wait_for_exit(handle, Duration::from_millis(10)).await.unwrap_err();
        assert!(err.to_string().contains("did not shut down"));
    }

    #[tokio::test]
    async fn test_wait_for_exit_clean() {
        let handle = tokio::spawn(async {});
        assert!(wait_for_exit(handle, Duration::from_secs(5)).await.is_ok());
    }
}
