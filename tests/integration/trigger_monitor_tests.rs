use async_trait::async_trait;
use serde_json::json;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};

use super::*;
use repricer::store::{Document, DocumentStore, DocumentStream, TransactionFn};
use repricer::{PassReport, PassRunner, TriggerMonitor};

/// Pass runner that counts runs and holds each pass until released.
#[derive(Default)]
struct GatedRunner {
    runs: AtomicUsize,
    release: Notify,
}

#[async_trait]
impl PassRunner for GatedRunner {
    async fn run_pass(&self) -> Result<PassReport, StoreError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.release.notified().await;
        Ok(PassReport::default())
    }
}

/// Pass runner that takes a while, then fails.
struct SlowFailingRunner {
    runs: AtomicUsize,
}

#[async_trait]
impl PassRunner for SlowFailingRunner {
    async fn run_pass(&self) -> Result<PassReport, StoreError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        Err(StoreError::Stream("catalog unavailable".to_string()))
    }
}

/// Memory store where a new request lands right after the first `Done`
/// write, while the finishing pass still holds the trigger.
struct RequestDuringReleaseStore {
    inner: MemoryDocumentStore,
    injected: AtomicBool,
}

impl RequestDuringReleaseStore {
    fn new() -> Self {
        Self {
            inner: MemoryDocumentStore::new(),
            injected: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl DocumentStore for RequestDuringReleaseStore {
    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError> {
        self.inner.get(path).await
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        self.inner.get_all(collection).await
    }

    async fn set(&self, path: &str, data: Value, mode: SetMode) -> Result<(), StoreError> {
        let releasing = data.get(STATE_FIELD) == Some(&json!("Done"));
        self.inner.set(path, data, mode).await?;

        if releasing && !self.injected.swap(true, Ordering::SeqCst) {
            self.inner
                .set(path, json!({ STATE_FIELD: "Pending" }), SetMode::Merge)
                .await?;
            // Let the monitor see the request before the pass finishes.
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        Ok(())
    }

    async fn transaction(
        &self,
        path: &str,
        update: TransactionFn,
    ) -> Result<Option<Value>, StoreError> {
        self.inner.transaction(path, update).await
    }

    fn watch(&self, path: &str) -> DocumentStream {
        self.inner.watch(path)
    }
}

async fn wait_for_runs(runner: &GatedRunner, expected: usize) {
    tokio::time::timeout(Duration::from_secs(30), async {
        while runner.runs.load(Ordering::SeqCst) < expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("runner never reached {} runs", expected));
}

fn spawn_monitor(
    store: Arc<dyn DocumentStore>,
    runner: Arc<dyn PassRunner>,
) -> (oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let config = get_test_config();
    let handle = tokio::spawn(async move {
        let mut monitor = TriggerMonitor::new(store, runner, &config.trigger);
        monitor
            .run_until(async {
                shutdown_rx.await.ok();
            })
            .await;
    });
    (shutdown_tx, handle)
}

async fn set_state(store: &dyn DocumentStore, state: &str) {
    store
        .set(SETTINGS, json!({ STATE_FIELD: state }), SetMode::Merge)
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_pending_runs_one_pass_and_ignores_repeat_requests() {
    let store = Arc::new(MemoryDocumentStore::new());
    seed(store.as_ref(), SETTINGS, json!({ STATE_FIELD: "Idle", "Version": 3 })).await;
    let runner = Arc::new(GatedRunner::default());

    let (shutdown, monitor) = spawn_monitor(store.clone(), runner.clone());

    set_state(store.as_ref(), "Pending").await;
    wait_for_state(store.as_ref(), "Running").await;
    assert_eq!(runner.runs.load(Ordering::SeqCst), 1);

    // A second request while the pass is held must not start another.
    set_state(store.as_ref(), "Pending").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(runner.runs.load(Ordering::SeqCst), 1);

    runner.release.notify_one();
    wait_for_state(store.as_ref(), "Done").await;
    assert_eq!(runner.runs.load(Ordering::SeqCst), 1);

    let settings = store.get(SETTINGS).await.unwrap().unwrap();
    assert_eq!(settings.data["Version"], json!(3));

    // The flag can be raised again once the pass is over.
    set_state(store.as_ref(), "Pending").await;
    wait_for_state(store.as_ref(), "Running").await;
    runner.release.notify_one();
    wait_for_state(store.as_ref(), "Done").await;
    assert_eq!(runner.runs.load(Ordering::SeqCst), 2);

    shutdown.send(()).unwrap();
    monitor.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_pass_still_releases_trigger() {
    let store = Arc::new(MemoryDocumentStore::new());
    seed(store.as_ref(), SETTINGS, json!({ STATE_FIELD: "Pending" })).await;
    let runner = Arc::new(SlowFailingRunner {
        runs: AtomicUsize::new(0),
    });

    let (shutdown, monitor) = spawn_monitor(store.clone(), runner.clone());

    wait_for_state(store.as_ref(), "Running").await;
    wait_for_state(store.as_ref(), "Done").await;
    assert_eq!(runner.runs.load(Ordering::SeqCst), 1);

    shutdown.send(()).unwrap();
    monitor.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_waits_for_running_pass() {
    let store = Arc::new(MemoryDocumentStore::new());
    seed(store.as_ref(), SETTINGS, json!({ STATE_FIELD: "Pending" })).await;
    let runner = Arc::new(SlowFailingRunner {
        runs: AtomicUsize::new(0),
    });

    let (shutdown, monitor) = spawn_monitor(store.clone(), runner.clone());
    wait_for_state(store.as_ref(), "Running").await;

    shutdown.send(()).unwrap();
    monitor.await.unwrap();

    let settings = store.get(SETTINGS).await.unwrap().unwrap();
    assert_eq!(settings.data[STATE_FIELD], json!("Done"));
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_backoff_doubles_and_resets() {
    let store = Arc::new(FlakyWatchStore::new(vec![
        WatchScript::Fail,
        WatchScript::Fail,
        WatchScript::DeliverThenFail,
        WatchScript::Fail,
    ]));
    let runner = Arc::new(GatedRunner::default());

    let (shutdown, monitor) = spawn_monitor(store.clone(), runner.clone());

    // Fail, wait 1s, fail, wait 2s, deliver (reset) then fail, wait 1s,
    // fail, wait 2s, then a healthy subscription.
    tokio::time::sleep(Duration::from_secs(20)).await;

    assert_eq!(store.resubscribe_gaps(), vec![1, 2, 1, 2]);
    assert_eq!(runner.runs.load(Ordering::SeqCst), 0);

    shutdown.send(()).unwrap();
    monitor.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_healthy_subscription_after_failures_still_triggers() {
    let store = Arc::new(FlakyWatchStore::new(vec![WatchScript::Fail]));
    seed(store.as_ref(), SETTINGS, json!({ STATE_FIELD: "Idle" })).await;
    let runner = Arc::new(GatedRunner::default());

    let (shutdown, monitor) = spawn_monitor(store.clone(), runner.clone());
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(store.subscribed_at().len(), 2);

    set_state(store.as_ref(), "Pending").await;
    wait_for_state(store.as_ref(), "Running").await;
    runner.release.notify_one();
    wait_for_state(store.as_ref(), "Done").await;

    shutdown.send(()).unwrap();
    monitor.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_request_during_release_is_picked_up() {
    let store = Arc::new(RequestDuringReleaseStore::new());
    seed(store.as_ref(), SETTINGS, json!({ STATE_FIELD: "Idle" })).await;
    let runner = Arc::new(GatedRunner::default());

    let (shutdown, monitor) = spawn_monitor(store.clone(), runner.clone());

    set_state(store.as_ref(), "Pending").await;
    wait_for_runs(&runner, 1).await;
    runner.release.notify_one();

    wait_for_runs(&runner, 2).await;
    runner.release.notify_one();
    wait_for_state(store.as_ref(), "Done").await;
    assert_eq!(runner.runs.load(Ordering::SeqCst), 2);

    shutdown.send(()).unwrap();
    monitor.await.unwrap();
}
