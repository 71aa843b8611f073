use futures::StreamExt;
use serde_json::json;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};

use crate::catalog::PassRunner;
use crate::config::TriggerConfig;
use crate::models::ScraperState;
use crate::store::{field_object, Document, DocumentStore, SetMode};

/// Exponential resubscription delay: `d, 2d, 4d, ...` capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    pub fn current(&self) -> Duration {
        self.current
    }
}

/// Watches the trigger flag and runs a catalog pass each time it turns
/// `Pending`.
///
/// The flag is claimed by writing `Running` before the pass starts and
/// released by writing `Done` once it ends, whatever the pass outcome. A
/// `Pending` seen while a pass is in flight is ignored, and the flag is read
/// again once the pass task has finished. A broken
/// subscription is re-established after an exponential backoff, which resets
/// whenever a snapshot arrives.
pub struct TriggerMonitor {
    store: Arc<dyn DocumentStore>,
    runner: Arc<dyn PassRunner>,
    settings_document: String,
    state_field: String,
    backoff: Backoff,
    in_flight: Arc<AtomicBool>,
    pass: Option<JoinHandle<()>>,
}

impl TriggerMonitor {
    pub fn new(store: Arc<dyn DocumentStore>, runner: Arc<dyn PassRunner>, config: &TriggerConfig) -> Self {
        Self {
            store,
            runner,
            settings_document: config.settings_document.clone(),
            state_field: config.state_field.clone(),
            backoff: Backoff::new(config.initial_backoff(), config.max_backoff()),
            in_flight: Arc::new(AtomicBool::new(false)),
            pass: None,
        }
    }

    pub fn is_pass_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Runs until `shutdown` resolves, then waits for any in-flight pass.
    pub async fn run_until<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        tracing::info!("Watching {} for pass requests", self.settings_document);

        loop {
            let mut snapshots = self.store.watch(&self.settings_document);

            loop {
                tokio::select! {
                    _ = &mut shutdown => {
                        self.finish().await;
                        return;
                    }
                    joined = Self::join_pass(&mut self.pass), if self.pass.is_some() => {
                        self.pass = None;
                        if let Err(e) = joined {
                            tracing::error!("Pass task failed: {}", e);
                        }
                        // Picks up a request written while the trigger was being released.
                        self.recheck().await;
                    }
                    next = snapshots.next() => match next {
                        Some(Ok(snapshot)) => {
                            self.backoff.reset();
                            self.on_snapshot(snapshot).await;
                        }
                        Some(Err(e)) => {
                            tracing::error!("Trigger subscription failed: {}", e);
                            break;
                        }
                        None => {
                            tracing::warn!("Trigger subscription ended");
                            break;
                        }
                    }
                }
            }

            let delay = self.backoff.next_delay();
            tracing::info!("Resubscribing to {} in {:?}", self.settings_document, delay);
            tokio::select! {
                _ = &mut shutdown => {
                    self.finish().await;
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn join_pass(pass: &mut Option<JoinHandle<()>>) -> Result<(), JoinError> {
        match pass {
            Some(handle) => handle.await,
            None => std::future::pending().await,
        }
    }

    async fn recheck(&mut self) {
        match self.store.get(&self.settings_document).await {
            Ok(snapshot) => self.on_snapshot(snapshot).await,
            Err(e) => tracing::warn!("Failed to re-read trigger after pass: {}", e),
        }
    }

    async fn on_snapshot(&mut self, snapshot: Option<Document>) {
        let Some(document) = snapshot else {
            tracing::error!("Settings document {} does not exist", self.settings_document);
            return;
        };

        let state = document
            .data
            .get(&self.state_field)
            .and_then(|value| value.as_str())
            .map(|raw| ScraperState::from(raw.to_string()))
            .unwrap_or(ScraperState::Idle);

        if !state.requests_pass() {
            if state == ScraperState::Running && !self.is_pass_in_flight() {
                tracing::warn!("Trigger is {} but no pass is running here", state);
            } else {
                tracing::debug!("Trigger state {}", state);
            }
            return;
        }

        if self.in_flight.swap(true, Ordering::SeqCst) {
            tracing::info!("Pass already in progress, ignoring request");
            return;
        }

        if let Err(e) = self.write_state(ScraperState::Running).await {
            tracing::error!("Failed to claim trigger: {}", e);
            self.in_flight.store(false, Ordering::SeqCst);
            return;
        }

        self.pass = Some(self.spawn_pass());
    }

    fn spawn_pass(&self) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let runner = Arc::clone(&self.runner);
        let in_flight = Arc::clone(&self.in_flight);
        let settings_document = self.settings_document.clone();
        let state_field = self.state_field.clone();

        tokio::spawn(async move {
            tracing::info!("Pass started");
            match runner.run_pass().await {
                Ok(report) => tracing::info!(
                    items_seen = report.items_seen,
                    items_dirty = report.items_dirty,
                    items_persisted = report.items_persisted,
                    links_attempted = report.links_attempted,
                    links_updated = report.links_updated,
                    links_failed = report.links_failed,
                    links_skipped = report.links_skipped,
                    history_writes = report.history_writes,
                    failures = report.failures.len(),
                    "Pass complete"
                ),
                Err(e) => tracing::error!("Pass aborted: {}", e),
            }

            let done = field_object(&state_field, json!(ScraperState::Done.as_str()));
            if let Err(e) = store.set(&settings_document, done, SetMode::Merge).await {
                tracing::error!("Failed to release trigger: {}", e);
            }
            in_flight.store(false, Ordering::SeqCst);
        })
    }

    async fn write_state(&self, state: ScraperState) -> Result<(), crate::utils::error::StoreError> {
        let fields = field_object(&self.state_field, json!(state.as_str()));
        self.store
            .set(&self.settings_document, fields, SetMode::Merge)
            .await
    }

    async fn finish(&mut self) {
        if let Some(pass) = self.pass.take() {
            if !pass.is_finished() {
                tracing::info!("Waiting for the running pass to finish");
            }
            if let Err(e) = pass.await {
                tracing::error!("Pass task failed: {}", e);
            }
        }
        tracing::info!("Trigger monitor stopped");
    }
}
