// Integration tests for the repricer
// These tests drive the catalog pass, history ledger and trigger monitor
// against real store backends with scripted fetchers.

pub mod history_tests;
pub mod trigger_monitor_tests;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::StreamExt;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use repricer::config::{
    AppConfig, CatalogConfig, DatabaseConfig, HistoryConfig, LoggingConfig, MetricsConfig,
    ScraperConfig, TriggerConfig,
};
use repricer::history::BucketPolicy;
use repricer::models::Price;
use repricer::plugins::PriceFetcher;
use repricer::store::{
    Document, DocumentStore, DocumentStream, MemoryDocumentStore, SetMode, SqliteDocumentStore,
    TransactionFn,
};
use repricer::utils::error::{FetchFailure, StoreError};

pub const PRODUCTS: &str = "ProductItems";
pub const SETTINGS: &str = "ProductSettings/Settings";
pub const STATE_FIELD: &str = "ScraperState";

/// Test configuration for integration tests
pub fn get_test_config() -> AppConfig {
    AppConfig {
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 2,
            min_connections: 1,
            acquire_timeout: 10,
        },
        scraper: ScraperConfig {
            request_timeout: 10,
            user_agent: "Repricer-Test/1.0".to_string(),
            chrome_path: None,
            headless: true,
        },
        trigger: TriggerConfig {
            settings_document: SETTINGS.to_string(),
            state_field: STATE_FIELD.to_string(),
            poll_interval_ms: 20,
            initial_backoff_ms: 1000,
            max_backoff_ms: 60000,
        },
        catalog: CatalogConfig {
            products_collection: PRODUCTS.to_string(),
            retailers_collection: "ProductRetailers".to_string(),
        },
        history: HistoryConfig {
            time_zone: "Australia/Sydney".to_string(),
            bucket_policy: BucketPolicy::FiscalQuarter,
        },
        logging: LoggingConfig::default(),
        metrics: MetricsConfig::default(),
        retailers: Vec::new(),
    }
}

/// Midday 2024-03-15 in Sydney.
pub fn scenario_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 1, 0, 0).unwrap()
}

pub async fn sqlite_store() -> Arc<SqliteDocumentStore> {
    let config = get_test_config();
    let store = SqliteDocumentStore::connect(&config.database, config.trigger.poll_interval())
        .await
        .expect("in-memory sqlite store");
    Arc::new(store)
}

pub async fn seed(store: &dyn DocumentStore, path: &str, body: Value) {
    store
        .set(path, body, SetMode::Overwrite)
        .await
        .expect("seed document");
}

/// Fetcher answering from a fixed table of `(retailer_id, url)` responses and
/// recording every call.
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: HashMap<(String, String), Result<Price, FetchFailure>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, retailer_id: &str, url: &str, response: Result<Price, FetchFailure>) -> Self {
        self.responses
            .insert((retailer_id.to_string(), url.to_string()), response);
        self
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PriceFetcher for ScriptedFetcher {
    async fn fetch(&self, retailer_id: &str, url_parameters: &str) -> Result<Price, FetchFailure> {
        let key = (retailer_id.to_string(), url_parameters.to_string());
        self.calls.lock().unwrap().push(key.clone());
        self.responses
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Err(FetchFailure::NoFetcher {
                retailer_id: retailer_id.to_string(),
            }))
    }
}

/// What a single `watch` call on [`FlakyWatchStore`] does.
#[derive(Debug, Clone, Copy)]
pub enum WatchScript {
    /// The subscription fails immediately.
    Fail,
    /// One snapshot is delivered, then the subscription fails.
    DeliverThenFail,
}

/// Memory store whose subscriptions follow a script, then behave normally.
/// Records the instant of every `watch` call.
pub struct FlakyWatchStore {
    inner: MemoryDocumentStore,
    script: Mutex<VecDeque<WatchScript>>,
    subscribed_at: Mutex<Vec<Instant>>,
}

impl FlakyWatchStore {
    pub fn new(script: Vec<WatchScript>) -> Self {
        Self {
            inner: MemoryDocumentStore::new(),
            script: Mutex::new(script.into()),
            subscribed_at: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribed_at(&self) -> Vec<Instant> {
        self.subscribed_at.lock().unwrap().clone()
    }

    /// Gaps between consecutive subscriptions, in whole seconds.
    pub fn resubscribe_gaps(&self) -> Vec<u64> {
        self.subscribed_at()
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_secs())
            .collect()
    }
}

#[async_trait]
impl DocumentStore for FlakyWatchStore {
    async fn get(&self, path: &str) -> Result<Option<Document>, StoreError> {
        self.inner.get(path).await
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        self.inner.get_all(collection).await
    }

    async fn set(&self, path: &str, data: Value, mode: SetMode) -> Result<(), StoreError> {
        self.inner.set(path, data, mode).await
    }

    async fn transaction(
        &self,
        path: &str,
        update: TransactionFn,
    ) -> Result<Option<Value>, StoreError> {
        self.inner.transaction(path, update).await
    }

    fn watch(&self, path: &str) -> DocumentStream {
        self.subscribed_at.lock().unwrap().push(Instant::now());
        let broken = || -> Result<Option<Document>, StoreError> {
            Err(StoreError::Stream("connection reset".to_string()))
        };

        match self.script.lock().unwrap().pop_front() {
            None => self.inner.watch(path),
            Some(WatchScript::Fail) => futures::stream::iter(vec![broken()]).boxed(),
            Some(WatchScript::DeliverThenFail) => {
                let first = self.inner.watch(path).take(1);
                first.chain(futures::stream::iter(vec![broken()])).boxed()
            }
        }
    }
}

/// Polls the settings document until the trigger field reads `expected`.
pub async fn wait_for_state(store: &dyn DocumentStore, expected: &str) {
    let deadline = Duration::from_secs(30);
    tokio::time::timeout(deadline, async {
        loop {
            let state = store
                .get(SETTINGS)
                .await
                .ok()
                .flatten()
                .and_then(|doc| doc.data.get(STATE_FIELD).and_then(Value::as_str).map(str::to_string));
            if state.as_deref() == Some(expected) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("trigger never reached {}", expected));
}
