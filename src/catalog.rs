use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::fetch_gate::FetchGate;
use crate::history::HistoryAggregator;
use crate::item_processor::ItemProcessor;
use crate::models::{ProductItem, RetailerDirectory};
use crate::plugins::PriceFetcher;
use crate::store::{join_path, Document, DocumentStore, SetMode};
use crate::utils::error::StoreError;

/// Summary of one catalog pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    pub items_seen: usize,
    pub items_dirty: usize,
    pub items_persisted: usize,
    pub links_attempted: usize,
    pub links_updated: usize,
    pub links_failed: usize,
    pub links_skipped: usize,
    pub history_writes: usize,
    /// One line per isolated item-level failure.
    pub failures: Vec<String>,
}

/// Something the trigger monitor can run when a pass is requested.
#[async_trait]
pub trait PassRunner: Send + Sync {
    async fn run_pass(&self) -> Result<PassReport, StoreError>;
}

/// One sweep over the product catalog: load, fetch due links, persist dirty
/// items and append their history.
pub struct CatalogPass {
    store: Arc<dyn DocumentStore>,
    processor: ItemProcessor,
    history: HistoryAggregator,
    products_collection: String,
}

impl CatalogPass {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        processor: ItemProcessor,
        history: HistoryAggregator,
        products_collection: impl Into<String>,
    ) -> Self {
        Self {
            store,
            processor,
            history,
            products_collection: products_collection.into(),
        }
    }

    /// Wires the processor and aggregator from configuration. Every fetch is
    /// bounded by `scraper.request_timeout`.
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn DocumentStore>,
        fetcher: Arc<dyn PriceFetcher>,
        directory: Arc<RetailerDirectory>,
    ) -> crate::Result<Self> {
        let zone = config.history.zone()?;
        let products = &config.catalog.products_collection;

        let processor = ItemProcessor::new(FetchGate::new(zone), fetcher, directory)
            .with_fetch_timeout(config.scraper.request_timeout());
        let history = HistoryAggregator::new(
            Arc::clone(&store),
            products.clone(),
            zone,
            config.history.bucket_policy,
        );

        Ok(Self::new(store, processor, history, products.clone()))
    }

    /// Runs a pass, reading the clock afresh for every item.
    pub async fn run(&self) -> Result<PassReport, StoreError> {
        self.run_with_clock(Utc::now).await
    }

    /// Runs a pass with a fixed clock.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<PassReport, StoreError> {
        self.run_with_clock(|| now).await
    }

    async fn run_with_clock<F>(&self, clock: F) -> Result<PassReport, StoreError>
    where
        F: Fn() -> DateTime<Utc> + Send + Sync,
    {
        let documents = self.store.get_all(&self.products_collection).await?;
        let mut report = PassReport::default();

        if documents.is_empty() {
            tracing::info!("No product items in {}", self.products_collection);
            return Ok(report);
        }
        tracing::info!("Starting pass over {} product items", documents.len());

        for document in &documents {
            report.items_seen += 1;
            self.process_document(document, clock(), &mut report).await;
        }

        counter!("repricer_passes_total").increment(1);
        counter!("repricer_links_total", "outcome" => "updated").increment(report.links_updated as u64);
        counter!("repricer_links_total", "outcome" => "failed").increment(report.links_failed as u64);
        counter!("repricer_links_total", "outcome" => "skipped").increment(report.links_skipped as u64);

        Ok(report)
    }

    async fn process_document(&self, document: &Document, now: DateTime<Utc>, report: &mut PassReport) {
        let mut item = match ProductItem::from_document(document) {
            Ok(item) => item,
            Err(e) => {
                tracing::error!("Skipping undecodable product {}: {}", document.path, e);
                report.failures.push(format!("{}: decode failed: {}", document.path, e));
                return;
            }
        };

        let outcome = self.processor.process(&mut item, now).await;
        report.links_attempted += outcome.attempted();
        report.links_updated += outcome.updated();
        report.links_failed += outcome.failed();
        report.links_skipped += outcome.skipped();

        if !item.dirty {
            return;
        }
        report.items_dirty += 1;

        match self.persist(&item).await {
            Ok(true) => report.items_persisted += 1,
            Ok(false) => {}
            Err(e) => {
                tracing::error!("Failed to persist product {}: {}", item.name, e);
                report.failures.push(format!("{}: persist failed: {}", document.path, e));
                counter!("repricer_item_failures_total", "step" => "persist").increment(1);
            }
        }

        match self.history.append_history(&item, now).await {
            Ok(Some(_)) => report.history_writes += 1,
            Ok(None) => {}
            Err(e) => {
                tracing::error!("Failed to append history for {}: {}", item.name, e);
                report.failures.push(format!("{}: history failed: {}", document.path, e));
                counter!("repricer_item_failures_total", "step" => "history").increment(1);
            }
        }
    }

    /// Writes the item's mutable fields back to its document. Returns false
    /// for transient items.
    pub async fn persist(&self, item: &ProductItem) -> Result<bool, StoreError> {
        let Some(record_id) = item.source_record_id.as_deref() else {
            tracing::debug!("Not persisting transient item {}", item.name);
            return Ok(false);
        };

        let path = join_path(&[&self.products_collection, record_id]);
        self.store
            .set(&path, item.persisted_fields(), SetMode::Merge)
            .await?;
        Ok(true)
    }
}

#[async_trait]
impl PassRunner for CatalogPass {
    async fn run_pass(&self) -> Result<PassReport, StoreError> {
        self.run().await
    }
}
