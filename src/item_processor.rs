use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::fetch_gate::FetchGate;
use crate::models::{Price, ProductItem, RetailerDirectory, RetailerLink};
use crate::plugins::PriceFetcher;
use crate::utils::error::FetchFailure;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LinkOutcome {
    /// Not due: no url, or already attempted today.
    Skipped,
    Updated(Price),
    /// The fetcher returned a zero or negative price.
    Degenerate(Price),
    Failed(String),
}

impl LinkOutcome {
    pub fn was_attempted(&self) -> bool {
        !matches!(self, LinkOutcome::Skipped)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkReport {
    pub combo_key: String,
    pub outcome: LinkOutcome,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub links: Vec<LinkReport>,
}

impl ProcessOutcome {
    pub fn attempted(&self) -> usize {
        self.links.iter().filter(|l| l.outcome.was_attempted()).count()
    }

    pub fn updated(&self) -> usize {
        self.count(|outcome| matches!(outcome, LinkOutcome::Updated(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| {
            matches!(outcome, LinkOutcome::Failed(_) | LinkOutcome::Degenerate(_))
        })
    }

    pub fn skipped(&self) -> usize {
        self.count(|outcome| matches!(outcome, LinkOutcome::Skipped))
    }

    fn count(&self, predicate: impl Fn(&LinkOutcome) -> bool) -> usize {
        self.links.iter().filter(|l| predicate(&l.outcome)).count()
    }
}

/// Runs the day gate and the fetcher over each of a product's links.
pub struct ItemProcessor {
    gate: FetchGate,
    fetcher: Arc<dyn PriceFetcher>,
    directory: Arc<RetailerDirectory>,
    fetch_timeout: Option<Duration>,
}

impl ItemProcessor {
    pub fn new(gate: FetchGate, fetcher: Arc<dyn PriceFetcher>, directory: Arc<RetailerDirectory>) -> Self {
        Self {
            gate,
            fetcher,
            directory,
            fetch_timeout: None,
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn gate(&self) -> &FetchGate {
        &self.gate
    }

    /// Updates the item's links in place and marks it dirty if any link was
    /// attempted. Fetch failures are recorded on their link and never abort
    /// the remaining links.
    pub async fn process(&self, item: &mut ProductItem, now: DateTime<Utc>) -> ProcessOutcome {
        let mut outcome = ProcessOutcome::default();

        for link in item.retailers.iter_mut() {
            let result = self.process_link(link, now).await;
            if result.was_attempted() {
                item.dirty = true;
            }
            outcome.links.push(LinkReport {
                combo_key: link.combo_key(),
                outcome: result,
            });
        }

        outcome
    }

    async fn process_link(&self, link: &mut RetailerLink, now: DateTime<Utc>) -> LinkOutcome {
        let retailer = self.directory.display_name(&link.retailer_id).to_string();

        if !self.gate.is_due(link, now) {
            tracing::debug!(
                "Skipping {} pack {}: no url or already attempted today",
                retailer,
                link.pack_id
            );
            return LinkOutcome::Skipped;
        }
        let Some(url) = link.fetch_target().map(str::to_string) else {
            return LinkOutcome::Skipped;
        };

        // Stamped before the fetch so a crash mid-fetch still counts as today's attempt.
        link.record_attempt(now);

        tracing::info!("Fetching price for {} pack {}", retailer, link.pack_id);
        match self.fetch(&link.retailer_id, &url).await {
            Ok(price) if price.is_positive() => {
                link.record_price(price);
                tracing::info!("Price for {} pack {}: {}", retailer, link.pack_id, price);
                LinkOutcome::Updated(price)
            }
            Ok(price) => {
                link.record_error();
                tracing::warn!(
                    "Discarding degenerate price {} for {} pack {}",
                    price,
                    retailer,
                    link.pack_id
                );
                LinkOutcome::Degenerate(price)
            }
            Err(e) => {
                link.record_error();
                tracing::warn!("Failed to fetch price for {} pack {}: {}", retailer, link.pack_id, e);
                LinkOutcome::Failed(e.to_string())
            }
        }
    }

    async fn fetch(&self, retailer_id: &str, url: &str) -> Result<Price, FetchFailure> {
        let fetch = self.fetcher.fetch(retailer_id, url);
        match self.fetch_timeout {
            Some(timeout) => tokio::time::timeout(timeout, fetch)
                .await
                .map_err(|_| FetchFailure::Timeout {
                    after_secs: timeout.as_secs(),
                })?,
            None => fetch.await,
        }
    }
}
