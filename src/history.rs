use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::fetch_gate::local_date;
use crate::models::{DayObservations, HistoryBucket, ProductItem};
use crate::store::{join_path, DocumentStore};
use crate::utils::error::StoreError;

pub const HISTORY_COLLECTION: &str = "History";

/// How observation dates are grouped into history documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BucketPolicy {
    /// Quarters of a financial year starting in July, e.g. `Q32024` for
    /// 2024-03-15.
    #[default]
    FiscalQuarter,
    /// One bucket per calendar year, e.g. `2024`.
    CalendarYear,
}

impl BucketPolicy {
    pub fn bucket_id(&self, date: NaiveDate) -> String {
        match self {
            BucketPolicy::FiscalQuarter => {
                let (quarter, fiscal_year) = match date.month() {
                    7..=9 => (1, date.year()),
                    10..=12 => (2, date.year()),
                    1..=3 => (3, date.year() + 1),
                    _ => (4, date.year() + 1),
                };
                format!("Q{}{}", quarter, fiscal_year)
            }
            BucketPolicy::CalendarYear => date.year().to_string(),
        }
    }
}

/// A history merge that was committed.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryWrite {
    pub path: String,
    pub bucket_id: String,
    pub date_key: String,
    pub observations: DayObservations,
}

/// Appends a product's fresh prices to its bucketed history ledger.
pub struct HistoryAggregator {
    store: Arc<dyn DocumentStore>,
    products_collection: String,
    zone: Tz,
    policy: BucketPolicy,
}

impl HistoryAggregator {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        products_collection: impl Into<String>,
        zone: Tz,
        policy: BucketPolicy,
    ) -> Self {
        Self {
            store,
            products_collection: products_collection.into(),
            zone,
            policy,
        }
    }

    /// Prices from links whose latest attempt succeeded, keyed by combo key.
    pub fn observations(item: &ProductItem) -> DayObservations {
        item.retailers
            .iter()
            .filter_map(|link| link.observed_price().map(|price| (link.combo_key(), price)))
            .collect()
    }

    pub fn date_key(&self, now: DateTime<Utc>) -> String {
        local_date(now, self.zone).format("%Y-%m-%d").to_string()
    }

    pub fn bucket_id(&self, now: DateTime<Utc>) -> String {
        self.policy.bucket_id(local_date(now, self.zone))
    }

    pub fn bucket_path(&self, record_id: &str, bucket_id: &str) -> String {
        join_path(&[&self.products_collection, record_id, HISTORY_COLLECTION, bucket_id])
    }

    /// Merges today's observations for `item` into its current bucket.
    ///
    /// Returns `Ok(None)` without touching the store for transient items and
    /// for items with nothing observed.
    pub async fn append_history(
        &self,
        item: &ProductItem,
        now: DateTime<Utc>,
    ) -> Result<Option<HistoryWrite>, StoreError> {
        let Some(record_id) = item.source_record_id.as_deref() else {
            tracing::debug!("Skipping history for transient item {}", item.name);
            return Ok(None);
        };

        let observations = Self::observations(item);
        if observations.is_empty() {
            tracing::debug!("No prices observed for {}, history unchanged", item.name);
            return Ok(None);
        }

        let bucket_id = self.bucket_id(now);
        let date_key = self.date_key(now);
        let path = self.bucket_path(record_id, &bucket_id);

        self.merge_observations(&path, &date_key, &observations).await?;
        tracing::debug!(
            "Recorded {} prices for {} under {} {}",
            observations.len(),
            item.name,
            bucket_id,
            date_key
        );

        Ok(Some(HistoryWrite {
            path,
            bucket_id,
            date_key,
            observations,
        }))
    }

    /// Read-modify-write of one bucket document inside a store transaction.
    pub async fn merge_observations(
        &self,
        path: &str,
        date_key: &str,
        observations: &DayObservations,
    ) -> Result<(), StoreError> {
        let date_key = date_key.to_string();
        let observations = observations.clone();

        self.store
            .transaction(
                path,
                Box::new(move |current: Option<serde_json::Value>| {
                    let mut bucket = match current {
                        Some(body) => HistoryBucket::from_value(body)?,
                        None => HistoryBucket::new(),
                    };
                    bucket.merge_day(&date_key, &observations);
                    Ok(Some(bucket.to_value()?))
                }),
            )
            .await?;

        Ok(())
    }
}
