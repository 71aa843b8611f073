use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use super::fetchers::{BrowserPriceFetcher, RetailerProfile};
use super::traits::PriceFetcher;
use crate::models::Price;
use crate::scraper::WebScraper;
use crate::utils::error::FetchFailure;

pub type PriceFetcherRef = Arc<dyn PriceFetcher>;

/// Resolves the fetcher for a retailer id.
///
/// The registry is itself a [`PriceFetcher`] that dispatches on the retailer
/// id, so orchestration code never branches on retailers.
#[derive(Clone, Default)]
pub struct FetcherRegistry {
    fetchers: HashMap<String, PriceFetcherRef>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds one browser-backed fetcher per configured retailer profile,
    /// all sharing a single scraper.
    pub fn from_profiles(profiles: &[RetailerProfile], scraper: Arc<WebScraper>) -> Self {
        let mut registry = Self::new();
        for profile in profiles {
            let fetcher = BrowserPriceFetcher::new(Arc::clone(&scraper), profile.clone());
            registry.register(profile.retailer_id.clone(), Arc::new(fetcher));
        }
        registry
    }

    /// Register a fetcher, replacing any previous one for the retailer
    pub fn register(&mut self, retailer_id: impl Into<String>, fetcher: PriceFetcherRef) {
        let retailer_id = retailer_id.into();
        if self.fetchers.insert(retailer_id.clone(), fetcher).is_some() {
            tracing::warn!("Replaced fetcher for retailer {}", retailer_id);
        }
    }

    pub fn resolve(&self, retailer_id: &str) -> Option<PriceFetcherRef> {
        self.fetchers.get(retailer_id).cloned()
    }

    pub fn has_fetcher(&self, retailer_id: &str) -> bool {
        self.fetchers.contains_key(retailer_id)
    }

    pub fn list_retailer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.fetchers.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.fetchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty()
    }
}

#[async_trait]
impl PriceFetcher for FetcherRegistry {
    async fn fetch(&self, retailer_id: &str, url_parameters: &str) -> Result<Price, FetchFailure> {
        match self.resolve(retailer_id) {
            Some(fetcher) => fetcher.fetch(retailer_id, url_parameters).await,
            None => Err(FetchFailure::NoFetcher {
                retailer_id: retailer_id.to_string(),
            }),
        }
    }
}
