use async_trait::async_trait;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::price_text::{parse_price, price_from_parts};
use crate::models::Price;
use crate::plugins::traits::PriceFetcher;
use crate::scraper::{PageRequest, WebScraper};
use crate::utils::error::FetchFailure;

/// How a retailer renders its price on a product page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectorProfile {
    /// One element holding the full price text.
    Single { selector: String },
    /// Dollars and cents rendered in separate elements.
    Split { dollars: String, cents: String },
}

impl SelectorProfile {
    pub fn selectors(&self) -> Vec<String> {
        match self {
            SelectorProfile::Single { selector } => vec![selector.clone()],
            SelectorProfile::Split { dollars, cents } => vec![dollars.clone(), cents.clone()],
        }
    }

    pub fn is_valid(&self) -> bool {
        self.selectors()
            .iter()
            .all(|selector| Selector::parse(selector).is_ok())
    }

    /// Turns the extracted element texts (one per selector, in order) into a
    /// price.
    pub fn read_price(&self, texts: &[Option<String>]) -> Result<Price, FetchFailure> {
        let primary = self.selectors().remove(0);
        let first = texts
            .first()
            .and_then(|text| text.as_deref())
            .ok_or(FetchFailure::ElementNotFound { selector: primary })?;

        let price = match self {
            SelectorProfile::Single { .. } => parse_price(first),
            SelectorProfile::Split { .. } => {
                let cents = texts.get(1).and_then(|text| text.as_deref());
                price_from_parts(first, cents)
            }
        };

        price.ok_or_else(|| FetchFailure::Unparsable {
            text: first.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetailerProfile {
    pub retailer_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub selector: SelectorProfile,
    /// Element to wait for before reading the page. Defaults to the primary
    /// price selector.
    #[serde(default)]
    pub wait_for_selector: Option<String>,
    /// Page visited first in the same tab, for retailers that only serve
    /// product pages to sessions that arrived through the storefront.
    #[serde(default)]
    pub warmup_url: Option<String>,
}

/// Fetches prices by loading the product page in headless Chrome and reading
/// the profile's selectors.
pub struct BrowserPriceFetcher {
    scraper: Arc<WebScraper>,
    profile: RetailerProfile,
}

impl BrowserPriceFetcher {
    pub fn new(scraper: Arc<WebScraper>, profile: RetailerProfile) -> Self {
        Self { scraper, profile }
    }

    pub fn profile(&self) -> &RetailerProfile {
        &self.profile
    }

    fn page_request(&self, url: &str) -> PageRequest {
        let selectors = self.profile.selector.selectors();
        let wait_for_selector = self
            .profile
            .wait_for_selector
            .clone()
            .or_else(|| selectors.first().cloned());

        PageRequest {
            url: url.to_string(),
            selectors,
            wait_for_selector,
            warmup_url: self.profile.warmup_url.clone(),
        }
    }
}

#[async_trait]
impl PriceFetcher for BrowserPriceFetcher {
    async fn fetch(&self, retailer_id: &str, url_parameters: &str) -> Result<Price, FetchFailure> {
        let request = self.page_request(url_parameters);
        let page = self.scraper.fetch_page(request).await?;

        let price = self.profile.selector.read_price(&page.texts)?;
        tracing::debug!(
            "Read price {} for retailer {} from {} in {}ms",
            price,
            retailer_id,
            page.final_url,
            page.response_time_ms
        );
        Ok(price)
    }
}
