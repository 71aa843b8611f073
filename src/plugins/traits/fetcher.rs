use async_trait::async_trait;

use crate::models::Price;
use crate::utils::error::FetchFailure;

/// Capability that reads the current price of one retailer listing.
///
/// Implementations own whatever transient resources they need (a browser tab,
/// an HTTP client) and release them on every call, success or failure. They
/// must be safe to call repeatedly for the same listing.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceFetcher: Send + Sync {
    async fn fetch(&self, retailer_id: &str, url_parameters: &str) -> Result<Price, FetchFailure>;
}
