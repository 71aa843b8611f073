use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::models::Price;

pub const PACK_DIVIDER: &str = "__PK__";
pub const DEFAULT_PACK_ID: u32 = 1;

/// Scheduling state for one retailer × pack-size combination of a product.
///
/// Field names follow the persisted product document, so a link read from the
/// store and written back keeps its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetailerLink {
    #[serde(rename = "retailerId")]
    pub retailer_id: String,

    #[serde(
        rename = "packId",
        default = "default_pack_id",
        deserialize_with = "deserialize_pack_id"
    )]
    pub pack_id: u32,

    #[serde(rename = "urlParameters", default)]
    pub url_parameters: Option<String>,

    #[serde(rename = "latestPrice", default)]
    pub latest_price: Option<Price>,

    #[serde(rename = "retailerWouldSell", default)]
    pub retailer_would_sell: bool,

    #[serde(rename = "lastScraped", alias = "lastAttemptedAt", default)]
    pub last_attempted_at: Option<DateTime<Utc>>,

    #[serde(rename = "errorOnLastScrap", default)]
    pub had_error_on_last_attempt: bool,
}

fn default_pack_id() -> u32 {
    DEFAULT_PACK_ID
}

// Missing, null, zero and negative pack ids all mean the single-unit pack.
fn deserialize_pack_id<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<i64>::deserialize(deserializer)?;
    Ok(match raw {
        Some(id) if id > 0 => u32::try_from(id).unwrap_or(DEFAULT_PACK_ID),
        _ => DEFAULT_PACK_ID,
    })
}

impl RetailerLink {
    pub fn new(retailer_id: impl Into<String>, pack_id: u32, url_parameters: Option<String>) -> Self {
        Self {
            retailer_id: retailer_id.into(),
            pack_id: pack_id.max(DEFAULT_PACK_ID),
            url_parameters,
            latest_price: None,
            retailer_would_sell: true,
            last_attempted_at: None,
            had_error_on_last_attempt: false,
        }
    }

    /// History addressing key, unique within a product.
    pub fn combo_key(&self) -> String {
        format!("{}{}{}", self.retailer_id, PACK_DIVIDER, self.pack_id)
    }

    /// The url parameters to hand to a fetcher, if this link is sellable here.
    pub fn fetch_target(&self) -> Option<&str> {
        self.url_parameters
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }

    pub fn record_attempt(&mut self, at: DateTime<Utc>) {
        self.last_attempted_at = Some(at);
    }

    pub fn record_price(&mut self, price: Price) {
        self.latest_price = Some(price);
        self.had_error_on_last_attempt = false;
    }

    // The previous price is kept: a stale known price beats none.
    pub fn record_error(&mut self) {
        self.had_error_on_last_attempt = true;
    }

    /// Price that may be written to history for the current attempt.
    pub fn observed_price(&self) -> Option<Price> {
        if self.had_error_on_last_attempt {
            None
        } else {
            self.latest_price
        }
    }
}
