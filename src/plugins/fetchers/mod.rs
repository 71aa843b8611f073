pub mod browser;
pub mod price_text;

pub use browser::{BrowserPriceFetcher, RetailerProfile, SelectorProfile};
pub use price_text::{parse_price, price_from_parts};
