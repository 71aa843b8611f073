pub mod fetcher;

pub use fetcher::PriceFetcher;
#[cfg(test)]
pub use fetcher::MockPriceFetcher;
