pub mod fetchers;
pub mod manager;
pub mod traits;

pub use manager::FetcherRegistry;
pub use traits::PriceFetcher;
