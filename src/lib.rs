pub mod catalog;
pub mod config;
pub mod fetch_gate;
pub mod history;
pub mod item_processor;
pub mod models;
pub mod plugins;
pub mod scraper;
pub mod store;
pub mod trigger_monitor;
pub mod utils;

// Re-export commonly used types
pub use catalog::{CatalogPass, PassReport, PassRunner};
pub use config::AppConfig;
pub use trigger_monitor::TriggerMonitor;
pub use utils::error::AppError;

pub type Result<T> = std::result::Result<T, AppError>;
