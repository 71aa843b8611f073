pub mod history;
pub mod price;
pub mod product_item;
pub mod retailer;
pub mod retailer_link;
pub mod trigger;

// Re-exports for convenience
pub use history::*;
pub use price::*;
pub use product_item::*;
pub use retailer::*;
pub use retailer_link::*;
pub use trigger::*;
