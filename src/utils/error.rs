use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures raised by a document store backend.
///
/// Persistence and subscription failures both surface as this type; callers
/// decide whether a failure is isolated (item writes, history merges) or
/// drives a reconnect (trigger subscriptions).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid document path: {path}")]
    InvalidPath { path: String },

    #[error("Transaction aborted on {path}: {message}")]
    Transaction { path: String, message: String },

    #[error("Subscription error: {0}")]
    Stream(String),
}

/// Per-link fetch failure. Recorded on the link, never propagated past the
/// item processor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Fetch timed out after {after_secs}s")]
    Timeout { after_secs: u64 },

    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("Unparsable price text: {text:?}")]
    Unparsable { text: String },

    #[error("No fetcher registered for retailer {retailer_id}")]
    NoFetcher { retailer_id: String },

    #[error("Browser error: {0}")]
    Browser(String),
}

// Result type alias for convenience
pub type Result<T> = std::result::Result<T, AppError>;
