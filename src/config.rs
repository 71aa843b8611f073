use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use url::Url;

use crate::history::BucketPolicy;
use crate::plugins::fetchers::RetailerProfile;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub scraper: ScraperConfig,
    pub trigger: TriggerConfig,
    pub catalog: CatalogConfig,
    pub history: HistoryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// Selector profiles, one per retailer id. A list rather than a table
    /// because config keys are case-folded and retailer ids are not.
    #[serde(default)]
    pub retailers: Vec<RetailerProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    /// Seconds before a single fetch is abandoned.
    pub request_timeout: u64,
    pub user_agent: String,
    pub chrome_path: Option<String>,
    #[serde(default = "default_headless")]
    pub headless: bool,
}

fn default_headless() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    pub settings_document: String,
    pub state_field: String,
    pub poll_interval_ms: u64,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub products_collection: String,
    pub retailers_collection: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// IANA zone used for day gating and history date keys.
    pub time_zone: String,
    #[serde(default)]
    pub bucket_policy: BucketPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// When set, logs are also written to a daily rolling file here.
    pub directory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9001,
        }
    }
}

impl ScraperConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

impl TriggerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl HistoryConfig {
    pub fn zone(&self) -> Result<Tz, ConfigError> {
        self.time_zone.parse::<Tz>().map_err(|e| {
            ConfigError::Message(format!("Invalid time zone '{}': {}", self.time_zone, e))
        })
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load("config")
    }

    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name(&format!("{}/default", config_dir)))
            // Add environment-specific config
            .add_source(File::with_name(&format!("{}/{}", config_dir, run_mode)).required(false))
            // Add local config (ignored by git)
            .add_source(File::with_name(&format!("{}/local", config_dir)).required(false))
            // Add environment variables with prefix "REPRICER_"
            .add_source(Environment::with_prefix("REPRICER").separator("__"))
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;

        // Add Chrome path from environment if not set
        if config.scraper.chrome_path.is_none() {
            config.scraper.chrome_path = env::var("CHROME_PATH").ok();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate database configuration
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Message("Database url must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Message("Database max_connections must be greater than 0".into()));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Message("Database min_connections cannot exceed max_connections".into()));
        }

        // Validate scraper configuration
        if self.scraper.request_timeout == 0 {
            return Err(ConfigError::Message("Scraper request_timeout must be greater than 0".into()));
        }

        // Validate trigger configuration
        if !is_document_path(&self.trigger.settings_document) {
            return Err(ConfigError::Message(
                "Trigger settings_document must be a collection/document path".into(),
            ));
        }

        if self.trigger.state_field.trim().is_empty() {
            return Err(ConfigError::Message("Trigger state_field must not be empty".into()));
        }

        if self.trigger.poll_interval_ms == 0 || self.trigger.initial_backoff_ms == 0 {
            return Err(ConfigError::Message(
                "Trigger poll_interval_ms and initial_backoff_ms must be greater than 0".into(),
            ));
        }

        if self.trigger.initial_backoff_ms > self.trigger.max_backoff_ms {
            return Err(ConfigError::Message("Trigger initial_backoff_ms cannot exceed max_backoff_ms".into()));
        }

        // Validate catalog configuration
        if self.catalog.products_collection.trim().is_empty()
            || self.catalog.retailers_collection.trim().is_empty()
        {
            return Err(ConfigError::Message("Catalog collection names must not be empty".into()));
        }

        // Validate history configuration
        self.history.zone()?;

        // Validate metrics configuration
        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(ConfigError::Message("Metrics port must be greater than 0".into()));
        }

        // Validate retailer profiles
        let mut seen = std::collections::HashSet::new();
        for profile in &self.retailers {
            if profile.retailer_id.trim().is_empty() {
                return Err(ConfigError::Message("Retailer profile is missing retailer_id".into()));
            }
            if !seen.insert(profile.retailer_id.as_str()) {
                return Err(ConfigError::Message(format!(
                    "Duplicate retailer profile for {}",
                    profile.retailer_id
                )));
            }
            if let Some(warmup) = &profile.warmup_url {
                if Url::parse(warmup).is_err() {
                    return Err(ConfigError::Message(format!(
                        "Invalid warmup_url for retailer {}",
                        profile.retailer_id
                    )));
                }
            }
            if !profile.selector.is_valid() {
                return Err(ConfigError::Message(format!(
                    "Invalid CSS selector for retailer {}",
                    profile.retailer_id
                )));
            }
        }

        Ok(())
    }
}

fn is_document_path(path: &str) -> bool {
    let segments: Vec<&str> = path.split('/').collect();
    segments.len() >= 2 && segments.len() % 2 == 0 && segments.iter().all(|s| !s.is_empty())
}
