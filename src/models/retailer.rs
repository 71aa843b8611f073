use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::store::{Document, DocumentStore};
use crate::utils::error::StoreError;

/// Display metadata for a retailer, read from the retailers collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Retailer {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub domain: String,
    #[serde(rename = "logo", default)]
    pub logo_url: String,
    #[serde(rename = "linkToSearch", default)]
    pub search_link_template: String,
}

/// Read-only retailer lookup, loaded once and owned by the engine context.
#[derive(Debug, Clone, Default)]
pub struct RetailerDirectory {
    retailers: HashMap<String, Retailer>,
}

impl RetailerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load(store: &dyn DocumentStore, collection: &str) -> Result<Self, StoreError> {
        tracing::info!("Loading retailers from {}", collection);
        let documents = store.get_all(collection).await?;

        let mut directory = Self::new();
        for document in &documents {
            match Self::decode(document) {
                Ok(retailer) => {
                    tracing::debug!("Loaded retailer: {} ({})", retailer.name, document.id());
                    directory.insert(document.id(), retailer);
                }
                Err(e) => {
                    tracing::warn!("Skipping retailer document {}: {}", document.path, e);
                }
            }
        }

        tracing::info!("Total retailers loaded: {}", directory.len());
        Ok(directory)
    }

    fn decode(document: &Document) -> Result<Retailer, serde_json::Error> {
        serde_json::from_value(document.data.clone())
    }

    pub fn insert(&mut self, retailer_id: impl Into<String>, retailer: Retailer) {
        self.retailers.insert(retailer_id.into(), retailer);
    }

    pub fn get(&self, retailer_id: &str) -> Option<&Retailer> {
        self.retailers.get(retailer_id)
    }

    pub fn find_by_domain(&self, domain: &str) -> Option<(&str, &Retailer)> {
        self.retailers
            .iter()
            .find(|(_, retailer)| retailer.domain.eq_ignore_ascii_case(domain))
            .map(|(id, retailer)| (id.as_str(), retailer))
    }

    /// Human readable label for logs, falling back to the raw id.
    pub fn display_name<'a>(&'a self, retailer_id: &'a str) -> &'a str {
        match self.get(retailer_id) {
            Some(retailer) if !retailer.name.is_empty() => retailer.name.as_str(),
            _ => retailer_id,
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.retailers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.retailers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retailers.is_empty()
    }
}
