use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::models::RetailerLink;
use crate::store::Document;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductItem {
    #[serde(default)]
    pub name: String,

    #[serde(rename = "image", default)]
    pub image_url: String,

    #[serde(default)]
    pub retailers: Vec<RetailerLink>,

    /// Id of the backing product document. `None` marks a transient item
    /// whose persistence and history steps are local no-ops.
    #[serde(skip)]
    pub source_record_id: Option<String>,

    /// Set during a pass when any link was attempted.
    #[serde(skip)]
    pub dirty: bool,
}

impl ProductItem {
    pub fn transient(name: impl Into<String>, retailers: Vec<RetailerLink>) -> Self {
        Self {
            name: name.into(),
            image_url: String::new(),
            retailers,
            source_record_id: None,
            dirty: false,
        }
    }

    pub fn from_document(document: &Document) -> Result<Self, serde_json::Error> {
        let mut item: ProductItem = serde_json::from_value(document.data.clone())?;
        item.source_record_id = Some(document.id().to_string());
        Ok(item)
    }

    pub fn is_transient(&self) -> bool {
        self.source_record_id.is_none()
    }

    /// Fields written back on persistence, merged into the stored document.
    pub fn persisted_fields(&self) -> serde_json::Value {
        json!({
            "name": self.name,
            "image": self.image_url,
            "retailers": self.retailers,
        })
    }
}
