use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::Price;

/// Observations for one day, keyed by combo key.
pub type DayObservations = BTreeMap<String, Price>;

/// Body of one history bucket document: `date -> combo key -> price`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct HistoryBucket(BTreeMap<String, DayObservations>);

impl HistoryBucket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Last writer wins per combo key; other dates and sibling keys stay.
    pub fn merge_day(&mut self, date_key: &str, observations: &DayObservations) {
        let day = self.0.entry(date_key.to_string()).or_default();
        for (combo_key, price) in observations {
            day.insert(combo_key.clone(), *price);
        }
    }

    pub fn day(&self, date_key: &str) -> Option<&DayObservations> {
        self.0.get(date_key)
    }

    pub fn dates(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
