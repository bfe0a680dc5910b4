use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// The independent change-detection queries run for every synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiffCategory {
    AdditiveIngredients,
    ProductSizeIngredients,
    ProductSizes,
    Additives,
    Provisions,
}

impl DiffCategory {
    pub const ALL: [DiffCategory; 5] = [
        DiffCategory::AdditiveIngredients,
        DiffCategory::ProductSizeIngredients,
        DiffCategory::ProductSizes,
        DiffCategory::Additives,
        DiffCategory::Provisions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DiffCategory::AdditiveIngredients => "additive_ingredients",
            DiffCategory::ProductSizeIngredients => "product_size_ingredients",
            DiffCategory::ProductSizes => "product_sizes",
            DiffCategory::Additives => "additives",
            DiffCategory::Provisions => "provisions",
        }
    }
}

impl fmt::Display for DiffCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_sync: bool,
    pub last_sync_date: DateTime<Utc>,
}

/// Outcome of one committed synchronization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub sync_id: Uuid,
    pub store_id: i64,
    pub since: DateTime<Utc>,
    pub synced_at: DateTime<Utc>,
    pub changed: BTreeMap<DiffCategory, usize>,
    pub inserted_stock_ids: Vec<i64>,
    pub inserted_additive_ids: Vec<i64>,
    pub flags_changed: usize,
}

impl SyncReport {
    pub fn new(store_id: i64, since: DateTime<Utc>, synced_at: DateTime<Utc>) -> Self {
        Self {
            sync_id: Uuid::new_v4(),
            store_id,
            since,
            synced_at,
            changed: BTreeMap::new(),
            inserted_stock_ids: Vec::new(),
            inserted_additive_ids: Vec::new(),
            flags_changed: 0,
        }
    }

    pub fn total_changed(&self) -> usize {
        self.changed.values().sum()
    }

    pub fn inserted_rows(&self) -> usize {
        self.inserted_stock_ids.len() + self.inserted_additive_ids.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
