//! Zone catalog: categories with their expected counts and items.
//!
//! Loaded once per zone and never mutated afterwards. Field aliases accept
//! the legacy backend names (`contador` for the expected count).

use serde::{Deserialize, Serialize};

use crate::ids::{CategoryId, ItemId};

/// A scannable item. `code` is the barcode payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: ItemId,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
}

/// A category of a zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogCategory {
    pub id: CategoryId,
    #[serde(default)]
    pub name: String,
    /// Number of items that must be scanned in this category.
    #[serde(alias = "contador", default)]
    pub expected_count: u32,
    #[serde(default)]
    pub items: Vec<CatalogItem>,
}

impl CatalogCategory {
    pub fn new(id: i64, name: impl Into<String>, expected_count: u32) -> Self {
        Self {
            id: CategoryId(id),
            name: name.into(),
            expected_count,
            items: Vec::new(),
        }
    }

    /// Builder-style helper used when assembling catalogs by hand.
    pub fn with_item(mut self, id: i64, code: impl Into<String>, name: impl Into<String>) -> Self {
        self.items.push(CatalogItem {
            id: ItemId(id),
            code: code.into(),
            name: name.into(),
        });
        self
    }

    pub fn find_by_code(&self, code: &str) -> Option<&CatalogItem> {
        self.items.iter().find(|item| item.code == code)
    }
}
