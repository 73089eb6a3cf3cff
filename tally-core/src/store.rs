//! Reconciliation store: the authoritative scanned set of one device.
//!
//! ```text
//! ItemConfirmed(id) ──► scanned: HashSet<ItemId>  (insert-only)
//!                               │
//! catalog: Vec<Category> ───────┤
//!                               ▼
//!                    derived_view() / completion()
//! ```
//!
//! The scanned set grows monotonically within a session and is only cleared
//! by a catalog load or [`ReconciliationStore::reset`]. Every view is
//! recomputed from the two inputs on demand, so it cannot drift from them.
//! Duplicate or out-of-order confirmations are normal and never errors.

use std::collections::HashSet;
use std::fmt;

use crate::catalog::CatalogCategory;
use crate::ids::{CategoryId, ItemId};

/// One item of the derived view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemView {
    pub id: ItemId,
    pub code: String,
    pub name: String,
    pub completed: bool,
}

/// One category of the derived view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryView {
    pub id: CategoryId,
    pub name: String,
    pub expected_count: u32,
    pub scanned_count: u32,
    pub items: Vec<ItemView>,
}

/// Read-only projection of catalog + scanned set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DerivedView {
    pub categories: Vec<CategoryView>,
}

impl DerivedView {
    pub fn completed_items(&self) -> impl Iterator<Item = &ItemView> {
        self.categories
            .iter()
            .flat_map(|c| c.items.iter())
            .filter(|i| i.completed)
    }
}

/// Expected vs. scanned totals, checked before a session is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionReport {
    pub expected: u32,
    pub scanned: u32,
    pub missing: u32,
    pub is_complete: bool,
}

impl CompletionReport {
    pub fn new(expected: u32, scanned: u32) -> Self {
        Self {
            expected,
            scanned,
            missing: expected.saturating_sub(scanned),
            is_complete: scanned >= expected,
        }
    }
}

impl fmt::Display for CompletionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} scanned, {} missing",
            self.scanned, self.expected, self.missing
        )
    }
}

/// Catalog plus scanned set for the current session.
#[derive(Debug, Default)]
pub struct ReconciliationStore {
    catalog: Vec<CatalogCategory>,
    scanned: HashSet<ItemId>,
    loading: bool,
    error: Option<String>,
}

impl ReconciliationStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------------------------------------------------------
    // Catalog lifecycle
    // ---------------------------------------------------------------

    /// Start a catalog load: drop the previous catalog and scanned set.
    pub fn begin_load(&mut self) {
        self.catalog.clear();
        self.scanned.clear();
        self.error = None;
        self.loading = true;
    }

    /// Finish a catalog load. On failure the catalog stays empty.
    pub fn finish_load(&mut self, result: Result<Vec<CatalogCategory>, String>) {
        self.loading = false;
        match result {
            Ok(categories) => {
                log::debug!("Catalog loaded: {} categories", categories.len());
                self.catalog = categories;
                self.error = None;
            }
            Err(message) => {
                self.catalog.clear();
                self.error = Some(message);
            }
        }
    }

    /// Replace the catalog in one step (begin + successful finish).
    pub fn load(&mut self, categories: Vec<CatalogCategory>) {
        self.begin_load();
        self.finish_load(Ok(categories));
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Readable message of the last failed catalog load.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn catalog(&self) -> &[CatalogCategory] {
        &self.catalog
    }

    // ---------------------------------------------------------------
    // Scanned set
    // ---------------------------------------------------------------

    /// Record a broadcast confirmation. Returns `true` if the set grew.
    ///
    /// Re-delivery of an id already present is a no-op.
    pub fn on_scan_confirmed(&mut self, item_id: ItemId) -> bool {
        let inserted = self.scanned.insert(item_id);
        if !inserted {
            log::debug!("Item {item_id} already confirmed, ignoring redelivery");
        }
        inserted
    }

    pub fn is_scanned(&self, item_id: ItemId) -> bool {
        self.scanned.contains(&item_id)
    }

    /// Drop confirmations but keep the catalog (new session on a loaded zone).
    pub fn clear_scanned(&mut self) {
        self.scanned.clear();
    }

    /// Clear catalog and scanned set.
    pub fn reset(&mut self) {
        self.catalog.clear();
        self.scanned.clear();
        self.loading = false;
        self.error = None;
    }

    // ---------------------------------------------------------------
    // Projections
    // ---------------------------------------------------------------

    pub fn scanned_count(&self) -> u32 {
        count_u32(self.scanned.len())
    }

    /// Sum of every category's declared expected count, saturating at
    /// `u32::MAX`.
    pub fn expected_count(&self) -> u32 {
        self.catalog
            .iter()
            .fold(0u32, |total, c| total.saturating_add(c.expected_count))
    }

    pub fn completion(&self) -> CompletionReport {
        CompletionReport::new(self.expected_count(), self.scanned_count())
    }

    pub fn derived_view(&self) -> DerivedView {
        let categories = self
            .catalog
            .iter()
            .map(|category| {
                let items: Vec<ItemView> = category
                    .items
                    .iter()
                    .map(|item| ItemView {
                        id: item.id,
                        code: item.code.clone(),
                        name: item.name.clone(),
                        completed: self.scanned.contains(&item.id),
                    })
                    .collect();
                let scanned_count = count_u32(items.iter().filter(|i| i.completed).count());
                CategoryView {
                    id: category.id,
                    name: category.name.clone(),
                    expected_count: category.expected_count,
                    scanned_count,
                    items,
                }
            })
            .collect();
        DerivedView { categories }
    }
}

fn count_u32(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}
