//! Shared, observable handle to the [`ReconciliationStore`].
//!
//! The realtime event pump writes through [`StoreHandle`]; every other
//! component only reads. Readers that want to react to changes watch the
//! revision counter returned by [`StoreHandle::changes`], which moves only
//! when the scanned set or the catalog actually changes.

use std::sync::Arc;

use tokio::sync::{watch, RwLock};

use tally_core::{
    CatalogCategory, CompletionReport, DerivedView, ItemId, ReconciliationStore, ZoneId,
};

use crate::api::InventoryApi;
use crate::error::CatalogLoadError;

const CATALOG_LOAD_FAILED: &str = "Could not load categories.";

#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<RwLock<ReconciliationStore>>,
    revision: Arc<watch::Sender<u64>>,
}

impl Default for StoreHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreHandle {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(RwLock::new(ReconciliationStore::new())),
            revision: Arc::new(revision),
        }
    }

    /// Revision counter, bumped after every effective mutation.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    fn bump(&self) {
        self.revision.send_modify(|r| *r += 1);
    }

    /// Fetch the zone's categories and replace the catalog.
    ///
    /// Starting a load drops the previous catalog and scanned set. On
    /// failure the catalog stays empty and the readable error is kept.
    pub async fn load_catalog(
        &self,
        api: &dyn InventoryApi,
        zone: ZoneId,
    ) -> Result<(), CatalogLoadError> {
        self.inner.write().await.begin_load();
        self.bump();

        let result = api.categories_by_zone(zone).await;

        let mut store = self.inner.write().await;
        let outcome = match result {
            Ok(categories) => {
                log::info!("Loaded {} categories for zone {zone}", categories.len());
                store.finish_load(Ok(categories));
                Ok(())
            }
            Err(e) => {
                log::warn!("Catalog load for zone {zone} failed: {e}");
                store.finish_load(Err(CATALOG_LOAD_FAILED.to_string()));
                Err(CatalogLoadError {
                    zone,
                    message: CATALOG_LOAD_FAILED.to_string(),
                })
            }
        };
        drop(store);
        self.bump();
        outcome
    }

    /// Replace the catalog with already fetched categories.
    pub async fn set_catalog(&self, categories: Vec<CatalogCategory>) {
        self.inner.write().await.load(categories);
        self.bump();
    }

    /// Apply one broadcast confirmation. Returns `true` if the set grew.
    pub(crate) async fn confirm(&self, item_id: ItemId) -> bool {
        let grew = self.inner.write().await.on_scan_confirmed(item_id);
        if grew {
            self.bump();
        }
        grew
    }

    pub async fn clear_scanned(&self) {
        let mut store = self.inner.write().await;
        if store.scanned_count() > 0 {
            store.clear_scanned();
            drop(store);
            self.bump();
        }
    }

    pub async fn reset(&self) {
        self.inner.write().await.reset();
        self.bump();
    }

    pub async fn derived_view(&self) -> DerivedView {
        self.inner.read().await.derived_view()
    }

    pub async fn scanned_count(&self) -> u32 {
        self.inner.read().await.scanned_count()
    }

    pub async fn expected_count(&self) -> u32 {
        self.inner.read().await.expected_count()
    }

    pub async fn completion(&self) -> CompletionReport {
        self.inner.read().await.completion()
    }

    pub async fn is_scanned(&self, item_id: ItemId) -> bool {
        self.inner.read().await.is_scanned(item_id)
    }

    pub async fn is_loading(&self) -> bool {
        self.inner.read().await.is_loading()
    }

    pub async fn catalog_error(&self) -> Option<String> {
        self.inner.read().await.error().map(str::to_string)
    }
}
