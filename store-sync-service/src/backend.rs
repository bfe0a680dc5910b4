use anyhow::Result;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use shared::DiffCategory;
use std::collections::BTreeSet;

use crate::models::*;
use crate::recalculator::RecalculateInput;

/// Source of "now" for the synchronizer when the backend has no clock of its
/// own. Catalog timestamps are compared against it, so it must not run ahead
/// of whatever stamps catalog rows.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Store-local tables carrying a derived `is_out_of_stock` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagTarget {
    StoreStock,
    StoreProductSize,
    StoreProduct,
    StoreAdditive,
}

/// Read side of the catalog, used for change detection.
///
/// Every method is a pure read; implementations must be safe to call
/// concurrently.
#[async_trait]
pub trait CatalogDiffReader: Send + Sync {
    /// Returns the store's `last_inventory_sync_at`, or `None` for an unknown store.
    async fn watermark(&self, store_id: i64) -> Result<Option<DateTime<Utc>>>;

    /// Current time as seen by whatever stamps catalog `updated_at` columns.
    /// `None` falls back to the synchronizer's `Clock`.
    async fn catalog_time(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(None)
    }

    async fn changed_ids(
        &self,
        store_id: i64,
        since: DateTime<Utc>,
        category: DiffCategory,
    ) -> Result<BTreeSet<i64>>;
}

/// Write operations available inside one synchronization transaction.
#[async_trait]
pub trait InventoryTx: Send {
    /// Serializes synchronization of `store_id` until the transaction ends and
    /// returns the current watermark, or `None` for an unknown store.
    async fn lock_store(&mut self, store_id: i64) -> Result<Option<DateTime<Utc>>>;

    async fn existing_stock_ingredients(
        &mut self,
        store_id: i64,
        ingredient_ids: &[i64],
    ) -> Result<Vec<i64>>;

    async fn existing_store_additives(
        &mut self,
        store_id: i64,
        additive_ids: &[i64],
    ) -> Result<Vec<i64>>;

    async fn additive_base_prices(&mut self, additive_ids: &[i64]) -> Result<Vec<(i64, BigDecimal)>>;

    async fn insert_store_stocks(&mut self, rows: Vec<NewStoreStock>) -> Result<Vec<i64>>;

    async fn insert_store_additives(&mut self, rows: Vec<NewStoreAdditive>) -> Result<Vec<i64>>;

    async fn store_stocks(&mut self, store_id: i64, ingredient_ids: &[i64]) -> Result<Vec<StoreStock>>;

    /// Store product sizes of `store_id` touched by any part of `input`.
    async fn store_sizes_using(&mut self, store_id: i64, input: &RecalculateInput) -> Result<Vec<i64>>;

    /// Ingredient requirements of store product sizes, including the
    /// ingredients of their default additives.
    async fn size_requirements(&mut self, store_product_size_ids: &[i64]) -> Result<Vec<Requirement>>;

    /// Store additives of `store_id` touched by any part of `input`.
    async fn store_additives_using(&mut self, store_id: i64, input: &RecalculateInput) -> Result<Vec<i64>>;

    async fn additive_requirements(&mut self, store_additive_ids: &[i64]) -> Result<Vec<Requirement>>;

    /// `(store_product_id, size_is_out_of_stock)` for every size of the
    /// products owning the given store product sizes.
    async fn product_size_flags(&mut self, store_product_size_ids: &[i64]) -> Result<Vec<(i64, bool)>>;

    async fn flags(&mut self, target: FlagTarget, ids: &[i64]) -> Result<Vec<(i64, bool)>>;

    async fn set_flags(&mut self, target: FlagTarget, ids: &[i64], is_out_of_stock: bool) -> Result<usize>;

    async fn advance_watermark(&mut self, store_id: i64, synced_at: DateTime<Utc>) -> Result<()>;
}

/// Storage backend of the synchronizer.
#[async_trait]
pub trait SyncBackend: CatalogDiffReader {
    /// Runs `work` inside one transaction. The transaction commits when `work`
    /// returns `Ok` and rolls back otherwise.
    async fn transaction<R, F>(&self, work: F) -> Result<R>
    where
        R: Send + 'static,
        F: for<'t> FnOnce(&'t mut dyn InventoryTx) -> BoxFuture<'t, Result<R>> + Send + 'static;
}
