//! In-memory catalog backend for tests.
//!
//! Mirrors the Postgres backend's queries over plain collections. Transactions
//! are serialized by a mutex and work on a copy of the state that replaces the
//! committed state only when the work succeeds.

use anyhow::{bail, Result};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, TimeZone, Utc};
use futures::future::BoxFuture;
use shared::DiffCategory;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::backend::{CatalogDiffReader, Clock, FlagTarget, InventoryTx, SyncBackend};
use crate::models::*;
use crate::recalculator::RecalculateInput;

/// Seconds after a fixed epoch, so fixtures read as a timeline.
pub fn ts(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
}

pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.lock().unwrap() = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    Diff(DiffCategory),
    InsertStocks,
    InsertAdditives,
    StallTransaction(Duration),
}

#[derive(Debug, Clone)]
struct Link {
    owner_id: i64,
    target_id: i64,
    quantity: BigDecimal,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct SizeAdditiveLink {
    product_size_id: i64,
    additive_id: i64,
    is_default: bool,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CatalogSize {
    additives_updated_at: DateTime<Utc>,
    provisions_updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CatalogAdditive {
    base_price: BigDecimal,
    ingredients_updated_at: DateTime<Utc>,
    provisions_updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct StoreProductRow {
    store_id: i64,
    product_id: i64,
    is_out_of_stock: bool,
}

#[derive(Debug, Clone)]
struct StoreSizeRow {
    store_id: i64,
    store_product_id: i64,
    product_size_id: i64,
    is_out_of_stock: bool,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogState {
    stores: BTreeMap<i64, DateTime<Utc>>,
    sizes: BTreeMap<i64, CatalogSize>,
    additives: BTreeMap<i64, CatalogAdditive>,
    size_ingredients: Vec<Link>,
    size_additives: Vec<SizeAdditiveLink>,
    size_provisions: Vec<Link>,
    additive_ingredients: Vec<Link>,
    additive_provisions: Vec<Link>,
    store_products: BTreeMap<i64, StoreProductRow>,
    store_sizes: BTreeMap<i64, StoreSizeRow>,
    store_additives: BTreeMap<i64, StoreAdditive>,
    store_stocks: BTreeMap<i64, StoreStock>,
    next_id: i64,
}

fn link(owner_id: i64, target_id: i64, quantity: BigDecimal, at: DateTime<Utc>) -> Link {
    Link {
        owner_id,
        target_id,
        quantity,
        updated_at: at,
    }
}

impl CatalogState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        1_000 + self.next_id
    }

    pub fn add_store(&mut self, store_id: i64, watermark: DateTime<Utc>) {
        self.stores.insert(store_id, watermark);
    }

    pub fn add_size(&mut self, size_id: i64, at: DateTime<Utc>) {
        self.sizes.insert(
            size_id,
            CatalogSize {
                additives_updated_at: at,
                provisions_updated_at: at,
            },
        );
    }

    pub fn add_additive(&mut self, additive_id: i64, base_price: BigDecimal, at: DateTime<Utc>) {
        self.additives.insert(
            additive_id,
            CatalogAdditive {
                base_price,
                ingredients_updated_at: at,
                provisions_updated_at: at,
            },
        );
    }

    pub fn link_size_ingredient(&mut self, size_id: i64, ingredient_id: i64, quantity: BigDecimal, at: DateTime<Utc>) {
        self.size_ingredients.push(link(size_id, ingredient_id, quantity, at));
    }

    pub fn link_size_additive(&mut self, size_id: i64, additive_id: i64, is_default: bool, at: DateTime<Utc>) {
        self.size_additives.push(SizeAdditiveLink {
            product_size_id: size_id,
            additive_id,
            is_default,
            updated_at: at,
        });
        if let Some(size) = self.sizes.get_mut(&size_id) {
            size.additives_updated_at = at;
        }
    }

    pub fn link_size_provision(&mut self, size_id: i64, provision_id: i64, at: DateTime<Utc>) {
        self.size_provisions.push(link(size_id, provision_id, BigDecimal::from(1), at));
        if let Some(size) = self.sizes.get_mut(&size_id) {
            size.provisions_updated_at = at;
        }
    }

    pub fn link_additive_ingredient(
        &mut self,
        additive_id: i64,
        ingredient_id: i64,
        quantity: BigDecimal,
        at: DateTime<Utc>,
    ) {
        self.additive_ingredients.push(link(additive_id, ingredient_id, quantity, at));
        if let Some(additive) = self.additives.get_mut(&additive_id) {
            additive.ingredients_updated_at = at;
        }
    }

    pub fn link_additive_provision(&mut self, additive_id: i64, provision_id: i64, at: DateTime<Utc>) {
        self.additive_provisions.push(link(additive_id, provision_id, BigDecimal::from(1), at));
        if let Some(additive) = self.additives.get_mut(&additive_id) {
            additive.provisions_updated_at = at;
        }
    }

    /// Assigns a product size to a store and returns the store product size id.
    pub fn assign_size(&mut self, store_id: i64, product_id: i64, size_id: i64, at: DateTime<Utc>) -> i64 {
        let store_product_id = match self
            .store_products
            .iter()
            .find(|(_, p)| p.store_id == store_id && p.product_id == product_id)
        {
            Some((id, _)) => *id,
            None => {
                let id = self.allocate_id();
                self.store_products.insert(
                    id,
                    StoreProductRow {
                        store_id,
                        product_id,
                        is_out_of_stock: false,
                    },
                );
                id
            }
        };

        let id = self.allocate_id();
        self.store_sizes.insert(
            id,
            StoreSizeRow {
                store_id,
                store_product_id,
                product_size_id: size_id,
                is_out_of_stock: false,
                created_at: at,
            },
        );
        id
    }

    pub fn add_store_stock(
        &mut self,
        store_id: i64,
        ingredient_id: i64,
        quantity: BigDecimal,
        low_stock_threshold: Option<BigDecimal>,
    ) -> i64 {
        let id = self.allocate_id();
        self.store_stocks.insert(
            id,
            StoreStock {
                id,
                store_id,
                ingredient_id,
                quantity,
                low_stock_threshold,
                is_out_of_stock: false,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        );
        id
    }

    pub fn add_store_additive(&mut self, store_id: i64, additive_id: i64, store_price: BigDecimal) -> i64 {
        let id = self.allocate_id();
        self.store_additives.insert(
            id,
            StoreAdditive {
                id,
                store_id,
                additive_id,
                store_price,
                is_out_of_stock: false,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        );
        id
    }

    pub fn set_stock_quantity(&mut self, store_id: i64, ingredient_id: i64, quantity: BigDecimal) {
        for stock in self.store_stocks.values_mut() {
            if stock.store_id == store_id && stock.ingredient_id == ingredient_id {
                stock.quantity = quantity.clone();
            }
        }
    }

    /// `(product_size_id, assigned_after_since)` for every size assigned to the store.
    fn assigned_sizes(&self, store_id: i64, since: DateTime<Utc>) -> Vec<(i64, bool)> {
        self.store_sizes
            .values()
            .filter(|s| s.store_id == store_id)
            .map(|s| (s.product_size_id, s.created_at > since))
            .collect()
    }

    fn additive_links_of(&self, size_id: i64) -> impl Iterator<Item = &SizeAdditiveLink> {
        self.size_additives
            .iter()
            .filter(move |l| l.product_size_id == size_id)
    }

    fn changed(&self, store_id: i64, since: DateTime<Utc>, category: DiffCategory) -> BTreeSet<i64> {
        let mut ids = BTreeSet::new();
        for (size_id, newly_assigned) in self.assigned_sizes(store_id, since) {
            match category {
                DiffCategory::ProductSizeIngredients => {
                    for l in self.size_ingredients.iter().filter(|l| l.owner_id == size_id) {
                        if newly_assigned || l.updated_at > since {
                            ids.insert(l.target_id);
                        }
                    }
                }
                DiffCategory::AdditiveIngredients => {
                    for psa in self.additive_links_of(size_id) {
                        let Some(additive) = self.additives.get(&psa.additive_id) else {
                            continue;
                        };
                        for l in self.additive_ingredients.iter().filter(|l| l.owner_id == psa.additive_id) {
                            if newly_assigned
                                || psa.updated_at > since
                                || additive.ingredients_updated_at > since
                                || l.updated_at > since
                            {
                                ids.insert(l.target_id);
                            }
                        }
                    }
                }
                DiffCategory::ProductSizes => {
                    if let Some(size) = self.sizes.get(&size_id) {
                        if newly_assigned
                            || size.additives_updated_at > since
                            || size.provisions_updated_at > since
                        {
                            ids.insert(size_id);
                        }
                    }
                }
                DiffCategory::Additives => {
                    for psa in self.additive_links_of(size_id) {
                        let Some(additive) = self.additives.get(&psa.additive_id) else {
                            continue;
                        };
                        if newly_assigned
                            || psa.updated_at > since
                            || additive.ingredients_updated_at > since
                            || additive.provisions_updated_at > since
                        {
                            ids.insert(psa.additive_id);
                        }
                    }
                }
                DiffCategory::Provisions => {
                    for l in self.size_provisions.iter().filter(|l| l.owner_id == size_id) {
                        if newly_assigned || l.updated_at > since {
                            ids.insert(l.target_id);
                        }
                    }
                    for psa in self.additive_links_of(size_id) {
                        let Some(additive) = self.additives.get(&psa.additive_id) else {
                            continue;
                        };
                        for l in self.additive_provisions.iter().filter(|l| l.owner_id == psa.additive_id) {
                            if newly_assigned
                                || psa.updated_at > since
                                || additive.provisions_updated_at > since
                                || l.updated_at > since
                            {
                                ids.insert(l.target_id);
                            }
                        }
                    }
                }
            }
        }
        ids
    }

    fn default_additives_of(&self, size_id: i64) -> Vec<i64> {
        self.additive_links_of(size_id)
            .filter(|l| l.is_default)
            .map(|l| l.additive_id)
            .collect()
    }

    fn targets_of(links: &[Link], owner_id: i64) -> Vec<i64> {
        links
            .iter()
            .filter(|l| l.owner_id == owner_id)
            .map(|l| l.target_id)
            .collect()
    }

    fn size_uses(&self, size_id: i64, input: &RecalculateInput) -> bool {
        if input.product_size_ids.contains(&size_id) {
            return true;
        }
        let mut ingredients = Self::targets_of(&self.size_ingredients, size_id);
        let mut provisions = Self::targets_of(&self.size_provisions, size_id);
        for additive_id in self.default_additives_of(size_id) {
            ingredients.extend(Self::targets_of(&self.additive_ingredients, additive_id));
            provisions.extend(Self::targets_of(&self.additive_provisions, additive_id));
        }
        ingredients.iter().any(|i| input.ingredient_ids.contains(i))
            || provisions.iter().any(|p| input.provision_ids.contains(p))
    }

    fn additive_uses(&self, additive_id: i64, input: &RecalculateInput) -> bool {
        input.additive_ids.contains(&additive_id)
            || Self::targets_of(&self.additive_ingredients, additive_id)
                .iter()
                .any(|i| input.ingredient_ids.contains(i))
            || Self::targets_of(&self.additive_provisions, additive_id)
                .iter()
                .any(|p| input.provision_ids.contains(p))
    }

    fn requirements_of(links: &[Link], owner_id: i64, as_owner: i64) -> Vec<Requirement> {
        links
            .iter()
            .filter(|l| l.owner_id == owner_id)
            .map(|l| Requirement {
                owner_id: as_owner,
                ingredient_id: l.target_id,
                quantity: l.quantity.clone(),
            })
            .collect()
    }

    fn flag_mut(&mut self, target: FlagTarget, id: i64) -> Option<&mut bool> {
        match target {
            FlagTarget::StoreStock => self.store_stocks.get_mut(&id).map(|r| &mut r.is_out_of_stock),
            FlagTarget::StoreProductSize => self.store_sizes.get_mut(&id).map(|r| &mut r.is_out_of_stock),
            FlagTarget::StoreProduct => self.store_products.get_mut(&id).map(|r| &mut r.is_out_of_stock),
            FlagTarget::StoreAdditive => self.store_additives.get_mut(&id).map(|r| &mut r.is_out_of_stock),
        }
    }
}

#[derive(Default)]
pub struct MemoryCatalog {
    state: Mutex<CatalogState>,
    write_lock: tokio::sync::Mutex<()>,
    faults: Mutex<Vec<Fault>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    catalog_time: Mutex<Option<DateTime<Utc>>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn edit<R>(&self, f: impl FnOnce(&mut CatalogState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn inject(&self, fault: Fault) {
        self.faults.lock().unwrap().push(fault);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().unwrap().clear();
    }

    /// Makes the catalog report its own "now", as a database would.
    pub fn set_catalog_time(&self, now: Option<DateTime<Utc>>) {
        *self.catalog_time.lock().unwrap() = now;
    }

    fn has_fault(&self, fault: &Fault) -> bool {
        self.faults.lock().unwrap().contains(fault)
    }

    pub fn peak_diff_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn watermark_of(&self, store_id: i64) -> Option<DateTime<Utc>> {
        self.state.lock().unwrap().stores.get(&store_id).copied()
    }

    pub fn store_stock(&self, store_id: i64, ingredient_id: i64) -> Option<StoreStock> {
        self.state
            .lock()
            .unwrap()
            .store_stocks
            .values()
            .find(|s| s.store_id == store_id && s.ingredient_id == ingredient_id)
            .cloned()
    }

    pub fn store_stock_count(&self, store_id: i64, ingredient_id: i64) -> usize {
        self.state
            .lock()
            .unwrap()
            .store_stocks
            .values()
            .filter(|s| s.store_id == store_id && s.ingredient_id == ingredient_id)
            .count()
    }

    pub fn store_stocks_of(&self, store_id: i64) -> Vec<StoreStock> {
        self.state
            .lock()
            .unwrap()
            .store_stocks
            .values()
            .filter(|s| s.store_id == store_id)
            .cloned()
            .collect()
    }

    pub fn store_additive(&self, store_id: i64, additive_id: i64) -> Option<StoreAdditive> {
        self.state
            .lock()
            .unwrap()
            .store_additives
            .values()
            .find(|a| a.store_id == store_id && a.additive_id == additive_id)
            .cloned()
    }

    pub fn store_additives_of(&self, store_id: i64) -> Vec<StoreAdditive> {
        self.state
            .lock()
            .unwrap()
            .store_additives
            .values()
            .filter(|a| a.store_id == store_id)
            .cloned()
            .collect()
    }

    pub fn size_out_of_stock(&self, store_product_size_id: i64) -> bool {
        self.state.lock().unwrap().store_sizes[&store_product_size_id].is_out_of_stock
    }

    pub fn product_out_of_stock_for_size(&self, store_product_size_id: i64) -> bool {
        let state = self.state.lock().unwrap();
        let product_id = state.store_sizes[&store_product_size_id].store_product_id;
        state.store_products[&product_id].is_out_of_stock
    }
}

/// Counts a diff query as running until dropped, so cancelled queries are
/// released too.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, peak: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        peak.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CatalogDiffReader for MemoryCatalog {
    async fn watermark(&self, store_id: i64) -> Result<Option<DateTime<Utc>>> {
        Ok(self.watermark_of(store_id))
    }

    async fn catalog_time(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(*self.catalog_time.lock().unwrap())
    }

    async fn changed_ids(
        &self,
        store_id: i64,
        since: DateTime<Utc>,
        category: DiffCategory,
    ) -> Result<BTreeSet<i64>> {
        {
            let _in_flight = InFlight::enter(&self.in_flight, &self.peak_in_flight);
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
        }

        if self.has_fault(&Fault::Diff(category)) {
            bail!("injected failure reading {}", category);
        }
        Ok(self.state.lock().unwrap().changed(store_id, since, category))
    }
}

#[async_trait]
impl SyncBackend for MemoryCatalog {
    async fn transaction<R, F>(&self, work: F) -> Result<R>
    where
        R: Send + 'static,
        F: for<'t> FnOnce(&'t mut dyn InventoryTx) -> BoxFuture<'t, Result<R>> + Send + 'static,
    {
        let _serialized = self.write_lock.lock().await;
        let mut tx = MemoryTx {
            state: self.state.lock().unwrap().clone(),
            faults: self.faults.lock().unwrap().clone(),
        };

        let result = work(&mut tx).await;
        if result.is_ok() {
            *self.state.lock().unwrap() = tx.state;
        }
        result
    }
}

pub struct MemoryTx {
    state: CatalogState,
    faults: Vec<Fault>,
}

#[async_trait]
impl InventoryTx for MemoryTx {
    async fn lock_store(&mut self, store_id: i64) -> Result<Option<DateTime<Utc>>> {
        for fault in &self.faults {
            if let Fault::StallTransaction(duration) = fault {
                tokio::time::sleep(*duration).await;
            }
        }
        Ok(self.state.stores.get(&store_id).copied())
    }

    async fn existing_stock_ingredients(&mut self, store_id: i64, ingredient_ids: &[i64]) -> Result<Vec<i64>> {
        Ok(self
            .state
            .store_stocks
            .values()
            .filter(|s| s.store_id == store_id && ingredient_ids.contains(&s.ingredient_id))
            .map(|s| s.ingredient_id)
            .collect())
    }

    async fn existing_store_additives(&mut self, store_id: i64, additive_ids: &[i64]) -> Result<Vec<i64>> {
        Ok(self
            .state
            .store_additives
            .values()
            .filter(|a| a.store_id == store_id && additive_ids.contains(&a.additive_id))
            .map(|a| a.additive_id)
            .collect())
    }

    async fn additive_base_prices(&mut self, additive_ids: &[i64]) -> Result<Vec<(i64, BigDecimal)>> {
        Ok(additive_ids
            .iter()
            .filter_map(|id| self.state.additives.get(id).map(|a| (*id, a.base_price.clone())))
            .collect())
    }

    async fn insert_store_stocks(&mut self, rows: Vec<NewStoreStock>) -> Result<Vec<i64>> {
        if self.faults.contains(&Fault::InsertStocks) {
            bail!("injected failure inserting store stocks");
        }
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let duplicate = self
                .state
                .store_stocks
                .values()
                .any(|s| s.store_id == row.store_id && s.ingredient_id == row.ingredient_id);
            if duplicate {
                bail!(
                    "duplicate key value violates unique constraint on store_stocks ({}, {})",
                    row.store_id,
                    row.ingredient_id
                );
            }
            let id = self.state.allocate_id();
            self.state.store_stocks.insert(
                id,
                StoreStock {
                    id,
                    store_id: row.store_id,
                    ingredient_id: row.ingredient_id,
                    quantity: row.quantity,
                    low_stock_threshold: row.low_stock_threshold,
                    is_out_of_stock: row.is_out_of_stock,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }

    async fn insert_store_additives(&mut self, rows: Vec<NewStoreAdditive>) -> Result<Vec<i64>> {
        if self.faults.contains(&Fault::InsertAdditives) {
            bail!("injected failure inserting store additives");
        }
        let mut ids = Vec::with_capacity(rows.len());
        for row in rows {
            let duplicate = self
                .state
                .store_additives
                .values()
                .any(|a| a.store_id == row.store_id && a.additive_id == row.additive_id);
            if duplicate {
                bail!(
                    "duplicate key value violates unique constraint on store_additives ({}, {})",
                    row.store_id,
                    row.additive_id
                );
            }
            let id = self.state.allocate_id();
            self.state.store_additives.insert(
                id,
                StoreAdditive {
                    id,
                    store_id: row.store_id,
                    additive_id: row.additive_id,
                    store_price: row.store_price,
                    is_out_of_stock: row.is_out_of_stock,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                },
            );
            ids.push(id);
        }
        Ok(ids)
    }

    async fn store_stocks(&mut self, store_id: i64, ingredient_ids: &[i64]) -> Result<Vec<StoreStock>> {
        Ok(self
            .state
            .store_stocks
            .values()
            .filter(|s| s.store_id == store_id && ingredient_ids.contains(&s.ingredient_id))
            .cloned()
            .collect())
    }

    async fn store_sizes_using(&mut self, store_id: i64, input: &RecalculateInput) -> Result<Vec<i64>> {
        Ok(self
            .state
            .store_sizes
            .iter()
            .filter(|(_, s)| s.store_id == store_id && self.state.size_uses(s.product_size_id, input))
            .map(|(id, _)| *id)
            .collect())
    }

    async fn size_requirements(&mut self, store_product_size_ids: &[i64]) -> Result<Vec<Requirement>> {
        let mut requirements = Vec::new();
        for id in store_product_size_ids {
            let Some(size) = self.state.store_sizes.get(id) else {
                continue;
            };
            requirements.extend(CatalogState::requirements_of(
                &self.state.size_ingredients,
                size.product_size_id,
                *id,
            ));
            for additive_id in self.state.default_additives_of(size.product_size_id) {
                requirements.extend(CatalogState::requirements_of(
                    &self.state.additive_ingredients,
                    additive_id,
                    *id,
                ));
            }
        }
        Ok(requirements)
    }

    async fn store_additives_using(&mut self, store_id: i64, input: &RecalculateInput) -> Result<Vec<i64>> {
        Ok(self
            .state
            .store_additives
            .values()
            .filter(|a| a.store_id == store_id && self.state.additive_uses(a.additive_id, input))
            .map(|a| a.id)
            .collect())
    }

    async fn additive_requirements(&mut self, store_additive_ids: &[i64]) -> Result<Vec<Requirement>> {
        let mut requirements = Vec::new();
        for id in store_additive_ids {
            if let Some(additive) = self.state.store_additives.get(id) {
                requirements.extend(CatalogState::requirements_of(
                    &self.state.additive_ingredients,
                    additive.additive_id,
                    *id,
                ));
            }
        }
        Ok(requirements)
    }

    async fn product_size_flags(&mut self, store_product_size_ids: &[i64]) -> Result<Vec<(i64, bool)>> {
        let products: BTreeSet<i64> = store_product_size_ids
            .iter()
            .filter_map(|id| self.state.store_sizes.get(id).map(|s| s.store_product_id))
            .collect();
        Ok(self
            .state
            .store_sizes
            .values()
            .filter(|s| products.contains(&s.store_product_id))
            .map(|s| (s.store_product_id, s.is_out_of_stock))
            .collect())
    }

    async fn flags(&mut self, target: FlagTarget, ids: &[i64]) -> Result<Vec<(i64, bool)>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.state.flag_mut(target, *id).map(|flag| (*id, *flag)))
            .collect())
    }

    async fn set_flags(&mut self, target: FlagTarget, ids: &[i64], is_out_of_stock: bool) -> Result<usize> {
        let mut updated = 0;
        for id in ids {
            if let Some(flag) = self.state.flag_mut(target, *id) {
                *flag = is_out_of_stock;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn advance_watermark(&mut self, store_id: i64, synced_at: DateTime<Utc>) -> Result<()> {
        match self.state.stores.get_mut(&store_id) {
            Some(watermark) => {
                *watermark = synced_at;
                Ok(())
            }
            None => bail!("store {} not found", store_id),
        }
    }
}
