use anyhow::Result;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{Integer, Timestamptz};
use diesel_async::{pooled_connection::bb8::Pool, AsyncConnection, AsyncPgConnection, RunQueryDsl};
use futures::future::BoxFuture;
use shared::DiffCategory;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::{CatalogDiffReader, FlagTarget, InventoryTx, SyncBackend};
use crate::models::*;
use crate::recalculator::RecalculateInput;
use crate::schema::*;

pub type DbPool = Pool<AsyncPgConnection>;

/// First key of the two-key advisory lock taken per store ("STSY"), so store
/// syncs never contend with advisory locks other code takes on bare ids.
const STORE_SYNC_LOCK_NAMESPACE: i32 = 0x5354_5359;

/// Second key of the store lock. Ids beyond `i32` are folded; a collision only
/// serializes two unrelated stores.
fn store_lock_key(store_id: i64) -> i32 {
    (store_id ^ (store_id >> 32)) as i32
}

/// Catalog and store projections stored in Postgres.
///
/// Diff queries each check out their own pooled connection so they can run
/// concurrently; the write phase uses a single connection and transaction.
#[derive(Clone)]
pub struct PgSyncBackend {
    pool: DbPool,
    statement_timeout: Option<Duration>,
}

impl PgSyncBackend {
    pub fn new(pool: DbPool, statement_timeout: Option<Duration>) -> Self {
        Self { pool, statement_timeout }
    }

    async fn additive_ingredient_changes(&self, store_id: i64, since: DateTime<Utc>) -> Result<Vec<i64>> {
        let mut conn = self.pool.get().await?;
        let ids = additive_ingredients::table
            .inner_join(additives::table.on(additives::id.eq(additive_ingredients::additive_id)))
            .inner_join(
                product_size_additives::table.on(product_size_additives::additive_id.eq(additive_ingredients::additive_id)),
            )
            .inner_join(
                store_product_sizes::table
                    .on(store_product_sizes::product_size_id.eq(product_size_additives::product_size_id)),
            )
            .inner_join(store_products::table.on(store_products::id.eq(store_product_sizes::store_product_id)))
            .filter(store_products::store_id.eq(store_id))
            .filter(
                additive_ingredients::updated_at
                    .gt(since)
                    .or(additives::ingredients_updated_at.gt(since))
                    .or(product_size_additives::updated_at.gt(since))
                    .or(store_product_sizes::created_at.gt(since)),
            )
            .select(additive_ingredients::ingredient_id)
            .distinct()
            .load::<i64>(&mut conn)
            .await?;
        Ok(ids)
    }

    async fn product_size_ingredient_changes(&self, store_id: i64, since: DateTime<Utc>) -> Result<Vec<i64>> {
        let mut conn = self.pool.get().await?;
        let ids = product_size_ingredients::table
            .inner_join(
                store_product_sizes::table
                    .on(store_product_sizes::product_size_id.eq(product_size_ingredients::product_size_id)),
            )
            .inner_join(store_products::table.on(store_products::id.eq(store_product_sizes::store_product_id)))
            .filter(store_products::store_id.eq(store_id))
            .filter(
                product_size_ingredients::updated_at
                    .gt(since)
                    .or(store_product_sizes::created_at.gt(since)),
            )
            .select(product_size_ingredients::ingredient_id)
            .distinct()
            .load::<i64>(&mut conn)
            .await?;
        Ok(ids)
    }

    async fn product_size_changes(&self, store_id: i64, since: DateTime<Utc>) -> Result<Vec<i64>> {
        let mut conn = self.pool.get().await?;
        let ids = product_sizes::table
            .inner_join(store_product_sizes::table.on(store_product_sizes::product_size_id.eq(product_sizes::id)))
            .inner_join(store_products::table.on(store_products::id.eq(store_product_sizes::store_product_id)))
            .filter(store_products::store_id.eq(store_id))
            .filter(
                product_sizes::additives_updated_at
                    .gt(since)
                    .or(product_sizes::provisions_updated_at.gt(since))
                    .or(store_product_sizes::created_at.gt(since)),
            )
            .select(product_sizes::id)
            .distinct()
            .load::<i64>(&mut conn)
            .await?;
        Ok(ids)
    }

    async fn additive_changes(&self, store_id: i64, since: DateTime<Utc>) -> Result<Vec<i64>> {
        let mut conn = self.pool.get().await?;
        let ids = product_size_additives::table
            .inner_join(additives::table.on(additives::id.eq(product_size_additives::additive_id)))
            .inner_join(
                store_product_sizes::table
                    .on(store_product_sizes::product_size_id.eq(product_size_additives::product_size_id)),
            )
            .inner_join(store_products::table.on(store_products::id.eq(store_product_sizes::store_product_id)))
            .filter(store_products::store_id.eq(store_id))
            .filter(
                product_size_additives::updated_at
                    .gt(since)
                    .or(additives::ingredients_updated_at.gt(since))
                    .or(additives::provisions_updated_at.gt(since))
                    .or(store_product_sizes::created_at.gt(since)),
            )
            .select(product_size_additives::additive_id)
            .distinct()
            .load::<i64>(&mut conn)
            .await?;
        Ok(ids)
    }

    async fn provision_changes(&self, store_id: i64, since: DateTime<Utc>) -> Result<Vec<i64>> {
        let mut conn = self.pool.get().await?;
        let mut ids = product_size_provisions::table
            .inner_join(
                store_product_sizes::table
                    .on(store_product_sizes::product_size_id.eq(product_size_provisions::product_size_id)),
            )
            .inner_join(store_products::table.on(store_products::id.eq(store_product_sizes::store_product_id)))
            .filter(store_products::store_id.eq(store_id))
            .filter(
                product_size_provisions::updated_at
                    .gt(since)
                    .or(store_product_sizes::created_at.gt(since)),
            )
            .select(product_size_provisions::provision_id)
            .distinct()
            .load::<i64>(&mut conn)
            .await?;

        let via_additives = additive_provisions::table
            .inner_join(additives::table.on(additives::id.eq(additive_provisions::additive_id)))
            .inner_join(
                product_size_additives::table.on(product_size_additives::additive_id.eq(additive_provisions::additive_id)),
            )
            .inner_join(
                store_product_sizes::table
                    .on(store_product_sizes::product_size_id.eq(product_size_additives::product_size_id)),
            )
            .inner_join(store_products::table.on(store_products::id.eq(store_product_sizes::store_product_id)))
            .filter(store_products::store_id.eq(store_id))
            .filter(
                additive_provisions::updated_at
                    .gt(since)
                    .or(additives::provisions_updated_at.gt(since))
                    .or(product_size_additives::updated_at.gt(since))
                    .or(store_product_sizes::created_at.gt(since)),
            )
            .select(additive_provisions::provision_id)
            .distinct()
            .load::<i64>(&mut conn)
            .await?;

        ids.extend(via_additives);
        Ok(ids)
    }
}

#[async_trait]
impl CatalogDiffReader for PgSyncBackend {
    async fn watermark(&self, store_id: i64) -> Result<Option<DateTime<Utc>>> {
        let mut conn = self.pool.get().await?;
        let store = stores::table
            .find(store_id)
            .first::<Store>(&mut conn)
            .await
            .optional()?;

        if let Some(store) = &store {
            if !store.is_active {
                warn!("Synchronizing inactive store {} ({})", store.id, store.name);
            }
        }
        Ok(store.map(|s| s.last_inventory_sync_at))
    }

    /// Catalog `updated_at` columns default to the database's `now()`.
    async fn catalog_time(&self) -> Result<Option<DateTime<Utc>>> {
        let mut conn = self.pool.get().await?;
        let now = diesel::select(diesel::dsl::sql::<Timestamptz>("statement_timestamp()"))
            .get_result::<DateTime<Utc>>(&mut conn)
            .await?;
        Ok(Some(now))
    }

    async fn changed_ids(
        &self,
        store_id: i64,
        since: DateTime<Utc>,
        category: DiffCategory,
    ) -> Result<BTreeSet<i64>> {
        let ids = match category {
            DiffCategory::AdditiveIngredients => self.additive_ingredient_changes(store_id, since).await?,
            DiffCategory::ProductSizeIngredients => self.product_size_ingredient_changes(store_id, since).await?,
            DiffCategory::ProductSizes => self.product_size_changes(store_id, since).await?,
            DiffCategory::Additives => self.additive_changes(store_id, since).await?,
            DiffCategory::Provisions => self.provision_changes(store_id, since).await?,
        };
        debug!("Store {}: {} changed {}", store_id, ids.len(), category);
        Ok(ids.into_iter().collect())
    }
}

#[async_trait]
impl SyncBackend for PgSyncBackend {
    async fn transaction<R, F>(&self, work: F) -> Result<R>
    where
        R: Send + 'static,
        F: for<'t> FnOnce(&'t mut dyn InventoryTx) -> BoxFuture<'t, Result<R>> + Send + 'static,
    {
        let mut pooled = self.pool.get().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;
        let statement_timeout = self.statement_timeout;

        conn.transaction::<_, anyhow::Error, _>(|conn| {
            Box::pin(async move {
                if let Some(timeout) = statement_timeout {
                    diesel::sql_query(format!("SET LOCAL statement_timeout = {}", timeout.as_millis()))
                        .execute(conn)
                        .await?;
                }

                let mut tx = PgInventoryTx { conn };
                work(&mut tx).await
            })
        })
        .await
    }
}

/// Inventory writes bound to an open transaction.
pub struct PgInventoryTx<'a> {
    conn: &'a mut AsyncPgConnection,
}

#[async_trait]
impl InventoryTx for PgInventoryTx<'_> {
    async fn lock_store(&mut self, store_id: i64) -> Result<Option<DateTime<Utc>>> {
        diesel::sql_query("SELECT pg_advisory_xact_lock($1, $2)")
            .bind::<Integer, _>(STORE_SYNC_LOCK_NAMESPACE)
            .bind::<Integer, _>(store_lock_key(store_id))
            .execute(self.conn)
            .await?;

        let watermark = stores::table
            .find(store_id)
            .select(stores::last_inventory_sync_at)
            .first::<DateTime<Utc>>(self.conn)
            .await
            .optional()?;
        Ok(watermark)
    }

    async fn existing_stock_ingredients(&mut self, store_id: i64, ingredient_ids: &[i64]) -> Result<Vec<i64>> {
        let ids = store_stocks::table
            .filter(store_stocks::store_id.eq(store_id))
            .filter(store_stocks::ingredient_id.eq_any(ingredient_ids))
            .select(store_stocks::ingredient_id)
            .load::<i64>(self.conn)
            .await?;
        Ok(ids)
    }

    async fn existing_store_additives(&mut self, store_id: i64, additive_ids: &[i64]) -> Result<Vec<i64>> {
        let ids = store_additives::table
            .filter(store_additives::store_id.eq(store_id))
            .filter(store_additives::additive_id.eq_any(additive_ids))
            .select(store_additives::additive_id)
            .load::<i64>(self.conn)
            .await?;
        Ok(ids)
    }

    async fn additive_base_prices(&mut self, additive_ids: &[i64]) -> Result<Vec<(i64, BigDecimal)>> {
        let prices = additives::table
            .filter(additives::id.eq_any(additive_ids))
            .select((additives::id, additives::base_price))
            .load::<(i64, BigDecimal)>(self.conn)
            .await?;
        Ok(prices)
    }

    async fn insert_store_stocks(&mut self, rows: Vec<NewStoreStock>) -> Result<Vec<i64>> {
        let ids = diesel::insert_into(store_stocks::table)
            .values(&rows)
            .returning(store_stocks::id)
            .get_results::<i64>(self.conn)
            .await?;
        Ok(ids)
    }

    async fn insert_store_additives(&mut self, rows: Vec<NewStoreAdditive>) -> Result<Vec<i64>> {
        let ids = diesel::insert_into(store_additives::table)
            .values(&rows)
            .returning(store_additives::id)
            .get_results::<i64>(self.conn)
            .await?;
        Ok(ids)
    }

    async fn store_stocks(&mut self, store_id: i64, ingredient_ids: &[i64]) -> Result<Vec<StoreStock>> {
        let stocks = store_stocks::table
            .filter(store_stocks::store_id.eq(store_id))
            .filter(store_stocks::ingredient_id.eq_any(ingredient_ids))
            .load::<StoreStock>(self.conn)
            .await?;
        Ok(stocks)
    }

    async fn store_sizes_using(&mut self, store_id: i64, input: &RecalculateInput) -> Result<Vec<i64>> {
        let mut ids = BTreeSet::new();

        if !input.product_size_ids.is_empty() {
            ids.extend(
                store_product_sizes::table
                    .inner_join(store_products::table.on(store_products::id.eq(store_product_sizes::store_product_id)))
                    .filter(store_products::store_id.eq(store_id))
                    .filter(store_product_sizes::product_size_id.eq_any(&input.product_size_ids))
                    .select(store_product_sizes::id)
                    .load::<i64>(self.conn)
                    .await?,
            );
        }

        if !input.ingredient_ids.is_empty() {
            ids.extend(
                store_product_sizes::table
                    .inner_join(store_products::table.on(store_products::id.eq(store_product_sizes::store_product_id)))
                    .inner_join(
                        product_size_ingredients::table
                            .on(product_size_ingredients::product_size_id.eq(store_product_sizes::product_size_id)),
                    )
                    .filter(store_products::store_id.eq(store_id))
                    .filter(product_size_ingredients::ingredient_id.eq_any(&input.ingredient_ids))
                    .select(store_product_sizes::id)
                    .distinct()
                    .load::<i64>(self.conn)
                    .await?,
            );
            ids.extend(
                store_product_sizes::table
                    .inner_join(store_products::table.on(store_products::id.eq(store_product_sizes::store_product_id)))
                    .inner_join(
                        product_size_additives::table
                            .on(product_size_additives::product_size_id.eq(store_product_sizes::product_size_id)),
                    )
                    .inner_join(
                        additive_ingredients::table
                            .on(additive_ingredients::additive_id.eq(product_size_additives::additive_id)),
                    )
                    .filter(store_products::store_id.eq(store_id))
                    .filter(product_size_additives::is_default.eq(true))
                    .filter(additive_ingredients::ingredient_id.eq_any(&input.ingredient_ids))
                    .select(store_product_sizes::id)
                    .distinct()
                    .load::<i64>(self.conn)
                    .await?,
            );
        }

        if !input.provision_ids.is_empty() {
            ids.extend(
                store_product_sizes::table
                    .inner_join(store_products::table.on(store_products::id.eq(store_product_sizes::store_product_id)))
                    .inner_join(
                        product_size_provisions::table
                            .on(product_size_provisions::product_size_id.eq(store_product_sizes::product_size_id)),
                    )
                    .filter(store_products::store_id.eq(store_id))
                    .filter(product_size_provisions::provision_id.eq_any(&input.provision_ids))
                    .select(store_product_sizes::id)
                    .distinct()
                    .load::<i64>(self.conn)
                    .await?,
            );
            ids.extend(
                store_product_sizes::table
                    .inner_join(store_products::table.on(store_products::id.eq(store_product_sizes::store_product_id)))
                    .inner_join(
                        product_size_additives::table
                            .on(product_size_additives::product_size_id.eq(store_product_sizes::product_size_id)),
                    )
                    .inner_join(
                        additive_provisions::table
                            .on(additive_provisions::additive_id.eq(product_size_additives::additive_id)),
                    )
                    .filter(store_products::store_id.eq(store_id))
                    .filter(product_size_additives::is_default.eq(true))
                    .filter(additive_provisions::provision_id.eq_any(&input.provision_ids))
                    .select(store_product_sizes::id)
                    .distinct()
                    .load::<i64>(self.conn)
                    .await?,
            );
        }

        Ok(ids.into_iter().collect())
    }

    async fn size_requirements(&mut self, store_product_size_ids: &[i64]) -> Result<Vec<Requirement>> {
        let mut requirements = store_product_sizes::table
            .inner_join(
                product_size_ingredients::table
                    .on(product_size_ingredients::product_size_id.eq(store_product_sizes::product_size_id)),
            )
            .filter(store_product_sizes::id.eq_any(store_product_size_ids))
            .select((
                store_product_sizes::id,
                product_size_ingredients::ingredient_id,
                product_size_ingredients::quantity,
            ))
            .load::<Requirement>(self.conn)
            .await?;

        let from_default_additives = store_product_sizes::table
            .inner_join(
                product_size_additives::table
                    .on(product_size_additives::product_size_id.eq(store_product_sizes::product_size_id)),
            )
            .inner_join(
                additive_ingredients::table.on(additive_ingredients::additive_id.eq(product_size_additives::additive_id)),
            )
            .filter(store_product_sizes::id.eq_any(store_product_size_ids))
            .filter(product_size_additives::is_default.eq(true))
            .select((
                store_product_sizes::id,
                additive_ingredients::ingredient_id,
                additive_ingredients::quantity,
            ))
            .load::<Requirement>(self.conn)
            .await?;

        requirements.extend(from_default_additives);
        Ok(requirements)
    }

    async fn store_additives_using(&mut self, store_id: i64, input: &RecalculateInput) -> Result<Vec<i64>> {
        let mut ids = BTreeSet::new();

        if !input.additive_ids.is_empty() {
            ids.extend(
                store_additives::table
                    .filter(store_additives::store_id.eq(store_id))
                    .filter(store_additives::additive_id.eq_any(&input.additive_ids))
                    .select(store_additives::id)
                    .load::<i64>(self.conn)
                    .await?,
            );
        }

        if !input.ingredient_ids.is_empty() {
            ids.extend(
                store_additives::table
                    .inner_join(
                        additive_ingredients::table.on(additive_ingredients::additive_id.eq(store_additives::additive_id)),
                    )
                    .filter(store_additives::store_id.eq(store_id))
                    .filter(additive_ingredients::ingredient_id.eq_any(&input.ingredient_ids))
                    .select(store_additives::id)
                    .distinct()
                    .load::<i64>(self.conn)
                    .await?,
            );
        }

        if !input.provision_ids.is_empty() {
            ids.extend(
                store_additives::table
                    .inner_join(
                        additive_provisions::table.on(additive_provisions::additive_id.eq(store_additives::additive_id)),
                    )
                    .filter(store_additives::store_id.eq(store_id))
                    .filter(additive_provisions::provision_id.eq_any(&input.provision_ids))
                    .select(store_additives::id)
                    .distinct()
                    .load::<i64>(self.conn)
                    .await?,
            );
        }

        Ok(ids.into_iter().collect())
    }

    async fn additive_requirements(&mut self, store_additive_ids: &[i64]) -> Result<Vec<Requirement>> {
        let requirements = store_additives::table
            .inner_join(additive_ingredients::table.on(additive_ingredients::additive_id.eq(store_additives::additive_id)))
            .filter(store_additives::id.eq_any(store_additive_ids))
            .select((
                store_additives::id,
                additive_ingredients::ingredient_id,
                additive_ingredients::quantity,
            ))
            .load::<Requirement>(self.conn)
            .await?;
        Ok(requirements)
    }

    async fn product_size_flags(&mut self, store_product_size_ids: &[i64]) -> Result<Vec<(i64, bool)>> {
        let product_ids = store_product_sizes::table
            .filter(store_product_sizes::id.eq_any(store_product_size_ids))
            .select(store_product_sizes::store_product_id)
            .distinct()
            .load::<i64>(self.conn)
            .await?;

        let flags = store_product_sizes::table
            .filter(store_product_sizes::store_product_id.eq_any(&product_ids))
            .select((store_product_sizes::store_product_id, store_product_sizes::is_out_of_stock))
            .load::<(i64, bool)>(self.conn)
            .await?;
        Ok(flags)
    }

    async fn flags(&mut self, target: FlagTarget, ids: &[i64]) -> Result<Vec<(i64, bool)>> {
        let flags = match target {
            FlagTarget::StoreStock => {
                store_stocks::table
                    .filter(store_stocks::id.eq_any(ids))
                    .select((store_stocks::id, store_stocks::is_out_of_stock))
                    .load::<(i64, bool)>(self.conn)
                    .await?
            }
            FlagTarget::StoreProductSize => {
                store_product_sizes::table
                    .filter(store_product_sizes::id.eq_any(ids))
                    .select((store_product_sizes::id, store_product_sizes::is_out_of_stock))
                    .load::<(i64, bool)>(self.conn)
                    .await?
            }
            FlagTarget::StoreProduct => {
                store_products::table
                    .filter(store_products::id.eq_any(ids))
                    .select((store_products::id, store_products::is_out_of_stock))
                    .load::<(i64, bool)>(self.conn)
                    .await?
            }
            FlagTarget::StoreAdditive => {
                store_additives::table
                    .filter(store_additives::id.eq_any(ids))
                    .select((store_additives::id, store_additives::is_out_of_stock))
                    .load::<(i64, bool)>(self.conn)
                    .await?
            }
        };
        Ok(flags)
    }

    async fn set_flags(&mut self, target: FlagTarget, ids: &[i64], is_out_of_stock: bool) -> Result<usize> {
        let now = Utc::now();
        let updated = match target {
            FlagTarget::StoreStock => {
                diesel::update(store_stocks::table.filter(store_stocks::id.eq_any(ids)))
                    .set((store_stocks::is_out_of_stock.eq(is_out_of_stock), store_stocks::updated_at.eq(now)))
                    .execute(self.conn)
                    .await?
            }
            FlagTarget::StoreProductSize => {
                diesel::update(store_product_sizes::table.filter(store_product_sizes::id.eq_any(ids)))
                    .set((
                        store_product_sizes::is_out_of_stock.eq(is_out_of_stock),
                        store_product_sizes::updated_at.eq(now),
                    ))
                    .execute(self.conn)
                    .await?
            }
            FlagTarget::StoreProduct => {
                diesel::update(store_products::table.filter(store_products::id.eq_any(ids)))
                    .set((store_products::is_out_of_stock.eq(is_out_of_stock), store_products::updated_at.eq(now)))
                    .execute(self.conn)
                    .await?
            }
            FlagTarget::StoreAdditive => {
                diesel::update(store_additives::table.filter(store_additives::id.eq_any(ids)))
                    .set((
                        store_additives::is_out_of_stock.eq(is_out_of_stock),
                        store_additives::updated_at.eq(now),
                    ))
                    .execute(self.conn)
                    .await?
            }
        };
        Ok(updated)
    }

    async fn advance_watermark(&mut self, store_id: i64, synced_at: DateTime<Utc>) -> Result<()> {
        diesel::update(stores::table.find(store_id))
            .set((stores::last_inventory_sync_at.eq(synced_at), stores::updated_at.eq(Utc::now())))
            .execute(self.conn)
            .await?;
        Ok(())
    }
}
