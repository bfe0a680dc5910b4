use anyhow::{Context, Result};
use bigdecimal::BigDecimal;
use num_traits::Zero;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

use crate::backend::InventoryTx;
use crate::models::*;

/// Defaults applied to projection rows created by the materializer.
#[derive(Debug, Clone, Default)]
pub struct ProjectionDefaults {
    pub low_stock_threshold: Option<BigDecimal>,
    /// Store-specific prices keyed by additive id; other additives inherit
    /// the catalog base price.
    pub additive_prices: HashMap<i64, BigDecimal>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Materialized {
    pub stock_ids: Vec<i64>,
    pub additive_ids: Vec<i64>,
}

/// Candidates that have no row in `existing`, in ascending order.
pub fn missing_ids(candidates: &BTreeSet<i64>, existing: &[i64]) -> Vec<i64> {
    let existing: BTreeSet<i64> = existing.iter().copied().collect();
    candidates.difference(&existing).copied().collect()
}

/// Creates the store additives and store stocks that `store_id` lacks.
///
/// Rows are plain inserts. A row created concurrently by another writer makes
/// the insert fail on the unique constraint instead of duplicating it.
pub async fn materialize_missing<T>(
    tx: &mut T,
    store_id: i64,
    ingredient_ids: &BTreeSet<i64>,
    additive_ids: &BTreeSet<i64>,
    defaults: &ProjectionDefaults,
) -> Result<Materialized>
where
    T: InventoryTx + ?Sized,
{
    let additive_ids = materialize_additives(tx, store_id, additive_ids, defaults)
        .await
        .with_context(|| format!("failed to materialize store additives for store {}", store_id))?;
    let stock_ids = materialize_stocks(tx, store_id, ingredient_ids, defaults)
        .await
        .with_context(|| format!("failed to materialize store stocks for store {}", store_id))?;

    Ok(Materialized {
        stock_ids,
        additive_ids,
    })
}

async fn materialize_additives<T>(
    tx: &mut T,
    store_id: i64,
    candidates: &BTreeSet<i64>,
    defaults: &ProjectionDefaults,
) -> Result<Vec<i64>>
where
    T: InventoryTx + ?Sized,
{
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let requested: Vec<i64> = candidates.iter().copied().collect();
    let existing = tx.existing_store_additives(store_id, &requested).await?;
    let missing = missing_ids(candidates, &existing);
    if missing.is_empty() {
        debug!("Store {} already has all {} additives", store_id, requested.len());
        return Ok(Vec::new());
    }

    let base_prices: HashMap<i64, BigDecimal> = tx
        .additive_base_prices(&missing)
        .await?
        .into_iter()
        .collect();

    let rows = missing
        .iter()
        .map(|additive_id| NewStoreAdditive {
            store_id,
            additive_id: *additive_id,
            store_price: defaults
                .additive_prices
                .get(additive_id)
                .or_else(|| base_prices.get(additive_id))
                .cloned()
                .unwrap_or_else(BigDecimal::zero),
            is_out_of_stock: false,
        })
        .collect();

    let inserted = tx.insert_store_additives(rows).await?;
    info!("Created {} store additives for store {}", inserted.len(), store_id);
    Ok(inserted)
}

async fn materialize_stocks<T>(
    tx: &mut T,
    store_id: i64,
    candidates: &BTreeSet<i64>,
    defaults: &ProjectionDefaults,
) -> Result<Vec<i64>>
where
    T: InventoryTx + ?Sized,
{
    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let requested: Vec<i64> = candidates.iter().copied().collect();
    let existing = tx.existing_stock_ingredients(store_id, &requested).await?;
    let missing = missing_ids(candidates, &existing);
    if missing.is_empty() {
        debug!("Store {} already stocks all {} ingredients", store_id, requested.len());
        return Ok(Vec::new());
    }

    let rows = missing
        .iter()
        .map(|ingredient_id| NewStoreStock {
            store_id,
            ingredient_id: *ingredient_id,
            quantity: BigDecimal::zero(),
            low_stock_threshold: defaults.low_stock_threshold.clone(),
            is_out_of_stock: false,
        })
        .collect();

    let inserted = tx.insert_store_stocks(rows).await?;
    info!("Created {} store stocks for store {}", inserted.len(), store_id);
    Ok(inserted)
}
