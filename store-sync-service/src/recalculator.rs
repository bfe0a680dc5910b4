use anyhow::{Context, Result};
use bigdecimal::BigDecimal;
use num_traits::Zero;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::backend::{FlagTarget, InventoryTx};
use crate::models::Requirement;

/// Catalog entities whose store-local availability must be recomputed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecalculateInput {
    pub ingredient_ids: Vec<i64>,
    pub product_size_ids: Vec<i64>,
    pub additive_ids: Vec<i64>,
    pub provision_ids: Vec<i64>,
}

impl RecalculateInput {
    pub fn is_empty(&self) -> bool {
        self.ingredient_ids.is_empty()
            && self.product_size_ids.is_empty()
            && self.additive_ids.is_empty()
            && self.provision_ids.is_empty()
    }
}

/// Number of flags flipped per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecalculateSummary {
    pub stocks: usize,
    pub product_sizes: usize,
    pub products: usize,
    pub additives: usize,
}

impl RecalculateSummary {
    pub fn total(&self) -> usize {
        self.stocks + self.product_sizes + self.products + self.additives
    }
}

/// A stock is out when it falls below its low-stock threshold, or runs dry
/// when no threshold is configured.
pub fn is_out_of_stock(quantity: &BigDecimal, low_stock_threshold: Option<&BigDecimal>) -> bool {
    match low_stock_threshold {
        Some(threshold) => quantity < threshold,
        None => *quantity <= BigDecimal::zero(),
    }
}

/// Owners with at least one requirement the store cannot cover. Ingredients
/// missing from `levels` count as zero.
pub fn unmet_owners(requirements: &[Requirement], levels: &HashMap<i64, BigDecimal>) -> BTreeSet<i64> {
    let zero = BigDecimal::zero();
    requirements
        .iter()
        .filter(|r| levels.get(&r.ingredient_id).unwrap_or(&zero) < &r.quantity)
        .map(|r| r.owner_id)
        .collect()
}

/// A product is out of stock once every one of its sizes is.
pub fn products_out_of_stock(size_flags: &[(i64, bool)]) -> BTreeMap<i64, bool> {
    let mut products: BTreeMap<i64, bool> = BTreeMap::new();
    for (product_id, size_out) in size_flags {
        let entry = products.entry(*product_id).or_insert(true);
        *entry = *entry && *size_out;
    }
    products
}

/// Recomputes `is_out_of_stock` for the store-local rows affected by `input`.
///
/// Must run inside the synchronization transaction so rows materialized in the
/// same transaction are flagged before commit.
pub async fn recalculate<T>(tx: &mut T, store_id: i64, input: &RecalculateInput) -> Result<RecalculateSummary>
where
    T: InventoryTx + ?Sized,
{
    let mut summary = RecalculateSummary::default();
    if input.is_empty() {
        return Ok(summary);
    }

    summary.stocks = recalculate_stocks(tx, store_id, &input.ingredient_ids)
        .await
        .with_context(|| format!("failed to recalculate store stocks for store {}", store_id))?;

    let size_ids = tx.store_sizes_using(store_id, input).await?;
    if !size_ids.is_empty() {
        let requirements = tx.size_requirements(&size_ids).await?;
        let unmet = unmet_owners(&requirements, &stock_levels(tx, store_id, &requirements).await?);
        let desired = size_ids.iter().map(|id| (*id, unmet.contains(id))).collect();
        summary.product_sizes = apply_flags(tx, FlagTarget::StoreProductSize, desired)
            .await
            .with_context(|| format!("failed to recalculate product sizes for store {}", store_id))?;

        let size_flags = tx.product_size_flags(&size_ids).await?;
        summary.products = apply_flags(tx, FlagTarget::StoreProduct, products_out_of_stock(&size_flags))
            .await
            .with_context(|| format!("failed to recalculate products for store {}", store_id))?;
    }

    let store_additive_ids = tx.store_additives_using(store_id, input).await?;
    if !store_additive_ids.is_empty() {
        let requirements = tx.additive_requirements(&store_additive_ids).await?;
        let unmet = unmet_owners(&requirements, &stock_levels(tx, store_id, &requirements).await?);
        let desired = store_additive_ids.iter().map(|id| (*id, unmet.contains(id))).collect();
        summary.additives = apply_flags(tx, FlagTarget::StoreAdditive, desired)
            .await
            .with_context(|| format!("failed to recalculate store additives for store {}", store_id))?;
    }

    debug!("Recalculated store {}: {:?}", store_id, summary);
    Ok(summary)
}

async fn recalculate_stocks<T>(tx: &mut T, store_id: i64, ingredient_ids: &[i64]) -> Result<usize>
where
    T: InventoryTx + ?Sized,
{
    if ingredient_ids.is_empty() {
        return Ok(0);
    }

    let desired = tx
        .store_stocks(store_id, ingredient_ids)
        .await?
        .into_iter()
        .map(|stock| {
            let out = is_out_of_stock(&stock.quantity, stock.low_stock_threshold.as_ref());
            (stock.id, out)
        })
        .collect();
    apply_flags(tx, FlagTarget::StoreStock, desired).await
}

async fn stock_levels<T>(tx: &mut T, store_id: i64, requirements: &[Requirement]) -> Result<HashMap<i64, BigDecimal>>
where
    T: InventoryTx + ?Sized,
{
    let ingredient_ids: Vec<i64> = requirements
        .iter()
        .map(|r| r.ingredient_id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    if ingredient_ids.is_empty() {
        return Ok(HashMap::new());
    }

    Ok(tx
        .store_stocks(store_id, &ingredient_ids)
        .await?
        .into_iter()
        .map(|stock| (stock.ingredient_id, stock.quantity))
        .collect())
}

/// Writes only the flags that differ from what is stored and returns how many
/// rows changed.
async fn apply_flags<T>(tx: &mut T, target: FlagTarget, desired: BTreeMap<i64, bool>) -> Result<usize>
where
    T: InventoryTx + ?Sized,
{
    if desired.is_empty() {
        return Ok(0);
    }

    let ids: Vec<i64> = desired.keys().copied().collect();
    let current: HashMap<i64, bool> = tx.flags(target, &ids).await?.into_iter().collect();

    let mut to_out = Vec::new();
    let mut to_in = Vec::new();
    for (id, out) in &desired {
        if current.get(id) == Some(out) {
            continue;
        }
        if *out {
            to_out.push(*id);
        } else {
            to_in.push(*id);
        }
    }

    let mut changed = 0;
    if !to_out.is_empty() {
        changed += tx.set_flags(target, &to_out, true).await?;
    }
    if !to_in.is_empty() {
        changed += tx.set_flags(target, &to_in, false).await?;
    }
    Ok(changed)
}
