use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use shared::DiffCategory;
use std::collections::{BTreeMap, BTreeSet};

use crate::backend::CatalogDiffReader;

/// Catalog entities changed after a store's watermark, one set per category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSets {
    pub additive_ingredient_ids: BTreeSet<i64>,
    pub product_size_ingredient_ids: BTreeSet<i64>,
    pub product_size_ids: BTreeSet<i64>,
    pub additive_ids: BTreeSet<i64>,
    pub provision_ids: BTreeSet<i64>,
}

impl DiffSets {
    pub fn get(&self, category: DiffCategory) -> &BTreeSet<i64> {
        match category {
            DiffCategory::AdditiveIngredients => &self.additive_ingredient_ids,
            DiffCategory::ProductSizeIngredients => &self.product_size_ingredient_ids,
            DiffCategory::ProductSizes => &self.product_size_ids,
            DiffCategory::Additives => &self.additive_ids,
            DiffCategory::Provisions => &self.provision_ids,
        }
    }

    /// Ingredients reached through additives or directly through product sizes.
    pub fn ingredient_ids(&self) -> BTreeSet<i64> {
        self.additive_ingredient_ids
            .union(&self.product_size_ingredient_ids)
            .copied()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        DiffCategory::ALL.iter().all(|c| self.get(*c).is_empty())
    }

    pub fn counts(&self) -> BTreeMap<DiffCategory, usize> {
        DiffCategory::ALL
            .iter()
            .map(|c| (*c, self.get(*c).len()))
            .collect()
    }
}

async fn changed<R>(
    reader: &R,
    store_id: i64,
    since: DateTime<Utc>,
    category: DiffCategory,
) -> Result<BTreeSet<i64>>
where
    R: CatalogDiffReader + ?Sized,
{
    reader
        .changed_ids(store_id, since, category)
        .await
        .with_context(|| format!("failed to diff {} for store {}", category, store_id))
}

/// Runs every diff query concurrently against the same `since`.
///
/// The first failing query aborts the whole computation; the futures still in
/// flight are dropped.
pub async fn collect_diffs<R>(reader: &R, store_id: i64, since: DateTime<Utc>) -> Result<DiffSets>
where
    R: CatalogDiffReader + ?Sized,
{
    let (additive_ingredient_ids, product_size_ingredient_ids, product_size_ids, additive_ids, provision_ids) = tokio::try_join!(
        changed(reader, store_id, since, DiffCategory::AdditiveIngredients),
        changed(reader, store_id, since, DiffCategory::ProductSizeIngredients),
        changed(reader, store_id, since, DiffCategory::ProductSizes),
        changed(reader, store_id, since, DiffCategory::Additives),
        changed(reader, store_id, since, DiffCategory::Provisions),
    )?;

    Ok(DiffSets {
        additive_ingredient_ids,
        product_size_ingredient_ids,
        product_size_ids,
        additive_ids,
        provision_ids,
    })
}
