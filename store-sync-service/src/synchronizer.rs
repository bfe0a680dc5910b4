use anyhow::{anyhow, Context, Result};
use shared::SyncReport;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::backend::{Clock, InventoryTx, SyncBackend};
use crate::diff::{collect_diffs, DiffSets};
use crate::materializer::{materialize_missing, ProjectionDefaults};
use crate::recalculator::{recalculate, RecalculateInput};

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub defaults: ProjectionDefaults,
    pub deadline: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            defaults: ProjectionDefaults::default(),
            deadline: Duration::from_secs(30),
        }
    }
}

/// Brings a store's projection tables up to date with the shared catalog.
pub struct StoreSynchronizer<B> {
    backend: Arc<B>,
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
}

impl<B> Clone for StoreSynchronizer<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            clock: self.clock.clone(),
            settings: self.settings.clone(),
        }
    }
}

impl<B: SyncBackend + 'static> StoreSynchronizer<B> {
    pub fn new(backend: Arc<B>, clock: Arc<dyn Clock>, settings: SyncSettings) -> Self {
        Self {
            backend,
            clock,
            settings,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub(crate) async fn load_watermark(&self, store_id: i64) -> Result<chrono::DateTime<chrono::Utc>> {
        self.backend
            .watermark(store_id)
            .await
            .with_context(|| format!("failed to load last sync time of store {}", store_id))?
            .ok_or_else(|| anyhow!("store {} not found", store_id))
    }

    /// Runs one synchronization. Either every projection row, flag and the
    /// advanced watermark are committed together, or nothing is.
    pub async fn synchronize(&self, store_id: i64) -> Result<SyncReport> {
        let started = Instant::now();
        let synced_at = match self
            .backend
            .catalog_time()
            .await
            .context("failed to read catalog time")?
        {
            Some(now) => now,
            None => self.clock.now(),
        };
        let since = self.load_watermark(store_id).await?;

        info!("Synchronizing store {} with catalog changes since {}", store_id, since);
        let diffs = collect_diffs(self.backend.as_ref(), store_id, since).await?;

        let mut report = SyncReport::new(store_id, since, synced_at);
        report.changed = diffs.counts();
        if diffs.is_empty() {
            info!("Store {} has no catalog changes since {}", store_id, since);
        }

        let defaults = self.settings.defaults.clone();
        let report = self
            .backend
            .transaction(move |tx| Box::pin(apply_sync(tx, diffs, defaults, report)))
            .await
            .with_context(|| format!("failed to synchronize store {}", store_id))?;

        info!(
            "Store {} synchronized in {:?} (sync {}): {} changed, {} rows created, {} flags updated",
            store_id,
            started.elapsed(),
            report.sync_id,
            report.total_changed(),
            report.inserted_rows(),
            report.flags_changed
        );
        Ok(report)
    }

    /// `synchronize` bounded by `deadline`. On expiry the in-flight work is
    /// dropped, which rolls back any open transaction.
    pub async fn synchronize_within(&self, store_id: i64, deadline: Duration) -> Result<SyncReport> {
        match tokio::time::timeout(deadline, self.synchronize(store_id)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Synchronization of store {} exceeded {:?}", store_id, deadline);
                Err(anyhow!(
                    "synchronization of store {} timed out after {:?}",
                    store_id,
                    deadline
                ))
            }
        }
    }

    /// `synchronize_within` using the configured deadline; logs failures.
    pub async fn run(&self, store_id: i64) -> Result<SyncReport> {
        let result = self.synchronize_within(store_id, self.settings.deadline).await;
        if let Err(e) = &result {
            error!("Synchronization of store {} failed: {:#}", store_id, e);
        }
        result
    }
}

async fn apply_sync(
    tx: &mut dyn InventoryTx,
    diffs: DiffSets,
    defaults: ProjectionDefaults,
    mut report: SyncReport,
) -> Result<SyncReport> {
    let store_id = report.store_id;
    let current = tx
        .lock_store(store_id)
        .await?
        .ok_or_else(|| anyhow!("store {} not found", store_id))?;

    let ingredient_ids = diffs.ingredient_ids();
    let materialized = materialize_missing(tx, store_id, &ingredient_ids, &diffs.additive_ids, &defaults).await?;

    let input = RecalculateInput {
        ingredient_ids: ingredient_ids.into_iter().collect(),
        product_size_ids: diffs.product_size_ids.into_iter().collect(),
        additive_ids: diffs.additive_ids.into_iter().collect(),
        provision_ids: diffs.provision_ids.into_iter().collect(),
    };
    let summary = recalculate(tx, store_id, &input).await?;

    // The watermark never moves backwards, even if the clock does.
    tx.advance_watermark(store_id, current.max(report.synced_at))
        .await
        .with_context(|| format!("failed to advance last sync time of store {}", store_id))?;

    report.inserted_stock_ids = materialized.stock_ids;
    report.inserted_additive_ids = materialized.additive_ids;
    report.flags_changed = summary.total();
    Ok(report)
}
