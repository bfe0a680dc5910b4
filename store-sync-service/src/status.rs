use anyhow::Result;
use shared::SyncStatus;
use tracing::debug;

use crate::backend::SyncBackend;
use crate::diff::collect_diffs;
use crate::synchronizer::StoreSynchronizer;

impl<B: SyncBackend + 'static> StoreSynchronizer<B> {
    /// Reports whether the store has caught up with the catalog. Read-only.
    pub async fn status(&self, store_id: i64) -> Result<SyncStatus> {
        let since = self.load_watermark(store_id).await?;
        let diffs = collect_diffs(self.backend(), store_id, since).await?;
        debug!("Store {} pending changes: {:?}", store_id, diffs.counts());

        Ok(SyncStatus {
            is_sync: diffs.is_empty(),
            last_sync_date: since,
        })
    }
}
