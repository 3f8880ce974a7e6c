//! Rollback of failed imports.
//!
//! Cleanup is never automatic: the import returns its created-id lists and
//! the caller decides. Every step is best-effort and idempotent, so
//! retrying after a partial cleanup (or cleaning an already-clean import)
//! never raises.

use crate::layout;
use crate::quota::StorageQuotaService;
use crate::store::{MapId, MapStore};
use crate::time::bytes_to_mb;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Removes the rows, disk bytes, and quota of a failed import.
pub struct CleanupService<S: MapStore> {
    store: Arc<S>,
    quota: StorageQuotaService<S>,
    storage_root: PathBuf,
}

impl<S: MapStore> CleanupService<S> {
    pub fn new(store: Arc<S>, quota: StorageQuotaService<S>, storage_root: PathBuf) -> Self {
        Self {
            store,
            quota,
            storage_root,
        }
    }

    /// Delete everything a failed import created.
    ///
    /// `created_grid_ids` rows are deleted individually (they may span
    /// pre-existing maps in merge mode); each new map is then swept whole:
    /// PNG bytes counted and removed, quota decremented by that amount,
    /// tile and map rows dropped.
    pub async fn cleanup(
        &self,
        tenant_id: &str,
        created_map_ids: &[MapId],
        created_grid_ids: &[String],
    ) {
        for grid_id in created_grid_ids {
            if let Err(e) = self.store.delete_grid(tenant_id, grid_id).await {
                warn!(grid = grid_id.as_str(), error = %e, "grid row delete failed");
            }
        }

        for &map_id in created_map_ids {
            let dir = layout::map_dir(&self.storage_root, tenant_id, map_id);
            let bytes = png_bytes_under(&dir);

            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(map = map_id, error = %e, "map directory remove failed"),
            }

            if bytes > 0 {
                if let Err(e) = self.quota.adjust(tenant_id, -bytes_to_mb(bytes)).await {
                    warn!(map = map_id, error = %e, "quota restore failed");
                }
            }

            if let Err(e) = self.store.delete_tiles_for_map(map_id).await {
                warn!(map = map_id, error = %e, "tile rows delete failed");
            }
            if let Err(e) = self.store.delete_map(map_id).await {
                warn!(map = map_id, error = %e, "map row delete failed");
            }

            info!(
                map = map_id,
                freed_mb = bytes_to_mb(bytes),
                "cleaned up imported map"
            );
        }
    }
}

/// Total size of all PNG files under a directory, recursively. Missing
/// directories count as zero.
fn png_bytes_under(dir: &Path) -> u64 {
    let mut total = 0;
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            total += png_bytes_under(&path);
        } else if path.extension().and_then(|e| e.to_str()) == Some("png") {
            if let Ok(meta) = std::fs::metadata(&path) {
                total += meta.len();
            }
        }
    }
    total
}
