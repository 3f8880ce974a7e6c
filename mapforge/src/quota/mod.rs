//! Per-tenant storage accounting.

use crate::store::{MapStore, StoreError, TenantQuota};
use std::sync::Arc;
use tracing::debug;

/// Running per-tenant megabyte counter, updated atomically with the bytes
/// it accounts for.
///
/// All adjustments go through the store's atomic counter; this wrapper
/// centralizes logging and keeps call sites honest about when the counter
/// moves (batch flushes, zoom upserts, cleanup restores).
pub struct StorageQuotaService<S: MapStore> {
    store: Arc<S>,
}

impl<S: MapStore> StorageQuotaService<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Adjust the tenant counter by `delta_mb` (may be negative).
    ///
    /// Exceeding the tenant's bound surfaces [`StoreError::QuotaExceeded`]
    /// without moving the counter.
    pub async fn adjust(&self, tenant_id: &str, delta_mb: f64) -> Result<f64, StoreError> {
        if delta_mb == 0.0 {
            return Ok(self.store.quota(tenant_id).await?.current_storage_mb);
        }
        let new_value = self.store.adjust_storage_mb(tenant_id, delta_mb).await?;
        debug!(
            tenant = tenant_id,
            delta_mb = delta_mb,
            total_mb = new_value,
            "storage counter adjusted"
        );
        Ok(new_value)
    }

    /// Read the tenant's quota row.
    pub async fn current(&self, tenant_id: &str) -> Result<TenantQuota, StoreError> {
        self.store.quota(tenant_id).await
    }
}

impl<S: MapStore> Clone for StorageQuotaService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}
