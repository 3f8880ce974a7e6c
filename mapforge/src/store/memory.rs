//! In-memory store implementations.
//!
//! Concurrent-map-backed catalog used by tests and by the CLI's dry-run
//! imports. Semantics match what the import core expects from a real
//! database backend: tenant-scoped grid ids, keyed tile upserts, and an
//! atomic quota counter with an enforced bound.

use super::types::{
    GridRecord, MapId, MapRecord, MarkerRecord, StoreError, TenantQuota, TileRecord,
};
use super::{MapStore, MarkerStore};
use crate::coord::Coord;
use chrono::Utc;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

/// Default quota for tenants without a seeded quota row.
pub const DEFAULT_QUOTA_MB: f64 = 10_240.0;

/// Dashmap-backed [`MapStore`].
pub struct MemoryMapStore {
    maps: DashMap<MapId, MapRecord>,
    /// Keyed `(tenant_id, grid_id)`; grid ids are unique per tenant.
    grids: DashMap<(String, String), GridRecord>,
    tiles: DashMap<(MapId, u8, Coord), TileRecord>,
    quotas: DashMap<String, TenantQuota>,
    next_map_id: AtomicI64,
}

impl MemoryMapStore {
    pub fn new() -> Self {
        Self {
            maps: DashMap::new(),
            grids: DashMap::new(),
            tiles: DashMap::new(),
            quotas: DashMap::new(),
            next_map_id: AtomicI64::new(1),
        }
    }

    /// Seed a map row, e.g. for merge tests; bumps the id allocator past it.
    pub fn seed_map(&self, map: MapRecord) {
        self.next_map_id.fetch_max(map.id + 1, Ordering::SeqCst);
        self.maps.insert(map.id, map);
    }

    /// Seed a quota row with an explicit bound.
    pub fn seed_quota(&self, tenant_id: &str, quota_mb: f64) {
        self.quotas.insert(
            tenant_id.to_string(),
            TenantQuota {
                tenant_id: tenant_id.to_string(),
                current_storage_mb: 0.0,
                quota_mb,
            },
        );
    }

    pub fn map_count(&self) -> usize {
        self.maps.len()
    }

    pub fn grid_count(&self) -> usize {
        self.grids.len()
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Snapshot of every tile row, for test assertions.
    pub fn all_tiles(&self) -> Vec<TileRecord> {
        self.tiles.iter().map(|e| e.value().clone()).collect()
    }

    /// Snapshot of every grid row, for test assertions.
    pub fn all_grids(&self) -> Vec<GridRecord> {
        self.grids.iter().map(|e| e.value().clone()).collect()
    }
}

impl Default for MemoryMapStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MapStore for MemoryMapStore {
    async fn create_map(&self, tenant_id: &str) -> Result<MapRecord, StoreError> {
        let id = self.next_map_id.fetch_add(1, Ordering::SeqCst);
        let map = MapRecord {
            id,
            name: format!("map-{}", id),
            tenant_id: tenant_id.to_string(),
            hidden: false,
            priority: 0,
            created_at: Utc::now(),
        };
        self.maps.insert(id, map.clone());
        Ok(map)
    }

    async fn lookup_grids(
        &self,
        tenant_id: &str,
        grid_ids: &[String],
    ) -> Result<Vec<(String, MapId)>, StoreError> {
        Ok(grid_ids
            .iter()
            .filter_map(|id| {
                self.grids
                    .get(&(tenant_id.to_string(), id.clone()))
                    .map(|g| (id.clone(), g.map_id))
            })
            .collect())
    }

    async fn insert_grids(&self, grids: Vec<GridRecord>) -> Result<(), StoreError> {
        for grid in grids {
            self.grids
                .insert((grid.tenant_id.clone(), grid.id.clone()), grid);
        }
        Ok(())
    }

    async fn insert_tiles(&self, tiles: Vec<TileRecord>) -> Result<(), StoreError> {
        for tile in tiles {
            self.tiles
                .insert((tile.map_id, tile.zoom, tile.coord), tile);
        }
        Ok(())
    }

    async fn tile(
        &self,
        map_id: MapId,
        zoom: u8,
        coord: Coord,
    ) -> Result<Option<TileRecord>, StoreError> {
        Ok(self
            .tiles
            .get(&(map_id, zoom, coord))
            .map(|t| t.value().clone()))
    }

    async fn upsert_tile(&self, tile: TileRecord) -> Result<(), StoreError> {
        self.tiles
            .insert((tile.map_id, tile.zoom, tile.coord), tile);
        Ok(())
    }

    async fn delete_grid(&self, tenant_id: &str, grid_id: &str) -> Result<(), StoreError> {
        self.grids
            .remove(&(tenant_id.to_string(), grid_id.to_string()));
        Ok(())
    }

    async fn delete_tiles_for_map(&self, map_id: MapId) -> Result<(), StoreError> {
        self.tiles.retain(|(m, _, _), _| *m != map_id);
        Ok(())
    }

    async fn delete_map(&self, map_id: MapId) -> Result<(), StoreError> {
        self.maps.remove(&map_id);
        Ok(())
    }

    async fn adjust_storage_mb(
        &self,
        tenant_id: &str,
        delta_mb: f64,
    ) -> Result<f64, StoreError> {
        // The entry guard holds the shard lock, making the read-check-write
        // atomic.
        let mut quota = self
            .quotas
            .entry(tenant_id.to_string())
            .or_insert_with(|| TenantQuota {
                tenant_id: tenant_id.to_string(),
                current_storage_mb: 0.0,
                quota_mb: DEFAULT_QUOTA_MB,
            });

        if delta_mb > 0.0 && quota.current_storage_mb + delta_mb > quota.quota_mb {
            return Err(StoreError::QuotaExceeded {
                tenant_id: tenant_id.to_string(),
                current_mb: quota.current_storage_mb,
                requested_mb: delta_mb,
                quota_mb: quota.quota_mb,
            });
        }

        quota.current_storage_mb = (quota.current_storage_mb + delta_mb).max(0.0);
        Ok(quota.current_storage_mb)
    }

    async fn quota(&self, tenant_id: &str) -> Result<TenantQuota, StoreError> {
        Ok(self
            .quotas
            .get(tenant_id)
            .map(|q| q.value().clone())
            .unwrap_or_else(|| TenantQuota {
                tenant_id: tenant_id.to_string(),
                current_storage_mb: 0.0,
                quota_mb: DEFAULT_QUOTA_MB,
            }))
    }
}

/// In-memory [`MarkerStore`], optionally failing every save for error-path
/// tests.
pub struct MemoryMarkerStore {
    markers: Mutex<Vec<MarkerRecord>>,
    fail_saves: bool,
}

impl MemoryMarkerStore {
    pub fn new() -> Self {
        Self {
            markers: Mutex::new(Vec::new()),
            fail_saves: false,
        }
    }

    /// A store whose every save fails, for exercising skip counting.
    pub fn failing() -> Self {
        Self {
            markers: Mutex::new(Vec::new()),
            fail_saves: true,
        }
    }

    pub fn saved(&self) -> Vec<MarkerRecord> {
        self.markers.lock().unwrap().clone()
    }
}

impl Default for MemoryMarkerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkerStore for MemoryMarkerStore {
    async fn save_marker(&self, marker: MarkerRecord) -> Result<(), StoreError> {
        if self.fail_saves {
            return Err(StoreError::Backend("marker service unavailable".into()));
        }
        self.markers.lock().unwrap().push(marker);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_map_allocates_unique_ids() {
        let store = MemoryMapStore::new();
        let a = store.create_map("t1").await.unwrap();
        let b = store.create_map("t1").await.unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(a.name, b.name);
        assert!(!a.hidden);
        assert_eq!(a.priority, 0);
    }

    #[tokio::test]
    async fn test_seed_map_bumps_allocator() {
        let store = MemoryMapStore::new();
        store.seed_map(MapRecord {
            id: 42,
            name: "map-42".into(),
            tenant_id: "t1".into(),
            hidden: false,
            priority: 0,
            created_at: Utc::now(),
        });
        let next = store.create_map("t1").await.unwrap();
        assert!(next.id > 42);
    }

    #[tokio::test]
    async fn test_lookup_grids_is_tenant_scoped() {
        let store = MemoryMapStore::new();
        store
            .insert_grids(vec![GridRecord {
                id: "5_7".into(),
                map_id: 1,
                coord: Coord::new(5, 7),
                next_update: 0,
                tenant_id: "t1".into(),
            }])
            .await
            .unwrap();

        let hits = store
            .lookup_grids("t1", &["5_7".into(), "9_9".into()])
            .await
            .unwrap();
        assert_eq!(hits, vec![("5_7".to_string(), 1)]);

        let other = store.lookup_grids("t2", &["5_7".into()]).await.unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_upsert_tile_replaces_by_key() {
        let store = MemoryMapStore::new();
        let mut tile = TileRecord {
            map_id: 1,
            coord: Coord::new(0, 0),
            zoom: 1,
            file_path: "a.png".into(),
            cache: 1,
            tenant_id: "t1".into(),
            file_size_bytes: 100,
        };
        store.upsert_tile(tile.clone()).await.unwrap();
        tile.file_size_bytes = 200;
        store.upsert_tile(tile.clone()).await.unwrap();

        assert_eq!(store.tile_count(), 1);
        let row = store.tile(1, 1, Coord::new(0, 0)).await.unwrap().unwrap();
        assert_eq!(row.file_size_bytes, 200);
    }

    #[tokio::test]
    async fn test_quota_enforced() {
        let store = MemoryMapStore::new();
        store.seed_quota("t1", 10.0);

        assert_eq!(store.adjust_storage_mb("t1", 6.0).await.unwrap(), 6.0);
        let err = store.adjust_storage_mb("t1", 5.0).await.unwrap_err();
        assert!(matches!(err, StoreError::QuotaExceeded { .. }));

        // Counter untouched by the failed adjustment.
        assert_eq!(store.quota("t1").await.unwrap().current_storage_mb, 6.0);
    }

    #[tokio::test]
    async fn test_quota_never_goes_negative() {
        let store = MemoryMapStore::new();
        store.adjust_storage_mb("t1", 2.0).await.unwrap();
        let value = store.adjust_storage_mb("t1", -5.0).await.unwrap();
        assert_eq!(value, 0.0);
    }

    #[tokio::test]
    async fn test_delete_tiles_for_map_leaves_others() {
        let store = MemoryMapStore::new();
        for map_id in [1, 2] {
            store
                .upsert_tile(TileRecord {
                    map_id,
                    coord: Coord::new(0, 0),
                    zoom: 0,
                    file_path: "x.png".into(),
                    cache: 0,
                    tenant_id: "t1".into(),
                    file_size_bytes: 1,
                })
                .await
                .unwrap();
        }
        store.delete_tiles_for_map(1).await.unwrap();
        assert_eq!(store.tile_count(), 1);
        assert!(store.tile(2, 0, Coord::new(0, 0)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_absent_rows_is_ok() {
        let store = MemoryMapStore::new();
        store.delete_grid("t1", "0_0").await.unwrap();
        store.delete_map(99).await.unwrap();
        store.delete_tiles_for_map(99).await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_marker_store() {
        let store = MemoryMarkerStore::failing();
        let err = store
            .save_marker(MarkerRecord {
                map_id: 1,
                grid_id: "0_0".into(),
                name: "x".into(),
                pos_x: 0,
                pos_y: 0,
                image: "gfx/terobjs/mm/custom".into(),
                tenant_id: "t1".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
        assert!(store.saved().is_empty());
    }
}
