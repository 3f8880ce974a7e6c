//! Persistence seam for the import core.
//!
//! The import pipeline talks to its catalog through the [`MapStore`] and
//! [`MarkerStore`] traits; a deployment wires these to its database, tests
//! and the CLI use the dashmap-backed [`MemoryMapStore`] /
//! [`MemoryMarkerStore`]. Trait futures are `Send` so store calls can be
//! awaited from spawned pipeline tasks.

mod memory;
mod types;

pub use memory::{MemoryMapStore, MemoryMarkerStore};
pub use types::{
    GridRecord, MapId, MapRecord, MarkerRecord, StoreError, TenantQuota, TileRecord,
};

use crate::coord::Coord;
use std::future::Future;

/// Catalog operations over maps, grids, tiles, and tenant quotas.
///
/// Batch writes within one flush are expected to be crash-consistent per
/// tenant; the persistence layer is single-writer per import.
pub trait MapStore: Send + Sync {
    /// Allocate a fresh map for a tenant with a tenant-unique name.
    fn create_map(
        &self,
        tenant_id: &str,
    ) -> impl Future<Output = Result<MapRecord, StoreError>> + Send;

    /// Which of `grid_ids` already exist for this tenant, and on which map.
    ///
    /// One round trip regardless of the number of ids.
    fn lookup_grids(
        &self,
        tenant_id: &str,
        grid_ids: &[String],
    ) -> impl Future<Output = Result<Vec<(String, MapId)>, StoreError>> + Send;

    /// Insert a batch of grid rows.
    fn insert_grids(
        &self,
        grids: Vec<GridRecord>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Insert a batch of tile rows.
    fn insert_tiles(
        &self,
        tiles: Vec<TileRecord>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Fetch one tile row by its `(map, zoom, coord)` key.
    fn tile(
        &self,
        map_id: MapId,
        zoom: u8,
        coord: Coord,
    ) -> impl Future<Output = Result<Option<TileRecord>, StoreError>> + Send;

    /// Insert or replace one tile row.
    fn upsert_tile(
        &self,
        tile: TileRecord,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Delete one grid row by id. Absent rows are not an error.
    fn delete_grid(
        &self,
        tenant_id: &str,
        grid_id: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Delete every tile row of a map.
    fn delete_tiles_for_map(
        &self,
        map_id: MapId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Delete a map row. Absent rows are not an error.
    fn delete_map(&self, map_id: MapId)
        -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Atomically adjust a tenant's storage counter by `delta_mb`,
    /// returning the new value.
    ///
    /// A positive adjustment that would push the counter past the tenant's
    /// quota fails with [`StoreError::QuotaExceeded`] and leaves the
    /// counter untouched.
    fn adjust_storage_mb(
        &self,
        tenant_id: &str,
        delta_mb: f64,
    ) -> impl Future<Output = Result<f64, StoreError>> + Send;

    /// Read a tenant's quota row.
    fn quota(
        &self,
        tenant_id: &str,
    ) -> impl Future<Output = Result<TenantQuota, StoreError>> + Send;
}

/// The external marker service.
pub trait MarkerStore: Send + Sync {
    /// Persist one marker. Failures are counted by the caller, never fatal.
    fn save_marker(
        &self,
        marker: MarkerRecord,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
