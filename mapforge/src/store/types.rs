//! Persisted record types and store errors.

use crate::coord::Coord;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Auto-allocated map identifier.
pub type MapId = i64;

/// One hosted map of a tenant.
#[derive(Debug, Clone, PartialEq)]
pub struct MapRecord {
    pub id: MapId,
    /// Tenant-unique display name.
    pub name: String,
    pub tenant_id: String,
    pub hidden: bool,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
}

/// One imported 100×100 grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridRecord {
    /// `"{x}_{y}"`; unique per tenant.
    pub id: String,
    pub map_id: MapId,
    pub coord: Coord,
    /// Unix seconds; backdated on import so the grid reads as immediately
    /// stale to the downstream refresh scheduler.
    pub next_update: i64,
    pub tenant_id: String,
}

/// One rendered tile PNG. Primary key `(map_id, zoom, coord)`.
#[derive(Debug, Clone, PartialEq)]
pub struct TileRecord {
    pub map_id: MapId,
    pub coord: Coord,
    pub zoom: u8,
    /// Path relative to the storage root.
    pub file_path: String,
    /// Unix seconds at render time.
    pub cache: i64,
    pub tenant_id: String,
    pub file_size_bytes: u64,
}

/// Per-tenant storage accounting row.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantQuota {
    pub tenant_id: String,
    /// Running total of persisted PNG megabytes.
    pub current_storage_mb: f64,
    /// Enforced upper bound.
    pub quota_mb: f64,
}

/// One map marker, persisted through the external marker service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerRecord {
    pub map_id: MapId,
    pub grid_id: String,
    pub name: String,
    /// Cell position within the grid, `0..100` on each axis.
    pub pos_x: u32,
    pub pos_y: u32,
    /// Icon resource name.
    pub image: String,
    pub tenant_id: String,
}

/// Failures from the persistence layer.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Backend failure (connection, constraint, transaction).
    #[error("persistence error: {0}")]
    Backend(String),

    /// A storage adjustment would exceed the tenant's quota.
    #[error(
        "storage quota exceeded for tenant {tenant_id}: \
         {current_mb:.1} MB + {requested_mb:.1} MB > {quota_mb:.1} MB"
    )]
    QuotaExceeded {
        tenant_id: String,
        current_mb: f64,
        requested_mb: f64,
        quota_mb: f64,
    },
}
