//! Filesystem layout under the tenant storage root.
//!
//! Tile PNGs live at `tenants/{tenant}/{map}/{zoom}/{x}_{y}.png`; the
//! tileset resource cache lives under `hmap-tile-cache/`. All persisted
//! tile rows record the *relative* path so the storage root can move.

use crate::coord::Coord;
use crate::store::MapId;
use std::path::{Path, PathBuf};

/// Directory name of the on-disk tileset resource cache.
pub const RESOURCE_CACHE_DIR: &str = "hmap-tile-cache";

/// Relative path of a tile PNG, as recorded in the tile row.
pub fn tile_rel_path(tenant_id: &str, map_id: MapId, zoom: u8, coord: Coord) -> String {
    format!(
        "tenants/{}/{}/{}/{}_{}.png",
        tenant_id, map_id, zoom, coord.x, coord.y
    )
}

/// Absolute path of a tile PNG under the storage root.
pub fn tile_path(
    storage_root: &Path,
    tenant_id: &str,
    map_id: MapId,
    zoom: u8,
    coord: Coord,
) -> PathBuf {
    storage_root.join(tile_rel_path(tenant_id, map_id, zoom, coord))
}

/// Directory holding all zoom levels of one map.
pub fn map_dir(storage_root: &Path, tenant_id: &str, map_id: MapId) -> PathBuf {
    storage_root
        .join("tenants")
        .join(tenant_id)
        .join(map_id.to_string())
}
