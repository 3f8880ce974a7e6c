//! In-memory model of a parsed `.hmap` container.

use crate::coord::{Coord, GRID_AREA};
use std::collections::HashMap;

/// Identifier of one segment (connected component) within a container.
pub type SegmentId = u64;

/// Placeholder minimap icon for markers that carry no tileset resource.
pub const CUSTOM_MARKER_ICON: &str = "gfx/terobjs/mm/custom";

/// One tileset reference of a grid. The position within
/// [`HmapGridData::tilesets`] is the tileset index that cells refer to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilesetRef {
    /// External resource name, e.g. `"gfx/tiles/grass"`.
    pub resource_name: String,
}

/// One 100×100 terrain grid as exported by the game client.
#[derive(Debug, Clone, PartialEq)]
pub struct HmapGridData {
    /// Grid coordinate in world space (grid units, not tile units).
    pub coord: Coord,
    /// Ordered tileset references; cells index into this list.
    pub tilesets: Vec<TilesetRef>,
    /// Row-major `[y * 100 + x]` tileset index per cell, length 10000.
    /// Values `>= tilesets.len()` mean the cell is missing.
    pub tile_indices: Vec<u8>,
    /// Optional per-cell height map, length 10000 when present.
    pub z_map: Option<Vec<f32>>,
}

impl HmapGridData {
    /// The tenant-unique grid identifier `"{x}_{y}"`.
    pub fn grid_id(&self) -> String {
        self.coord.grid_id()
    }
}

/// A map marker with absolute *tile* coordinates (not grid coordinates).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HmapMarker {
    /// Marker backed by a tileset icon resource.
    Tileset {
        name: String,
        tile_x: i32,
        tile_y: i32,
        resource_name: String,
    },
    /// Marker without an icon resource; rendered with the placeholder.
    Custom {
        name: String,
        tile_x: i32,
        tile_y: i32,
    },
}

impl HmapMarker {
    pub fn name(&self) -> &str {
        match self {
            Self::Tileset { name, .. } | Self::Custom { name, .. } => name,
        }
    }

    pub fn tile_x(&self) -> i32 {
        match self {
            Self::Tileset { tile_x, .. } | Self::Custom { tile_x, .. } => *tile_x,
        }
    }

    pub fn tile_y(&self) -> i32 {
        match self {
            Self::Tileset { tile_y, .. } | Self::Custom { tile_y, .. } => *tile_y,
        }
    }

    /// The icon resource used when persisting this marker.
    pub fn image_resource(&self) -> &str {
        match self {
            Self::Tileset { resource_name, .. } => resource_name,
            Self::Custom { .. } => CUSTOM_MARKER_ICON,
        }
    }
}

#[derive(Debug, Default, Clone)]
struct SegmentData {
    grids: Vec<HmapGridData>,
    markers: Vec<HmapMarker>,
}

/// A fully parsed `.hmap` container.
///
/// Lives for the duration of one import call. Segment order is stable by
/// first occurrence in the file; grid and marker order within a segment is
/// file order.
#[derive(Debug, Clone)]
pub struct HmapContainer {
    version: u8,
    segment_order: Vec<SegmentId>,
    segments: HashMap<SegmentId, SegmentData>,
}

impl HmapContainer {
    /// Create an empty container with the given format version byte.
    pub fn new(version: u8) -> Self {
        Self {
            version,
            segment_order: Vec::new(),
            segments: HashMap::new(),
        }
    }

    /// The container format version byte. Opaque to the import core.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Distinct segment ids, stable by first occurrence.
    pub fn segment_ids(&self) -> &[SegmentId] {
        &self.segment_order
    }

    /// Ordered grids of one segment. Empty for unknown segment ids.
    pub fn grids_for_segment(&self, id: SegmentId) -> &[HmapGridData] {
        self.segments.get(&id).map(|s| s.grids.as_slice()).unwrap_or(&[])
    }

    /// Ordered markers of one segment. Empty for unknown segment ids.
    pub fn markers_for_segment(&self, id: SegmentId) -> &[HmapMarker] {
        self.segments
            .get(&id)
            .map(|s| s.markers.as_slice())
            .unwrap_or(&[])
    }

    /// Open a segment scope, registering the id on first occurrence.
    pub fn open_segment(&mut self, id: SegmentId) {
        if !self.segments.contains_key(&id) {
            self.segment_order.push(id);
            self.segments.insert(id, SegmentData::default());
        }
    }

    /// Append a grid to a segment, opening the segment if needed.
    ///
    /// # Panics
    ///
    /// Debug-asserts the cell array lengths; the reader validates them
    /// before construction.
    pub fn push_grid(&mut self, segment: SegmentId, grid: HmapGridData) {
        debug_assert_eq!(grid.tile_indices.len(), GRID_AREA);
        debug_assert!(grid.z_map.as_ref().map_or(true, |z| z.len() == GRID_AREA));
        self.open_segment(segment);
        self.segments.get_mut(&segment).unwrap().grids.push(grid);
    }

    /// Append a marker to a segment, opening the segment if needed.
    pub fn push_marker(&mut self, segment: SegmentId, marker: HmapMarker) {
        self.open_segment(segment);
        self.segments.get_mut(&segment).unwrap().markers.push(marker);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_grid(x: i32, y: i32) -> HmapGridData {
        HmapGridData {
            coord: Coord::new(x, y),
            tilesets: vec![],
            tile_indices: vec![0; GRID_AREA],
            z_map: None,
        }
    }

    #[test]
    fn test_segment_order_is_first_occurrence() {
        let mut c = HmapContainer::new(1);
        c.push_grid(7, blank_grid(0, 0));
        c.push_grid(3, blank_grid(1, 0));
        c.push_grid(7, blank_grid(2, 0));

        assert_eq!(c.segment_ids(), &[7, 3]);
        assert_eq!(c.grids_for_segment(7).len(), 2);
        assert_eq!(c.grids_for_segment(3).len(), 1);
    }

    #[test]
    fn test_unknown_segment_is_empty() {
        let c = HmapContainer::new(1);
        assert!(c.grids_for_segment(99).is_empty());
        assert!(c.markers_for_segment(99).is_empty());
    }

    #[test]
    fn test_marker_image_resource() {
        let m = HmapMarker::Custom {
            name: "cairn".into(),
            tile_x: 10,
            tile_y: 20,
        };
        assert_eq!(m.image_resource(), CUSTOM_MARKER_ICON);

        let m = HmapMarker::Tileset {
            name: "quarry".into(),
            tile_x: 1,
            tile_y: 2,
            resource_name: "gfx/invobjs/stone".into(),
        };
        assert_eq!(m.image_resource(), "gfx/invobjs/stone");
    }
}
