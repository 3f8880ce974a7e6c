//! Marker placement and persistence.
//!
//! Marker coordinates in the container are absolute *tile* coordinates.
//! Placement resolves them to a grid via floored division and to an
//! intra-grid cell via Euclidean remainder, so negative world coordinates
//! land in the right grid with a non-negative offset.

use crate::coord::{div_floor, Coord, GRID_DIM};
use crate::hmap::{HmapGridData, HmapMarker};
use crate::import::{ImportError, ProgressTracker};
use crate::store::{MapId, MarkerRecord, MarkerStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Marker counts for one segment.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MarkerCounts {
    pub imported: usize,
    pub skipped: usize,
}

/// Persists one segment's markers against its imported grid set.
pub struct MarkerImporter<K: MarkerStore> {
    store: Arc<K>,
}

impl<K: MarkerStore> MarkerImporter<K> {
    pub fn new(store: Arc<K>) -> Self {
        Self { store }
    }

    /// Import all markers of one segment.
    ///
    /// Markers pointing outside the segment's grid set are skipped, as are
    /// markers whose save fails; neither aborts the import.
    pub async fn import(
        &self,
        map_id: MapId,
        tenant_id: &str,
        grids: &[HmapGridData],
        markers: &[HmapMarker],
        tracker: &ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<MarkerCounts, ImportError> {
        let grid_lookup: HashMap<Coord, String> = grids
            .iter()
            .map(|g| (g.coord, g.grid_id()))
            .collect();

        let mut counts = MarkerCounts::default();
        for marker in markers {
            if cancel.is_cancelled() {
                return Err(ImportError::Canceled);
            }

            let grid_coord = Coord::new(
                div_floor(marker.tile_x(), GRID_DIM as i32),
                div_floor(marker.tile_y(), GRID_DIM as i32),
            );
            let Some(grid_id) = grid_lookup.get(&grid_coord) else {
                debug!(
                    marker = marker.name(),
                    grid = %grid_coord,
                    "marker grid not part of the segment, skipping"
                );
                counts.skipped += 1;
                tracker.advance(1);
                continue;
            };

            let record = MarkerRecord {
                map_id,
                grid_id: grid_id.clone(),
                name: marker.name().to_string(),
                pos_x: marker.tile_x().rem_euclid(GRID_DIM as i32) as u32,
                pos_y: marker.tile_y().rem_euclid(GRID_DIM as i32) as u32,
                image: marker.image_resource().to_string(),
                tenant_id: tenant_id.to_string(),
            };

            match self.store.save_marker(record).await {
                Ok(()) => counts.imported += 1,
                Err(e) => {
                    warn!(marker = marker.name(), error = %e, "marker save failed");
                    counts.skipped += 1;
                }
            }
            tracker.advance(1);
        }

        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::GRID_AREA;
    use crate::store::MemoryMarkerStore;

    fn grid_at(x: i32, y: i32) -> HmapGridData {
        HmapGridData {
            coord: Coord::new(x, y),
            tilesets: vec![],
            tile_indices: vec![0; GRID_AREA],
            z_map: None,
        }
    }

    fn tracker() -> ProgressTracker {
        ProgressTracker::new(None)
    }

    #[tokio::test]
    async fn test_marker_lands_in_grid_with_offset() {
        let store = Arc::new(MemoryMarkerStore::new());
        let importer = MarkerImporter::new(Arc::clone(&store));

        let counts = importer
            .import(
                7,
                "t1",
                &[grid_at(1, 2)],
                &[HmapMarker::Tileset {
                    name: "quarry".into(),
                    tile_x: 150,
                    tile_y: 250,
                    resource_name: "gfx/invobjs/stone".into(),
                }],
                &tracker(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(counts, MarkerCounts { imported: 1, skipped: 0 });
        let saved = store.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].grid_id, "1_2");
        assert_eq!(saved[0].pos_x, 50);
        assert_eq!(saved[0].pos_y, 50);
        assert_eq!(saved[0].image, "gfx/invobjs/stone");
    }

    #[tokio::test]
    async fn test_marker_outside_segment_skipped() {
        let store = Arc::new(MemoryMarkerStore::new());
        let importer = MarkerImporter::new(Arc::clone(&store));

        let counts = importer
            .import(
                7,
                "t1",
                &[grid_at(1, 2)],
                &[HmapMarker::Custom {
                    name: "far away".into(),
                    tile_x: 5000,
                    tile_y: 5000,
                }],
                &tracker(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(counts, MarkerCounts { imported: 0, skipped: 1 });
        assert!(store.saved().is_empty());
    }

    #[tokio::test]
    async fn test_custom_marker_gets_placeholder_icon() {
        let store = Arc::new(MemoryMarkerStore::new());
        let importer = MarkerImporter::new(Arc::clone(&store));

        importer
            .import(
                7,
                "t1",
                &[grid_at(0, 0)],
                &[HmapMarker::Custom {
                    name: "camp".into(),
                    tile_x: 10,
                    tile_y: 20,
                }],
                &tracker(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(store.saved()[0].image, "gfx/terobjs/mm/custom");
    }

    #[tokio::test]
    async fn test_negative_coords_use_euclidean_remainder() {
        let store = Arc::new(MemoryMarkerStore::new());
        let importer = MarkerImporter::new(Arc::clone(&store));

        // Tile (-1, -1) is in grid (-1, -1) at cell (99, 99).
        importer
            .import(
                7,
                "t1",
                &[grid_at(-1, -1)],
                &[HmapMarker::Custom {
                    name: "edge".into(),
                    tile_x: -1,
                    tile_y: -1,
                }],
                &tracker(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let saved = store.saved();
        assert_eq!(saved[0].grid_id, "-1_-1");
        assert_eq!(saved[0].pos_x, 99);
        assert_eq!(saved[0].pos_y, 99);
    }

    #[tokio::test]
    async fn test_save_failures_counted_not_fatal() {
        let store = Arc::new(MemoryMarkerStore::failing());
        let importer = MarkerImporter::new(store);

        let counts = importer
            .import(
                7,
                "t1",
                &[grid_at(0, 0)],
                &[
                    HmapMarker::Custom {
                        name: "a".into(),
                        tile_x: 1,
                        tile_y: 1,
                    },
                    HmapMarker::Custom {
                        name: "b".into(),
                        tile_x: 2,
                        tile_y: 2,
                    },
                ],
                &tracker(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(counts, MarkerCounts { imported: 0, skipped: 2 });
    }

    #[tokio::test]
    async fn test_cancellation_propagates() {
        let store = Arc::new(MemoryMarkerStore::new());
        let importer = MarkerImporter::new(store);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = importer
            .import(
                7,
                "t1",
                &[grid_at(0, 0)],
                &[HmapMarker::Custom {
                    name: "a".into(),
                    tile_x: 1,
                    tile_y: 1,
                }],
                &tracker(),
                &cancel,
            )
            .await;

        assert!(matches!(result, Err(ImportError::Canceled)));
    }
}
