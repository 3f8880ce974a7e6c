//! Zoom pyramid regeneration.
//!
//! After a map's grids are persisted, every touched coordinate propagates
//! up through six half-resolution zoom levels. Updates run strictly in
//! ascending zoom order because level `k` composites from level `k - 1`,
//! and sequentially within a level (the persistence layer is
//! single-writer).

mod composite;

pub use composite::TileCompositor;

use crate::coord::{Coord, MAX_ZOOM};
use crate::import::{ImportError, ProgressTracker};
use crate::store::{MapId, MapStore};
use std::collections::BTreeSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// All `(zoom, coord)` pairs whose tiles must be recomputed for the given
/// zoom-0 coordinates, deduplicated and ordered by ascending zoom.
pub fn ancestor_updates(coords: &[Coord]) -> Vec<(u8, Coord)> {
    let mut updates = BTreeSet::new();
    for &coord in coords {
        let mut current = coord;
        for zoom in 1..=MAX_ZOOM {
            current = current.parent();
            updates.insert((zoom, current));
        }
    }
    updates.into_iter().collect()
}

/// Recomputes ancestor zoom tiles for one map.
pub struct ZoomPyramidBuilder<'a, S: MapStore> {
    compositor: &'a TileCompositor<S>,
}

impl<'a, S: MapStore> ZoomPyramidBuilder<'a, S> {
    pub fn new(compositor: &'a TileCompositor<S>) -> Self {
        Self { compositor }
    }

    /// Apply a precomputed update list (see [`ancestor_updates`]) for one
    /// map, advancing the tracker per tile.
    pub async fn rebuild(
        &self,
        map_id: MapId,
        tenant_id: &str,
        updates: &[(u8, Coord)],
        tracker: &ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<(), ImportError> {
        debug_assert!(updates.windows(2).all(|w| w[0].0 <= w[1].0));
        for &(zoom, coord) in updates {
            if cancel.is_cancelled() {
                return Err(ImportError::Canceled);
            }
            self.compositor
                .update_zoom_level(map_id, coord, zoom, tenant_id)
                .await?;
            tracker.advance(1);
        }
        debug!(map = map_id, tiles = updates.len(), "zoom pyramid rebuilt");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ancestor_updates_single_coord() {
        let updates = ancestor_updates(&[Coord::new(0, 0)]);
        assert_eq!(updates.len(), MAX_ZOOM as usize);
        assert_eq!(updates[0], (1, Coord::new(0, 0)));
        assert_eq!(updates[5], (6, Coord::new(0, 0)));
    }

    #[test]
    fn test_ancestor_updates_deduplicates_siblings() {
        // (0,0) and (1,0) share every ancestor.
        let updates = ancestor_updates(&[Coord::new(0, 0), Coord::new(1, 0)]);
        assert_eq!(updates.len(), MAX_ZOOM as usize);
    }

    #[test]
    fn test_ancestor_updates_zoom_ordered() {
        let updates = ancestor_updates(&[
            Coord::new(0, 0),
            Coord::new(100, 100),
            Coord::new(-5, 3),
        ]);
        assert!(updates.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[test]
    fn test_ancestor_updates_negative_coords() {
        let updates = ancestor_updates(&[Coord::new(-1, -1)]);
        // Floored division keeps every ancestor at (-1, -1).
        for (zoom, coord) in updates {
            assert!(zoom >= 1 && zoom <= MAX_ZOOM);
            assert_eq!(coord, Coord::new(-1, -1));
        }
    }

    #[test]
    fn test_ancestor_updates_distinct_branches() {
        // Far-apart coords do not share low-zoom ancestors.
        let updates = ancestor_updates(&[Coord::new(0, 0), Coord::new(64, 0)]);
        let zoom1: Vec<_> = updates.iter().filter(|(z, _)| *z == 1).collect();
        assert_eq!(zoom1.len(), 2);
        // They converge by zoom 6: 64 >> 6 == 1... still distinct from 0.
        let zoom6: Vec<_> = updates.iter().filter(|(z, _)| *z == 6).collect();
        assert_eq!(zoom6.len(), 2);
    }
}
