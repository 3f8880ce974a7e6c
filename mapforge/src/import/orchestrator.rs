//! Five-phase import driver.
//!
//! Parse → Prefetch → Import → Zoom → Markers, with fixed progress weights
//! summing to 100. Failures abort the remaining phases but keep every
//! counter and id accumulated so far: the caller decides whether to hand
//! the id lists to [`CleanupService`]. Wall-clock duration is recorded on
//! every exit path.

use crate::cleanup::CleanupService;
use crate::config::ImportConfig;
use crate::coord::Coord;
use crate::hmap::{HmapContainer, HmapReader, SegmentId};
use crate::import::error::ImportError;
use crate::import::progress::{ImportPhase, ProgressCallback, ProgressTracker};
use crate::import::segment::SegmentImporter;
use crate::import::{ImportMode, ImportResult};
use crate::marker::MarkerImporter;
use crate::quota::StorageQuotaService;
use crate::resource::{ResourceFetcher, TileResourceService};
use crate::store::{MapId, MapStore, MarkerStore};
use crate::zoom::{ancestor_updates, TileCompositor, ZoomPyramidBuilder};
use std::collections::{BTreeMap, HashSet};
use std::io::Read;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The import core's ingress point.
pub struct ImportService<S, K, F>
where
    S: MapStore + 'static,
    K: MarkerStore + 'static,
    F: ResourceFetcher + 'static,
{
    store: Arc<S>,
    markers: Arc<K>,
    resources: Arc<TileResourceService<F>>,
    config: Arc<ImportConfig>,
    live_buffers: Arc<AtomicI64>,
}

impl<S, K, F> ImportService<S, K, F>
where
    S: MapStore + 'static,
    K: MarkerStore + 'static,
    F: ResourceFetcher + 'static,
{
    pub fn new(
        store: Arc<S>,
        markers: Arc<K>,
        resources: Arc<TileResourceService<F>>,
        config: ImportConfig,
    ) -> Self {
        Self {
            store,
            markers,
            resources,
            config: Arc::new(config),
            live_buffers: Arc::new(AtomicI64::new(0)),
        }
    }

    /// A cleanup service over the same store and storage root, for rolling
    /// back a failed import with the returned id lists.
    pub fn cleanup_service(&self) -> CleanupService<S> {
        CleanupService::new(
            Arc::clone(&self.store),
            StorageQuotaService::new(Arc::clone(&self.store)),
            self.config.storage_root.clone(),
        )
    }

    /// Rendered grid buffers currently alive in the pipeline. Zero outside
    /// an import; zero after cancellation means nothing leaked.
    pub fn live_rendered_buffers(&self) -> i64 {
        self.live_buffers.load(Ordering::SeqCst)
    }

    /// Run one import call.
    ///
    /// Never returns `Err`: failures are reported through
    /// [`ImportResult::success`] and the abstract
    /// [`ImportResult::error_message`], with counters reflecting the work
    /// completed before the failure.
    pub async fn import<R: Read>(
        &self,
        input: R,
        tenant_id: &str,
        mode: ImportMode,
        progress: Option<ProgressCallback>,
        cancel: CancellationToken,
    ) -> ImportResult {
        let started = Instant::now();
        let tracker = Arc::new(ProgressTracker::new(progress));
        let mut result = ImportResult::default();

        let outcome = self
            .run_phases(input, tenant_id, mode, &tracker, &cancel, &mut result)
            .await;

        result.duration = started.elapsed();
        match outcome {
            Ok(()) => {
                result.success = true;
                tracker.force_report();
                info!(
                    tenant = tenant_id,
                    maps_created = result.maps_created,
                    grids_imported = result.grids_imported,
                    grids_skipped = result.grids_skipped,
                    markers_imported = result.markers_imported,
                    duration_ms = result.duration.as_millis() as u64,
                    "import complete"
                );
            }
            Err(e) => {
                result.success = false;
                result.error_message = Some(e.to_string());
                warn!(
                    tenant = tenant_id,
                    error = %e,
                    grids_imported = result.grids_imported,
                    duration_ms = result.duration.as_millis() as u64,
                    "import failed"
                );
            }
        }
        result
    }

    async fn run_phases<R: Read>(
        &self,
        input: R,
        tenant_id: &str,
        mode: ImportMode,
        tracker: &Arc<ProgressTracker>,
        cancel: &CancellationToken,
        result: &mut ImportResult,
    ) -> Result<(), ImportError> {
        if cancel.is_cancelled() {
            return Err(ImportError::Canceled);
        }
        self.resources.reset_network_errors();

        // Phase 1: parse the container.
        tracker.begin_phase(ImportPhase::Parse, 1);
        let container = HmapReader::parse(input)?;
        tracker.advance(1);

        let selected = select_segments(&container, self.config.max_segments);
        if cancel.is_cancelled() {
            return Err(ImportError::Canceled);
        }

        // Phase 2: warm the resource caches for every tileset in play.
        let resource_names = collect_resource_names(&container, &selected);
        tracker.begin_phase(ImportPhase::Prefetch, resource_names.len());
        {
            let tracker = Arc::clone(tracker);
            self.resources
                .prefetch(&resource_names, move |_, _, _| tracker.advance(1))
                .await;
        }
        if let Some(e) = self.resources.first_network_error() {
            warn!(error = %e, "resource fetches degraded; affected tiles render gray");
        }
        if cancel.is_cancelled() {
            return Err(ImportError::Canceled);
        }

        // Phase 3: segments through the render pipeline.
        let total_grids: usize = selected
            .iter()
            .map(|&id| container.grids_for_segment(id).len())
            .sum();
        tracker.begin_phase(ImportPhase::Import, total_grids);

        let importer = SegmentImporter {
            store: Arc::clone(&self.store),
            resources: Arc::clone(&self.resources),
            quota: StorageQuotaService::new(Arc::clone(&self.store)),
            config: Arc::clone(&self.config),
            tenant_id: tenant_id.to_string(),
            tracker: Arc::clone(tracker),
            live_buffers: Arc::clone(&self.live_buffers),
            cancel: cancel.clone(),
        };

        let mut per_map_coords: BTreeMap<MapId, Vec<Coord>> = BTreeMap::new();
        let mut segment_maps: Vec<(SegmentId, MapId)> = Vec::new();
        for &segment_id in &selected {
            let report = importer
                .run(segment_id, container.grids_for_segment(segment_id), mode)
                .await;

            if let Some(map_id) = report.map_id {
                if !result.affected_map_ids.contains(&map_id) {
                    result.affected_map_ids.push(map_id);
                }
                if report.is_new_map {
                    result.created_map_ids.push(map_id);
                    result.maps_created += 1;
                }
                segment_maps.push((segment_id, map_id));
                per_map_coords
                    .entry(map_id)
                    .or_default()
                    .extend(report.imported_coords.iter().copied());
            }
            result.grids_imported += report.grids_imported;
            result.grids_skipped += report.grids_skipped;
            result.tiles_rendered += report.grids_imported;
            result.created_grid_ids.extend(report.created_grid_ids);

            if let Some(e) = report.error {
                return Err(e);
            }
        }

        // Phase 4: zoom pyramids, strictly after all grids of the maps.
        let map_updates: Vec<(MapId, Vec<(u8, Coord)>)> = per_map_coords
            .iter()
            .map(|(&map_id, coords)| (map_id, ancestor_updates(coords)))
            .collect();
        let total_updates: usize = map_updates.iter().map(|(_, u)| u.len()).sum();
        tracker.begin_phase(ImportPhase::Zoom, total_updates);

        let compositor = TileCompositor::new(
            Arc::clone(&self.store),
            StorageQuotaService::new(Arc::clone(&self.store)),
            self.config.storage_root.clone(),
        );
        let builder = ZoomPyramidBuilder::new(&compositor);
        for (map_id, updates) in &map_updates {
            builder
                .rebuild(*map_id, tenant_id, updates, tracker, cancel)
                .await?;
        }

        // Phase 5: markers, after every zoom update.
        let total_markers: usize = selected
            .iter()
            .map(|&id| container.markers_for_segment(id).len())
            .sum();
        tracker.begin_phase(ImportPhase::Markers, total_markers);

        let marker_importer = MarkerImporter::new(Arc::clone(&self.markers));
        for &(segment_id, map_id) in &segment_maps {
            let counts = marker_importer
                .import(
                    map_id,
                    tenant_id,
                    container.grids_for_segment(segment_id),
                    container.markers_for_segment(segment_id),
                    tracker,
                    cancel,
                )
                .await?;
            result.markers_imported += counts.imported;
            result.markers_skipped += counts.skipped;
        }

        Ok(())
    }
}

/// Pick at most `max` segments by descending grid count.
///
/// The sort is stable over the container's first-occurrence ordering, so
/// ties resolve to whichever segment appeared first in the file.
fn select_segments(container: &HmapContainer, max: usize) -> Vec<SegmentId> {
    let mut segments: Vec<SegmentId> = container.segment_ids().to_vec();
    segments.sort_by_key(|&id| std::cmp::Reverse(container.grids_for_segment(id).len()));

    if segments.len() > max {
        for &dropped in &segments[max..] {
            info!(
                segment = dropped,
                grids = container.grids_for_segment(dropped).len(),
                "segment over the per-import limit, dropped"
            );
        }
        segments.truncate(max);
    }
    segments
}

/// Distinct tileset resource names across the selected segments, in first
/// appearance order.
fn collect_resource_names(container: &HmapContainer, selected: &[SegmentId]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for &segment_id in selected {
        for grid in container.grids_for_segment(segment_id) {
            for tileset in &grid.tilesets {
                if seen.insert(tileset.resource_name.clone()) {
                    names.push(tileset.resource_name.clone());
                }
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::GRID_AREA;
    use crate::hmap::{HmapGridData, TilesetRef};

    fn grid_with_tilesets(x: i32, names: &[&str]) -> HmapGridData {
        HmapGridData {
            coord: Coord::new(x, 0),
            tilesets: names
                .iter()
                .map(|n| TilesetRef {
                    resource_name: n.to_string(),
                })
                .collect(),
            tile_indices: vec![0; GRID_AREA],
            z_map: None,
        }
    }

    fn container_with_sizes(sizes: &[(SegmentId, usize)]) -> HmapContainer {
        let mut container = HmapContainer::new(1);
        let mut x = 0;
        for &(segment, count) in sizes {
            for _ in 0..count {
                container.push_grid(segment, grid_with_tilesets(x, &[]));
                x += 1;
            }
        }
        container
    }

    #[test]
    fn test_select_segments_by_descending_size() {
        let container =
            container_with_sizes(&[(1, 5), (2, 100), (3, 30), (4, 50), (5, 10)]);
        assert_eq!(select_segments(&container, 3), vec![2, 4, 3]);
    }

    #[test]
    fn test_select_segments_tie_break_is_first_occurrence() {
        let container = container_with_sizes(&[(7, 10), (8, 10), (9, 10)]);
        assert_eq!(select_segments(&container, 2), vec![7, 8]);
    }

    #[test]
    fn test_select_segments_under_limit_keeps_all() {
        let container = container_with_sizes(&[(1, 2), (2, 1)]);
        assert_eq!(select_segments(&container, 3), vec![1, 2]);
    }

    #[test]
    fn test_collect_resource_names_dedupes_in_order() {
        let mut container = HmapContainer::new(1);
        container.push_grid(
            1,
            grid_with_tilesets(0, &["gfx/tiles/grass", "gfx/tiles/dirt"]),
        );
        container.push_grid(
            1,
            grid_with_tilesets(1, &["gfx/tiles/dirt", "gfx/tiles/rock"]),
        );
        container.push_grid(2, grid_with_tilesets(2, &["gfx/tiles/sand"]));

        // Only segment 1 selected: segment 2's tilesets are not prefetched.
        let names = collect_resource_names(&container, &[1]);
        assert_eq!(
            names,
            vec![
                "gfx/tiles/grass".to_string(),
                "gfx/tiles/dirt".to_string(),
                "gfx/tiles/rock".to_string(),
            ]
        );
    }
}
