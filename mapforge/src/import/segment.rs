//! Per-segment import: map placement and the bounded render pipeline.
//!
//! One segment runs a producer/consumer pipeline: up to
//! `render_workers` renderer tasks (gated by a semaphore) feed a bounded
//! channel; a single consumer writes PNGs, accumulates the batch context,
//! and flushes to the store. The channel bound is the backpressure that
//! couples CPU rendering to persistence throughput.
//!
//! Buffer hygiene invariant: a [`RenderedGrid`] owns its pixel buffer and
//! is dropped on every exit path - consumed, canceled, failed send, or
//! drained after an error. The live-buffer gauge makes leaks observable.

use crate::config::ImportConfig;
use crate::coord::Coord;
use crate::hmap::{HmapGridData, SegmentId};
use crate::import::batch::BatchContext;
use crate::import::error::ImportError;
use crate::import::progress::ProgressTracker;
use crate::import::ImportMode;
use crate::layout;
use crate::quota::StorageQuotaService;
use crate::render::{encode_png, GridRenderer};
use crate::resource::{ResourceFetcher, TileResourceService};
use crate::store::{GridRecord, MapId, MapStore, TileRecord};
use crate::time::{bytes_to_mb, unix_now};
use image::RgbaImage;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Grid rows are backdated by this many seconds so the downstream refresh
/// scheduler treats them as immediately stale.
const NEXT_UPDATE_BACKDATE_SECS: i64 = 60;

/// A rendered grid in flight between producer and consumer.
///
/// Owns the pixel buffer; the gauge tracks live instances so tests and
/// telemetry can assert nothing leaks across cancellation.
pub(crate) struct RenderedGrid {
    pub record: GridRecord,
    pub rel_path: String,
    pub image: RgbaImage,
    gauge: Arc<AtomicI64>,
}

impl RenderedGrid {
    fn new(record: GridRecord, rel_path: String, image: RgbaImage, gauge: Arc<AtomicI64>) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        Self {
            record,
            rel_path,
            image,
            gauge,
        }
    }
}

impl Drop for RenderedGrid {
    fn drop(&mut self) {
        self.gauge.fetch_sub(1, Ordering::SeqCst);
    }
}

/// What one segment run produced, including partial work before a failure.
#[derive(Debug, Default)]
pub(crate) struct SegmentReport {
    pub segment_id: SegmentId,
    pub map_id: Option<MapId>,
    pub is_new_map: bool,
    /// Grids scheduled into the pipeline after merge filtering.
    pub grids_processed: usize,
    pub grids_imported: usize,
    pub grids_skipped: usize,
    pub created_grid_ids: Vec<String>,
    /// Coordinates of imported grids, feeding the zoom pyramid.
    pub imported_coords: Vec<Coord>,
    pub error: Option<ImportError>,
}

/// Imports one segment into one map.
pub(crate) struct SegmentImporter<S: MapStore + 'static, F: ResourceFetcher + 'static> {
    pub store: Arc<S>,
    pub resources: Arc<TileResourceService<F>>,
    pub quota: StorageQuotaService<S>,
    pub config: Arc<ImportConfig>,
    pub tenant_id: String,
    pub tracker: Arc<ProgressTracker>,
    pub live_buffers: Arc<AtomicI64>,
    pub cancel: CancellationToken,
}

impl<S: MapStore + 'static, F: ResourceFetcher + 'static> SegmentImporter<S, F> {
    /// Run the full segment: map selection, pipeline, memory hygiene.
    pub async fn run(
        &self,
        segment_id: SegmentId,
        grids: &[HmapGridData],
        mode: ImportMode,
    ) -> SegmentReport {
        let mut report = SegmentReport {
            segment_id,
            ..SegmentReport::default()
        };

        let (map_id, is_new_map, to_import) = match self.select_map(grids, mode).await {
            Ok(selection) => selection,
            Err(e) => {
                report.error = Some(e);
                return report;
            }
        };
        report.map_id = Some(map_id);
        report.is_new_map = is_new_map;
        report.grids_skipped = grids.len() - to_import.len();
        report.grids_processed = to_import.len();

        info!(
            segment = segment_id,
            map = map_id,
            new_map = is_new_map,
            grids = to_import.len(),
            skipped = report.grids_skipped,
            "importing segment"
        );

        // Already-present grids count as handled work for the phase.
        if report.grids_skipped > 0 {
            self.tracker.advance(report.grids_skipped);
        }

        let (tx, rx) = mpsc::channel::<RenderedGrid>(self.config.channel_capacity);
        let producer = tokio::spawn(produce(
            to_import,
            tx,
            Arc::clone(&self.resources),
            map_id,
            self.tenant_id.clone(),
            self.config.render_workers,
            Arc::clone(&self.live_buffers),
            self.cancel.clone(),
        ));
        let consumer = tokio::spawn(consume(
            rx,
            Arc::clone(&self.store),
            self.quota.clone(),
            self.config.storage_root.clone(),
            self.tenant_id.clone(),
            self.config.batch_size,
            Arc::clone(&self.tracker),
            self.cancel.clone(),
        ));

        let (producer_result, consumer_result) = tokio::join!(producer, consumer);

        let producer_error = match producer_result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(e) => Some(ImportError::Internal(format!(
                "producer task panicked: {}",
                e
            ))),
        };
        let consumer_report = match consumer_result {
            Ok(r) => r,
            Err(e) => ConsumerReport {
                error: Some(ImportError::Internal(format!(
                    "consumer task panicked: {}",
                    e
                ))),
                ..ConsumerReport::default()
            },
        };

        report.grids_imported = consumer_report.grids_imported;
        report.created_grid_ids = consumer_report.created_grid_ids;
        report.imported_coords = consumer_report.imported_coords;
        // Producer failures take precedence when both sides failed.
        report.error = producer_error.or(consumer_report.error);

        // One large segment must not pin textures for the next one.
        self.resources.clear_memory_cache();

        report
    }

    /// Pick or create the target map and filter already-present grids.
    async fn select_map(
        &self,
        grids: &[HmapGridData],
        mode: ImportMode,
    ) -> Result<(MapId, bool, Vec<Arc<HmapGridData>>), ImportError> {
        match mode {
            ImportMode::CreateNew => {
                let map = self.store.create_map(&self.tenant_id).await?;
                let all = grids.iter().cloned().map(Arc::new).collect();
                Ok((map.id, true, all))
            }
            ImportMode::Merge => {
                let grid_ids: Vec<String> = grids.iter().map(|g| g.grid_id()).collect();
                // Single round trip for the whole segment.
                let existing = self.store.lookup_grids(&self.tenant_id, &grid_ids).await?;

                let (map_id, is_new) = match existing.first() {
                    Some((_, map_id)) => (*map_id, false),
                    None => (self.store.create_map(&self.tenant_id).await?.id, true),
                };

                let present: HashSet<&str> =
                    existing.iter().map(|(id, _)| id.as_str()).collect();
                let to_import = grids
                    .iter()
                    .filter(|g| !present.contains(g.grid_id().as_str()))
                    .cloned()
                    .map(Arc::new)
                    .collect();
                Ok((map_id, is_new, to_import))
            }
        }
    }
}

/// Drives the renderer tasks. Closes the channel when the last task ends.
#[allow(clippy::too_many_arguments)]
async fn produce<F: ResourceFetcher + 'static>(
    grids: Vec<Arc<HmapGridData>>,
    tx: mpsc::Sender<RenderedGrid>,
    resources: Arc<TileResourceService<F>>,
    map_id: MapId,
    tenant_id: String,
    render_workers: usize,
    live_buffers: Arc<AtomicI64>,
    cancel: CancellationToken,
) -> Result<(), ImportError> {
    let semaphore = Arc::new(Semaphore::new(render_workers));
    let first_error: Arc<Mutex<Option<ImportError>>> = Arc::new(Mutex::new(None));
    let mut tasks = JoinSet::new();
    let mut canceled = false;

    for grid in grids {
        if cancel.is_cancelled() {
            canceled = true;
            break;
        }
        // A closed channel means the consumer stopped; rendering more
        // grids would be thrown away.
        if tx.is_closed() || first_error.lock().unwrap().is_some() {
            break;
        }
        // The permit bounds concurrent renders; acquisition doubles as the
        // cancellation point between grids.
        let permit = tokio::select! {
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
            _ = cancel.cancelled() => {
                canceled = true;
                break;
            }
        };

        let tx = tx.clone();
        let resources = Arc::clone(&resources);
        let tenant_id = tenant_id.clone();
        let live_buffers = Arc::clone(&live_buffers);
        let first_error = Arc::clone(&first_error);
        let cancel = cancel.clone();
        tasks.spawn(async move {
            // Released in this task's exit scope, success or not.
            let _permit = permit;
            if cancel.is_cancelled() {
                return;
            }
            match render_one(grid, resources, map_id, &tenant_id, live_buffers).await {
                // A failed send means the consumer is gone; the buffer
                // drops right here.
                Ok(rendered) => {
                    let _ = tx.send(rendered).await;
                }
                Err(e) => {
                    let mut slot = first_error.lock().unwrap();
                    slot.get_or_insert(e);
                }
            }
        });
    }

    // Dropping the driver's sender lets the channel close once the
    // in-flight tasks have finished with their clones.
    drop(tx);

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            first_error
                .lock()
                .unwrap()
                .get_or_insert(ImportError::Internal(format!("render task panicked: {}", e)));
        }
    }

    if canceled {
        return Err(ImportError::Canceled);
    }
    let error = first_error.lock().unwrap().take();
    match error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Resolve textures, rasterize off the async runtime, build the records.
async fn render_one<F: ResourceFetcher>(
    grid: Arc<HmapGridData>,
    resources: Arc<TileResourceService<F>>,
    map_id: MapId,
    tenant_id: &str,
    live_buffers: Arc<AtomicI64>,
) -> Result<RenderedGrid, ImportError> {
    let mut textures = Vec::with_capacity(grid.tilesets.len());
    for tileset in &grid.tilesets {
        textures.push(resources.get_tile_image(&tileset.resource_name).await);
    }

    let coord = grid.coord;
    let image = tokio::task::spawn_blocking(move || GridRenderer::render(&grid, &textures))
        .await
        .map_err(|e| ImportError::Internal(format!("renderer panicked: {}", e)))?;

    let record = GridRecord {
        id: coord.grid_id(),
        map_id,
        coord,
        next_update: unix_now() - NEXT_UPDATE_BACKDATE_SECS,
        tenant_id: tenant_id.to_string(),
    };
    let rel_path = layout::tile_rel_path(tenant_id, map_id, 0, coord);
    Ok(RenderedGrid::new(record, rel_path, image, live_buffers))
}

#[derive(Debug, Default)]
struct ConsumerReport {
    grids_imported: usize,
    created_grid_ids: Vec<String>,
    imported_coords: Vec<Coord>,
    error: Option<ImportError>,
}

/// Single consumer: disk writes, batch accumulation, flushes.
#[allow(clippy::too_many_arguments)]
async fn consume<S: MapStore>(
    mut rx: mpsc::Receiver<RenderedGrid>,
    store: Arc<S>,
    quota: StorageQuotaService<S>,
    storage_root: PathBuf,
    tenant_id: String,
    batch_size: usize,
    tracker: Arc<ProgressTracker>,
    cancel: CancellationToken,
) -> ConsumerReport {
    let mut report = ConsumerReport::default();
    let mut batch = BatchContext::new(batch_size);
    let mut error: Option<ImportError> = None;

    loop {
        if cancel.is_cancelled() {
            error = Some(ImportError::Canceled);
            break;
        }
        let received = tokio::select! {
            r = rx.recv() => r,
            _ = cancel.cancelled() => {
                error = Some(ImportError::Canceled);
                break;
            }
        };
        let Some(rendered) = received else {
            // Channel closed: the producer is done.
            break;
        };

        match persist_rendered(&rendered, &mut batch, &storage_root, &tenant_id).await {
            Ok(()) => {
                report.grids_imported += 1;
                report.created_grid_ids.push(rendered.record.id.clone());
                report.imported_coords.push(rendered.record.coord);
                drop(rendered);
                tracker.advance(1);

                if batch.should_flush() {
                    if let Err(e) = flush_batch(&mut batch, &store, &quota, &tenant_id).await {
                        error = Some(e);
                        break;
                    }
                }
            }
            Err(e) => {
                drop(rendered);
                error = Some(e);
                break;
            }
        }
    }

    match error {
        None => {
            // Residuals after the channel closed.
            if batch.has_pending_items() {
                if let Err(e) = flush_batch(&mut batch, &store, &quota, &tenant_id).await {
                    report.error = Some(e);
                }
            }
        }
        Some(e) => {
            // Stop producers, drain pending buffers, flush nothing further.
            rx.close();
            while let Some(rendered) = rx.recv().await {
                drop(rendered);
            }
            report.error = Some(e);
        }
    }

    report
}

/// Steps 1-4 of the consumer contract for one rendered grid.
async fn persist_rendered(
    rendered: &RenderedGrid,
    batch: &mut BatchContext,
    storage_root: &Path,
    tenant_id: &str,
) -> Result<(), ImportError> {
    let abs_path = storage_root.join(&rendered.rel_path);
    if let Some(parent) = abs_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let png = encode_png(&rendered.image)?;
    tokio::fs::write(&abs_path, &png).await?;
    let file_size = png.len() as u64;

    let tile = TileRecord {
        map_id: rendered.record.map_id,
        coord: rendered.record.coord,
        zoom: 0,
        file_path: rendered.rel_path.clone(),
        cache: unix_now(),
        tenant_id: tenant_id.to_string(),
        file_size_bytes: file_size,
    };

    batch.add(rendered.record.clone(), tile, bytes_to_mb(file_size));
    Ok(())
}

/// One flush: grid rows, tile rows, then the quota delta. The three writes
/// are one logical transaction per tenant.
async fn flush_batch<S: MapStore>(
    batch: &mut BatchContext,
    store: &Arc<S>,
    quota: &StorageQuotaService<S>,
    tenant_id: &str,
) -> Result<(), ImportError> {
    let (grids, tiles, mb) = batch.extract_batch();
    debug!(
        grids = grids.len(),
        tiles = tiles.len(),
        mb = mb,
        "flushing batch"
    );
    store.insert_grids(grids).await?;
    store.insert_tiles(tiles).await?;
    quota.adjust(tenant_id, mb).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImportConfig;
    use crate::coord::GRID_AREA;
    use crate::hmap::TilesetRef;
    use crate::resource::fetcher::tests::StaticFetcher;
    use crate::store::MemoryMapStore;
    use tempfile::TempDir;

    fn blank_grid(x: i32, y: i32) -> HmapGridData {
        HmapGridData {
            coord: Coord::new(x, y),
            tilesets: vec![TilesetRef {
                resource_name: "gfx/tiles/grass".into(),
            }],
            tile_indices: vec![0; GRID_AREA],
            z_map: None,
        }
    }

    struct Fixture {
        store: Arc<MemoryMapStore>,
        importer: SegmentImporter<MemoryMapStore, StaticFetcher>,
        _temp: TempDir,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryMapStore::new());
        let resources = Arc::new(
            TileResourceService::new(
                temp.path().join("hmap-tile-cache"),
                None::<StaticFetcher>,
                64,
            )
            .unwrap(),
        );
        let config = Arc::new(ImportConfig {
            storage_root: temp.path().to_path_buf(),
            ..ImportConfig::default()
        });
        let importer = SegmentImporter {
            store: Arc::clone(&store),
            resources,
            quota: StorageQuotaService::new(Arc::clone(&store)),
            config,
            tenant_id: "t1".into(),
            tracker: Arc::new(ProgressTracker::new(None)),
            live_buffers: Arc::new(AtomicI64::new(0)),
            cancel: CancellationToken::new(),
        };
        Fixture {
            store,
            importer,
            _temp: temp,
        }
    }

    #[tokio::test]
    async fn test_create_new_imports_all_grids() {
        let f = fixture();
        let grids = vec![blank_grid(0, 0), blank_grid(1, 0)];

        let report = f.importer.run(1, &grids, ImportMode::CreateNew).await;

        assert!(report.error.is_none());
        assert!(report.is_new_map);
        assert_eq!(report.grids_imported, 2);
        assert_eq!(report.grids_skipped, 0);
        assert_eq!(f.store.grid_count(), 2);
        assert_eq!(f.store.tile_count(), 2);

        // Tile PNGs exist with sizes matching the rows.
        for tile in f.store.all_tiles() {
            let path = f.importer.config.storage_root.join(&tile.file_path);
            let meta = std::fs::metadata(&path).unwrap();
            assert_eq!(meta.len(), tile.file_size_bytes);
        }
    }

    #[tokio::test]
    async fn test_merge_reuses_map_and_skips_present() {
        let f = fixture();

        // First import creates the map and both grids.
        let first = f
            .importer
            .run(1, &[blank_grid(5, 7), blank_grid(6, 7)], ImportMode::Merge)
            .await;
        assert!(first.is_new_map);
        let map_id = first.map_id.unwrap();

        // Second import overlaps on "5_7".
        let second = f
            .importer
            .run(1, &[blank_grid(5, 7), blank_grid(7, 7)], ImportMode::Merge)
            .await;
        assert!(second.error.is_none());
        assert!(!second.is_new_map);
        assert_eq!(second.map_id, Some(map_id));
        assert_eq!(second.grids_imported, 1);
        assert_eq!(second.grids_skipped, 1);
        assert_eq!(second.created_grid_ids, vec!["7_7".to_string()]);

        // Merge is idempotent: no duplicate grid rows.
        assert_eq!(f.store.grid_count(), 3);
    }

    #[tokio::test]
    async fn test_quota_counter_matches_written_bytes() {
        let f = fixture();
        let report = f
            .importer
            .run(1, &[blank_grid(0, 0), blank_grid(1, 0)], ImportMode::CreateNew)
            .await;
        assert!(report.error.is_none());

        let expected_mb: f64 = f
            .store
            .all_tiles()
            .iter()
            .map(|t| bytes_to_mb(t.file_size_bytes))
            .sum();
        let quota = f.store.quota("t1").await.unwrap();
        assert!((quota.current_storage_mb - expected_mb).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_quota_exceeded_aborts_segment() {
        let f = fixture();
        f.store.seed_quota("t1", 0.0000001);

        let report = f
            .importer
            .run(1, &[blank_grid(0, 0)], ImportMode::CreateNew)
            .await;

        assert!(matches!(
            report.error,
            Some(ImportError::QuotaExceeded { .. })
        ));
        // No buffers leaked on the failure path.
        assert_eq!(f.importer.live_buffers.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_releases_all_buffers() {
        let f = fixture();
        f.importer.cancel.cancel();

        let grids: Vec<HmapGridData> = (0..50).map(|i| blank_grid(i, 0)).collect();
        let report = f.importer.run(1, &grids, ImportMode::CreateNew).await;

        assert!(matches!(report.error, Some(ImportError::Canceled)));
        assert_eq!(f.importer.live_buffers.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_next_update_is_backdated() {
        let f = fixture();
        let before = unix_now();
        f.importer
            .run(1, &[blank_grid(0, 0)], ImportMode::CreateNew)
            .await;

        let grid = &f.store.all_grids()[0];
        assert!(grid.next_update <= before - NEXT_UPDATE_BACKDATE_SECS + 1);
        assert!(grid.next_update > before - NEXT_UPDATE_BACKDATE_SECS - 60);
    }

    #[tokio::test]
    async fn test_memory_cache_cleared_after_segment() {
        let f = fixture();
        f.importer
            .run(1, &[blank_grid(0, 0)], ImportMode::CreateNew)
            .await;
        assert_eq!(f.importer.resources.memory_entry_count(), 0);
    }
}
