//! Half-resolution tile compositing.

use crate::coord::{Coord, GRID_DIM};
use crate::import::ImportError;
use crate::layout;
use crate::quota::StorageQuotaService;
use crate::render::encode_png;
use crate::store::{MapId, MapStore, TileRecord};
use crate::time::{bytes_to_mb, unix_now};
use image::RgbaImage;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

/// Edge length of a child quadrant in the composited tile.
const QUADRANT_DIM: u32 = GRID_DIM / 2;

/// Writes zoom-level tiles by compositing the four children below them.
///
/// The child tiles of `(x, y)` at zoom `k` are `(2x, 2y)`, `(2x+1, 2y)`,
/// `(2x, 2y+1)`, `(2x+1, 2y+1)` at zoom `k - 1`. Each child is box-filtered
/// 2:1 into its quadrant; missing children leave their quadrant
/// transparent. The tile row is upserted and the tenant's storage counter
/// settles the size delta against any previous version of the tile.
pub struct TileCompositor<S: MapStore> {
    store: Arc<S>,
    quota: StorageQuotaService<S>,
    storage_root: PathBuf,
}

impl<S: MapStore> TileCompositor<S> {
    pub fn new(store: Arc<S>, quota: StorageQuotaService<S>, storage_root: PathBuf) -> Self {
        Self {
            store,
            quota,
            storage_root,
        }
    }

    /// Recompute one zoom tile from its children.
    pub async fn update_zoom_level(
        &self,
        map_id: MapId,
        coord: Coord,
        zoom: u8,
        tenant_id: &str,
    ) -> Result<(), ImportError> {
        debug_assert!(zoom >= 1);

        let mut canvas = RgbaImage::new(GRID_DIM, GRID_DIM);
        for (quadrant, child) in child_coords(coord).into_iter().enumerate() {
            let child_path =
                layout::tile_path(&self.storage_root, tenant_id, map_id, zoom - 1, child);
            let bytes = match tokio::fs::read(&child_path).await {
                Ok(bytes) => bytes,
                // Missing child: the quadrant stays transparent.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let child_image = match image::load_from_memory(&bytes) {
                Ok(img) => img.to_rgba8(),
                Err(e) => {
                    warn!(
                        path = %child_path.display(),
                        error = %e,
                        "unreadable child tile, compositing as transparent"
                    );
                    continue;
                }
            };
            let qx = (quadrant as u32 % 2) * QUADRANT_DIM;
            let qy = (quadrant as u32 / 2) * QUADRANT_DIM;
            downsample_into(&child_image, &mut canvas, qx, qy);
        }

        let abs_path = layout::tile_path(&self.storage_root, tenant_id, map_id, zoom, coord);
        if let Some(parent) = abs_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let png = encode_png(&canvas)?;
        tokio::fs::write(&abs_path, &png).await?;
        let file_size = png.len() as u64;

        let previous = self.store.tile(map_id, zoom, coord).await?;
        let previous_bytes = previous.map(|t| t.file_size_bytes).unwrap_or(0);

        self.store
            .upsert_tile(TileRecord {
                map_id,
                coord,
                zoom,
                file_path: layout::tile_rel_path(tenant_id, map_id, zoom, coord),
                cache: unix_now(),
                tenant_id: tenant_id.to_string(),
                file_size_bytes: file_size,
            })
            .await?;

        let delta_mb = bytes_to_mb(file_size) - bytes_to_mb(previous_bytes);
        self.quota.adjust(tenant_id, delta_mb).await?;
        Ok(())
    }
}

/// The four zoom-(k-1) children of a zoom-k coordinate, in quadrant order
/// top-left, top-right, bottom-left, bottom-right.
fn child_coords(coord: Coord) -> [Coord; 4] {
    let (x, y) = (coord.x * 2, coord.y * 2);
    [
        Coord::new(x, y),
        Coord::new(x + 1, y),
        Coord::new(x, y + 1),
        Coord::new(x + 1, y + 1),
    ]
}

/// 2:1 box filter of a full tile into one quadrant of the canvas.
///
/// Integer channel averaging keeps the composite deterministic.
fn downsample_into(child: &RgbaImage, canvas: &mut RgbaImage, off_x: u32, off_y: u32) {
    let max_x = (child.width() / 2).min(QUADRANT_DIM);
    let max_y = (child.height() / 2).min(QUADRANT_DIM);
    for y in 0..max_y {
        for x in 0..max_x {
            let mut sum = [0u16; 4];
            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                let p = child.get_pixel(x * 2 + dx, y * 2 + dy);
                for c in 0..4 {
                    sum[c] += p[c] as u16;
                }
            }
            let avg = image::Rgba([
                (sum[0] / 4) as u8,
                (sum[1] / 4) as u8,
                (sum[2] / 4) as u8,
                (sum[3] / 4) as u8,
            ]);
            canvas.put_pixel(off_x + x, off_y + y, avg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryMapStore;
    use image::Rgba;
    use tempfile::TempDir;

    fn compositor(temp: &TempDir) -> (Arc<MemoryMapStore>, TileCompositor<MemoryMapStore>) {
        let store = Arc::new(MemoryMapStore::new());
        let quota = StorageQuotaService::new(Arc::clone(&store));
        let compositor = TileCompositor::new(Arc::clone(&store), quota, temp.path().to_path_buf());
        (store, compositor)
    }

    async fn write_child(temp: &TempDir, zoom: u8, coord: Coord, color: [u8; 4]) {
        let img = RgbaImage::from_pixel(GRID_DIM, GRID_DIM, Rgba(color));
        let path = layout::tile_path(temp.path(), "t1", 1, zoom, coord);
        tokio::fs::create_dir_all(path.parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(&path, encode_png(&img).unwrap())
            .await
            .unwrap();
    }

    #[test]
    fn test_child_coords() {
        assert_eq!(
            child_coords(Coord::new(0, 0)),
            [
                Coord::new(0, 0),
                Coord::new(1, 0),
                Coord::new(0, 1),
                Coord::new(1, 1),
            ]
        );
        assert_eq!(
            child_coords(Coord::new(-1, 2)),
            [
                Coord::new(-2, 4),
                Coord::new(-1, 4),
                Coord::new(-2, 5),
                Coord::new(-1, 5),
            ]
        );
    }

    #[tokio::test]
    async fn test_composite_all_children() {
        let temp = TempDir::new().unwrap();
        let (store, compositor) = compositor(&temp);

        write_child(&temp, 0, Coord::new(0, 0), [255, 0, 0, 255]).await;
        write_child(&temp, 0, Coord::new(1, 0), [0, 255, 0, 255]).await;
        write_child(&temp, 0, Coord::new(0, 1), [0, 0, 255, 255]).await;
        write_child(&temp, 0, Coord::new(1, 1), [255, 255, 0, 255]).await;

        compositor
            .update_zoom_level(1, Coord::new(0, 0), 1, "t1")
            .await
            .unwrap();

        let path = layout::tile_path(temp.path(), "t1", 1, 1, Coord::new(0, 0));
        let composed = image::open(&path).unwrap().to_rgba8();
        assert_eq!(composed.dimensions(), (GRID_DIM, GRID_DIM));
        // One solid quadrant per child.
        assert_eq!(*composed.get_pixel(10, 10), Rgba([255, 0, 0, 255]));
        assert_eq!(*composed.get_pixel(60, 10), Rgba([0, 255, 0, 255]));
        assert_eq!(*composed.get_pixel(10, 60), Rgba([0, 0, 255, 255]));
        assert_eq!(*composed.get_pixel(60, 60), Rgba([255, 255, 0, 255]));

        // Row upserted with the real file size.
        let row = store.tile(1, 1, Coord::new(0, 0)).await.unwrap().unwrap();
        assert_eq!(
            row.file_size_bytes,
            std::fs::metadata(&path).unwrap().len()
        );
        assert_eq!(row.zoom, 1);
    }

    #[tokio::test]
    async fn test_missing_children_transparent() {
        let temp = TempDir::new().unwrap();
        let (_store, compositor) = compositor(&temp);

        write_child(&temp, 0, Coord::new(0, 0), [255, 0, 0, 255]).await;

        compositor
            .update_zoom_level(1, Coord::new(0, 0), 1, "t1")
            .await
            .unwrap();

        let path = layout::tile_path(temp.path(), "t1", 1, 1, Coord::new(0, 0));
        let composed = image::open(&path).unwrap().to_rgba8();
        assert_eq!(*composed.get_pixel(10, 10), Rgba([255, 0, 0, 255]));
        // Quadrants of missing children have zero alpha.
        assert_eq!(composed.get_pixel(60, 10)[3], 0);
        assert_eq!(composed.get_pixel(60, 60)[3], 0);
    }

    #[tokio::test]
    async fn test_quota_settles_delta_on_rewrite() {
        let temp = TempDir::new().unwrap();
        let (store, compositor) = compositor(&temp);

        write_child(&temp, 0, Coord::new(0, 0), [255, 0, 0, 255]).await;
        compositor
            .update_zoom_level(1, Coord::new(0, 0), 1, "t1")
            .await
            .unwrap();
        let first = store.quota("t1").await.unwrap().current_storage_mb;
        assert!(first > 0.0);

        // Re-running the same composite writes the same bytes: no drift.
        compositor
            .update_zoom_level(1, Coord::new(0, 0), 1, "t1")
            .await
            .unwrap();
        let second = store.quota("t1").await.unwrap().current_storage_mb;
        assert!((second - first).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_downsample_averages_blocks() {
        let mut child = RgbaImage::new(2, 2);
        child.put_pixel(0, 0, Rgba([0, 0, 0, 255]));
        child.put_pixel(1, 0, Rgba([100, 0, 0, 255]));
        child.put_pixel(0, 1, Rgba([100, 0, 0, 255]));
        child.put_pixel(1, 1, Rgba([200, 0, 0, 255]));

        let mut canvas = RgbaImage::new(GRID_DIM, GRID_DIM);
        downsample_into(&child, &mut canvas, 0, 0);
        assert_eq!(*canvas.get_pixel(0, 0), Rgba([100, 0, 0, 255]));
    }
}
