//! Mutable accumulator between the consumer and the persistence layer.

use crate::store::{GridRecord, TileRecord};

/// Pending rows and storage megabytes awaiting one flush.
///
/// Owned by the single consumer task of one segment; never shared, never
/// locked. [`should_flush`](Self::should_flush) trips when either pending
/// list reaches the batch size, and [`extract_batch`](Self::extract_batch)
/// drains all three accumulators at once so a flush always writes matching
/// grid rows, tile rows, and quota delta.
#[derive(Debug)]
pub struct BatchContext {
    grids: Vec<GridRecord>,
    tiles: Vec<TileRecord>,
    pending_mb: f64,
    batch_size: usize,
}

impl BatchContext {
    pub fn new(batch_size: usize) -> Self {
        Self {
            grids: Vec::new(),
            tiles: Vec::new(),
            pending_mb: 0.0,
            batch_size,
        }
    }

    /// Queue one imported grid: its row, its zoom-0 tile row, and the
    /// megabytes of the PNG just written.
    pub fn add(&mut self, grid: GridRecord, tile: TileRecord, mb: f64) {
        self.grids.push(grid);
        self.tiles.push(tile);
        self.pending_mb += mb;
    }

    /// True when either pending list reached the batch size.
    pub fn should_flush(&self) -> bool {
        self.grids.len() >= self.batch_size || self.tiles.len() >= self.batch_size
    }

    /// True when anything is pending.
    pub fn has_pending_items(&self) -> bool {
        !self.grids.is_empty() || !self.tiles.is_empty() || self.pending_mb != 0.0
    }

    /// Return and reset all three accumulators.
    pub fn extract_batch(&mut self) -> (Vec<GridRecord>, Vec<TileRecord>, f64) {
        let grids = std::mem::take(&mut self.grids);
        let tiles = std::mem::take(&mut self.tiles);
        let mb = std::mem::replace(&mut self.pending_mb, 0.0);
        (grids, tiles, mb)
    }
}
