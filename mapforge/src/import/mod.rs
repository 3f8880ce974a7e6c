//! The import pipeline: segment selection, parallel rendering, batched
//! persistence, and the five-phase orchestrator.

mod batch;
mod error;
mod orchestrator;
mod progress;
mod segment;

pub use batch::BatchContext;
pub use error::ImportError;
pub use orchestrator::ImportService;
pub use progress::{ImportPhase, ProgressCallback, ProgressReport, ProgressTracker};

use crate::store::MapId;
use std::time::Duration;

/// How a segment is placed into the tenant's existing maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Always allocate a fresh map per segment.
    CreateNew,
    /// Reuse the map of any already-imported grid of the segment; only
    /// grids not yet present are imported.
    Merge,
}

/// Outcome of one import call.
///
/// Counters reflect work completed before any failure; the id lists let
/// the caller drive [`crate::cleanup::CleanupService`] after a failed
/// import.
#[derive(Debug, Clone, Default)]
pub struct ImportResult {
    pub success: bool,
    /// Abstract cause on failure; never a backtrace.
    pub error_message: Option<String>,
    /// Every map touched by this import, new or reused.
    pub affected_map_ids: Vec<MapId>,
    /// Maps allocated by this import.
    pub created_map_ids: Vec<MapId>,
    /// Grid rows created by this import.
    pub created_grid_ids: Vec<String>,
    pub maps_created: usize,
    pub grids_imported: usize,
    pub grids_skipped: usize,
    /// Equals `grids_imported`: every imported grid renders one base tile.
    pub tiles_rendered: usize,
    pub markers_imported: usize,
    pub markers_skipped: usize,
    pub duration: Duration,
}
