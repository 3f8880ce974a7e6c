//! Phased progress tracking for imports.
//!
//! An import moves through five fixed phases whose weights sum to 100%.
//! Reports are throttled to one per 100 ms, except for the first and last
//! item of a phase, forced reports, and jumps of at least 1% of the phase.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Minimum interval between throttled reports.
const REPORT_INTERVAL: Duration = Duration::from_millis(100);

/// The five import phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportPhase {
    Parse,
    Prefetch,
    Import,
    Zoom,
    Markers,
}

impl ImportPhase {
    /// Share of overall progress, summing to 100 across all phases.
    pub fn weight(&self) -> f64 {
        match self {
            Self::Parse => 2.0,
            Self::Prefetch => 18.0,
            Self::Import => 60.0,
            Self::Zoom => 15.0,
            Self::Markers => 5.0,
        }
    }

    /// 1-based phase number.
    pub fn number(&self) -> usize {
        match self {
            Self::Parse => 1,
            Self::Prefetch => 2,
            Self::Import => 3,
            Self::Zoom => 4,
            Self::Markers => 5,
        }
    }

    /// Sum of the weights of all earlier phases.
    fn completed_weight(&self) -> f64 {
        match self {
            Self::Parse => 0.0,
            Self::Prefetch => 2.0,
            Self::Import => 20.0,
            Self::Zoom => 80.0,
            Self::Markers => 95.0,
        }
    }

    /// Human-readable phase name.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Parse => "Parsing container",
            Self::Prefetch => "Prefetching resources",
            Self::Import => "Importing grids",
            Self::Zoom => "Building zoom pyramid",
            Self::Markers => "Importing markers",
        }
    }
}

/// One progress update delivered to the sink.
#[derive(Debug, Clone)]
pub struct ProgressReport {
    pub phase: ImportPhase,
    pub phase_number: usize,
    pub current_item: usize,
    pub total_items: usize,
    /// 0.0 to 100.0 across all phases.
    pub overall_percent: f64,
    /// Wall-clock seconds since the import started.
    pub elapsed_seconds: f64,
    /// Items of the current phase per second.
    pub items_per_second: f64,
}

/// Progress sink callback. Must be `Send + Sync`: the consumer task of the
/// pipeline reports from a spawned task.
pub type ProgressCallback = Arc<dyn Fn(ProgressReport) + Send + Sync>;

struct TrackerState {
    phase: ImportPhase,
    total_items: usize,
    current_item: usize,
    phase_started: Instant,
    last_report: Option<Instant>,
    last_reported_item: usize,
}

/// Thread-safe tracker shared across pipeline tasks.
pub struct ProgressTracker {
    callback: Option<ProgressCallback>,
    started: Instant,
    state: Mutex<TrackerState>,
}

impl ProgressTracker {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        let now = Instant::now();
        Self {
            callback,
            started: now,
            state: Mutex::new(TrackerState {
                phase: ImportPhase::Parse,
                total_items: 0,
                current_item: 0,
                phase_started: now,
                last_report: None,
                last_reported_item: 0,
            }),
        }
    }

    /// Enter a phase with a known item count. Emits an initial report.
    pub fn begin_phase(&self, phase: ImportPhase, total_items: usize) {
        {
            let mut state = self.state.lock().unwrap();
            state.phase = phase;
            state.total_items = total_items;
            state.current_item = 0;
            state.phase_started = Instant::now();
            state.last_report = None;
            state.last_reported_item = 0;
        }
        self.report(true);
    }

    /// Record `n` completed items of the current phase.
    pub fn advance(&self, n: usize) {
        {
            let mut state = self.state.lock().unwrap();
            state.current_item += n;
        }
        self.report(false);
    }

    /// Emit a report regardless of throttling.
    pub fn force_report(&self) {
        self.report(true);
    }

    fn report(&self, force: bool) {
        let Some(callback) = &self.callback else {
            return;
        };

        let report = {
            let mut state = self.state.lock().unwrap();
            let now = Instant::now();

            let first = state.current_item == 1 && state.last_reported_item == 0;
            let last = state.total_items > 0 && state.current_item >= state.total_items;
            let interval_elapsed = state
                .last_report
                .map_or(true, |t| now.duration_since(t) >= REPORT_INTERVAL);
            let percent_step = (state.total_items / 100).max(1);
            let stepped =
                state.current_item.saturating_sub(state.last_reported_item) >= percent_step;

            if !(force || first || last || interval_elapsed || stepped) {
                return;
            }

            state.last_report = Some(now);
            state.last_reported_item = state.current_item;

            let fraction = if state.total_items == 0 {
                1.0
            } else {
                state.current_item as f64 / state.total_items as f64
            };
            let phase_elapsed = state.phase_started.elapsed().as_secs_f64();
            ProgressReport {
                phase: state.phase,
                phase_number: state.phase.number(),
                current_item: state.current_item,
                total_items: state.total_items,
                overall_percent: state.phase.completed_weight() + state.phase.weight() * fraction,
                elapsed_seconds: self.started.elapsed().as_secs_f64(),
                items_per_second: if phase_elapsed > 0.0 {
                    state.current_item as f64 / phase_elapsed
                } else {
                    0.0
                },
            }
        };

        callback(report);
    }
}
