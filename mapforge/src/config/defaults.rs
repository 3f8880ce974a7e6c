//! Default values and constants for import configuration.

/// Concurrent renderer tasks per segment.
pub const DEFAULT_RENDER_WORKERS: usize = 4;

/// Bounded channel capacity between renderers and the consumer.
///
/// The bound is the backpressure: renderers block when the consumer's
/// disk and persistence writes fall behind.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 20;

/// Rows accumulated before a batch flush.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Largest segments imported per call; the rest are logged and dropped.
/// Caps worst-case work per import.
pub const DEFAULT_MAX_SEGMENTS: usize = 3;

/// Textures held in the in-memory resource cache.
pub const DEFAULT_MEMORY_CACHE_ENTRIES: usize = 256;

/// Storage root when none is configured.
pub const DEFAULT_STORAGE_ROOT: &str = "data";

/// Render worker bounds; values outside are clamped with a warning.
pub const MIN_RENDER_WORKERS: usize = 1;
pub const MAX_RENDER_WORKERS: usize = 64;

/// Clamps the render worker count to its valid range, warning if clamped.
pub fn clamp_render_workers(value: usize) -> usize {
    if value < MIN_RENDER_WORKERS {
        tracing::warn!(
            requested = value,
            min = MIN_RENDER_WORKERS,
            "render_workers below minimum, clamping"
        );
        MIN_RENDER_WORKERS
    } else if value > MAX_RENDER_WORKERS {
        tracing::warn!(
            requested = value,
            max = MAX_RENDER_WORKERS,
            "render_workers above maximum, clamping"
        );
        MAX_RENDER_WORKERS
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_render_workers() {
        assert_eq!(clamp_render_workers(0), MIN_RENDER_WORKERS);
        assert_eq!(clamp_render_workers(4), 4);
        assert_eq!(clamp_render_workers(1000), MAX_RENDER_WORKERS);
    }
}
