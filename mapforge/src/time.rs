//! Time helpers shared across the import core.

use chrono::Utc;

/// Current wall-clock time as Unix seconds.
///
/// Tile cache timestamps and grid refresh markers are persisted in this
/// representation.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Convert a byte count to storage-accounting megabytes.
///
/// Tenant quotas are tracked in binary megabytes of persisted PNG bytes.
pub fn bytes_to_mb(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_now_is_recent() {
        let now = unix_now();
        // Sometime after 2024 and before 2100.
        assert!(now > 1_700_000_000);
        assert!(now < 4_100_000_000);
    }

    #[test]
    fn bytes_to_mb_exact() {
        assert_eq!(bytes_to_mb(0), 0.0);
        assert_eq!(bytes_to_mb(1024 * 1024), 1.0);
        assert_eq!(bytes_to_mb(512 * 1024), 0.5);
    }
}
