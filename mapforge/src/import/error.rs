//! Error taxonomy for the import pipeline.

use crate::hmap::ParseError;
use crate::store::StoreError;
use thiserror::Error;

/// Failures that abort an import.
///
/// Recoverable conditions never reach this type: unavailable tileset
/// resources degrade to missing cells, and marker save failures are
/// counted as skips. The `Display` text is what callers surface as the
/// abstract `error_message` of a failed import.
#[derive(Debug, Error)]
pub enum ImportError {
    /// Corrupt or truncated input. No partial state is written.
    #[error("{0}")]
    Parse(#[from] ParseError),

    /// Directory create or PNG write failed. The caller decides whether to
    /// invoke cleanup with the returned id lists.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Batch flush or tile upsert failed.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// The tenant's storage bound was hit mid-import.
    #[error("storage quota exceeded for tenant {tenant_id} ({quota_mb:.0} MB)")]
    QuotaExceeded { tenant_id: String, quota_mb: f64 },

    /// The cancellation signal was observed before completion.
    #[error("Canceled")]
    Canceled,

    /// Task join failure or closed channel; indicates a pipeline bug.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ImportError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::QuotaExceeded {
                tenant_id, quota_mb, ..
            } => ImportError::QuotaExceeded { tenant_id, quota_mb },
            StoreError::Backend(msg) => ImportError::Persistence(msg),
        }
    }
}

impl From<image::ImageError> for ImportError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(io) => ImportError::Io(io),
            other => ImportError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                other,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canceled_display_is_abstract() {
        assert_eq!(ImportError::Canceled.to_string(), "Canceled");
    }

    #[test]
    fn test_store_error_conversion() {
        let err: ImportError = StoreError::Backend("db down".into()).into();
        assert!(matches!(err, ImportError::Persistence(_)));

        let err: ImportError = StoreError::QuotaExceeded {
            tenant_id: "t1".into(),
            current_mb: 9.0,
            requested_mb: 2.0,
            quota_mb: 10.0,
        }
        .into();
        assert!(matches!(err, ImportError::QuotaExceeded { .. }));
    }

    #[test]
    fn test_parse_error_display_carries_offset() {
        let err: ImportError = ParseError {
            offset: 17,
            reason: "truncated container while reading chunk tag".into(),
        }
        .into();
        assert!(err.to_string().contains("offset 17"));
    }
}
