//! Network fetch abstraction for tileset resources.

use bytes::Bytes;
use std::future::Future;
use thiserror::Error;

/// Failure to obtain a tileset resource.
///
/// Cloneable so the first occurrence can be retained on the service for
/// observability while the original propagates to logging.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    /// HTTP transport or status failure.
    #[error("HTTP error fetching {resource}: {message}")]
    Http { resource: String, message: String },

    /// The fetched payload was not a decodable image.
    #[error("invalid image data for {resource}: {message}")]
    InvalidImage { resource: String, message: String },
}

/// Trait for fetching tileset resources by name.
///
/// The future is `Send` so fetches can run from spawned renderer tasks.
/// Implementations must be safe for concurrent calls.
pub trait ResourceFetcher: Send + Sync {
    /// Fetch the encoded image bytes for a resource name.
    fn fetch(&self, resource_name: &str)
        -> impl Future<Output = Result<Bytes, FetchError>> + Send;
}

/// HTTP fetcher resolving resource names against a base URL.
///
/// `"gfx/tiles/grass"` resolves to `{base_url}/gfx/tiles/grass.png`.
#[derive(Clone)]
pub struct HttpResourceFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpResourceFetcher {
    /// Create a fetcher for the given base URL.
    pub fn new(base_url: impl Into<String>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent(concat!("mapforge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Http {
                resource: String::new(),
                message: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn resource_url(&self, resource_name: &str) -> String {
        format!(
            "{}/{}.png",
            self.base_url.trim_end_matches('/'),
            resource_name
        )
    }
}

impl ResourceFetcher for HttpResourceFetcher {
    async fn fetch(&self, resource_name: &str) -> Result<Bytes, FetchError> {
        let url = self.resource_url(resource_name);

        let response = self.client.get(&url).send().await.map_err(|e| {
            FetchError::Http {
                resource: resource_name.to_string(),
                message: format!("request failed: {}", e),
            }
        })?;

        if !response.status().is_success() {
            return Err(FetchError::Http {
                resource: resource_name.to_string(),
                message: format!("HTTP {} from {}", response.status(), url),
            });
        }

        response.bytes().await.map_err(|e| FetchError::Http {
            resource: resource_name.to_string(),
            message: format!("failed to read response: {}", e),
        })
    }
}
