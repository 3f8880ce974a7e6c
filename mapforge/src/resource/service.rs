//! Two-tier tileset resource service.

use super::disk::ResourceDiskCache;
use super::fetcher::{FetchError, ResourceFetcher};
use image::RgbaImage;
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::{debug, warn};

/// Decoded texture plus LRU bookkeeping.
struct MemoryEntry {
    image: Arc<RgbaImage>,
    last_accessed: Instant,
}

/// Resolves tileset resource names to owned RGBA textures.
///
/// Lookup order: in-memory LRU, on-disk cache, network fetch. Every
/// handout is a fresh pixel buffer cloned from the immutable cached
/// decode, so concurrent renderer tasks never share mutable image state.
///
/// The first network failure of an import is retained for observability;
/// later failures are logged and swallowed so a flaky resource server
/// degrades tiles to the missing color instead of aborting the import.
pub struct TileResourceService<F: ResourceFetcher> {
    fetcher: Option<F>,
    disk: ResourceDiskCache,
    memory: Mutex<HashMap<String, MemoryEntry>>,
    max_memory_entries: usize,
    first_network_error: Mutex<Option<FetchError>>,
}

impl<F: ResourceFetcher> TileResourceService<F> {
    /// Create a service with a disk cache at `cache_dir`.
    ///
    /// `fetcher` is `None` when no resource endpoint is configured; every
    /// cache miss is then an unresolved tileset.
    pub fn new(
        cache_dir: PathBuf,
        fetcher: Option<F>,
        max_memory_entries: usize,
    ) -> io::Result<Self> {
        Ok(Self {
            fetcher,
            disk: ResourceDiskCache::new(cache_dir)?,
            memory: Mutex::new(HashMap::new()),
            max_memory_entries,
            first_network_error: Mutex::new(None),
        })
    }

    /// Resolve a resource name to an owned texture.
    ///
    /// Returns `None` when the resource is unavailable from all tiers; the
    /// renderer treats those tilesets as missing.
    pub async fn get_tile_image(&self, resource_name: &str) -> Option<RgbaImage> {
        if let Some(image) = self.memory_get(resource_name) {
            return Some((*image).clone());
        }

        if let Some(bytes) = self.disk.get(resource_name) {
            match image::load_from_memory(&bytes) {
                Ok(decoded) => {
                    let image = Arc::new(decoded.to_rgba8());
                    self.memory_put(resource_name, Arc::clone(&image));
                    return Some((*image).clone());
                }
                Err(e) => {
                    warn!(
                        resource = resource_name,
                        error = %e,
                        "corrupt disk cache entry, refetching"
                    );
                }
            }
        }

        let fetcher = self.fetcher.as_ref()?;
        let bytes = match fetcher.fetch(resource_name).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.record_network_error(e);
                return None;
            }
        };

        if let Err(e) = self.disk.put(resource_name, &bytes) {
            warn!(resource = resource_name, error = %e, "disk cache write failed");
        }

        match image::load_from_memory(&bytes) {
            Ok(decoded) => {
                let image = Arc::new(decoded.to_rgba8());
                self.memory_put(resource_name, Arc::clone(&image));
                Some((*image).clone())
            }
            Err(e) => {
                self.record_network_error(FetchError::InvalidImage {
                    resource: resource_name.to_string(),
                    message: e.to_string(),
                });
                None
            }
        }
    }

    /// Bulk-warm the caches, reporting `(done, total, name)` per resource.
    pub async fn prefetch(
        &self,
        resource_names: &[String],
        mut progress: impl FnMut(usize, usize, &str),
    ) {
        let total = resource_names.len();
        for (i, name) in resource_names.iter().enumerate() {
            let _ = self.get_tile_image(name).await;
            progress(i + 1, total, name);
        }
        debug!(total = total, "resource prefetch complete");
    }

    /// Drop all in-memory textures. Called between segments so one large
    /// segment cannot pin another segment's textures.
    pub fn clear_memory_cache(&self) {
        self.memory.lock().unwrap().clear();
    }

    /// The first network or decode failure seen this import, if any.
    pub fn first_network_error(&self) -> Option<FetchError> {
        self.first_network_error.lock().unwrap().clone()
    }

    /// Forget retained failures. Called at the start of each import so the
    /// retained error is always scoped to one import.
    pub fn reset_network_errors(&self) {
        self.first_network_error.lock().unwrap().take();
    }

    /// Number of textures currently held in memory.
    pub fn memory_entry_count(&self) -> usize {
        self.memory.lock().unwrap().len()
    }

    fn memory_get(&self, resource_name: &str) -> Option<Arc<RgbaImage>> {
        let mut memory = self.memory.lock().unwrap();
        let entry = memory.get_mut(resource_name)?;
        entry.last_accessed = Instant::now();
        Some(Arc::clone(&entry.image))
    }

    fn memory_put(&self, resource_name: &str, image: Arc<RgbaImage>) {
        let mut memory = self.memory.lock().unwrap();
        if memory.len() >= self.max_memory_entries && !memory.contains_key(resource_name) {
            // Evict the least recently used entry to stay within bounds.
            if let Some(oldest) = memory
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| k.clone())
            {
                memory.remove(&oldest);
            }
        }
        memory.insert(
            resource_name.to_string(),
            MemoryEntry {
                image,
                last_accessed: Instant::now(),
            },
        );
    }

    fn record_network_error(&self, error: FetchError) {
        let mut first = self.first_network_error.lock().unwrap();
        if first.is_none() {
            warn!(error = %error, "tileset resource unavailable");
            *first = Some(error);
        } else {
            warn!(error = %error, "tileset resource unavailable (repeat)");
        }
    }
}
