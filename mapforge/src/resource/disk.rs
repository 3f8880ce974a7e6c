//! Persistent on-disk cache of fetched tileset resources.

use bytes::Bytes;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Disk cache keyed by resource name.
///
/// Resource names are slash-separated paths (`"gfx/tiles/grass"`); each
/// component is sanitized and the encoded PNG is stored at
/// `{cache_dir}/{components...}.png`. The layout is internal to the cache.
pub struct ResourceDiskCache {
    cache_dir: PathBuf,
}

impl ResourceDiskCache {
    /// Open (and create if absent) a disk cache rooted at `cache_dir`.
    pub fn new(cache_dir: PathBuf) -> io::Result<Self> {
        if !cache_dir.exists() {
            fs::create_dir_all(&cache_dir)?;
        }
        Ok(Self { cache_dir })
    }

    /// Read cached bytes for a resource name, if present.
    pub fn get(&self, resource_name: &str) -> Option<Bytes> {
        let path = self.entry_path(resource_name);
        match fs::read(&path) {
            Ok(data) => Some(Bytes::from(data)),
            Err(_) => None,
        }
    }

    /// Store fetched bytes for a resource name.
    pub fn put(&self, resource_name: &str, data: &[u8]) -> io::Result<()> {
        let path = self.entry_path(resource_name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, data)
    }

    /// Whether an entry exists for a resource name.
    pub fn contains(&self, resource_name: &str) -> bool {
        self.entry_path(resource_name).exists()
    }

    /// The cache directory root.
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Map a resource name to its cache file path.
    ///
    /// Path traversal in resource names is neutralized by sanitizing each
    /// component down to `[A-Za-z0-9._-]` and dropping empties and dots.
    fn entry_path(&self, resource_name: &str) -> PathBuf {
        let mut path = self.cache_dir.clone();
        for component in resource_name.split('/') {
            let clean: String = component
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                        c
                    } else {
                        '_'
                    }
                })
                .collect();
            if clean.is_empty() || clean.chars().all(|c| c == '.') {
                continue;
            }
            path.push(clean);
        }
        path.set_extension("png");
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_cache() -> (ResourceDiskCache, TempDir) {
        let temp = TempDir::new().unwrap();
        let cache = ResourceDiskCache::new(temp.path().to_path_buf()).unwrap();
        (cache, temp)
    }

    #[test]
    fn test_put_and_get() {
        let (cache, _temp) = create_cache();
        cache.put("gfx/tiles/grass", b"imagedata").unwrap();
        assert_eq!(
            cache.get("gfx/tiles/grass"),
            Some(Bytes::from_static(b"imagedata"))
        );
    }

    #[test]
    fn test_miss_returns_none() {
        let (cache, _temp) = create_cache();
        assert_eq!(cache.get("gfx/tiles/rock"), None);
        assert!(!cache.contains("gfx/tiles/rock"));
    }

    #[test]
    fn test_persists_across_instances() {
        let temp = TempDir::new().unwrap();
        {
            let cache = ResourceDiskCache::new(temp.path().to_path_buf()).unwrap();
            cache.put("gfx/tiles/dirt", b"d").unwrap();
        }
        let cache = ResourceDiskCache::new(temp.path().to_path_buf()).unwrap();
        assert_eq!(cache.get("gfx/tiles/dirt"), Some(Bytes::from_static(b"d")));
    }

    #[test]
    fn test_entry_path_nests_components() {
        let (cache, temp) = create_cache();
        cache.put("gfx/tiles/grass", b"x").unwrap();
        assert!(temp.path().join("gfx/tiles/grass.png").exists());
    }

    #[test]
    fn test_entry_path_neutralizes_traversal() {
        let (cache, temp) = create_cache();
        let path = cache.entry_path("../../etc/passwd");
        assert!(path.starts_with(temp.path()));
        assert!(!path.to_string_lossy().contains(".."));
    }

    #[test]
    fn test_distinct_names_distinct_entries() {
        let (cache, _temp) = create_cache();
        cache.put("gfx/tiles/a", b"1").unwrap();
        cache.put("gfx/tiles/b", b"2").unwrap();
        assert_eq!(cache.get("gfx/tiles/a"), Some(Bytes::from_static(b"1")));
        assert_eq!(cache.get("gfx/tiles/b"), Some(Bytes::from_static(b"2")));
    }
}
