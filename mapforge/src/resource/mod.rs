//! Tileset resource resolution and caching.
//!
//! Terrain cells reference tileset textures by external resource name
//! (e.g. `"gfx/tiles/grass"`). [`TileResourceService`] resolves names to
//! owned RGBA textures through a two-tier cache: a persistent on-disk PNG
//! cache and a count-bounded in-memory LRU that is cleared between
//! segments. Misses fall through to a [`ResourceFetcher`].

pub mod disk;
pub mod fetcher;
pub mod service;

pub use disk::ResourceDiskCache;
pub use fetcher::{FetchError, HttpResourceFetcher, ResourceFetcher};
pub use service::TileResourceService;
