//! MapForge - map import and tile rendering core for a multi-tenant map
//! hosting service.
//!
//! The library consumes binary `.hmap` world exports produced by a game
//! client, decomposes them into segments (connected components of the
//! explored world), renders each 100×100 terrain grid into a PNG tile, and
//! integrates the result into a per-tenant map stored as a pyramid of zoom
//! levels.
//!
//! # High-Level API
//!
//! The [`import`] module provides the entry point:
//!
//! ```ignore
//! use mapforge::config::ImportConfig;
//! use mapforge::import::{ImportMode, ImportService};
//! use mapforge::resource::{HttpResourceFetcher, TileResourceService};
//! use mapforge::store::{MemoryMapStore, MemoryMarkerStore};
//!
//! let config = ImportConfig::default();
//! let service = ImportService::new(store, markers, resources, config);
//! let result = service
//!     .import(file, "tenant-1", ImportMode::Merge, None, cancel)
//!     .await;
//! ```

pub mod cleanup;
pub mod config;
pub mod coord;
pub mod hmap;
pub mod import;
pub mod layout;
pub mod logging;
pub mod marker;
pub mod quota;
pub mod render;
pub mod resource;
pub mod store;
pub mod time;
pub mod zoom;

/// Version of the MapForge library and CLI.
///
/// Synchronized across all workspace members via `workspace.package`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
