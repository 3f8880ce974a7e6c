//! The `.hmap` binary world-export container.
//!
//! A container holds the explored world as a set of disjoint *segments*
//! (connected components), each carrying an ordered list of 100×100 terrain
//! grids and map markers. [`reader`] parses the tagged-chunk wire format,
//! [`writer`] serializes a container back to bytes for fixtures and
//! round-trip tooling.

mod reader;
mod types;
mod writer;

pub use reader::{HmapReader, ParseError};
pub use types::{
    HmapContainer, HmapGridData, HmapMarker, SegmentId, TilesetRef, CUSTOM_MARKER_ICON,
};
pub use writer::container_to_bytes;
