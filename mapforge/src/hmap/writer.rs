//! Serializer for the `.hmap` tagged-chunk wire format.
//!
//! The inverse of [`super::reader`]: used by round-trip tests and by
//! fixture tooling. One `SEGM` chunk is emitted per segment, followed by
//! that segment's grids and markers in order.

use super::types::{HmapContainer, HmapGridData, HmapMarker};

/// Serialize a container back to wire bytes.
pub fn container_to_bytes(container: &HmapContainer) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"HMAP");
    out.push(container.version());

    for &segment in container.segment_ids() {
        write_chunk(&mut out, b"SEGM", &segment.to_le_bytes());
        for grid in container.grids_for_segment(segment) {
            write_chunk(&mut out, b"GRID", &grid_payload(grid));
        }
        for marker in container.markers_for_segment(segment) {
            write_chunk(&mut out, b"MARK", &marker_payload(marker));
        }
    }

    write_chunk(&mut out, b"END ", &[]);
    out
}

fn write_chunk(out: &mut Vec<u8>, tag: &[u8; 4], payload: &[u8]) {
    out.extend_from_slice(tag);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u16).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

fn grid_payload(grid: &HmapGridData) -> Vec<u8> {
    let mut p = Vec::new();
    p.extend_from_slice(&grid.coord.x.to_le_bytes());
    p.extend_from_slice(&grid.coord.y.to_le_bytes());
    p.push(grid.tilesets.len() as u8);
    for ts in &grid.tilesets {
        write_string(&mut p, &ts.resource_name);
    }
    p.extend_from_slice(&grid.tile_indices);
    match &grid.z_map {
        Some(z) => {
            p.push(1);
            for h in z {
                p.extend_from_slice(&h.to_bits().to_le_bytes());
            }
        }
        None => p.push(0),
    }
    p
}

fn marker_payload(marker: &HmapMarker) -> Vec<u8> {
    let mut p = Vec::new();
    match marker {
        HmapMarker::Custom {
            name,
            tile_x,
            tile_y,
        } => {
            p.push(0);
            write_string(&mut p, name);
            p.extend_from_slice(&tile_x.to_le_bytes());
            p.extend_from_slice(&tile_y.to_le_bytes());
        }
        HmapMarker::Tileset {
            name,
            tile_x,
            tile_y,
            resource_name,
        } => {
            p.push(1);
            write_string(&mut p, name);
            p.extend_from_slice(&tile_x.to_le_bytes());
            p.extend_from_slice(&tile_y.to_le_bytes());
            write_string(&mut p, resource_name);
        }
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::{Coord, GRID_AREA};
    use crate::hmap::TilesetRef;

    #[test]
    fn test_empty_container_is_header_plus_end() {
        let bytes = container_to_bytes(&HmapContainer::new(2));
        // magic(4) + version(1) + END tag(4) + len(4)
        assert_eq!(bytes.len(), 13);
        assert_eq!(&bytes[0..4], b"HMAP");
        assert_eq!(bytes[4], 2);
        assert_eq!(&bytes[5..9], b"END ");
    }

    #[test]
    fn test_grid_payload_length() {
        let grid = HmapGridData {
            coord: Coord::new(-5, 3),
            tilesets: vec![TilesetRef {
                resource_name: "gfx/tiles/rock".into(),
            }],
            tile_indices: vec![0; GRID_AREA],
            z_map: None,
        };
        let p = grid_payload(&grid);
        // x(4) + y(4) + count(1) + strlen(2) + "gfx/tiles/rock"(14) + cells + flag(1)
        assert_eq!(p.len(), 4 + 4 + 1 + 2 + 14 + GRID_AREA + 1);
    }

    #[test]
    fn test_zmap_doubles_with_heights() {
        let mut grid = HmapGridData {
            coord: Coord::new(0, 0),
            tilesets: vec![],
            tile_indices: vec![0; GRID_AREA],
            z_map: None,
        };
        let without = grid_payload(&grid).len();
        grid.z_map = Some(vec![0.0; GRID_AREA]);
        let with = grid_payload(&grid).len();
        assert_eq!(with - without, 4 * GRID_AREA);
    }
}
