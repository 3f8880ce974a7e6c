//! Parser for the `.hmap` tagged-chunk wire format.
//!
//! Layout: 4-byte magic `HMAP`, one version byte, then a sequence of chunks
//! terminated by an `END ` chunk. Each chunk is a 4-byte ASCII tag, a
//! u32-LE payload length, and the payload. `SEGM` opens a segment scope
//! (re-opening an id appends to it); `GRID` and `MARK` chunks belong to the
//! open scope. All integers are little-endian.

use super::types::{HmapContainer, HmapGridData, HmapMarker, SegmentId, TilesetRef};
use crate::coord::{Coord, GRID_AREA};
use std::io::Read;
use thiserror::Error;

const MAGIC: &[u8; 4] = b"HMAP";

const TAG_SEGMENT: &[u8; 4] = b"SEGM";
const TAG_GRID: &[u8; 4] = b"GRID";
const TAG_MARKER: &[u8; 4] = b"MARK";
const TAG_END: &[u8; 4] = b"END ";

/// Parse failure with the byte offset where it was detected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("hmap parse error at offset {offset}: {reason}")]
pub struct ParseError {
    pub offset: usize,
    pub reason: String,
}

impl ParseError {
    fn new(offset: usize, reason: impl Into<String>) -> Self {
        Self {
            offset,
            reason: reason.into(),
        }
    }
}

/// Reader for `.hmap` containers.
///
/// The reader is a trusted producer for the import pipeline: it guarantees
/// stable segment ordering (first occurrence) and validated cell array
/// lengths, and nothing beyond the invariants it checks here.
pub struct HmapReader;

impl HmapReader {
    /// Parse a container from a byte stream.
    ///
    /// The stream is read to end before parsing; containers are bounded by
    /// what a game client exports in one session.
    pub fn parse<R: Read>(mut input: R) -> Result<HmapContainer, ParseError> {
        let mut buf = Vec::new();
        input
            .read_to_end(&mut buf)
            .map_err(|e| ParseError::new(0, format!("read failed: {}", e)))?;
        Self::parse_bytes(&buf)
    }

    /// Parse a container from a complete in-memory byte buffer.
    pub fn parse_bytes(buf: &[u8]) -> Result<HmapContainer, ParseError> {
        let mut cur = Cursor::new(buf);

        let magic = cur.take(4, "magic")?;
        if magic != MAGIC {
            return Err(ParseError::new(0, "bad magic, not an .hmap container"));
        }
        let version = cur.u8("version")?;
        let mut container = HmapContainer::new(version);

        let mut open_segment: Option<SegmentId> = None;
        loop {
            let chunk_offset = cur.pos;
            let tag: [u8; 4] = cur
                .take(4, "chunk tag")?
                .try_into()
                .expect("take(4) returns 4 bytes");
            let len = cur.u32("chunk length")? as usize;
            let end = cur.pos.checked_add(len).filter(|&e| e <= buf.len()).ok_or_else(|| {
                ParseError::new(chunk_offset, "chunk length exceeds container size")
            })?;

            match &tag {
                t if t == TAG_SEGMENT => {
                    let id = cur.u64("segment id")?;
                    container.open_segment(id);
                    open_segment = Some(id);
                }
                t if t == TAG_GRID => {
                    let segment = open_segment.ok_or_else(|| {
                        ParseError::new(chunk_offset, "grid chunk before any segment chunk")
                    })?;
                    let grid = Self::parse_grid(&mut cur)?;
                    container.push_grid(segment, grid);
                }
                t if t == TAG_MARKER => {
                    let segment = open_segment.ok_or_else(|| {
                        ParseError::new(chunk_offset, "marker chunk before any segment chunk")
                    })?;
                    let marker = Self::parse_marker(&mut cur)?;
                    container.push_marker(segment, marker);
                }
                t if t == TAG_END => {
                    return Ok(container);
                }
                t => {
                    return Err(ParseError::new(
                        chunk_offset,
                        format!("unknown chunk tag {:?}", String::from_utf8_lossy(t)),
                    ));
                }
            }

            if cur.pos != end {
                return Err(ParseError::new(
                    cur.pos,
                    format!(
                        "chunk payload length mismatch (declared {}, consumed {})",
                        len,
                        cur.pos - chunk_offset - 8
                    ),
                ));
            }
        }
    }

    fn parse_grid(cur: &mut Cursor<'_>) -> Result<HmapGridData, ParseError> {
        let tile_x = cur.i32("grid tile_x")?;
        let tile_y = cur.i32("grid tile_y")?;

        let tileset_count = cur.u8("tileset count")? as usize;
        let mut tilesets = Vec::with_capacity(tileset_count);
        for _ in 0..tileset_count {
            tilesets.push(TilesetRef {
                resource_name: cur.string("tileset resource name")?,
            });
        }

        let tile_indices = cur.take(GRID_AREA, "tile indices")?.to_vec();

        let z_map = if cur.u8("zmap flag")? != 0 {
            let mut z = Vec::with_capacity(GRID_AREA);
            for _ in 0..GRID_AREA {
                z.push(cur.f32("zmap height")?);
            }
            Some(z)
        } else {
            None
        };

        Ok(HmapGridData {
            coord: Coord::new(tile_x, tile_y),
            tilesets,
            tile_indices,
            z_map,
        })
    }

    fn parse_marker(cur: &mut Cursor<'_>) -> Result<HmapMarker, ParseError> {
        let kind_offset = cur.pos;
        let kind = cur.u8("marker kind")?;
        let name = cur.string("marker name")?;
        let tile_x = cur.i32("marker tile_x")?;
        let tile_y = cur.i32("marker tile_y")?;
        match kind {
            0 => Ok(HmapMarker::Custom {
                name,
                tile_x,
                tile_y,
            }),
            1 => Ok(HmapMarker::Tileset {
                name,
                tile_x,
                tile_y,
                resource_name: cur.string("marker resource name")?,
            }),
            k => Err(ParseError::new(
                kind_offset,
                format!("unknown marker kind {}", k),
            )),
        }
    }
}

/// Bounds-checked little-endian cursor over the container bytes.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8], ParseError> {
        if self.pos + n > self.buf.len() {
            return Err(ParseError::new(
                self.pos,
                format!("truncated container while reading {}", what),
            ));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self, what: &str) -> Result<u8, ParseError> {
        Ok(self.take(1, what)?[0])
    }

    fn u16(&mut self, what: &str) -> Result<u16, ParseError> {
        let b = self.take(2, what)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self, what: &str) -> Result<u32, ParseError> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self, what: &str) -> Result<i32, ParseError> {
        Ok(self.u32(what)? as i32)
    }

    fn u64(&mut self, what: &str) -> Result<u64, ParseError> {
        let b = self.take(8, what)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn f32(&mut self, what: &str) -> Result<f32, ParseError> {
        Ok(f32::from_bits(self.u32(what)?))
    }

    /// u16-LE length-prefixed UTF-8 string.
    fn string(&mut self, what: &str) -> Result<String, ParseError> {
        let len = self.u16(what)? as usize;
        let start = self.pos;
        let bytes = self.take(len, what)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ParseError::new(start, format!("{} is not valid UTF-8", what)))
    }
}
