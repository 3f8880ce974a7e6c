//! Terrain grid rasterization.
//!
//! [`GridRenderer`] turns one [`HmapGridData`] into a 100×100 RGBA image in
//! three deterministic passes:
//!
//! 1. **Base sampling** - each cell samples its tileset texture with
//!    Euclidean-remainder wrapping; out-of-range or unresolved tilesets
//!    paint the missing color.
//! 2. **Cliff shading** - cells whose height differs from a cardinal
//!    neighbor by more than the threshold get a 3×3 darken stamp, applied
//!    in row-major order so overlapping stamps compound identically on
//!    every run.
//! 3. **Priority borders** - cells with a strictly higher-priority cardinal
//!    neighbor (by original tileset index) are overdrawn opaque black.
//!
//! The numeric constants are part of the rendering contract: persisted
//! tiles must be byte-identical across re-renders of the same grid.

use crate::coord::{GRID_AREA, GRID_DIM};
use crate::hmap::HmapGridData;
use image::{Rgba, RgbaImage};

/// Color of cells without a usable tileset texture.
pub const MISSING_COLOR: Rgba<u8> = Rgba([128, 128, 128, 255]);

/// Height delta above which a cell counts as a cliff edge.
pub const CLIFF_THRESHOLD: f32 = 2.0;

/// Tolerance added to the threshold before comparison.
pub const CLIFF_EPSILON: f32 = 0.01;

/// Darken factor for the cliff cell itself (pure black).
const CLIFF_CENTER_FACTOR: f32 = 1.0;

/// Darken factor for the 8 cells surrounding a cliff cell.
const CLIFF_RING_FACTOR: f32 = 0.1;

/// Stateless rasterizer for terrain grids.
pub struct GridRenderer;

impl GridRenderer {
    /// Rasterize one grid.
    ///
    /// `textures` is parallel to `grid.tilesets`; `None` entries are
    /// tilesets the resource service could not resolve and render as
    /// missing. Rendering is CPU-only and infallible.
    pub fn render(grid: &HmapGridData, textures: &[Option<RgbaImage>]) -> RgbaImage {
        debug_assert_eq!(grid.tile_indices.len(), GRID_AREA);

        let mut img = RgbaImage::new(GRID_DIM, GRID_DIM);
        base_pass(grid, textures, &mut img);
        if let Some(z_map) = &grid.z_map {
            cliff_pass(z_map, &mut img);
        }
        border_pass(&grid.tile_indices, &mut img);
        img
    }
}

/// Pass 1: per-cell texture sampling.
fn base_pass(grid: &HmapGridData, textures: &[Option<RgbaImage>], img: &mut RgbaImage) {
    for y in 0..GRID_DIM {
        for x in 0..GRID_DIM {
            let idx = grid.tile_indices[(y * GRID_DIM + x) as usize] as usize;
            let pixel = if idx >= grid.tilesets.len() {
                MISSING_COLOR
            } else {
                match textures.get(idx).and_then(|t| t.as_ref()) {
                    Some(tex) => sample_wrapped(tex, x as i32, y as i32),
                    None => MISSING_COLOR,
                }
            };
            img.put_pixel(x, y, pixel);
        }
    }
}

/// Sample a texture with Euclidean-remainder wrapping on both axes.
///
/// Inputs here are non-negative, but the remainder is Euclidean so the
/// sampling rule holds for any signed cell coordinate.
fn sample_wrapped(tex: &RgbaImage, x: i32, y: i32) -> Rgba<u8> {
    let tx = x.rem_euclid(tex.width() as i32) as u32;
    let ty = y.rem_euclid(tex.height() as i32) as u32;
    *tex.get_pixel(tx, ty)
}

/// Pass 2: cliff detection and 3×3 darken stamps.
///
/// Only interior cells (`1 ..= 98` on both axes) are tested, so every
/// stamp fits inside the image. Stamps are applied in the row-major order
/// the cliffs were found; overlapping stamps compound.
fn cliff_pass(z_map: &[f32], img: &mut RgbaImage) {
    let dim = GRID_DIM as usize;
    let limit = CLIFF_THRESHOLD + CLIFF_EPSILON;

    let mut cliffs = Vec::new();
    for y in 1..dim - 1 {
        for x in 1..dim - 1 {
            let z = z_map[y * dim + x];
            let neighbors = [
                z_map[(y - 1) * dim + x],
                z_map[y * dim + x - 1],
                z_map[y * dim + x + 1],
                z_map[(y + 1) * dim + x],
            ];
            if neighbors.iter().any(|n| (n - z).abs() > limit) {
                cliffs.push((x as u32, y as u32));
            }
        }
    }

    for (cx, cy) in cliffs {
        for dy in -1i32..=1 {
            for dx in -1i32..=1 {
                let factor = if dx == 0 && dy == 0 {
                    CLIFF_CENTER_FACTOR
                } else {
                    CLIFF_RING_FACTOR
                };
                let px = (cx as i32 + dx) as u32;
                let py = (cy as i32 + dy) as u32;
                darken(img, px, py, factor);
            }
        }
    }
}

/// Blend one pixel toward black by `factor`, preserving alpha.
fn darken(img: &mut RgbaImage, x: u32, y: u32, factor: f32) {
    let p = img.get_pixel_mut(x, y);
    let keep = 1.0 - factor;
    p[0] = (p[0] as f32 * keep) as u8;
    p[1] = (p[1] as f32 * keep) as u8;
    p[2] = (p[2] as f32 * keep) as u8;
}

/// Pass 3: priority borders from the original tileset indices.
///
/// Independent of pass 2: comparisons read `tile_indices`, never pixels.
/// No wrapping; edge cells only see their in-grid neighbors.
fn border_pass(tile_indices: &[u8], img: &mut RgbaImage) {
    let dim = GRID_DIM as i32;
    for y in 0..dim {
        for x in 0..dim {
            let own = tile_indices[(y * dim + x) as usize];
            let higher = [(0i32, -1i32), (-1, 0), (1, 0), (0, 1)]
                .iter()
                .any(|(dx, dy)| {
                    let nx = x + dx;
                    let ny = y + dy;
                    nx >= 0
                        && nx < dim
                        && ny >= 0
                        && ny < dim
                        && tile_indices[(ny * dim + nx) as usize] > own
                });
            if higher {
                img.put_pixel(x as u32, y as u32, Rgba([0, 0, 0, 255]));
            }
        }
    }
}

/// Encode an image as PNG bytes.
pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}
