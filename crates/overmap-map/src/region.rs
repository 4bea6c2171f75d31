use crate::coordinates::{RegionCoord, TileCoord, TILE_EDGE};
use crate::store::StoreError;
use crate::tile::{pixel_index, TilePixels};

use overmap_core::color::Rgba8;

use lz4_flex::frame::{FrameDecoder, FrameEncoder};
use std::fs;
use std::io;
use std::path::PathBuf;

/// Mipmap levels stop once the image edge reaches this size.
pub const MIN_MIP_EDGE: usize = 64;

/// One level of a region's mipmap pyramid, held in memory only.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MipImage {
    pub edge_px: usize,
    pub pixels: Vec<Rgba8>,
}

/// Builds the full pyramid for a region image: repeated halving down to [`MIN_MIP_EDGE`], each
/// level the per-channel 2x2 box average (alpha included) of the level above.
pub fn build_mip_pyramid(base: &[Rgba8], base_edge: usize) -> Vec<MipImage> {
    debug_assert_eq!(base.len(), base_edge * base_edge);
    let mut levels: Vec<MipImage> = Vec::new();
    let mut src_edge = base_edge;

    while src_edge > MIN_MIP_EDGE {
        let edge = src_edge / 2;
        let next = {
            let src = levels.last().map_or(base, |level| level.pixels.as_slice());
            let mut pixels = vec![Rgba8::TRANSPARENT; edge * edge];
            for x in 0..edge {
                for z in 0..edge {
                    let quad = [
                        src[(2 * x) * src_edge + 2 * z],
                        src[(2 * x + 1) * src_edge + 2 * z],
                        src[(2 * x) * src_edge + 2 * z + 1],
                        src[(2 * x + 1) * src_edge + 2 * z + 1],
                    ];
                    pixels[x * edge + z] = Rgba8::average4(quad);
                }
            }
            MipImage { edge_px: edge, pixels }
        };
        levels.push(next);
        src_edge = edge;
    }

    levels
}

/// One region's full-resolution pixel buffer and its backing file.
///
/// The buffer aggregates a square of tiles; a dirty flag gates disk writes. The on-disk format
/// is raw big-endian 32-bit RGBA in row-major order (x outer, z inner), optionally whole-stream
/// lz4-compressed.
pub(crate) struct Region {
    coord: RegionCoord,
    region_edge: i32,
    edge_px: usize,
    pixels: Vec<Rgba8>,
    dirty: bool,
    path: PathBuf,
}

impl Region {
    /// Opens the region backed by `path`, reading the existing file when present and starting
    /// from a transparent buffer otherwise.
    pub fn open(
        path: PathBuf,
        coord: RegionCoord,
        region_edge: i32,
        compress: bool,
    ) -> Result<Self, StoreError> {
        let edge_px = (region_edge * TILE_EDGE) as usize;
        let pixels = if path.exists() {
            read_pixel_file(&path, edge_px * edge_px, compress)?
        } else {
            vec![Rgba8::TRANSPARENT; edge_px * edge_px]
        };
        Ok(Self {
            coord,
            region_edge,
            edge_px,
            pixels,
            dirty: false,
            path,
        })
    }

    pub fn coord(&self) -> RegionCoord {
        self.coord
    }

    pub fn edge_px(&self) -> usize {
        self.edge_px
    }

    pub fn pixels(&self) -> &[Rgba8] {
        &self.pixels
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Copies a tile's pixels into the region buffer at the tile's local offset.
    pub fn blit_tile(&mut self, tile: TileCoord, pixels: &TilePixels) {
        let (tx, tz) = self.tile_origin(tile);
        for x in 0..TILE_EDGE {
            for z in 0..TILE_EDGE {
                self.pixels[(tx + x as usize) * self.edge_px + tz + z as usize] =
                    pixels[pixel_index(x, z)];
            }
        }
        self.dirty = true;
    }

    /// Copies a tile's footprint out of the region buffer.
    pub fn extract_tile(&self, tile: TileCoord, out: &mut TilePixels) {
        let (tx, tz) = self.tile_origin(tile);
        for x in 0..TILE_EDGE {
            for z in 0..TILE_EDGE {
                out[pixel_index(x, z)] =
                    self.pixels[(tx + x as usize) * self.edge_px + tz + z as usize];
            }
        }
    }

    fn tile_origin(&self, tile: TileCoord) -> (usize, usize) {
        let (ox, oz) = tile.region_offset(self.region_edge);
        ((ox * TILE_EDGE) as usize, (oz * TILE_EDGE) as usize)
    }

    /// Writes the full-resolution buffer to disk if dirty.
    pub fn save(&mut self, compress: bool) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        write_pixel_file(&self.path, &self.pixels, compress)?;
        self.dirty = false;
        Ok(())
    }
}

pub(crate) fn read_pixel_file(
    path: &std::path::Path,
    expected_pixels: usize,
    compress: bool,
) -> Result<Vec<Rgba8>, StoreError> {
    let bytes = fs::read(path)?;
    let bytes = if compress {
        let mut decoder = FrameDecoder::new(&bytes[..]);
        let mut raw = Vec::with_capacity(expected_pixels * 4);
        io::copy(&mut decoder, &mut raw)?;
        raw
    } else {
        bytes
    };
    if bytes.len() != expected_pixels * 4 {
        return Err(StoreError::BadLength {
            path: path.to_path_buf(),
            expected: expected_pixels * 4,
            actual: bytes.len(),
        });
    }
    Ok(bytemuck::cast_slice(&bytes).to_vec())
}

pub(crate) fn write_pixel_file(
    path: &std::path::Path,
    pixels: &[Rgba8],
    compress: bool,
) -> Result<(), StoreError> {
    let raw: &[u8] = bytemuck::cast_slice(pixels);
    if compress {
        let mut encoder = FrameEncoder::new(Vec::new());
        let mut reader = raw;
        io::copy(&mut reader, &mut encoder)?;
        let compressed = encoder
            .finish()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        fs::write(path, compressed)?;
    } else {
        fs::write(path, raw)?;
    }
    Ok(())
}
