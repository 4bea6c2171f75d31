use crate::coordinates::{TileCoord, TILE_EDGE};
use crate::palette::{ColorPalette, MaterialId};
use crate::tile::{pixel_index, TilePixels};

use overmap_core::color::Rgba8;

/// The topmost non-empty material found in a world column.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Surface {
    pub material: MaterialId,
    pub y: i32,
}

/// Host port for walking vertical columns of world data.
///
/// `highest_surface` is expected to scan downward from a height near `viewer_y` to the world
/// floor and return the first non-empty material it crosses. Because the scan starts in a
/// viewer-relative band, a sampled tile reflects the terrain as seen when the viewer was last
/// near it; that staleness is accepted and re-sampling is only a proximity heuristic.
pub trait ColumnSampler: Send + Sync {
    /// Whether world data for the tile's footprint is resident. Unloaded tiles are skipped and
    /// retried later; this is not an error.
    fn is_loaded(&self, tile: TileCoord) -> bool;

    fn highest_surface(&self, world_x: i32, world_z: i32, viewer_y: i32) -> Option<Surface>;
}

/// Samples the full 16x16 column grid of `tile` into `pixels`.
///
/// Every pixel is overwritten: surface colors come from the palette, columns with no surface
/// become fully transparent. Returns true when any column produced a visible color.
pub fn sample_tile_surface(
    sampler: &dyn ColumnSampler,
    palette: &dyn ColorPalette,
    tile: TileCoord,
    viewer_y: i32,
    pixels: &mut TilePixels,
) -> bool {
    let (base_x, base_z) = tile.min_world();
    let mut any_visible = false;
    for x in 0..TILE_EDGE {
        for z in 0..TILE_EDGE {
            let color = sampler
                .highest_surface(base_x + x, base_z + z, viewer_y)
                .map(|surface| palette.color_for(surface.material))
                .unwrap_or(Rgba8::TRANSPARENT);
            pixels[pixel_index(x, z)] = color;
            any_visible |= !color.is_transparent();
        }
    }
    any_visible
}
