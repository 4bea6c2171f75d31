/// Edge length of one tile, in world columns and in pixels.
pub const TILE_EDGE: i32 = 16;
/// Pixel count of one tile.
pub const TILE_PIXELS: usize = (TILE_EDGE * TILE_EDGE) as usize;

/// Coordinates of one tile in the infinite overhead grid.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct TileCoord {
    pub x: i32,
    pub z: i32,
}

impl TileCoord {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    /// Packs both axes into a single 64-bit key for hashing and map storage.
    pub const fn to_key(self) -> u64 {
        ((self.x as u64) << 32) | (self.z as u32 as u64)
    }

    pub const fn from_key(key: u64) -> Self {
        Self {
            x: (key >> 32) as i32,
            z: key as i32,
        }
    }

    /// The tile containing world column `(x, z)`.
    pub const fn containing_world(x: i32, z: i32) -> Self {
        Self {
            x: x.div_euclid(TILE_EDGE),
            z: z.div_euclid(TILE_EDGE),
        }
    }

    /// World coordinates of this tile's minimum corner.
    pub const fn min_world(self) -> (i32, i32) {
        (self.x * TILE_EDGE, self.z * TILE_EDGE)
    }

    pub const fn region(self, region_edge: i32) -> RegionCoord {
        RegionCoord {
            x: self.x.div_euclid(region_edge),
            z: self.z.div_euclid(region_edge),
        }
    }

    /// Offset of this tile within its owning region, in tiles.
    pub const fn region_offset(self, region_edge: i32) -> (i32, i32) {
        (self.x.rem_euclid(region_edge), self.z.rem_euclid(region_edge))
    }

    /// Chebyshev distance in tiles, the metric used for load and freshness radii.
    pub fn chebyshev_distance(self, other: Self) -> i32 {
        (self.x - other.x).abs().max((self.z - other.z).abs())
    }
}

/// Coordinates of one region, derived by floor-dividing tile coordinates by the region edge.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RegionCoord {
    pub x: i32,
    pub z: i32,
}

impl RegionCoord {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    pub const fn to_key(self) -> u64 {
        ((self.x as u64) << 32) | (self.z as u32 as u64)
    }

    pub const fn from_key(key: u64) -> Self {
        Self {
            x: (key >> 32) as i32,
            z: key as i32,
        }
    }
}
