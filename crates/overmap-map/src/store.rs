use crate::config::StoreConfig;
use crate::coordinates::{RegionCoord, TileCoord};
use crate::region::{build_mip_pyramid, MipImage, Region};
use crate::tile::TilePixels;

use overmap_core::{SmallKeyHashMap, SmallKeyHashSet};

use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::Entry;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("bad pixel data length in {path:?}: expected {expected} bytes, got {actual}")]
    BadLength {
        path: PathBuf,
        expected: usize,
        actual: usize,
    },
}

/// A file recognized while scanning the store directory.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum StoreFileName {
    /// Legacy one-tile-per-file layout: `chunk_{x}_{z}.dat`.
    Tile(TileCoord),
    /// Region layout: `r.{x}.{z}.map`.
    Region(RegionCoord),
}

pub(crate) fn store_file_name(region: RegionCoord, region_edge: i32) -> String {
    if region_edge == 1 {
        format!("chunk_{}_{}.dat", region.x, region.z)
    } else {
        format!("r.{}.{}.map", region.x, region.z)
    }
}

pub(crate) fn parse_store_file_name(name: &str) -> Option<StoreFileName> {
    if let Some(rest) = name.strip_prefix("r.").and_then(|n| n.strip_suffix(".map")) {
        let (x, z) = rest.split_once('.')?;
        return Some(StoreFileName::Region(RegionCoord::new(
            x.parse().ok()?,
            z.parse().ok()?,
        )));
    }
    if let Some(rest) = name
        .strip_prefix("chunk_")
        .and_then(|n| n.strip_suffix(".dat"))
    {
        let (x, z) = rest.split_once('_')?;
        return Some(StoreFileName::Tile(TileCoord::new(
            x.parse().ok()?,
            z.parse().ok()?,
        )));
    }
    None
}

/// Tiles known to have real persisted data.
///
/// Rebuilt at startup from a directory listing alone: legacy tile files record exact tile
/// membership, while a region file marks its whole footprint as stored (file granularity is the
/// index granularity, as in the region layout's `has_stored_chunk`). Kept in memory so "has
/// real data" queries never touch the disk.
#[derive(Debug)]
pub struct GeneratedIndex {
    tiles: RwLock<SmallKeyHashSet<u64>>,
    regions: RwLock<SmallKeyHashSet<u64>>,
    region_edge: i32,
}

impl GeneratedIndex {
    pub fn new(region_edge: i32) -> Self {
        Self {
            tiles: RwLock::new(SmallKeyHashSet::default()),
            regions: RwLock::new(SmallKeyHashSet::default()),
            region_edge,
        }
    }

    pub fn contains(&self, tile: TileCoord) -> bool {
        self.tiles.read().contains(&tile.to_key())
            || self
                .regions
                .read()
                .contains(&tile.region(self.region_edge).to_key())
    }

    /// Records that `tile` now has persisted data.
    pub fn insert(&self, tile: TileCoord) {
        self.tiles.write().insert(tile.to_key());
    }

    pub(crate) fn mark_region(&self, region: RegionCoord) {
        self.regions.write().insert(region.to_key());
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.read().len()
    }
}

/// Region-aggregated persistent storage for tile pixels, with an in-memory mipmap pyramid per
/// region.
///
/// One deterministic file per region; filenames are the sole persistent index. A region edge of
/// 1 reproduces the legacy one-file-per-tile layout with the same pixel encoding.
pub struct RegionStore {
    dir: PathBuf,
    region_edge: i32,
    compress: bool,
    regions: Mutex<SmallKeyHashMap<u64, Region>>,
    mipmaps: Mutex<SmallKeyHashMap<(u64, u8), MipImage>>,
}

impl RegionStore {
    pub fn open(dir: impl AsRef<Path>, config: &StoreConfig) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            region_edge: config.region_edge,
            compress: config.compress,
            regions: Mutex::new(SmallKeyHashMap::default()),
            mipmaps: Mutex::new(SmallKeyHashMap::default()),
        })
    }

    pub fn region_edge(&self) -> i32 {
        self.region_edge
    }

    fn region_path(&self, region: RegionCoord) -> PathBuf {
        self.dir.join(store_file_name(region, self.region_edge))
    }

    fn region_entry<'a>(
        &self,
        regions: &'a mut SmallKeyHashMap<u64, Region>,
        tile: TileCoord,
    ) -> Result<&'a mut Region, StoreError> {
        let coord = tile.region(self.region_edge);
        match regions.entry(coord.to_key()) {
            Entry::Occupied(occupied) => Ok(occupied.into_mut()),
            Entry::Vacant(vacant) => {
                let region = Region::open(
                    self.region_path(coord),
                    coord,
                    self.region_edge,
                    self.compress,
                )?;
                Ok(vacant.insert(region))
            }
        }
    }

    /// Blits the tile into its region, regenerates the region's mipmap pyramid, and writes the
    /// full-resolution region buffer to disk.
    pub fn save_chunk(&self, tile: TileCoord, pixels: &TilePixels) -> Result<(), StoreError> {
        let mut regions = self.regions.lock();
        let region = self.region_entry(&mut regions, tile)?;
        region.blit_tile(tile, pixels);

        let levels = build_mip_pyramid(region.pixels(), region.edge_px());
        let region_key = region.coord().to_key();
        {
            let mut mipmaps = self.mipmaps.lock();
            for (i, level) in levels.into_iter().enumerate() {
                mipmaps.insert((region_key, i as u8 + 1), level);
            }
        }

        region.save(self.compress)
    }

    /// Reads the tile's footprint out of its region. `Ok(false)` when no region file exists.
    pub fn load_chunk(&self, tile: TileCoord, out: &mut TilePixels) -> Result<bool, StoreError> {
        if !self.has_stored_chunk(tile) {
            return Ok(false);
        }
        let mut regions = self.regions.lock();
        let region = self.region_entry(&mut regions, tile)?;
        region.extract_tile(tile, out);
        Ok(true)
    }

    pub fn has_stored_chunk(&self, tile: TileCoord) -> bool {
        self.region_path(tile.region(self.region_edge)).exists()
    }

    /// The region image at `level` (0 is full resolution, higher levels are mipmaps), or `None`
    /// if the region has no data at all. A level with no cached mip falls back to the
    /// full-resolution image so the overview always has something to draw.
    pub fn region_image(&self, region: RegionCoord, level: u8) -> Option<MipImage> {
        if level > 0 {
            if let Some(mip) = self.mipmaps.lock().get(&(region.to_key(), level)).cloned() {
                return Some(mip);
            }
        }

        let mut regions = self.regions.lock();
        let key = region.to_key();
        if !regions.contains_key(&key) {
            let path = self.region_path(region);
            if !path.exists() {
                return None;
            }
            match Region::open(path, region, self.region_edge, self.compress) {
                Ok(opened) => {
                    regions.insert(key, opened);
                }
                Err(e) => {
                    log::warn!("failed to open region {:?}: {}", region, e);
                    return None;
                }
            }
        }
        let resident = regions.get(&key)?;
        Some(MipImage {
            edge_px: resident.edge_px(),
            pixels: resident.pixels().to_vec(),
        })
    }

    /// Rebuilds the generated-tile index from the store directory listing.
    pub fn scan_index(&self) -> GeneratedIndex {
        let index = GeneratedIndex::new(self.region_edge);
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("failed to scan map store {:?}: {}", self.dir, e);
                return index;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            match parse_store_file_name(name) {
                Some(StoreFileName::Tile(tile)) => index.insert(tile),
                Some(StoreFileName::Region(region)) => index.mark_region(region),
                None => {}
            }
        }
        index
    }

    /// Writes out every dirty resident region. Failures are logged per region and do not stop
    /// the flush.
    pub fn flush_all(&self) {
        let mut regions = self.regions.lock();
        for region in regions.values_mut() {
            if let Err(e) = region.save(self.compress) {
                log::warn!("failed to flush region {:?}: {}", region.coord(), e);
            }
        }
    }

    /// Final flush and release of all resident buffers and mipmaps.
    pub fn close(&self) {
        self.flush_all();
        self.regions.lock().clear();
        self.mipmaps.lock().clear();
    }
}
