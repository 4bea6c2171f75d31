use crate::config::LoaderConfig;
use crate::coordinates::{TileCoord, TILE_EDGE};
use crate::loader::{AsyncLoader, LoadFuture};
use crate::tile::TileInfo;

use overmap_core::{SmallKeyHashMap, SmallKeyHashSet};

/// What the map view is currently looking at, in world pixel coordinates.
#[derive(Clone, Copy, Debug)]
pub struct Viewport {
    pub center_x: f64,
    pub center_z: f64,
    pub viewer_y: i32,
    /// Screen pixels per world column; 1.0 draws a tile at 16 px.
    pub zoom: f64,
    pub screen_width: u32,
    pub screen_height: u32,
}

impl Viewport {
    pub fn center_tile(&self) -> TileCoord {
        TileCoord::containing_world(
            self.center_x.floor() as i32,
            self.center_z.floor() as i32,
        )
    }
}

/// Prefetch radius around the focus tile, in tiles, banded by zoom level.
pub fn load_radius(zoom: f64) -> i32 {
    if zoom < 1.0 {
        4
    } else if zoom < 2.0 {
        6
    } else {
        8
    }
}

/// Frame-driven bridge between the view and the [`AsyncLoader`].
///
/// Each `update` reaps finished loads, issues new ones nearest-first under an in-flight
/// budget, and drops resolved tiles that drifted out of relevance. The scheduler itself is
/// single-threaded state owned by the view loop.
pub struct LoadScheduler {
    max_in_flight: usize,
    in_flight: SmallKeyHashMap<u64, LoadFuture>,
    ready: SmallKeyHashMap<u64, TileInfo>,
    /// Every tile ever observed resolving with real data, for the zoomed-out overview.
    generated: SmallKeyHashSet<u64>,
}

impl LoadScheduler {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight,
            in_flight: SmallKeyHashMap::default(),
            ready: SmallKeyHashMap::default(),
            generated: SmallKeyHashSet::default(),
        }
    }

    pub fn from_config(config: &LoaderConfig) -> Self {
        Self::new(config.max_in_flight)
    }

    pub fn update(&mut self, loader: &AsyncLoader, viewport: &Viewport) {
        let center = viewport.center_tile();
        loader.set_focus(center, viewport.viewer_y);

        self.reap();

        let radius = load_radius(viewport.zoom);
        self.issue_focus_square(loader, center, radius);
        self.issue_visible_rect(loader, viewport, center);

        // Resolved tiles stay around twice as far as the prefetch radius before being
        // forgotten; the cache underneath keeps them resident a while longer.
        let keep = 2 * radius;
        self.ready
            .retain(|key, _| TileCoord::from_key(*key).chebyshev_distance(center) <= keep);
    }

    /// Moves finished futures out of the in-flight set.
    fn reap(&mut self) {
        let generated = &mut self.generated;
        let ready = &mut self.ready;
        self.in_flight.retain(|key, future| match future.poll() {
            None => true,
            Some(None) => false,
            Some(Some(info)) => {
                ready.insert(*key, info);
                if info.generated {
                    generated.insert(*key);
                }
                false
            }
        });
    }

    fn issue_focus_square(&mut self, loader: &AsyncLoader, center: TileCoord, radius: i32) {
        // Ring by ring, so the budget goes to the nearest tiles first.
        for ring in 0..=radius {
            for coord in ring_coords(center, ring) {
                if self.in_flight.len() >= self.max_in_flight {
                    return;
                }
                self.issue(loader, coord);
            }
        }
    }

    fn issue_visible_rect(&mut self, loader: &AsyncLoader, viewport: &Viewport, center: TileCoord) {
        let tile_px = TILE_EDGE as f64 * viewport.zoom;
        let half_w = ((viewport.screen_width as f64 / tile_px).ceil() as i32 + 2) / 2 + 1;
        let half_h = ((viewport.screen_height as f64 / tile_px).ceil() as i32 + 2) / 2 + 1;
        for x in (center.x - half_w)..=(center.x + half_w) {
            for z in (center.z - half_h)..=(center.z + half_h) {
                if self.in_flight.len() >= self.max_in_flight {
                    return;
                }
                self.issue(loader, TileCoord::new(x, z));
            }
        }
    }

    fn issue(&mut self, loader: &AsyncLoader, coord: TileCoord) {
        let key = coord.to_key();
        if self.in_flight.contains_key(&key) || self.ready.contains_key(&key) {
            return;
        }
        self.in_flight.insert(key, loader.load(coord));
    }

    pub fn ready_tile(&self, coord: TileCoord) -> Option<TileInfo> {
        self.ready.get(&coord.to_key()).copied()
    }

    pub fn ready_tiles(&self) -> impl Iterator<Item = (TileCoord, TileInfo)> + '_ {
        self.ready
            .iter()
            .map(|(key, info)| (TileCoord::from_key(*key), *info))
    }

    pub fn generated_overview(&self) -> impl Iterator<Item = TileCoord> + '_ {
        self.generated.iter().map(|key| TileCoord::from_key(*key))
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn clear(&mut self) {
        self.in_flight.clear();
        self.ready.clear();
        self.generated.clear();
    }
}

/// The Chebyshev ring of tiles at exactly `ring` around `center` (just `center` for ring 0).
fn ring_coords(center: TileCoord, ring: i32) -> Vec<TileCoord> {
    if ring == 0 {
        return vec![center];
    }
    let mut coords = Vec::with_capacity((8 * ring) as usize);
    for d in -ring..=ring {
        coords.push(TileCoord::new(center.x + d, center.z - ring));
        coords.push(TileCoord::new(center.x + d, center.z + ring));
    }
    for d in (-ring + 1)..ring {
        coords.push(TileCoord::new(center.x - ring, center.z + d));
        coords.push(TileCoord::new(center.x + ring, center.z + d));
    }
    coords
}
