use crate::cache::TileCache;
use crate::config::MapConfig;
use crate::loader::AsyncLoader;
use crate::palette::ColorPalette;
use crate::sampler::ColumnSampler;
use crate::store::{GeneratedIndex, RegionStore, StoreError};
use crate::tile::DisplayPort;

use overmap_core::clock::MapClock;
use overmap_core::executor::OwnerExecutor;

use std::path::Path;
use std::sync::Arc;

/// The host-provided seams the engine runs against.
pub struct MapPorts {
    pub sampler: Arc<dyn ColumnSampler>,
    pub palette: Arc<dyn ColorPalette>,
    pub display: Arc<dyn DisplayPort>,
    pub owner: Arc<dyn OwnerExecutor>,
}

/// Top-level assembly of the map engine: store, index, cache, and loader, wired to the host
/// ports. One instance per map directory.
pub struct MapEngine {
    config: MapConfig,
    clock: Arc<MapClock>,
    cache: Arc<TileCache>,
    store: Arc<RegionStore>,
    index: Arc<GeneratedIndex>,
    loader: AsyncLoader,
}

impl MapEngine {
    /// Opens the store under `dir`, rebuilds the generated-tile index from its directory
    /// listing, and spins up the worker pool.
    pub fn new(dir: impl AsRef<Path>, config: MapConfig, ports: MapPorts) -> Result<Self, StoreError> {
        let clock = Arc::new(MapClock::new());
        let store = Arc::new(RegionStore::open(dir, &config.store)?);
        let index = Arc::new(store.scan_index());
        log::info!(
            "opened map store with {} indexed tile(s) at region edge {}",
            index.tile_count(),
            store.region_edge()
        );

        let cache = Arc::new(TileCache::new(
            &config.cache,
            clock.clone(),
            ports.display,
            ports.owner,
        ));
        let loader = AsyncLoader::new(
            &config.loader,
            cache.clone(),
            store.clone(),
            index.clone(),
            ports.sampler,
            ports.palette,
        );

        Ok(Self {
            config,
            clock,
            cache,
            store,
            index,
            loader,
        })
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<MapClock> {
        &self.clock
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn store(&self) -> &RegionStore {
        &self.store
    }

    pub fn index(&self) -> &GeneratedIndex {
        &self.index
    }

    pub fn loader(&self) -> &AsyncLoader {
        &self.loader
    }

    /// Orderly teardown: drain the worker pool, release every display handle, flush every
    /// dirty region. Nothing stays resident afterwards.
    pub fn shutdown(&self) {
        self.loader.shutdown();
        self.cache.clear_and_close();
        self.store.close();
        log::info!("map engine shut down");
    }
}
