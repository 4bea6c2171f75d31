use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct MapConfig {
    pub cache: CacheConfig,
    pub loader: LoaderConfig,
    pub store: StoreConfig,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Soft bound on resident tiles; checked opportunistically before insertion.
    pub max_tiles: usize,
    /// Entries untouched for longer than this are eligible for the staleness sweep.
    pub stale_after_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_tiles: 256,
            stale_after_ms: 30_000,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct LoaderConfig {
    /// Fixed worker pool size; load volume is throttled structurally by this.
    pub workers: usize,
    /// Cap on load requests the scheduler keeps in flight at once.
    pub max_in_flight: usize,
    /// Chebyshev distance from the focus tile within which stale tiles are resampled.
    pub freshness_radius: i32,
    /// How long shutdown waits for workers to drain before detaching them.
    pub shutdown_grace_ms: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_in_flight: 8,
            freshness_radius: 8,
            shutdown_grace_ms: 2_000,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Tiles per region edge. An edge of 1 reproduces the legacy one-file-per-tile layout.
    pub region_edge: i32,
    /// Whole-stream lz4 compression of region files.
    pub compress: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            region_edge: 32,
            compress: false,
        }
    }
}
