use crate::cache::TileCache;
use crate::config::LoaderConfig;
use crate::coordinates::TileCoord;
use crate::palette::ColorPalette;
use crate::sampler::{sample_tile_surface, ColumnSampler};
use crate::store::{GeneratedIndex, RegionStore};
use crate::tile::TileInfo;

use overmap_core::SmallKeyHashMap;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

struct FutureState {
    slot: Mutex<Option<Option<TileInfo>>>,
    resolved: Condvar,
}

/// Completion handle for one background tile load.
///
/// Resolves to `Some(info)` when the tile was processed, or `None` when the load was cancelled
/// by shutdown. Cloning shares the same resolution.
#[derive(Clone)]
pub struct LoadFuture {
    state: Arc<FutureState>,
}

impl LoadFuture {
    fn pending() -> Self {
        Self {
            state: Arc::new(FutureState {
                slot: Mutex::new(None),
                resolved: Condvar::new(),
            }),
        }
    }

    fn resolved_with(value: Option<TileInfo>) -> Self {
        let future = Self::pending();
        future.resolve(value);
        future
    }

    fn resolve(&self, value: Option<TileInfo>) {
        let mut slot = self.state.slot.lock();
        // First resolution wins.
        if slot.is_none() {
            *slot = Some(value);
            self.state.resolved.notify_all();
        }
    }

    /// Non-blocking check; outer `None` means still in flight.
    pub fn poll(&self) -> Option<Option<TileInfo>> {
        *self.state.slot.lock()
    }

    pub fn wait(&self) -> Option<TileInfo> {
        let mut slot = self.state.slot.lock();
        while slot.is_none() {
            self.state.resolved.wait(&mut slot);
        }
        slot.unwrap_or(None)
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<Option<TileInfo>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.state.slot.lock();
        while slot.is_none() {
            if self.state.resolved.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        *slot
    }

    fn shares_state_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

/// Where the viewer currently is, for freshness gating of world resampling.
#[derive(Clone, Copy, Debug)]
pub struct Focus {
    pub tile: TileCoord,
    pub viewer_y: i32,
}

struct LoaderShared {
    cache: Arc<TileCache>,
    store: Arc<RegionStore>,
    index: Arc<GeneratedIndex>,
    sampler: Arc<dyn ColumnSampler>,
    palette: Arc<dyn ColorPalette>,
    focus: Mutex<Focus>,
    pending: Mutex<SmallKeyHashMap<u64, LoadFuture>>,
    shutdown: AtomicBool,
    freshness_radius: i32,
}

impl LoaderShared {
    /// Removes the coordinate from the in-flight set and resolves its future.
    fn finish(&self, coord: TileCoord, info: Option<TileInfo>) {
        let removed = self.pending.lock().remove(&coord.to_key());
        if let Some(future) = removed {
            future.resolve(info);
        }
    }

    fn process(&self, coord: TileCoord) {
        if self.shutdown.load(Ordering::Acquire) {
            self.finish(coord, None);
            return;
        }
        let tile = self.cache.get_or_create(coord);

        if !tile.is_generated() && self.index.contains(coord) {
            // Persisted data trumps resampling; the disk copy is the tile's last known look.
            // The index only proves the region file exists, so an all-transparent extract
            // means this particular tile was never sampled and must not count as generated.
            let loaded = tile.with_pixels_mut(|px| {
                self.store
                    .load_chunk(coord, px)
                    .map(|found| found && px.iter().any(|p| !p.is_transparent()))
            });
            match loaded {
                Ok(true) => {
                    tile.set_generated();
                    tile.clear_needs_update();
                }
                Ok(false) => {}
                Err(e) => log::warn!("failed to read stored tile {:?}: {}", coord, e),
            }
        }
        if !tile.is_generated() && tile.needs_update() {
            let focus = *self.focus.lock();
            let near = coord.chebyshev_distance(focus.tile) <= self.freshness_radius;
            if near && self.sampler.is_loaded(coord) {
                let any_visible = tile.with_pixels_mut(|px| {
                    sample_tile_surface(
                        self.sampler.as_ref(),
                        self.palette.as_ref(),
                        coord,
                        focus.viewer_y,
                        px,
                    )
                });
                if any_visible {
                    // The tile counts as generated even if persisting it fails; the pixels
                    // are already live and a later save can retry.
                    tile.set_generated();
                    self.index.insert(coord);
                    let saved = tile.with_pixels(|px| self.store.save_chunk(coord, px));
                    if let Err(e) = saved {
                        log::warn!("failed to persist tile {:?}: {}", coord, e);
                    }
                }
                tile.clear_needs_update();
            }
            // Far or unloaded tiles keep their update flag and get retried on a later load.
        }

        tile.push_display_update();
        self.finish(coord, Some(tile.info()));
    }
}

/// Fixed pool of background workers that resolve tile loads.
///
/// At most one load is in flight per coordinate; a second request for the same tile while the
/// first is unresolved returns the same [`LoadFuture`]. Workers only touch world and disk
/// state; display work is marshaled through the tiles themselves.
pub struct AsyncLoader {
    shared: Arc<LoaderShared>,
    sender: Mutex<Option<Sender<TileCoord>>>,
    done_rx: Receiver<()>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown_grace: Duration,
}

impl AsyncLoader {
    pub fn new(
        config: &LoaderConfig,
        cache: Arc<TileCache>,
        store: Arc<RegionStore>,
        index: Arc<GeneratedIndex>,
        sampler: Arc<dyn ColumnSampler>,
        palette: Arc<dyn ColorPalette>,
    ) -> Self {
        let shared = Arc::new(LoaderShared {
            cache,
            store,
            index,
            sampler,
            palette,
            focus: Mutex::new(Focus {
                tile: TileCoord::new(0, 0),
                viewer_y: 0,
            }),
            pending: Mutex::new(SmallKeyHashMap::default()),
            shutdown: AtomicBool::new(false),
            freshness_radius: config.freshness_radius,
        });

        let (work_tx, work_rx) = unbounded::<TileCoord>();
        let (done_tx, done_rx) = unbounded::<()>();
        let mut workers = Vec::with_capacity(config.workers);
        for i in 0..config.workers {
            let shared = shared.clone();
            let work_rx = work_rx.clone();
            let done_tx = done_tx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("overmap-loader-{}", i))
                .spawn(move || {
                    while let Ok(coord) = work_rx.recv() {
                        shared.process(coord);
                    }
                    let _ = done_tx.send(());
                })
                .expect("failed to spawn loader worker");
            workers.push(handle);
        }

        Self {
            shared,
            sender: Mutex::new(Some(work_tx)),
            done_rx,
            workers: Mutex::new(workers),
            shutdown_grace: Duration::from_millis(config.shutdown_grace_ms),
        }
    }

    /// Updates the viewer position used for freshness gating.
    pub fn set_focus(&self, tile: TileCoord, viewer_y: i32) {
        *self.shared.focus.lock() = Focus { tile, viewer_y };
    }

    /// Requests a background load of `coord`.
    ///
    /// Returns the already in-flight future when one exists, and an immediately cancelled
    /// future after shutdown.
    pub fn load(&self, coord: TileCoord) -> LoadFuture {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return LoadFuture::resolved_with(None);
        }

        let mut pending = self.shared.pending.lock();
        if let Some(existing) = pending.get(&coord.to_key()) {
            return existing.clone();
        }
        let future = LoadFuture::pending();
        pending.insert(coord.to_key(), future.clone());
        drop(pending);

        let sender = self.sender.lock();
        match sender.as_ref().map(|tx| tx.send(coord)) {
            Some(Ok(())) => future,
            // The pool is gone; cancel instead of leaving the future dangling.
            Some(Err(_)) | None => {
                drop(sender);
                self.shared.finish(coord, None);
                future
            }
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.shared.pending.lock().len()
    }

    /// Stops accepting work and waits up to the configured grace period for workers to drain.
    ///
    /// Workers that outlive the grace period are detached with a warning; every unresolved
    /// future is resolved as cancelled either way.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        // Closing the channel ends each worker's receive loop.
        drop(self.sender.lock().take());

        let mut workers = self.workers.lock();
        let deadline = Instant::now() + self.shutdown_grace;
        let mut finished = 0;
        while finished < workers.len() {
            let now = Instant::now();
            if now >= deadline || self.done_rx.recv_timeout(deadline - now).is_err() {
                break;
            }
            finished += 1;
        }
        if finished < workers.len() {
            log::warn!(
                "{} loader worker(s) still busy after {:?}; detaching",
                workers.len() - finished,
                self.shutdown_grace
            );
            workers.clear();
        } else {
            for handle in workers.drain(..) {
                if handle.join().is_err() {
                    log::warn!("loader worker panicked");
                }
            }
        }
        drop(workers);

        // Anything still queued or abandoned resolves as cancelled.
        let stragglers: Vec<_> = {
            let mut pending = self.shared.pending.lock();
            pending.drain().map(|(_, future)| future).collect()
        };
        for future in stragglers {
            future.resolve(None);
        }
    }
}

impl Drop for AsyncLoader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, StoreConfig};
    use crate::coordinates::TILE_PIXELS;
    use crate::palette::MaterialColors;
    use crate::sampler::Surface;
    use crate::tile::test_support::RecordingDisplay;
    use crate::tile::EMPTY_TILE_PIXELS;
    use overmap_core::clock::MapClock;
    use overmap_core::color::Rgba8;
    use overmap_core::executor::InlineExecutor;

    const STONE: u16 = 1;
    const STONE_COLOR: Rgba8 = Rgba8::opaque(0x6E, 0x6E, 0x6E);

    struct StoneWorld;

    impl ColumnSampler for StoneWorld {
        fn is_loaded(&self, _tile: TileCoord) -> bool {
            true
        }

        fn highest_surface(&self, _x: i32, _z: i32, viewer_y: i32) -> Option<Surface> {
            Some(Surface {
                material: STONE,
                y: viewer_y - 4,
            })
        }
    }

    struct NoSampling;

    impl ColumnSampler for NoSampling {
        fn is_loaded(&self, _tile: TileCoord) -> bool {
            true
        }

        fn highest_surface(&self, _x: i32, _z: i32, _viewer_y: i32) -> Option<Surface> {
            panic!("sampler must not run for stored tiles");
        }
    }

    /// Blocks every sample until the gate channel is dropped or signaled.
    struct GatedWorld {
        gate: Receiver<()>,
    }

    impl ColumnSampler for GatedWorld {
        fn is_loaded(&self, _tile: TileCoord) -> bool {
            let _ = self.gate.recv();
            true
        }

        fn highest_surface(&self, _x: i32, _z: i32, _viewer_y: i32) -> Option<Surface> {
            None
        }
    }

    struct Fixture {
        loader: AsyncLoader,
        cache: Arc<TileCache>,
        store: Arc<RegionStore>,
        index: Arc<GeneratedIndex>,
        display: Arc<RecordingDisplay>,
        _dir: tempfile::TempDir,
    }

    fn fixture_over(
        dir: tempfile::TempDir,
        sampler: Arc<dyn ColumnSampler>,
        config: LoaderConfig,
    ) -> Fixture {
        let display = Arc::new(RecordingDisplay::default());
        let cache = Arc::new(TileCache::new(
            &CacheConfig::default(),
            Arc::new(MapClock::new()),
            display.clone(),
            Arc::new(InlineExecutor),
        ));
        let store = Arc::new(RegionStore::open(dir.path(), &StoreConfig::default()).unwrap());
        let index = Arc::new(store.scan_index());
        let mut palette = MaterialColors::new();
        palette.register(STONE, STONE_COLOR);
        let loader = AsyncLoader::new(
            &config,
            cache.clone(),
            store.clone(),
            index.clone(),
            sampler,
            Arc::new(palette),
        );
        Fixture {
            loader,
            cache,
            store,
            index,
            display,
            _dir: dir,
        }
    }

    fn fixture(sampler: Arc<dyn ColumnSampler>, config: LoaderConfig) -> Fixture {
        fixture_over(tempfile::tempdir().unwrap(), sampler, config)
    }

    #[test]
    fn sampled_tiles_are_persisted_and_indexed() {
        let f = fixture(Arc::new(StoneWorld), LoaderConfig::default());
        let coord = TileCoord::new(2, -3);

        let info = f.loader.load(coord).wait().unwrap();
        assert!(info.generated);

        let tile = f.cache.get(coord).unwrap();
        tile.with_pixels(|px| assert!(px.iter().all(|p| *p == STONE_COLOR)));
        assert!(f.store.has_stored_chunk(coord));
        assert!(f.index.contains(coord));
        assert_eq!(f.loader.in_flight_count(), 0);
    }

    #[test]
    fn stored_tiles_load_from_disk_without_sampling() {
        let coord = TileCoord::new(5, 5);
        let seeded = [Rgba8::opaque(0, 200, 0); TILE_PIXELS];

        let dir = tempfile::tempdir().unwrap();
        {
            let store = RegionStore::open(dir.path(), &StoreConfig::default()).unwrap();
            store.save_chunk(coord, &seeded).unwrap();
        }

        // Reopen over the same directory so the index is rebuilt from filenames.
        let f = fixture_over(dir, Arc::new(NoSampling), LoaderConfig::default());

        let info = f.loader.load(coord).wait().unwrap();
        assert!(info.generated);
        let tile = f.cache.get(coord).unwrap();
        tile.with_pixels(|px| assert_eq!(*px, seeded));
        // The upload reached the display with the stored pixels.
        assert!(f.display.log.lock().uploads >= 1);
    }

    #[test]
    fn blank_tiles_in_a_stored_region_are_resampled() {
        // Saving one tile makes the whole region's footprint look "stored" to the
        // filename-granular index; its blank neighbors must still get sampled.
        let seeded_coord = TileCoord::new(0, 0);
        let seeded = [Rgba8::opaque(0, 200, 0); TILE_PIXELS];

        let dir = tempfile::tempdir().unwrap();
        {
            let store = RegionStore::open(dir.path(), &StoreConfig::default()).unwrap();
            store.save_chunk(seeded_coord, &seeded).unwrap();
        }
        let f = fixture_over(dir, Arc::new(StoneWorld), LoaderConfig::default());

        let blank = TileCoord::new(1, 0);
        assert!(f.index.contains(blank));
        f.loader.set_focus(blank, 64);

        let info = f.loader.load(blank).wait().unwrap();
        assert!(info.generated);
        let tile = f.cache.get(blank).unwrap();
        // Sampled pixels, not the all-transparent disk extract.
        tile.with_pixels(|px| assert!(px.iter().all(|p| *p == STONE_COLOR)));
        assert!(!tile.needs_update());

        // The neighbor that really was stored still comes back from disk untouched.
        let stored = f.loader.load(seeded_coord).wait().unwrap();
        assert!(stored.generated);
        f.cache
            .get(seeded_coord)
            .unwrap()
            .with_pixels(|px| assert_eq!(*px, seeded));
    }

    #[test]
    fn far_tiles_are_skipped_but_still_resolve() {
        let f = fixture(Arc::new(StoneWorld), LoaderConfig::default());
        f.loader.set_focus(TileCoord::new(0, 0), 64);

        // Default freshness radius is 8; Chebyshev distance here is 50.
        let coord = TileCoord::new(50, 0);
        let info = f.loader.load(coord).wait().unwrap();
        assert!(!info.generated);
        assert!(!f.store.has_stored_chunk(coord));

        let tile = f.cache.get(coord).unwrap();
        assert!(tile.needs_update());
        tile.with_pixels(|px| assert_eq!(*px, EMPTY_TILE_PIXELS));
    }

    #[test]
    fn repeated_loads_share_one_in_flight_future() {
        let (gate_tx, gate_rx) = unbounded();
        let f = fixture(
            Arc::new(GatedWorld { gate: gate_rx }),
            LoaderConfig {
                workers: 1,
                ..LoaderConfig::default()
            },
        );

        let coord = TileCoord::new(1, 1);
        let first = f.loader.load(coord);
        let second = f.loader.load(coord);
        assert!(first.shares_state_with(&second));
        assert_eq!(f.loader.in_flight_count(), 1);
        assert!(first.poll().is_none());

        gate_tx.send(()).unwrap();
        assert!(first.wait().is_some());
        assert!(second.poll().is_some());

        // A later request for the same tile is a fresh load.
        let third = f.loader.load(coord);
        assert!(!first.shares_state_with(&third));
        gate_tx.send(()).unwrap();
        third.wait();
    }

    #[test]
    fn concurrent_duplicate_requests_share_one_future() {
        let (gate_tx, gate_rx) = unbounded();
        let f = fixture(
            Arc::new(GatedWorld { gate: gate_rx }),
            LoaderConfig {
                workers: 1,
                ..LoaderConfig::default()
            },
        );
        let coord = TileCoord::new(4, 4);

        let futures: Vec<_> = crossbeam::thread::scope(|s| {
            let handles: Vec<_> = (0..8).map(|_| s.spawn(|_| f.loader.load(coord))).collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
        .unwrap();

        for future in &futures[1..] {
            assert!(futures[0].shares_state_with(future));
        }
        assert_eq!(f.loader.in_flight_count(), 1);

        gate_tx.send(()).unwrap();
        assert!(futures[0].wait().is_some());
    }

    #[test]
    fn shutdown_cancels_unfinished_loads() {
        let (gate_tx, gate_rx) = unbounded();
        let f = fixture(
            Arc::new(GatedWorld { gate: gate_rx }),
            LoaderConfig {
                workers: 1,
                shutdown_grace_ms: 50,
                ..LoaderConfig::default()
            },
        );

        // The worker blocks on the first tile; the rest sit in the queue.
        let futures: Vec<_> = (0..5).map(|i| f.loader.load(TileCoord::new(i, 0))).collect();
        f.loader.shutdown();
        drop(gate_tx);

        for future in &futures {
            assert_eq!(future.poll(), Some(None));
        }
        assert_eq!(f.loader.in_flight_count(), 0);
        // New requests after shutdown resolve as cancelled immediately.
        assert_eq!(f.loader.load(TileCoord::new(9, 9)).poll(), Some(None));
    }

    #[test]
    fn workers_drain_queued_loads_within_grace() {
        let f = fixture(
            Arc::new(StoneWorld),
            LoaderConfig {
                workers: 2,
                ..LoaderConfig::default()
            },
        );
        let futures: Vec<_> = (0..8).map(|i| f.loader.load(TileCoord::new(i, 1))).collect();
        f.loader.shutdown();

        let resolved: Vec<_> = futures.iter().map(|f| f.poll().unwrap()).collect();
        // Every future resolved one way or the other; none are left pending.
        assert_eq!(resolved.len(), 8);
        assert_eq!(f.loader.in_flight_count(), 0);
    }
}
