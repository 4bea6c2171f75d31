use crate::config::CacheConfig;
use crate::coordinates::TileCoord;
use crate::tile::{DisplayPort, TileImage};

use overmap_core::clock::MapClock;
use overmap_core::executor::OwnerExecutor;
use overmap_core::SmallKeyHashMap;

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Bounded in-memory mapping from tile coordinate to [`TileImage`].
///
/// The bound is best-effort: when at or over capacity before an insertion, entries untouched
/// for longer than the staleness window are swept and closed. Entries accessed within the
/// window are never evicted by the sweep, so the cache can temporarily exceed its bound.
pub struct TileCache {
    entries: RwLock<SmallKeyHashMap<u64, Arc<TileImage>>>,
    max_tiles: usize,
    stale_after_ms: u64,
    clock: Arc<MapClock>,
    display: Arc<dyn DisplayPort>,
    owner: Arc<dyn OwnerExecutor>,
    /// Set under the write lock by [`TileCache::clear_and_close`]; once set, misses hand out
    /// already-closed tiles instead of inserting, so a straggling worker cannot leak a handle.
    closed: AtomicBool,
}

impl TileCache {
    pub fn new(
        config: &CacheConfig,
        clock: Arc<MapClock>,
        display: Arc<dyn DisplayPort>,
        owner: Arc<dyn OwnerExecutor>,
    ) -> Self {
        Self {
            entries: RwLock::new(SmallKeyHashMap::default()),
            max_tiles: config.max_tiles,
            stale_after_ms: config.stale_after_ms,
            clock,
            display,
            owner,
            closed: AtomicBool::new(false),
        }
    }

    /// Looks up a resident tile, touching its access timestamp.
    pub fn get(&self, coord: TileCoord) -> Option<Arc<TileImage>> {
        let tile = self.entries.read().get(&coord.to_key()).cloned()?;
        tile.touch(self.clock.now_ms());
        Some(tile)
    }

    /// Looks up or creates the tile for `coord`.
    ///
    /// Creation happens under the write lock, so concurrent callers for the same coordinate
    /// always receive the same [`TileImage`] instance.
    pub fn get_or_create(&self, coord: TileCoord) -> Arc<TileImage> {
        let now = self.clock.now_ms();
        if let Some(tile) = self.entries.read().get(&coord.to_key()) {
            tile.touch(now);
            return tile.clone();
        }

        let mut entries = self.entries.write();
        if self.closed.load(Ordering::Acquire) {
            // The cache was torn down between our request and this insert; the tile is
            // closed immediately so its marshaled handle creation releases on arrival.
            let tile = TileImage::create(coord, now, self.display.clone(), self.owner.clone());
            tile.close();
            return tile;
        }
        if entries.len() >= self.max_tiles && !entries.contains_key(&coord.to_key()) {
            Self::sweep_stale(&mut entries, now, self.stale_after_ms);
        }
        let tile = entries
            .entry(coord.to_key())
            .or_insert_with(|| {
                TileImage::create(coord, now, self.display.clone(), self.owner.clone())
            })
            .clone();
        tile.touch(now);
        tile
    }

    pub fn touch(&self, coord: TileCoord) {
        if let Some(tile) = self.entries.read().get(&coord.to_key()) {
            tile.touch(self.clock.now_ms());
        }
    }

    /// Removes and closes one entry.
    pub fn evict(&self, coord: TileCoord) {
        let removed = self.entries.write().remove(&coord.to_key());
        if let Some(tile) = removed {
            tile.close();
        }
    }

    /// Evicts every entry whose last access is older than the staleness window.
    pub fn sweep(&self) {
        let now = self.clock.now_ms();
        Self::sweep_stale(&mut self.entries.write(), now, self.stale_after_ms);
    }

    fn sweep_stale(entries: &mut SmallKeyHashMap<u64, Arc<TileImage>>, now: u64, stale_after_ms: u64) {
        let oldest_allowed = now.saturating_sub(stale_after_ms);
        entries.retain(|key, tile| {
            if tile.last_access_ms() >= oldest_allowed {
                return true;
            }
            log::debug!("evicting stale tile {:?}", TileCoord::from_key(*key));
            tile.close();
            false
        });
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Closes and drops every resident tile and refuses future inserts. Used at engine
    /// shutdown.
    pub fn clear_and_close(&self) {
        let mut entries = self.entries.write();
        self.closed.store(true, Ordering::Release);
        for (_, tile) in entries.drain() {
            tile.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::test_support::RecordingDisplay;
    use overmap_core::executor::InlineExecutor;

    fn test_cache(max_tiles: usize) -> (TileCache, Arc<RecordingDisplay>, Arc<MapClock>) {
        let display = Arc::new(RecordingDisplay::default());
        let clock = Arc::new(MapClock::new());
        let cache = TileCache::new(
            &CacheConfig {
                max_tiles,
                stale_after_ms: 30_000,
            },
            clock.clone(),
            display.clone(),
            Arc::new(InlineExecutor),
        );
        (cache, display, clock)
    }

    #[test]
    fn get_or_create_returns_one_instance_per_coord() {
        let (cache, _display, _clock) = test_cache(16);
        let a = cache.get_or_create(TileCoord::new(1, 2));
        let b = cache.get_or_create(TileCoord::new(1, 2));
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn concurrent_creators_share_one_tile() {
        let (cache, display, _clock) = test_cache(64);
        let coord = TileCoord::new(-7, 9);

        let tiles: Vec<_> = crossbeam::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|_| cache.get_or_create(coord)))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
        .unwrap();

        for tile in &tiles[1..] {
            assert!(Arc::ptr_eq(&tiles[0], tile));
        }
        assert_eq!(cache.len(), 1);
        // Exactly one display handle was ever created for the coordinate.
        assert_eq!(display.log.lock().creates, 1);
    }

    #[test]
    fn sweep_only_evicts_entries_past_the_window() {
        let (cache, display, clock) = test_cache(2);
        let stale = cache.get_or_create(TileCoord::new(0, 0));
        let _fresh_old = cache.get_or_create(TileCoord::new(0, 1));

        clock.advance(31_000);
        stale.set_last_access_ms(0);
        cache.touch(TileCoord::new(0, 1));

        // At capacity, so the next insertion sweeps.
        cache.get_or_create(TileCoord::new(0, 2));

        assert_eq!(cache.len(), 2);
        assert!(cache.get(TileCoord::new(0, 0)).is_none());
        assert!(cache.get(TileCoord::new(0, 1)).is_some());
        assert!(stale.is_closed());
        assert_eq!(display.log.lock().releases, 1);

        let oldest_allowed = clock.now_ms().saturating_sub(30_000);
        let survivors = [TileCoord::new(0, 1), TileCoord::new(0, 2)];
        for coord in survivors {
            let tile = cache.get(coord).unwrap();
            assert!(tile.last_access_ms() >= oldest_allowed);
        }
    }

    #[test]
    fn sweep_is_best_effort_and_can_overshoot() {
        let (cache, _display, _clock) = test_cache(1);
        cache.get_or_create(TileCoord::new(0, 0));
        // Nothing is stale, so the bound is exceeded rather than evicting a live entry.
        cache.get_or_create(TileCoord::new(0, 1));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn get_or_create_after_close_never_leaks_a_handle() {
        use overmap_core::executor::QueuedExecutor;

        let display = Arc::new(RecordingDisplay::default());
        let owner = Arc::new(QueuedExecutor::new());
        let cache = TileCache::new(
            &CacheConfig {
                max_tiles: 16,
                stale_after_ms: 30_000,
            },
            Arc::new(MapClock::new()),
            display.clone(),
            owner.clone(),
        );

        cache.clear_and_close();

        // A worker that raced past the shutdown check still gets a tile, but a dead one
        // that never lands in the cache.
        let tile = cache.get_or_create(TileCoord::new(0, 0));
        assert!(tile.is_closed());
        assert!(cache.is_empty());

        // Once the owner context runs, the handle it created is released on the spot.
        owner.drain();
        assert_eq!(display.log.lock().creates, 1);
        assert_eq!(display.live_handles(), 0);
    }

    #[test]
    fn clear_and_close_releases_every_handle() {
        let (cache, display, _clock) = test_cache(16);
        for i in 0..5 {
            cache.get_or_create(TileCoord::new(i, 0));
        }
        assert_eq!(display.live_handles(), 5);
        cache.clear_and_close();
        assert!(cache.is_empty());
        assert_eq!(display.live_handles(), 0);
    }
}
