use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Monotonic millisecond clock shared by the cache and loader.
///
/// Timestamps are relative to the engine epoch, so they fit an [`AtomicU64`] and survive being
/// stored per tile without `Instant` plumbing. `advance` skews the clock forward, which lets
/// tests drive staleness sweeps deterministically.
#[derive(Debug)]
pub struct MapClock {
    epoch: Instant,
    skew_ms: AtomicU64,
}

impl Default for MapClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MapClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            skew_ms: AtomicU64::new(0),
        }
    }

    pub fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64 + self.skew_ms.load(Ordering::Relaxed)
    }

    /// Skews all future readings forward by `ms`.
    pub fn advance(&self, ms: u64) {
        self.skew_ms.fetch_add(ms, Ordering::Relaxed);
    }
}
