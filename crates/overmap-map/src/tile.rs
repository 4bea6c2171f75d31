use crate::coordinates::{TileCoord, TILE_EDGE, TILE_PIXELS};

use overmap_core::color::Rgba8;
use overmap_core::executor::OwnerExecutor;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// The fixed 16x16 pixel buffer of one tile, row-major with x outer and z inner.
pub type TilePixels = [Rgba8; TILE_PIXELS];

pub const EMPTY_TILE_PIXELS: TilePixels = [Rgba8::TRANSPARENT; TILE_PIXELS];

/// Linear index of the pixel for column `(x, z)` within a tile.
#[inline]
pub fn pixel_index(x: i32, z: i32) -> usize {
    debug_assert!(x >= 0 && x < TILE_EDGE && z >= 0 && z < TILE_EDGE);
    (x * TILE_EDGE + z) as usize
}

/// Identifier of a host texture created on the owner context.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct DisplayHandleId(pub u64);

#[derive(Debug, Error)]
#[error("display resource failure: {0}")]
pub struct DisplayError(pub String);

/// Owner-bound display resource surface.
///
/// Implementations are only ever invoked from tasks submitted to the [`OwnerExecutor`]; the
/// engine never calls these from a background worker.
pub trait DisplayPort: Send + Sync {
    fn create(&self, edge: u32) -> Result<DisplayHandleId, DisplayError>;
    fn upload(&self, handle: DisplayHandleId, pixels: &[u8]) -> Result<(), DisplayError>;
    fn release(&self, handle: DisplayHandleId);
}

/// View-facing description of a resolved tile.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TileInfo {
    /// The tile's texture, once the owner context has created it. A tile without a handle is
    /// simply not drawn yet.
    pub handle: Option<DisplayHandleId>,
    /// Whether the tile holds real sampled or persisted data rather than a blank placeholder.
    pub generated: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum HandleSlot {
    /// No handle exists and none is being created (initial state, or creation failed).
    Missing,
    /// A creation task has been submitted to the owner executor.
    Pending,
    Ready(DisplayHandleId),
    /// The tile was closed; any handle has been (or will be) released.
    Released,
}

/// One cached 16x16 surface sample.
///
/// Pixel data may be mutated from background workers under the internal mutex. The display
/// handle is created lazily by a task on the owner executor, uploads are marshaled the same
/// way, and `close` marshals the release; none of those block the background path.
pub struct TileImage {
    coord: TileCoord,
    pixels: Mutex<Box<TilePixels>>,
    /// True while the tile still wants a world resample.
    needs_update: AtomicBool,
    /// True once real data (sampled or loaded from disk) landed in the pixels.
    generated: AtomicBool,
    /// True while the pixel buffer is newer than the last display upload.
    dirty_pixels: AtomicBool,
    /// Milliseconds since the engine epoch, updated on every access.
    last_access: AtomicU64,
    closed: AtomicBool,
    handle: Mutex<HandleSlot>,
    display: Arc<dyn DisplayPort>,
    owner: Arc<dyn OwnerExecutor>,
}

impl TileImage {
    /// Creates a blank tile and submits the owner-context task that creates its display handle.
    pub fn create(
        coord: TileCoord,
        now_ms: u64,
        display: Arc<dyn DisplayPort>,
        owner: Arc<dyn OwnerExecutor>,
    ) -> Arc<Self> {
        let tile = Arc::new(Self {
            coord,
            pixels: Mutex::new(Box::new(EMPTY_TILE_PIXELS)),
            needs_update: AtomicBool::new(true),
            generated: AtomicBool::new(false),
            dirty_pixels: AtomicBool::new(false),
            last_access: AtomicU64::new(now_ms),
            closed: AtomicBool::new(false),
            handle: Mutex::new(HandleSlot::Pending),
            display,
            owner,
        });

        let task_tile = tile.clone();
        tile.owner.submit(Box::new(move || {
            let created = task_tile.display.create(TILE_EDGE as u32);
            let mut slot = task_tile.handle.lock();
            match created {
                Ok(id) => {
                    if *slot == HandleSlot::Released {
                        // Closed before the owner context got to us.
                        task_tile.display.release(id);
                    } else {
                        *slot = HandleSlot::Ready(id);
                    }
                }
                Err(e) => {
                    log::warn!("failed to create display handle for {:?}: {}", task_tile.coord, e);
                    if *slot != HandleSlot::Released {
                        *slot = HandleSlot::Missing;
                    }
                }
            }
        }));

        tile
    }

    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    pub fn needs_update(&self) -> bool {
        self.needs_update.load(Ordering::Acquire)
    }

    pub fn clear_needs_update(&self) {
        self.needs_update.store(false, Ordering::Release);
    }

    pub fn is_generated(&self) -> bool {
        self.generated.load(Ordering::Acquire)
    }

    pub fn set_generated(&self) {
        self.generated.store(true, Ordering::Release);
    }

    pub fn touch(&self, now_ms: u64) {
        self.last_access.store(now_ms, Ordering::Relaxed);
    }

    pub fn last_access_ms(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn set_last_access_ms(&self, ms: u64) {
        self.last_access.store(ms, Ordering::Relaxed);
    }

    /// Read-only access to the pixel buffer.
    pub fn with_pixels<R>(&self, f: impl FnOnce(&TilePixels) -> R) -> R {
        f(&self.pixels.lock())
    }

    /// Mutable access to the pixel buffer; marks the display copy stale.
    pub fn with_pixels_mut<R>(&self, f: impl FnOnce(&mut TilePixels) -> R) -> R {
        let result = f(&mut self.pixels.lock());
        self.dirty_pixels.store(true, Ordering::Release);
        result
    }

    pub fn handle_id(&self) -> Option<DisplayHandleId> {
        match *self.handle.lock() {
            HandleSlot::Ready(id) => Some(id),
            _ => None,
        }
    }

    /// View-facing snapshot of this tile's state.
    pub fn info(&self) -> TileInfo {
        TileInfo {
            handle: self.handle_id(),
            generated: self.is_generated(),
        }
    }

    /// Marshals a pixel upload to the owner context if the handle exists and the pixels are
    /// newer than the last upload. Fire-and-forget.
    pub fn push_display_update(&self) {
        let id = match *self.handle.lock() {
            HandleSlot::Ready(id) => id,
            // Keep the dirty bit; a later push retries once the handle exists.
            _ => return,
        };
        if !self.dirty_pixels.swap(false, Ordering::AcqRel) {
            return;
        }

        let bytes: Vec<u8> = bytemuck::cast_slice(&self.pixels.lock()[..]).to_vec();
        let display = self.display.clone();
        let coord = self.coord;
        self.owner.submit(Box::new(move || {
            if let Err(e) = display.upload(id, &bytes) {
                log::warn!("failed to upload tile {:?}: {}", coord, e);
            }
        }));
    }

    /// Releases the tile's resources. The pixel buffer dies with the struct; the display
    /// handle release is marshaled to the owner context. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut slot = self.handle.lock();
        let released = std::mem::replace(&mut *slot, HandleSlot::Released);
        drop(slot);

        if let HandleSlot::Ready(id) = released {
            let display = self.display.clone();
            self.owner.submit(Box::new(move || display.release(id)));
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
