//! The overmap engine: a tile cache and persistent region store for an overhead map of a
//! sparsely-explored voxel world.
//!
//! # Tiles
//!
//! The map is sampled one [`TileImage`] at a time: a 16x16 RGBA snapshot of the topmost visible
//! surface of each world column in the tile's footprint. Sampling walks a vertical column per
//! pixel, which is the dominant cost, so tiles are cached in memory ([`TileCache`]) and persisted
//! to disk ([`RegionStore`]) and only resampled near the viewer.
//!
//! # Regions
//!
//! Tiles are aggregated 32x32 into regions, one file per region, with an in-memory mipmap
//! pyramid per region for zoomed-out overview rendering. Filenames are the sole persistent
//! index; the generated-tile index is rebuilt from a directory listing at startup.
//!
//! # Execution contexts
//!
//! Sampling and disk I/O run on a small fixed worker pool ([`AsyncLoader`]). Display handles
//! are created, uploaded, and released only through tasks submitted to the host's owner
//! executor; background workers never block on them.

mod cache;
mod config;
mod coordinates;
mod engine;
mod loader;
mod palette;
mod region;
mod sampler;
mod scheduler;
mod store;
mod tile;

pub use cache::*;
pub use config::*;
pub use coordinates::*;
pub use engine::*;
pub use loader::*;
pub use palette::*;
pub use region::*;
pub use sampler::*;
pub use scheduler::*;
pub use store::*;
pub use tile::*;

pub use overmap_core::clock::MapClock;
pub use overmap_core::color::Rgba8;
pub use overmap_core::executor::{InlineExecutor, OwnerExecutor, QueuedExecutor};
