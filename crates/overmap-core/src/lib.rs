pub mod clock;
pub mod color;
pub mod executor;

use ahash::{AHashMap, AHashSet};
pub type SmallKeyHashMap<K, V> = AHashMap<K, V>;
pub type SmallKeyHashSet<K> = AHashSet<K>;

// Re-exports.
pub use bytemuck;
pub use static_assertions;
