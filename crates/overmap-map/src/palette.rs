use overmap_core::color::Rgba8;
use overmap_core::SmallKeyHashMap;

/// An identifier for one world material, assigned by the host.
pub type MaterialId = u16;

/// Fallback color for materials without a registered entry.
pub const DEFAULT_MATERIAL_COLOR: Rgba8 = Rgba8::opaque(0x80, 0x80, 0x80);

/// Maps a material to the RGBA drawn on the overhead map.
pub trait ColorPalette: Send + Sync {
    fn color_for(&self, material: MaterialId) -> Rgba8;
}

/// Table-backed palette returning a fixed default gray for unknown materials.
#[derive(Clone, Debug, Default)]
pub struct MaterialColors {
    table: SmallKeyHashMap<MaterialId, Rgba8>,
}

impl MaterialColors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, material: MaterialId, color: Rgba8) {
        self.table.insert(material, color);
    }
}

impl ColorPalette for MaterialColors {
    fn color_for(&self, material: MaterialId) -> Rgba8 {
        self.table
            .get(&material)
            .copied()
            .unwrap_or(DEFAULT_MATERIAL_COLOR)
    }
}
