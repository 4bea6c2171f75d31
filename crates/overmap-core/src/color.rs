use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;

use std::mem;

/// One RGBA sample with 8 bits per channel, stored in `[r, g, b, a]` byte order.
///
/// The in-memory byte order matches the on-disk encoding: a big-endian `u32` read of the four
/// bytes yields `0xRRGGBBAA`.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct Rgba8(pub [u8; 4]);

unsafe impl Zeroable for Rgba8 {}
unsafe impl Pod for Rgba8 {}

const_assert_eq!(mem::size_of::<Rgba8>(), 4);

impl Rgba8 {
    /// Fully transparent black, the "no surface found" sample.
    pub const TRANSPARENT: Self = Self([0; 4]);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self([r, g, b, a])
    }

    pub const fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b, 0xFF])
    }

    /// Packs the sample as `0xRRGGBBAA`, the word written big-endian to region files.
    pub const fn to_bits(self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits.to_be_bytes())
    }

    pub const fn alpha(self) -> u8 {
        self.0[3]
    }

    pub const fn is_transparent(self) -> bool {
        self.0[3] == 0
    }

    /// Per-channel mean of a 2x2 block, alpha included. Used for mipmap downsampling.
    pub fn average4(quad: [Self; 4]) -> Self {
        let mut out = [0u8; 4];
        for (channel, slot) in out.iter_mut().enumerate() {
            let sum: u16 = quad.iter().map(|c| c.0[channel] as u16).sum();
            *slot = (sum / 4) as u8;
        }
        Self(out)
    }
}
