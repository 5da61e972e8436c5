//! Palette tables and colorspace conversion.
//!
//! PGS palettes store YCbCr + alpha quadruples; the BT.709 matrix turns
//! them into RGB once per lookup.  VobSub palettes arrive as RGB in the
//! `.idx` file and skip the conversion entirely.

use image::Rgba;

/// One palette slot: YCbCr color plus alpha, all 8-bit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaletteEntry {
    /// Luma.
    pub y: u8,
    /// Blue-difference chroma.
    pub cb: u8,
    /// Red-difference chroma.
    pub cr: u8,
    /// Alpha; 0 is fully transparent.
    pub alpha: u8,
}

impl PaletteEntry {
    /// Resolve this entry to an RGBA pixel via BT.709.
    pub fn to_rgba(self) -> Rgba<u8> {
        let (r, g, b) = ycbcr_to_rgb(self.y, self.cb, self.cr);
        Rgba([r, g, b, self.alpha])
    }
}

/// A 256-entry palette, versioned by its palette ID.  Undefined slots
/// stay fully transparent.
#[derive(Debug, Clone)]
pub struct PaletteTable {
    /// The palette ID compositions select this table by.
    pub id: u8,
    entries: [PaletteEntry; 256],
}

impl PaletteTable {
    /// A new table with every slot fully transparent.
    pub fn new(id: u8) -> PaletteTable {
        PaletteTable {
            id,
            entries: [PaletteEntry::default(); 256],
        }
    }

    /// Define or overwrite one slot.
    pub fn set(&mut self, index: u8, entry: PaletteEntry) {
        self.entries[usize::from(index)] = entry;
    }

    /// Look up a slot by palette index.
    pub fn get(&self, index: u8) -> PaletteEntry {
        self.entries[usize::from(index)]
    }
}

/// Convert a YCbCr triple to RGB using the BT.709 matrix, clamping each
/// channel to `0..=255`.
pub fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> (u8, u8, u8) {
    let y = f32::from(y);
    let cb = f32::from(cb) - 128.0;
    let cr = f32::from(cr) - 128.0;
    let r = y + 1.5748 * cr;
    let g = y - 0.1873 * cb - 0.4681 * cr;
    let b = y + 1.8556 * cb;
    (clamp_u8(r), clamp_u8(g), clamp_u8(b))
}

/// The BT.709 luma of an RGB pixel, rounded to 8 bits.
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    let y = 0.2126 * f32::from(r) + 0.7152 * f32::from(g) + 0.0722 * f32::from(b);
    clamp_u8(y)
}

fn clamp_u8(v: f32) -> u8 {
    if v <= 0.0 {
        0
    } else if v >= 255.0 {
        255
    } else {
        (v + 0.5) as u8
    }
}

#[test]
fn bt709_is_exact_at_reference_points() {
    // Achromatic points pass luma straight through.
    assert_eq!(ycbcr_to_rgb(235, 128, 128), (235, 235, 235));
    assert_eq!(ycbcr_to_rgb(16, 128, 128), (16, 16, 16));
}

#[test]
fn bt709_clamps_out_of_gamut_values() {
    let (r, _, b) = ycbcr_to_rgb(235, 255, 255);
    assert_eq!(r, 255);
    assert_eq!(b, 255);
    let (r, _, _) = ycbcr_to_rgb(16, 0, 0);
    assert_eq!(r, 0);
}

#[test]
fn luma_weights_sum_to_unity() {
    assert_eq!(luma(255, 255, 255), 255);
    assert_eq!(luma(0, 0, 0), 0);
    assert_eq!(luma(100, 100, 100), 100);
}

#[test]
fn palette_table_defaults_to_transparent() {
    let mut table = PaletteTable::new(0);
    assert_eq!(table.get(42).alpha, 0);
    table.set(42, PaletteEntry { y: 235, cb: 128, cr: 128, alpha: 0xff });
    assert_eq!(table.get(42).to_rgba(), Rgba([235, 235, 235, 0xff]));
}
