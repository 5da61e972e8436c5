//! Pixel grids for decoding and binarization.
//!
//! The `image` crate's buffers are the interchange format at the crate
//! boundary, but internally we want a grid that can hold non-graphical
//! data (the binarized mask is a grid of `bool`), so we keep a small
//! generic pixmap of our own.

use cast;
use image::{GrayImage, Luma, Rgba};
use std::fmt;

/// Upper bound on the pixel count of any decoded image.  Both formats
/// declare dimensions in untrusted headers, so anything bigger than this
/// is rejected before allocation rather than trusted.
pub(crate) const MAX_PIXELS: usize = 1 << 24;

/// Upper bound on either dimension of a decoded image.
pub(crate) const MAX_DIMENSION: usize = u16::MAX as usize + 1;

/// A type which can be used as a pixel in a [`Pixmap`].
pub trait Pixel: Clone + Copy + fmt::Debug + 'static {
    /// The background value a blank pixmap is filled with.
    fn default_color() -> Self;

    /// Is this pixel transparent (background)?
    fn is_transparent(self) -> bool;
}

impl Pixel for bool {
    fn default_color() -> Self {
        false
    }

    fn is_transparent(self) -> bool {
        !self
    }
}

impl Pixel for Rgba<u8> {
    fn default_color() -> Self {
        Rgba([0, 0, 0, 0])
    }

    fn is_transparent(self) -> bool {
        self.0[3] == 0
    }
}

/// A width × height grid of pixels in row-major order.
#[derive(Clone, PartialEq, Eq)]
pub struct Pixmap<P: Pixel = Rgba<u8>> {
    data: Vec<P>,
    width: usize,
    height: usize,
}

/// A binarized image: `true` is foreground (text), `false` is background.
pub type RasterImage = Pixmap<bool>;

impl<P: Pixel> Pixmap<P> {
    /// Make sure the specified image size is legal.  Dimensions always
    /// originate from 12- or 16-bit format fields checked against
    /// `MAX_DIMENSION` and `MAX_PIXELS` by the decoders, so a violation
    /// here is a bug.
    fn size_check(width: usize, height: usize) {
        if width > MAX_DIMENSION || height > MAX_DIMENSION {
            panic!("image dimensions {}x{} are too large", width, height);
        }
        if width.checked_mul(height).map_or(true, |a| a > MAX_PIXELS) {
            panic!("image area {}x{} is too large", width, height);
        }
    }

    /// Create a new `Pixmap` filled with `P::default_color()`.
    pub fn blank(width: usize, height: usize) -> Pixmap<P> {
        Pixmap::<P>::size_check(width, height);
        Pixmap {
            data: vec![P::default_color(); width * height],
            width,
            height,
        }
    }

    /// The width of the `Pixmap`.
    pub fn width(&self) -> usize {
        self.width
    }

    /// The height of the `Pixmap`.
    pub fn height(&self) -> usize {
        self.height
    }

    /// Get the pixel at `x` and `y`, or panic if out of bounds.
    pub fn get(&self, x: usize, y: usize) -> P {
        self.bounds_check(x, y);
        self.data[y * self.width + x]
    }

    /// Overwrite the pixel at `x` and `y`, or panic if out of bounds.
    pub fn put(&mut self, x: usize, y: usize, value: P) {
        self.bounds_check(x, y);
        self.data[y * self.width + x] = value;
    }

    /// Iterate over all pixel values in row-major order.
    pub fn pixels(&self) -> impl Iterator<Item = P> + '_ {
        self.data.iter().copied()
    }

    /// Transform each pixel of the image.
    pub fn map<F, P2>(&self, f: F) -> Pixmap<P2>
    where
        F: Fn(P) -> P2,
        P2: Pixel,
    {
        Pixmap {
            data: self.data.iter().map(|p| f(*p)).collect(),
            width: self.width,
            height: self.height,
        }
    }

    fn bounds_check(&self, x: usize, y: usize) {
        if x >= self.width || y >= self.height {
            panic!(
                "pixel ({}, {}) out of bounds for {}x{} pixmap",
                x, y, self.width, self.height
            );
        }
    }
}

impl RasterImage {
    /// How many pixels are foreground?
    pub fn foreground_count(&self) -> usize {
        self.data.iter().filter(|&&p| p).count()
    }

    /// Export as a grayscale image suitable for a recognition engine:
    /// white background, black foreground, with `margin` pixels of white
    /// border on every side.
    pub fn to_gray_image(&self, margin: usize) -> GrayImage {
        let w = u32_from_dim(self.width + 2 * margin);
        let h = u32_from_dim(self.height + 2 * margin);
        let mut img = GrayImage::from_pixel(w.max(1), h.max(1), Luma([0xff]));
        for y in 0..self.height {
            for x in 0..self.width {
                if self.get(x, y) {
                    img.put_pixel(u32_from_dim(x + margin), u32_from_dim(y + margin), Luma([0]));
                }
            }
        }
        img
    }
}

impl<P: Pixel> fmt::Debug for Pixmap<P> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Pixmap")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

#[cfg(target_pointer_width = "64")]
fn u32_from_dim(i: usize) -> u32 {
    // Unreachable failure: `size_check` bounds every dimension well
    // below `u32::MAX`.
    cast::u32(i).expect("pixmap dimension fits in u32")
}

#[cfg(target_pointer_width = "32")]
fn u32_from_dim(i: usize) -> u32 {
    cast::u32(i)
}

#[test]
fn blank_fills_image_with_default() {
    let pixmap = Pixmap::<bool>::blank(1, 2);
    assert_eq!(pixmap.width(), 1);
    assert_eq!(pixmap.height(), 2);
    assert_eq!(pixmap.get(0, 0), false);
}

#[test]
fn put_and_get_provide_access_to_pixels() {
    let mut pixmap = Pixmap::<bool>::blank(1, 1);
    assert_eq!(pixmap.get(0, 0), false);
    pixmap.put(0, 0, true);
    assert_eq!(pixmap.get(0, 0), true);
}

#[test]
#[should_panic]
fn get_panics_when_out_of_bounds() {
    let pixmap = Pixmap::<bool>::blank(1, 1);
    pixmap.get(1, 1);
}

#[test]
fn map_creates_a_new_image_by_applying_a_function() {
    let mut pixmap = Pixmap::<bool>::blank(1, 2);
    pixmap.put(0, 0, true);
    let mapped: Pixmap<Rgba<u8>> = pixmap.map(|p| {
        if p {
            Rgba([0xff, 0, 0, 0xff])
        } else {
            Rgba([0, 0, 0, 0])
        }
    });
    assert_eq!(mapped.get(0, 0), Rgba([0xff, 0, 0, 0xff]));
    assert_eq!(mapped.get(0, 1), Rgba([0, 0, 0, 0]));
}

#[test]
fn to_gray_image_adds_white_margin() {
    let mut raster = RasterImage::blank(2, 1);
    raster.put(0, 0, true);
    let img = raster.to_gray_image(1);
    assert_eq!(img.width(), 4);
    assert_eq!(img.height(), 3);
    assert_eq!(img[(0, 0)], Luma([0xff]));
    assert_eq!(img[(1, 1)], Luma([0]));
    assert_eq!(img[(2, 1)], Luma([0xff]));
}
