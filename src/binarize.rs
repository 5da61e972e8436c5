//! Convert decoded subtitle images to black and white.
//!
//! Recognition engines want a clean two-tone image.  Transparency decides
//! most of it: fully transparent pixels are background no matter what
//! color they carry.  The rest is a luma threshold, and because source
//! material contrast varies between releases (yellow-on-black vs
//! white-on-black styling), the threshold is a policy, not a constant.

use image::Rgba;
use log::trace;

use crate::palette::luma;
use crate::pixmap::{Pixel, Pixmap, RasterImage};

/// How to pick the luma threshold for one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdPolicy {
    /// Pixels with luma at or above this value are foreground.
    Fixed(u8),
    /// Compute a per-image threshold from the luma histogram of
    /// non-transparent pixels (Otsu's method).
    Adaptive,
}

impl Default for ThresholdPolicy {
    fn default() -> ThresholdPolicy {
        ThresholdPolicy::Adaptive
    }
}

/// Reduce an RGBA image to foreground/background.
///
/// A pixel is foreground when its alpha is at least `alpha_cutoff` and
/// its BT.709 luma is at or above the policy's threshold.  Everything
/// else, including every fully transparent pixel, is background.
pub fn binarize(image: &Pixmap<Rgba<u8>>, policy: ThresholdPolicy, alpha_cutoff: u8) -> RasterImage {
    let threshold = match policy {
        ThresholdPolicy::Fixed(t) => t,
        ThresholdPolicy::Adaptive => {
            let t = otsu_threshold(image, alpha_cutoff);
            trace!("adaptive threshold: {}", t);
            t
        }
    };
    image.map(|px| {
        let Rgba([r, g, b, a]) = px;
        !px.is_transparent() && a >= alpha_cutoff && luma(r, g, b) >= threshold
    })
}

/// Otsu's method over the luma histogram of visible pixels: choose the
/// threshold maximizing between-class variance.
fn otsu_threshold(image: &Pixmap<Rgba<u8>>, alpha_cutoff: u8) -> u8 {
    let mut histogram = [0u32; 256];
    let mut total = 0u32;
    for px in image.pixels() {
        let Rgba([r, g, b, a]) = px;
        if !px.is_transparent() && a >= alpha_cutoff {
            histogram[usize::from(luma(r, g, b))] += 1;
            total += 1;
        }
    }
    if total == 0 {
        return u8::MAX;
    }

    let weighted_sum: u64 = histogram
        .iter()
        .enumerate()
        .map(|(v, &n)| v as u64 * u64::from(n))
        .sum();

    let mut best = (0u8, 0.0f64);
    let mut background_count = 0u64;
    let mut background_sum = 0u64;
    for t in 0..256usize {
        background_count += u64::from(histogram[t]);
        background_sum += t as u64 * u64::from(histogram[t]);
        let foreground_count = u64::from(total) - background_count;
        if background_count == 0 || foreground_count == 0 {
            continue;
        }
        let mean_bg = background_sum as f64 / background_count as f64;
        let mean_fg = (weighted_sum - background_sum) as f64 / foreground_count as f64;
        let variance =
            background_count as f64 * foreground_count as f64 * (mean_bg - mean_fg).powi(2);
        if variance > best.1 {
            // Threshold sits just above the background class.
            best = (t as u8 + 1, variance);
        }
    }
    best.0
}

#[cfg(test)]
fn gray_pixmap(values: &[u8]) -> Pixmap<Rgba<u8>> {
    let mut pixmap = Pixmap::blank(values.len(), 1);
    for (x, &v) in values.iter().enumerate() {
        pixmap.put(x, 0, Rgba([v, v, v, 0xff]));
    }
    pixmap
}

#[test]
fn fixed_threshold_selects_pixels_at_or_above() {
    let pixmap = gray_pixmap(&[0, 99, 100, 101, 255]);
    let raster = binarize(&pixmap, ThresholdPolicy::Fixed(100), 1);
    let pixels: Vec<bool> = raster.pixels().collect();
    assert_eq!(pixels, &[false, false, true, true, true]);
}

#[test]
fn fixed_threshold_is_monotonic() {
    let pixmap = gray_pixmap(&[0, 30, 60, 90, 120, 150, 180, 210, 240]);
    let mut previous = usize::MAX;
    for t in [0u8, 50, 100, 150, 200, 255] {
        let count = binarize(&pixmap, ThresholdPolicy::Fixed(t), 1).foreground_count();
        assert!(count <= previous, "foreground grew as threshold rose");
        previous = count;
    }
}

#[test]
fn transparent_pixels_are_background_regardless_of_luma() {
    let mut pixmap = Pixmap::blank(2, 1);
    pixmap.put(0, 0, Rgba([255, 255, 255, 0]));
    pixmap.put(1, 0, Rgba([255, 255, 255, 0xff]));
    let raster = binarize(&pixmap, ThresholdPolicy::Fixed(0), 1);
    assert_eq!(raster.get(0, 0), false);
    assert_eq!(raster.get(1, 0), true);
}

#[test]
fn adaptive_threshold_separates_bimodal_material() {
    // Dark shadow cluster around 20, bright text cluster around 220.
    let mut values = vec![18u8, 20, 22, 19, 21];
    values.extend_from_slice(&[218, 220, 222, 219, 221]);
    let pixmap = gray_pixmap(&values);
    let raster = binarize(&pixmap, ThresholdPolicy::Adaptive, 1);
    assert_eq!(raster.foreground_count(), 5);
    assert_eq!(raster.get(0, 0), false);
    assert_eq!(raster.get(9, 0), true);
}

#[test]
fn adaptive_threshold_on_fully_transparent_image_is_all_background() {
    let pixmap = Pixmap::<Rgba<u8>>::blank(4, 4);
    let raster = binarize(&pixmap, ThresholdPolicy::Adaptive, 1);
    assert_eq!(raster.foreground_count(), 0);
}
