//! Run-length decompression for PGS object bitmaps.
//!
//! The scheme is byte-aligned.  A nonzero byte is a single pixel of that
//! palette index.  A zero byte starts an escape code:
//!
//! ```text
//! 0x00 0x00                end of line (pad remainder with index 0)
//! 0x00 0b00LLLLLL          run of L pixels of index 0        (L 1..=63)
//! 0x00 0b01LLLLLL L2       run of (L<<8|L2) pixels of index 0
//! 0x00 0b10LLLLLL V        run of L pixels of index V        (L 1..=63)
//! 0x00 0b11LLLLLL L2 V     run of (L<<8|L2) pixels of index V
//! ```
//!
//! This is the single place where a corrupt stream most commonly
//! surfaces, so every read is bounds-checked and a run may never escape
//! its scanline.

use log::trace;

use crate::pixmap::MAX_PIXELS;
use crate::util::BytesFormatter;

/// Why decompression failed to reproduce the declared pixel grid.
pub type RleError = String;

/// Decompress `data` into exactly `width * height` palette indices in
/// row-major order.
pub fn decompress(width: usize, height: usize, data: &[u8]) -> Result<Vec<u8>, RleError> {
    trace!(
        "decompressing {}x{} object from {:?}",
        width,
        height,
        BytesFormatter(data)
    );
    if width == 0 || height == 0 {
        return Err(format!("degenerate dimensions {}x{}", width, height));
    }
    if width.checked_mul(height).map_or(true, |a| a > MAX_PIXELS) {
        return Err(format!("implausible dimensions {}x{}", width, height));
    }

    let mut indices = vec![0u8; width * height];
    let mut x = 0;
    let mut y = 0;
    let mut i = 0;
    // Each iteration consumes at least one input byte, so the loop is
    // bounded by `data.len()`.
    while i < data.len() {
        if y >= height {
            return Err(format!("trailing RLE data after line {}", height));
        }
        let b = data[i];
        i += 1;
        if b != 0 {
            // Single literal pixel.
            if x >= width {
                return Err(format!("line {} overflows {} pixels", y, width));
            }
            indices[y * width + x] = b;
            x += 1;
            continue;
        }
        let code = *data.get(i).ok_or("escape code is truncated")?;
        i += 1;
        if code == 0 {
            // End of line; the rest of the scanline stays index 0.
            x = 0;
            y += 1;
            continue;
        }
        let long = code & 0x40 != 0;
        let colored = code & 0x80 != 0;
        let mut run = usize::from(code & 0x3f);
        if long {
            let low = *data.get(i).ok_or("long run length is truncated")?;
            i += 1;
            run = run << 8 | usize::from(low);
        }
        let value = if colored {
            let v = *data.get(i).ok_or("run value is truncated")?;
            i += 1;
            v
        } else {
            0
        };
        if run > width - x {
            return Err(format!(
                "run of {} at ({}, {}) overflows {}-pixel line",
                run, x, y, width
            ));
        }
        indices[y * width + x..y * width + x + run].fill(value);
        x += run;
    }

    // Tolerate a stream whose final line omits the closing end-of-line
    // code but is otherwise complete.
    if y == height - 1 && x == width {
        y += 1;
    }
    if y != height {
        return Err(format!(
            "data ended at line {} of {} (column {})",
            y, height, x
        ));
    }
    Ok(indices)
}

/// Reference encoder, used only to verify the decoder round-trips.
#[cfg(test)]
pub fn compress(width: usize, height: usize, indices: &[u8]) -> Vec<u8> {
    assert_eq!(indices.len(), width * height);
    let mut out = Vec::new();
    for line in indices.chunks(width) {
        let mut x = 0;
        while x < width {
            let value = line[x];
            let mut run = 1;
            while x + run < width && line[x + run] == value {
                run += 1;
            }
            // A trailing run of zeros is implied by the end-of-line code.
            if !(value == 0 && x + run == width) {
                encode_run(&mut out, value, run);
            }
            x += run;
        }
        out.extend_from_slice(&[0x00, 0x00]);
    }
    out
}

#[cfg(test)]
fn encode_run(out: &mut Vec<u8>, value: u8, run: usize) {
    assert!(run <= 0x3fff);
    match (value, run) {
        (v, 1..=2) if v != 0 => {
            for _ in 0..run {
                out.push(v);
            }
        }
        (0, r) if r <= 0x3f => out.extend_from_slice(&[0x00, r as u8]),
        (0, r) => out.extend_from_slice(&[0x00, 0x40 | (r >> 8) as u8, r as u8]),
        (v, r) if r <= 0x3f => out.extend_from_slice(&[0x00, 0x80 | r as u8, v]),
        (v, r) => out.extend_from_slice(&[0x00, 0xc0 | (r >> 8) as u8, r as u8, v]),
    }
}

#[test]
fn decompress_single_long_run() {
    // A 4x2 all-index-1 bitmap as one two-byte-coded run per line.
    let data = [0x00, 0x84, 0x01, 0x00, 0x00, 0x00, 0x84, 0x01, 0x00, 0x00];
    assert_eq!(decompress(4, 2, &data).unwrap(), vec![1; 8]);
}

#[test]
fn decompress_pads_line_with_zeros_at_end_of_line() {
    let data = [0x05, 0x05, 0x00, 0x00];
    assert_eq!(decompress(4, 1, &data).unwrap(), vec![5, 5, 0, 0]);
}

#[test]
fn decompress_rejects_overflowing_run() {
    let data = [0x00, 0x85, 0x01, 0x00, 0x00];
    assert!(decompress(4, 1, &data).is_err());
}

#[test]
fn decompress_rejects_underfilled_grid() {
    let data = [0x00, 0x84, 0x01, 0x00, 0x00];
    assert!(decompress(4, 2, &data).is_err());
}

#[test]
fn decompress_rejects_trailing_data() {
    let data = [0x00, 0x84, 0x01, 0x00, 0x00, 0x02];
    assert!(decompress(4, 1, &data).is_err());
}

#[test]
fn decompress_rejects_truncated_escape() {
    assert!(decompress(4, 1, &[0x00]).is_err());
    assert!(decompress(4, 1, &[0x00, 0x44]).is_err());
    assert!(decompress(4, 1, &[0x00, 0x82]).is_err());
}

#[test]
fn decompress_rejects_implausible_dimensions() {
    assert!(decompress(0, 4, &[]).is_err());
    assert!(decompress(0xffff, 0xffff, &[]).is_err());
}

#[test]
fn compress_then_decompress_round_trips() {
    let cases: Vec<(usize, usize, Vec<u8>)> = vec![
        (4, 2, vec![1; 8]),
        (4, 1, vec![5, 5, 0, 0]),
        (6, 2, vec![0, 0, 7, 7, 7, 0, 1, 2, 3, 4, 5, 6]),
        (300, 1, {
            let mut line = vec![9u8; 300];
            line[0] = 0;
            line
        }),
        (5, 3, vec![0; 15]),
    ];
    for (w, h, pixels) in cases {
        let encoded = compress(w, h, &pixels);
        assert_eq!(
            decompress(w, h, &encoded).unwrap(),
            pixels,
            "round trip failed for {}x{}",
            w,
            h
        );
    }
}
