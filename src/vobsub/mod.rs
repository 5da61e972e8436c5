//! Decoding DVD VobSub (`.sub` + `.idx`) subtitles.
//!
//! The `.sub` stream is an MPEG-2 Program Stream whose private stream 1
//! packets carry SPU subpicture packets.  The `.idx` file supplies the
//! shared 16-color palette and a timestamp plus byte offset for each
//! subtitle, which is how we find the packets without scanning the whole
//! stream.

pub mod idx;
pub(crate) mod spu;

use image::Rgba;
use log::warn;

use crate::binarize::binarize;
use crate::decode::DecodeOptions;
use crate::errors::{DecodeError, DecodeWarning, Result};
use crate::event::{finish_events, DecodeOutcome, PendingEvent};
use crate::mpeg2::ps;
use crate::pixmap::Pixmap;
use crate::time::Pts;

pub use self::idx::{Index, IndexEntry, Palette};

/// How long a subtitle with no stop date and no successor stays up.
const DEFAULT_DURATION_MS: u64 = 3000;

/// Decode a `.sub` byte stream using its parsed `.idx` index.
pub fn decode(sub: &[u8], index: &Index, options: &DecodeOptions) -> Result<DecodeOutcome> {
    let mut pending = Vec::new();
    let mut warnings = Vec::new();
    let entries = index.entries();
    for (number, entry) in entries.iter().enumerate() {
        if let Some(cancel) = &options.cancel {
            if cancel.is_cancelled() {
                return Err(DecodeError::Cancelled);
            }
        }
        let entry_id = number as u16;
        if entry.filepos >= sub.len() {
            warn!(
                "entry {} points at 0x{:x}, but the stream is only 0x{:x} bytes",
                number,
                entry.filepos,
                sub.len()
            );
            warnings.push(DecodeWarning::IncompleteObject {
                object_id: entry_id,
                at: entry.start,
                got: 0,
                wanted: 0,
            });
            continue;
        }

        let packet = match assemble_packet(&sub[entry.filepos..], entry_id, entry.start)? {
            Ok(packet) => packet,
            Err(warning) => {
                warnings.push(warning);
                continue;
            }
        };
        let parsed = match spu::parse_spu(&packet) {
            Ok(parsed) => parsed,
            Err(detail) => {
                warn!("entry {} at {}: {}", number, entry.start, detail);
                warnings.push(DecodeWarning::RleLengthMismatch {
                    object_id: entry_id,
                    at: entry.start,
                    detail,
                });
                continue;
            }
        };

        let start = entry
            .start
            .plus_ms(u64::from(parsed.start_date.unwrap_or(0)) * 10);
        let end = match parsed.stop_date {
            Some(date) => entry.start.plus_ms(u64::from(date) * 10),
            None => match entries.get(number + 1) {
                Some(next) => next.start,
                None => start.plus_ms(DEFAULT_DURATION_MS),
            },
        };
        let image = render(&parsed, index.palette());
        pending.push(PendingEvent {
            start,
            end,
            forced: parsed.forced,
            image: binarize(&image, options.threshold, options.alpha_cutoff),
        });
    }
    Ok(finish_events(pending, warnings))
}

/// Collect one complete SPU packet starting at the given slice, joining
/// PES fragments as needed.  The outer `Result` is fatal; the inner one
/// is a per-entry warning.
fn assemble_packet(
    input: &[u8],
    entry_id: u16,
    at: Pts,
) -> Result<std::result::Result<Vec<u8>, DecodeWarning>> {
    let mut packets = ps::pes_packets(input);

    // Find the first subpicture packet at this offset.
    let first = loop {
        match packets.next() {
            Some(packet) => {
                let packet = packet?;
                if packet.pes_packet.is_subpicture() {
                    break packet;
                }
            }
            None => {
                return Ok(Err(DecodeWarning::IncompleteObject {
                    object_id: entry_id,
                    at,
                    got: 0,
                    wanted: 0,
                }))
            }
        }
    };
    let substream_id = first.pes_packet.substream_id;
    if first.pes_packet.data.len() < 2 {
        return Ok(Err(DecodeWarning::RleLengthMismatch {
            object_id: entry_id,
            at,
            detail: "subpicture packet is too short".to_string(),
        }));
    }
    let wanted =
        usize::from(first.pes_packet.data[0]) << 8 | usize::from(first.pes_packet.data[1]);
    let mut assembled = first.pes_packet.data.to_owned();

    // Keep pulling PES packets until the declared size is reached.
    while assembled.len() < wanted {
        match packets.next() {
            Some(packet) => {
                let packet = packet?;
                if packet.pes_packet.substream_id != substream_id {
                    warn!(
                        "found substream 0x{:x} while assembling 0x{:x}",
                        packet.pes_packet.substream_id, substream_id
                    );
                    continue;
                }
                assembled.extend_from_slice(packet.pes_packet.data);
            }
            None => {
                return Ok(Err(DecodeWarning::IncompleteObject {
                    object_id: entry_id,
                    at,
                    got: assembled.len(),
                    wanted,
                }))
            }
        }
    }
    if assembled.len() > wanted {
        warn!(
            "assembled 0x{:x} bytes of subpicture data, wanted 0x{:x}",
            assembled.len(),
            wanted
        );
        assembled.truncate(wanted);
    }
    Ok(Ok(assembled))
}

/// Resolve the 2-bit pixel codes through the subtitle's palette and
/// alpha maps into an RGBA image.
fn render(parsed: &spu::Spu, palette: &Palette) -> Pixmap<Rgba<u8>> {
    let width = usize::from(parsed.coordinates.width());
    let height = usize::from(parsed.coordinates.height());
    let mut pixmap = Pixmap::blank(width, height);
    for y in 0..height {
        for x in 0..width {
            let code = usize::from(parsed.image[y * width + x]);
            let rgb = palette[usize::from(parsed.palette_map[code])].0;
            let alpha = parsed.alpha_map[code];
            pixmap.put(x, y, Rgba([rgb[0], rgb[1], rgb[2], alpha << 4 | alpha]));
        }
    }
    pixmap
}

#[cfg(test)]
fn wrap_in_pes(payload: &[u8], substream_id: u8) -> Vec<u8> {
    let mut out = ps::pack_header_bytes();
    out.extend_from_slice(&[0x00, 0x00, 0x01, 0xbd]);
    let length = (payload.len() + 4) as u16;
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(&[0x81, 0x00, 0x00, substream_id]);
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
fn one_subtitle_index() -> Index {
    Index::parse(
        "\
palette: 000000, f0f0f0, cccccc, 999999, 3333fa, 1111bb, fa3333, bb1111, \
33fa33, 11bb11, fafa33, bbbb11, fa33fa, bb11bb, 33fafa, 11bbbb
timestamp: 00:00:01:500, filepos: 000000000
",
    )
    .unwrap()
}

#[test]
fn decode_one_subtitle() {
    let sub = wrap_in_pes(&spu::build_test_spu(), 0x20);
    let outcome = decode(&sub, &one_subtitle_index(), &DecodeOptions::default()).unwrap();
    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
    assert_eq!(outcome.events.len(), 1);
    let event = &outcome.events[0];
    assert_eq!(event.start_ms(), 1500);
    assert_eq!(event.end_ms(), 3000);
    assert_eq!((event.image.width(), event.image.height()), (4, 2));
    assert_eq!(event.image.foreground_count(), 8);
}

#[test]
fn decode_split_subtitle_across_pes_packets() {
    let packet = spu::build_test_spu();
    let (head, tail) = packet.split_at(10);
    let mut sub = wrap_in_pes(head, 0x20);
    sub.extend_from_slice(&wrap_in_pes(tail, 0x20));
    let outcome = decode(&sub, &one_subtitle_index(), &DecodeOptions::default()).unwrap();
    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
    assert_eq!(outcome.events.len(), 1);
    assert_eq!(outcome.events[0].image.foreground_count(), 8);
}

#[test]
fn out_of_range_filepos_is_a_warning() {
    let index = Index::parse(
        "\
palette: 000000, f0f0f0, cccccc, 999999, 3333fa, 1111bb, fa3333, bb1111, \
33fa33, 11bb11, fafa33, bbbb11, fa33fa, bb11bb, 33fafa, 11bbbb
timestamp: 00:00:01:500, filepos: 00000ffff
",
    )
    .unwrap();
    let sub = wrap_in_pes(&spu::build_test_spu(), 0x20);
    let outcome = decode(&sub, &index, &DecodeOptions::default()).unwrap();
    assert!(outcome.events.is_empty());
    assert!(matches!(
        outcome.warnings[0],
        DecodeWarning::IncompleteObject { object_id: 0, .. }
    ));
}

#[test]
fn truncated_spu_packet_is_a_warning() {
    let packet = spu::build_test_spu();
    let sub = wrap_in_pes(&packet[..10], 0x20);
    let outcome = decode(&sub, &one_subtitle_index(), &DecodeOptions::default()).unwrap();
    assert!(outcome.events.is_empty());
    assert!(matches!(
        outcome.warnings[0],
        DecodeWarning::IncompleteObject { got: 10, wanted: 36, .. }
    ));
}
