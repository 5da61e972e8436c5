//! Decoding Blu-ray PGS (`.sup`) presentation graphic streams.
//!
//! A display set is a burst of segments sharing one presentation time: a
//! composition (PCS) saying what to show, window definitions (WDS)
//! saying where, palette (PDS) and object (ODS) segments carrying the
//! color tables and RLE bitmaps, and an END marker.  Showing nothing is
//! itself a display set, which is how subtitles are cleared.  This
//! module runs the segment stream through a small state machine and
//! emits one event per visible interval.

pub mod rle;
pub mod segment;

use std::collections::HashMap;

use image::Rgba;
use log::{debug, warn};

use crate::binarize::binarize;
use crate::decode::DecodeOptions;
use crate::errors::{DecodeError, DecodeWarning, Result};
use crate::event::{finish_events, DecodeOutcome, PendingEvent};
use crate::palette::PaletteTable;
use crate::pixmap::{Pixmap, RasterImage, MAX_DIMENSION, MAX_PIXELS};
use crate::time::Pts;

use self::segment::{
    ObjectHeader, PresentationComposition, Segment, SegmentReader, Window,
};

/// How long an event left open at end of stream stays visible.
const TRAILING_EVENT_MS: u64 = 3000;

/// Decode a complete `.sup` byte stream into display events.
pub fn decode(input: &[u8], options: &DecodeOptions) -> Result<DecodeOutcome> {
    let mut decoder = Decoder::default();
    for record in SegmentReader::new(input) {
        if let Some(cancel) = &options.cancel {
            if cancel.is_cancelled() {
                return Err(DecodeError::Cancelled);
            }
        }
        let record = record?;
        let pts = record.pts;
        match record.decode()? {
            Segment::PresentationComposition(pcs) => decoder.on_composition(pts, pcs, options),
            Segment::WindowDefinition(windows) => {
                for w in windows {
                    decoder.windows.insert(w.id, w);
                }
            }
            Segment::PaletteDefinition(table) => {
                decoder.palettes.insert(table.id, table);
            }
            Segment::ObjectDefinition(ods) => decoder.on_object(pts, ods),
            Segment::End => decoder.on_end(pts, options),
        }
    }
    Ok(decoder.finish(options))
}

/// An object bitmap under reassembly from one or more ODS fragments.
#[derive(Debug)]
struct ObjectAssembler {
    width: u16,
    height: u16,
    wanted: usize,
    data: Vec<u8>,
    complete: bool,
}

impl ObjectAssembler {
    fn new(header: ObjectHeader) -> ObjectAssembler {
        ObjectAssembler {
            width: header.width,
            height: header.height,
            wanted: header.data_len,
            data: Vec::with_capacity(header.data_len.min(MAX_PIXELS)),
            complete: false,
        }
    }

    fn ready(&self) -> bool {
        self.complete && self.data.len() == self.wanted
    }
}

/// An event that has started but whose end time is not yet known.
#[derive(Debug)]
struct OpenEvent {
    start: Pts,
    forced: bool,
    image: RasterImage,
}

#[derive(Debug, Default)]
struct Decoder {
    palettes: HashMap<u8, PaletteTable>,
    windows: HashMap<u8, Window>,
    objects: HashMap<u16, ObjectAssembler>,
    /// A composition waiting for the rest of its display set.
    pending: Option<(Pts, PresentationComposition)>,
    open: Option<OpenEvent>,
    events: Vec<PendingEvent>,
    warnings: Vec<DecodeWarning>,
}

impl Decoder {
    fn on_composition(&mut self, pts: Pts, pcs: PresentationComposition, options: &DecodeOptions) {
        if pcs.palette_update {
            // Palette-only update; the current display stays up.
            debug!("palette-only composition at {}, palette {}", pts, pcs.palette_id);
            return;
        }
        // A new composition supersedes anything still unresolved.
        self.resolve_pending(options);
        self.close_open(pts);
        if pcs.objects.is_empty() {
            debug!("empty composition at {} clears the display", pts);
        } else {
            self.pending = Some((pts, pcs));
        }
    }

    fn on_object(&mut self, pts: Pts, ods: segment::ObjectDefinition) {
        if let Some(header) = ods.header {
            self.objects.insert(ods.object_id, ObjectAssembler::new(header));
        }
        match self.objects.get_mut(&ods.object_id) {
            Some(assembler) => {
                assembler.data.extend_from_slice(ods.data);
                if ods.last_in_sequence {
                    assembler.complete = true;
                }
            }
            None => {
                warn!(
                    "continuation fragment for unknown object {} at {}",
                    ods.object_id, pts
                );
                self.warnings.push(DecodeWarning::RleLengthMismatch {
                    object_id: ods.object_id,
                    at: pts,
                    detail: "continuation fragment without a first fragment".to_string(),
                });
            }
        }
    }

    fn on_end(&mut self, pts: Pts, options: &DecodeOptions) {
        self.resolve_pending(options);
        // An END sharing the presentation time of the composition it
        // terminates must not close the event that composition opened.
        if self.open.as_ref().map_or(false, |open| pts > open.start) {
            self.close_open(pts);
        }
    }

    fn finish(mut self, options: &DecodeOptions) -> DecodeOutcome {
        self.resolve_pending(options);
        if let Some(open) = self.open.take() {
            let end = open.start.plus_ms(TRAILING_EVENT_MS);
            warn!("stream ended with an open event at {}; closing at {}", open.start, end);
            self.events.push(PendingEvent {
                start: open.start,
                end,
                forced: open.forced,
                image: open.image,
            });
        }
        finish_events(self.events, self.warnings)
    }

    fn close_open(&mut self, end: Pts) {
        if let Some(open) = self.open.take() {
            self.events.push(PendingEvent {
                start: open.start,
                end,
                forced: open.forced,
                image: open.image,
            });
        }
    }

    /// Turn the pending composition into an open event, converting
    /// anything still missing into warnings.  The palette and object
    /// segments of a display set follow its composition and routinely
    /// redefine the IDs used by the previous set, so this runs only once
    /// the whole set is in: at its END marker, at the next composition,
    /// or at end of stream.
    fn resolve_pending(&mut self, options: &DecodeOptions) {
        let Some((at, pcs)) = self.pending.take() else {
            return;
        };
        let palette_ready = self.palettes.contains_key(&pcs.palette_id);
        let objects_ready = pcs
            .objects
            .iter()
            .all(|o| self.objects.get(&o.object_id).map_or(false, ObjectAssembler::ready));
        if !(palette_ready && objects_ready) {
            self.report_unresolved(at, &pcs);
            return;
        }
        if let Some((image, forced)) = self.render(at, &pcs) {
            let raster = binarize(&image, options.threshold, options.alpha_cutoff);
            self.open = Some(OpenEvent {
                start: at,
                forced,
                image: raster,
            });
        }
    }

    /// Explain why a force-dropped composition could not be rendered.
    fn report_unresolved(&mut self, at: Pts, pcs: &PresentationComposition) {
        if !self.palettes.contains_key(&pcs.palette_id) {
            warn!("composition at {} uses undefined palette {}", at, pcs.palette_id);
            self.warnings.push(DecodeWarning::UnknownPaletteId {
                palette_id: pcs.palette_id,
                at,
            });
        }
        for object in &pcs.objects {
            match self.objects.get(&object.object_id) {
                Some(a) if a.ready() => {}
                Some(a) if a.complete => {
                    self.warnings.push(DecodeWarning::RleLengthMismatch {
                        object_id: object.object_id,
                        at,
                        detail: format!(
                            "assembled {} bytes but the object declared {}",
                            a.data.len(),
                            a.wanted
                        ),
                    });
                }
                Some(a) => {
                    warn!(
                        "object {} incomplete at {}: {} of {} bytes",
                        object.object_id,
                        at,
                        a.data.len(),
                        a.wanted
                    );
                    self.warnings.push(DecodeWarning::IncompleteObject {
                        object_id: object.object_id,
                        at,
                        got: a.data.len(),
                        wanted: a.wanted,
                    });
                }
                None => {
                    self.warnings.push(DecodeWarning::IncompleteObject {
                        object_id: object.object_id,
                        at,
                        got: 0,
                        wanted: 0,
                    });
                }
            }
        }
    }

    /// Composite every referenced object into one RGBA image cropped to
    /// the bounding box of the painted area.
    fn render(
        &mut self,
        at: Pts,
        pcs: &PresentationComposition,
    ) -> Option<(Pixmap<Rgba<u8>>, bool)> {
        let Some(palette) = self.palettes.get(&pcs.palette_id) else {
            return None;
        };

        // Work out each object's painted rectangle, clipped to its
        // window when the window is defined.
        let mut placements = Vec::with_capacity(pcs.objects.len());
        let mut bounds: Option<Rect> = None;
        for object in &pcs.objects {
            let Some(assembler) = self.objects.get(&object.object_id) else {
                return None;
            };
            let object_width = usize::from(assembler.width);
            let object_height = usize::from(assembler.height);
            let (crop_x, crop_y, mut width, mut height) = match object.crop {
                Some(crop) => (
                    usize::from(crop.x),
                    usize::from(crop.y),
                    usize::from(crop.width),
                    usize::from(crop.height),
                ),
                None => (0, 0, object_width, object_height),
            };
            width = width.min(object_width.saturating_sub(crop_x));
            height = height.min(object_height.saturating_sub(crop_y));
            let mut rect = Rect {
                x0: usize::from(object.x),
                y0: usize::from(object.y),
                x1: usize::from(object.x) + width,
                y1: usize::from(object.y) + height,
            };
            if let Some(window) = self.windows.get(&object.window_id) {
                rect = rect.intersect(&Rect {
                    x0: usize::from(window.x),
                    y0: usize::from(window.y),
                    x1: usize::from(window.x) + usize::from(window.width),
                    y1: usize::from(window.y) + usize::from(window.height),
                });
            }
            if rect.is_empty() {
                continue;
            }
            bounds = Some(match bounds {
                Some(b) => b.union(&rect),
                None => rect,
            });
            placements.push((object, assembler, rect, crop_x, crop_y));
        }

        let Some(bounds) = bounds else {
            warn!("composition at {} paints nothing", at);
            self.warnings.push(DecodeWarning::EmptyOrDegenerateEvent { start: at, end: at });
            return None;
        };
        let canvas_width = bounds.x1 - bounds.x0;
        let canvas_height = bounds.y1 - bounds.y0;
        // Objects placed far apart can span a huge canvas even when each
        // object is small, so bound both dimensions, not just the area.
        if canvas_width > MAX_DIMENSION
            || canvas_height > MAX_DIMENSION
            || canvas_width.saturating_mul(canvas_height) > MAX_PIXELS
        {
            warn!(
                "composition at {} covers an implausible {}x{} area",
                at, canvas_width, canvas_height
            );
            self.warnings.push(DecodeWarning::EmptyOrDegenerateEvent { start: at, end: at });
            return None;
        }

        let mut canvas = Pixmap::blank(canvas_width, canvas_height);
        let mut forced = false;
        for (object, assembler, rect, crop_x, crop_y) in placements {
            forced = forced || object.forced;
            let indices = match rle::decompress(
                usize::from(assembler.width),
                usize::from(assembler.height),
                &assembler.data,
            ) {
                Ok(indices) => indices,
                Err(detail) => {
                    warn!("object {} at {}: {}", object.object_id, at, detail);
                    self.warnings.push(DecodeWarning::RleLengthMismatch {
                        object_id: object.object_id,
                        at,
                        detail,
                    });
                    return None;
                }
            };
            let object_width = usize::from(assembler.width);
            let origin_x = usize::from(object.x);
            let origin_y = usize::from(object.y);
            for y in rect.y0..rect.y1 {
                let source_y = y - origin_y + crop_y;
                for x in rect.x0..rect.x1 {
                    let source_x = x - origin_x + crop_x;
                    let index = indices[source_y * object_width + source_x];
                    let pixel = palette.get(index).to_rgba();
                    canvas.put(x - bounds.x0, y - bounds.y0, pixel);
                }
            }
        }
        Some((canvas, forced))
    }
}

/// A half-open pixel rectangle.
#[derive(Debug, Clone, Copy)]
struct Rect {
    x0: usize,
    y0: usize,
    x1: usize,
    y1: usize,
}

impl Rect {
    fn is_empty(&self) -> bool {
        self.x1 <= self.x0 || self.y1 <= self.y0
    }

    fn intersect(&self, other: &Rect) -> Rect {
        Rect {
            x0: self.x0.max(other.x0),
            y0: self.y0.max(other.y0),
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
        }
    }

    fn union(&self, other: &Rect) -> Rect {
        Rect {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }
}

#[cfg(test)]
use self::segment::segment_bytes;

#[cfg(test)]
fn white_palette(id: u8) -> Vec<u8> {
    // Index 1 is opaque white; index 0 stays transparent.
    segment_bytes_pds(id, &[(1, 235, 128, 128, 0xff)])
}

#[cfg(test)]
fn segment_bytes_pds(id: u8, entries: &[(u8, u8, u8, u8, u8)]) -> Vec<u8> {
    let mut payload = vec![id, 0x00];
    for &(index, y, cr, cb, alpha) in entries {
        payload.extend_from_slice(&[index, y, cr, cb, alpha]);
    }
    payload
}

#[cfg(test)]
fn ods_4x2(object_id: u16) -> Vec<u8> {
    let rle: &[u8] = &[0x00, 0x84, 0x01, 0x00, 0x00, 0x00, 0x84, 0x01, 0x00, 0x00];
    let mut payload = object_id.to_be_bytes().to_vec();
    payload.extend_from_slice(&[0x00, 0xc0]); // version, first+last
    let declared = (rle.len() + 4) as u32;
    payload.extend_from_slice(&declared.to_be_bytes()[1..4]);
    payload.extend_from_slice(&[0x00, 0x04, 0x00, 0x02]);
    payload.extend_from_slice(rle);
    payload
}

#[cfg(test)]
fn ods_4x1(object_id: u16) -> Vec<u8> {
    let rle: &[u8] = &[0x00, 0x84, 0x01, 0x00, 0x00];
    let mut payload = object_id.to_be_bytes().to_vec();
    payload.extend_from_slice(&[0x00, 0xc0]); // version, first+last
    let declared = (rle.len() + 4) as u32;
    payload.extend_from_slice(&declared.to_be_bytes()[1..4]);
    payload.extend_from_slice(&[0x00, 0x04, 0x00, 0x01]);
    payload.extend_from_slice(rle);
    payload
}

#[cfg(test)]
fn pcs_two_objects(a: (u16, u16, u16), b: (u16, u16, u16)) -> Vec<u8> {
    let mut payload = vec![
        0x07, 0x80, 0x04, 0x38, // 1920x1080
        0x10, 0x00, 0x01, 0x80, // frame rate, number, epoch start
        0x00, 0x00, // no palette update, palette 0
        0x02, // two objects
    ];
    for (object_id, x, y) in [a, b] {
        payload.extend_from_slice(&object_id.to_be_bytes());
        payload.push(0x00); // window 0
        payload.push(0x00); // flags
        payload.extend_from_slice(&x.to_be_bytes());
        payload.extend_from_slice(&y.to_be_bytes());
    }
    payload
}

#[cfg(test)]
fn pcs_one_object(object_id: u16, palette_id: u8) -> Vec<u8> {
    vec![
        0x07, 0x80, 0x04, 0x38, // 1920x1080
        0x10, 0x00, 0x01, 0x80, // frame rate, number, epoch start
        0x00, // no palette update
        palette_id,
        0x01, // one object
        (object_id >> 8) as u8,
        object_id as u8,
        0x00, // window 0
        0x00, // flags
        0x00, 0x00, 0x00, 0x00, // at origin
    ]
}

#[cfg(test)]
fn pcs_empty() -> Vec<u8> {
    vec![0x07, 0x80, 0x04, 0x38, 0x10, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00]
}

#[cfg(test)]
fn wds_4x2() -> Vec<u8> {
    vec![0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x02]
}

#[test]
fn decode_one_display_set_and_clear() {
    let mut stream = Vec::new();
    stream.extend_from_slice(&segment_bytes(0, 0x14, &white_palette(0)));
    stream.extend_from_slice(&segment_bytes(0, 0x15, &ods_4x2(1)));
    stream.extend_from_slice(&segment_bytes(0, 0x17, &wds_4x2()));
    stream.extend_from_slice(&segment_bytes(0, 0x16, &pcs_one_object(1, 0)));
    stream.extend_from_slice(&segment_bytes(0, 0x80, &[]));
    // Ten seconds later, a clearing display set.
    stream.extend_from_slice(&segment_bytes(900_000, 0x16, &pcs_empty()));
    stream.extend_from_slice(&segment_bytes(900_000, 0x80, &[]));

    let outcome = decode(&stream, &DecodeOptions::default()).unwrap();
    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
    assert_eq!(outcome.events.len(), 1);
    let event = &outcome.events[0];
    assert_eq!(event.start_ms(), 0);
    assert_eq!(event.end_ms(), 10_000);
    assert_eq!((event.image.width(), event.image.height()), (4, 2));
    assert_eq!(event.image.foreground_count(), 8);
    assert!(!event.forced);
}

#[test]
fn redefined_object_id_uses_the_new_bitmap() {
    // Real-world segment order: the composition leads its display set
    // and the palette and object definitions follow, reusing the same
    // IDs from one set to the next.
    let mut stream = Vec::new();
    stream.extend_from_slice(&segment_bytes(0, 0x16, &pcs_one_object(1, 0)));
    stream.extend_from_slice(&segment_bytes(0, 0x14, &white_palette(0)));
    stream.extend_from_slice(&segment_bytes(0, 0x15, &ods_4x2(1)));
    stream.extend_from_slice(&segment_bytes(0, 0x80, &[]));
    stream.extend_from_slice(&segment_bytes(450_000, 0x16, &pcs_one_object(1, 0)));
    stream.extend_from_slice(&segment_bytes(450_000, 0x14, &white_palette(0)));
    stream.extend_from_slice(&segment_bytes(450_000, 0x15, &ods_4x1(1)));
    stream.extend_from_slice(&segment_bytes(450_000, 0x80, &[]));
    stream.extend_from_slice(&segment_bytes(900_000, 0x16, &pcs_empty()));
    stream.extend_from_slice(&segment_bytes(900_000, 0x80, &[]));

    let outcome = decode(&stream, &DecodeOptions::default()).unwrap();
    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
    assert_eq!(outcome.events.len(), 2);
    assert_eq!(outcome.events[0].image.foreground_count(), 8);
    assert_eq!(
        (outcome.events[1].image.width(), outcome.events[1].image.height()),
        (4, 1)
    );
    assert_eq!(outcome.events[1].image.foreground_count(), 4);
}

#[test]
fn distant_objects_spanning_an_oversized_canvas_are_dropped() {
    // Low total area, but one canvas dimension far beyond any display.
    let mut stream = Vec::new();
    stream.extend_from_slice(&segment_bytes(
        0,
        0x16,
        &pcs_two_objects((1, 0, 0), (2, 65533, 0)),
    ));
    stream.extend_from_slice(&segment_bytes(0, 0x14, &white_palette(0)));
    stream.extend_from_slice(&segment_bytes(0, 0x15, &ods_4x2(1)));
    stream.extend_from_slice(&segment_bytes(0, 0x15, &ods_4x2(2)));
    stream.extend_from_slice(&segment_bytes(0, 0x80, &[]));

    let outcome = decode(&stream, &DecodeOptions::default()).unwrap();
    assert!(outcome.events.is_empty());
    assert!(outcome
        .warnings
        .iter()
        .any(|w| matches!(w, DecodeWarning::EmptyOrDegenerateEvent { .. })));
}

#[test]
fn trailing_open_event_gets_a_default_duration() {
    let mut stream = Vec::new();
    stream.extend_from_slice(&segment_bytes(90_000, 0x14, &white_palette(0)));
    stream.extend_from_slice(&segment_bytes(90_000, 0x15, &ods_4x2(1)));
    stream.extend_from_slice(&segment_bytes(90_000, 0x16, &pcs_one_object(1, 0)));
    stream.extend_from_slice(&segment_bytes(90_000, 0x80, &[]));

    let outcome = decode(&stream, &DecodeOptions::default()).unwrap();
    assert_eq!(outcome.events.len(), 1);
    assert_eq!(outcome.events[0].start_ms(), 1000);
    assert_eq!(outcome.events[0].end_ms(), 4000);
}

#[test]
fn incomplete_object_is_dropped_with_a_warning() {
    // First fragment only; the object declares more data than it gets.
    let rle_head: &[u8] = &[0x00, 0x84, 0x01];
    let mut ods = 1u16.to_be_bytes().to_vec();
    ods.extend_from_slice(&[0x00, 0x80]); // first, not last
    ods.extend_from_slice(&14u32.to_be_bytes()[1..4]);
    ods.extend_from_slice(&[0x00, 0x04, 0x00, 0x02]);
    ods.extend_from_slice(rle_head);

    let mut stream = Vec::new();
    stream.extend_from_slice(&segment_bytes(0, 0x14, &white_palette(0)));
    stream.extend_from_slice(&segment_bytes(0, 0x15, &ods));
    stream.extend_from_slice(&segment_bytes(0, 0x16, &pcs_one_object(1, 0)));
    stream.extend_from_slice(&segment_bytes(0, 0x80, &[]));
    // A healthy display set afterwards proves the decode continued.
    stream.extend_from_slice(&segment_bytes(900_000, 0x14, &white_palette(0)));
    stream.extend_from_slice(&segment_bytes(900_000, 0x15, &ods_4x2(2)));
    stream.extend_from_slice(&segment_bytes(900_000, 0x16, &pcs_one_object(2, 0)));
    stream.extend_from_slice(&segment_bytes(900_000, 0x80, &[]));
    stream.extend_from_slice(&segment_bytes(1_800_000, 0x16, &pcs_empty()));
    stream.extend_from_slice(&segment_bytes(1_800_000, 0x80, &[]));

    let outcome = decode(&stream, &DecodeOptions::default()).unwrap();
    assert_eq!(outcome.events.len(), 1);
    assert_eq!(outcome.events[0].start_ms(), 10_000);
    assert!(outcome.warnings.iter().any(|w| matches!(
        w,
        DecodeWarning::IncompleteObject { object_id: 1, got: 3, wanted: 10, .. }
    )));
}

#[test]
fn unknown_palette_id_is_dropped_with_a_warning() {
    let mut stream = Vec::new();
    stream.extend_from_slice(&segment_bytes(0, 0x15, &ods_4x2(1)));
    stream.extend_from_slice(&segment_bytes(0, 0x16, &pcs_one_object(1, 7)));
    stream.extend_from_slice(&segment_bytes(0, 0x80, &[]));

    let outcome = decode(&stream, &DecodeOptions::default()).unwrap();
    assert!(outcome.events.is_empty());
    assert!(outcome.warnings.iter().any(|w| matches!(
        w,
        DecodeWarning::UnknownPaletteId { palette_id: 7, .. }
    )));
}

#[test]
fn truncated_stream_is_fatal() {
    let mut stream = segment_bytes(0, 0x14, &white_palette(0));
    stream.truncate(stream.len() - 2);
    let err = decode(&stream, &DecodeOptions::default()).unwrap_err();
    assert!(matches!(err, DecodeError::TruncatedStream { .. }));
}

#[test]
fn decode_is_deterministic() {
    let mut stream = Vec::new();
    stream.extend_from_slice(&segment_bytes(0, 0x14, &white_palette(0)));
    stream.extend_from_slice(&segment_bytes(0, 0x15, &ods_4x2(1)));
    stream.extend_from_slice(&segment_bytes(0, 0x16, &pcs_one_object(1, 0)));
    stream.extend_from_slice(&segment_bytes(0, 0x80, &[]));
    stream.extend_from_slice(&segment_bytes(450_000, 0x16, &pcs_empty()));
    stream.extend_from_slice(&segment_bytes(450_000, 0x80, &[]));

    let a = decode(&stream, &DecodeOptions::default()).unwrap();
    let b = decode(&stream, &DecodeOptions::default()).unwrap();
    assert_eq!(a.events.len(), b.events.len());
    for (x, y) in a.events.iter().zip(&b.events) {
        assert_eq!((x.start, x.end), (y.start, y.end));
        assert_eq!(
            x.image.pixels().collect::<Vec<_>>(),
            y.image.pixels().collect::<Vec<_>>()
        );
    }
}
