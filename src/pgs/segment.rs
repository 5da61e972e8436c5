//! PGS bitstream reading and segment decoding.
//!
//! A `.sup` file is a flat sequence of segments, each framed by a
//! 13-byte header: `"PG"` magic, 32-bit PTS and DTS (90 kHz), a type
//! tag, and a 16-bit payload length.  The reader walks that framing; the
//! per-kind parsers below turn payloads into structured [`Segment`]
//! values.

use log::trace;
use nom::{
    multi::count,
    number::complete::{be_u16, be_u24, be_u8},
    IResult,
};

use crate::errors::{DecodeError, Result};
use crate::palette::{PaletteEntry, PaletteTable};
use crate::time::Pts;

/// Magic bytes at the start of every PGS segment header.
const MAGIC: [u8; 2] = *b"PG";
/// Segment header length: magic + PTS + DTS + type + size.
const HEADER_LEN: usize = 13;

/// Segment type tags.
const TAG_PDS: u8 = 0x14;
const TAG_ODS: u8 = 0x15;
const TAG_PCS: u8 = 0x16;
const TAG_WDS: u8 = 0x17;
const TAG_END: u8 = 0x80;

/// One raw segment record: framing fields plus an unparsed payload slice.
#[derive(Debug)]
pub struct RawSegment<'a> {
    /// Presentation timestamp from the segment header.
    pub pts: Pts,
    /// The segment type tag.
    pub kind: u8,
    /// Byte offset of the header, for error reporting.
    pub offset: usize,
    /// The type-specific payload.
    pub payload: &'a [u8],
}

/// A lazy, finite, non-restartable reader over the raw segments of a
/// `.sup` byte stream.  Consumes exactly each declared payload length
/// before reading the next header.
pub struct SegmentReader<'a> {
    input: &'a [u8],
    offset: usize,
}

impl<'a> SegmentReader<'a> {
    /// Start reading at the beginning of `input`.
    pub fn new(input: &'a [u8]) -> SegmentReader<'a> {
        SegmentReader { input, offset: 0 }
    }
}

impl<'a> Iterator for SegmentReader<'a> {
    type Item = Result<RawSegment<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let remaining = &self.input[self.offset..];
        if remaining.is_empty() {
            return None;
        }
        if remaining.len() < HEADER_LEN {
            return Some(Err(DecodeError::TruncatedStream { offset: self.offset }));
        }
        if remaining[0..2] != MAGIC {
            // Not a valid header; we cannot resynchronize safely.
            return Some(Err(DecodeError::UnknownSegmentType {
                kind: remaining[0],
                offset: self.offset,
            }));
        }
        let pts = u32::from_be_bytes([remaining[2], remaining[3], remaining[4], remaining[5]]);
        let kind = remaining[10];
        let size = usize::from(u16::from_be_bytes([remaining[11], remaining[12]]));
        if !matches!(kind, TAG_PDS | TAG_ODS | TAG_PCS | TAG_WDS | TAG_END) {
            return Some(Err(DecodeError::UnknownSegmentType {
                kind,
                offset: self.offset,
            }));
        }
        if remaining.len() - HEADER_LEN < size {
            return Some(Err(DecodeError::TruncatedStream {
                offset: self.offset + HEADER_LEN,
            }));
        }
        let record = RawSegment {
            pts: Pts::from_ticks(u64::from(pts)),
            kind,
            offset: self.offset,
            payload: &remaining[HEADER_LEN..HEADER_LEN + size],
        };
        trace!(
            "segment 0x{:02x} at 0x{:x}, {} payload bytes, pts {}",
            record.kind,
            record.offset,
            record.payload.len(),
            record.pts
        );
        self.offset += HEADER_LEN + size;
        Some(Ok(record))
    }
}

/// One object placement within a presentation composition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositionObject {
    /// Which object definition to draw.
    pub object_id: u16,
    /// Which window to draw it into.
    pub window_id: u8,
    /// Display even when subtitles are off.
    pub forced: bool,
    /// Horizontal screen position of the object.
    pub x: u16,
    /// Vertical screen position of the object.
    pub y: u16,
    /// Optional crop rectangle within the object.
    pub crop: Option<Crop>,
}

/// A crop rectangle within an object's bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crop {
    /// Left edge of the cropped region within the object.
    pub x: u16,
    /// Top edge of the cropped region within the object.
    pub y: u16,
    /// Width of the cropped region.
    pub width: u16,
    /// Height of the cropped region.
    pub height: u16,
}

/// A decoded presentation composition segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationComposition {
    /// Video frame width, in pixels.
    pub width: u16,
    /// Video frame height, in pixels.
    pub height: u16,
    /// Whether this composition only updates the palette.
    pub palette_update: bool,
    /// Which palette table the composition's objects resolve through.
    pub palette_id: u8,
    /// The objects composited into this frame, in paint order.
    pub objects: Vec<CompositionObject>,
}

/// A window: the crop rectangle objects are drawn into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// Window ID referenced by composition objects.
    pub id: u8,
    /// Left edge on screen.
    pub x: u16,
    /// Top edge on screen.
    pub y: u16,
    /// Window width.
    pub width: u16,
    /// Window height.
    pub height: u16,
}

/// One fragment of an object definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDefinition<'a> {
    /// The object this fragment belongs to.
    pub object_id: u16,
    /// True when this is the first fragment of the object.
    pub first_in_sequence: bool,
    /// True when this is the last fragment of the object.
    pub last_in_sequence: bool,
    /// Declared RLE payload length, width, and height.  Only present on
    /// first fragments.
    pub header: Option<ObjectHeader>,
    /// This fragment's slice of the RLE payload.
    pub data: &'a [u8],
}

/// The size declaration carried by an object's first fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    /// Total RLE payload length across all fragments.
    pub data_len: usize,
    /// Declared bitmap width.
    pub width: u16,
    /// Declared bitmap height.
    pub height: u16,
}

/// A segment decoded from its raw record: a closed set, dispatched by
/// the type tag.
#[derive(Debug)]
pub enum Segment<'a> {
    /// Presentation composition (PCS).
    PresentationComposition(PresentationComposition),
    /// Window definitions (WDS).
    WindowDefinition(Vec<Window>),
    /// Palette definition (PDS).
    PaletteDefinition(PaletteTable),
    /// Object definition fragment (ODS).
    ObjectDefinition(ObjectDefinition<'a>),
    /// End of display set.
    End,
}

impl<'a> RawSegment<'a> {
    /// Decode this record's payload into a structured [`Segment`].
    pub fn decode(&self) -> Result<Segment<'a>> {
        let truncated = || DecodeError::TruncatedStream {
            offset: self.offset + HEADER_LEN,
        };
        match self.kind {
            TAG_PCS => {
                let (_, pcs) = presentation_composition(self.payload).map_err(|_| truncated())?;
                Ok(Segment::PresentationComposition(pcs))
            }
            TAG_WDS => {
                let (_, windows) = window_definition(self.payload).map_err(|_| truncated())?;
                Ok(Segment::WindowDefinition(windows))
            }
            TAG_PDS => Ok(Segment::PaletteDefinition(
                palette_definition(self.payload).ok_or_else(truncated)?,
            )),
            TAG_ODS => {
                let (_, ods) = object_definition(self.payload).map_err(|_| truncated())?;
                Ok(Segment::ObjectDefinition(ods))
            }
            TAG_END => Ok(Segment::End),
            // The reader never yields any other tag.
            kind => Err(DecodeError::UnknownSegmentType {
                kind,
                offset: self.offset,
            }),
        }
    }
}

fn composition_object(i: &[u8]) -> IResult<&[u8], CompositionObject> {
    let (i, object_id) = be_u16(i)?;
    let (i, window_id) = be_u8(i)?;
    let (i, flags) = be_u8(i)?;
    let (i, x) = be_u16(i)?;
    let (i, y) = be_u16(i)?;
    let cropped = flags & 0x40 != 0;
    let forced = flags & 0x80 != 0;
    let (i, crop) = if cropped {
        let (i, cx) = be_u16(i)?;
        let (i, cy) = be_u16(i)?;
        let (i, cw) = be_u16(i)?;
        let (i, ch) = be_u16(i)?;
        (
            i,
            Some(Crop {
                x: cx,
                y: cy,
                width: cw,
                height: ch,
            }),
        )
    } else {
        (i, None)
    };
    Ok((
        i,
        CompositionObject {
            object_id,
            window_id,
            forced,
            x,
            y,
            crop,
        },
    ))
}

fn presentation_composition(i: &[u8]) -> IResult<&[u8], PresentationComposition> {
    let (i, width) = be_u16(i)?;
    let (i, height) = be_u16(i)?;
    let (i, _frame_rate) = be_u8(i)?;
    let (i, _composition_number) = be_u16(i)?;
    let (i, _composition_state) = be_u8(i)?;
    let (i, palette_update_flag) = be_u8(i)?;
    let (i, palette_id) = be_u8(i)?;
    let (i, object_count) = be_u8(i)?;
    let (i, objects) = count(composition_object, usize::from(object_count))(i)?;
    Ok((
        i,
        PresentationComposition {
            width,
            height,
            palette_update: palette_update_flag == 0x80,
            palette_id,
            objects,
        },
    ))
}

fn window(i: &[u8]) -> IResult<&[u8], Window> {
    let (i, id) = be_u8(i)?;
    let (i, x) = be_u16(i)?;
    let (i, y) = be_u16(i)?;
    let (i, width) = be_u16(i)?;
    let (i, height) = be_u16(i)?;
    Ok((
        i,
        Window {
            id,
            x,
            y,
            width,
            height,
        },
    ))
}

fn window_definition(i: &[u8]) -> IResult<&[u8], Vec<Window>> {
    let (i, window_count) = be_u8(i)?;
    count(window, usize::from(window_count))(i)
}

/// Palette entries are fixed 5-byte records (index, Y, Cr, Cb, alpha);
/// any trailing partial record is ignored, as reference decoders do.
fn palette_definition(payload: &[u8]) -> Option<PaletteTable> {
    let (&id, rest) = payload.split_first()?;
    let (_version, rest) = rest.split_first()?;
    let mut table = PaletteTable::new(id);
    for entry in rest.chunks_exact(5) {
        table.set(
            entry[0],
            PaletteEntry {
                y: entry[1],
                cr: entry[2],
                cb: entry[3],
                alpha: entry[4],
            },
        );
    }
    Some(table)
}

fn object_definition(i: &[u8]) -> IResult<&[u8], ObjectDefinition> {
    let (i, object_id) = be_u16(i)?;
    let (i, _version) = be_u8(i)?;
    let (i, sequence_flags) = be_u8(i)?;
    let first_in_sequence = sequence_flags & 0x80 != 0;
    let last_in_sequence = sequence_flags & 0x40 != 0;
    let (data, header) = if first_in_sequence {
        let (i, data_len) = be_u24(i)?;
        let (i, width) = be_u16(i)?;
        let (i, height) = be_u16(i)?;
        // The declared length counts the width and height fields too.
        let rle_len = (data_len as usize).saturating_sub(4);
        (
            i,
            Some(ObjectHeader {
                data_len: rle_len,
                width,
                height,
            }),
        )
    } else {
        (i, None)
    };
    Ok((
        &[][..],
        ObjectDefinition {
            object_id,
            first_in_sequence,
            last_in_sequence,
            header,
            data,
        },
    ))
}

#[cfg(test)]
pub(crate) fn segment_bytes(pts_ticks: u32, kind: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&pts_ticks.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.push(kind);
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

#[test]
fn reader_yields_segments_and_stops_at_end_of_input() {
    let mut stream = segment_bytes(900, TAG_END, &[]);
    stream.extend_from_slice(&segment_bytes(1800, TAG_END, &[]));
    let segments: Vec<_> = SegmentReader::new(&stream)
        .collect::<Result<Vec<_>>>()
        .unwrap();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].pts, Pts::from_ticks(900));
    assert_eq!(segments[1].offset, HEADER_LEN);
}

#[test]
fn reader_fails_on_truncated_payload() {
    let mut stream = segment_bytes(0, TAG_PDS, &[0x00, 0x00]);
    stream.truncate(stream.len() - 1);
    let err = SegmentReader::new(&stream).next().unwrap().unwrap_err();
    assert!(matches!(err, DecodeError::TruncatedStream { .. }));
}

#[test]
fn reader_fails_on_unknown_segment_type() {
    let stream = segment_bytes(0, 0x42, &[]);
    let err = SegmentReader::new(&stream).next().unwrap().unwrap_err();
    assert!(matches!(
        err,
        DecodeError::UnknownSegmentType { kind: 0x42, .. }
    ));
}

#[test]
fn reader_fails_on_bad_magic() {
    let stream = [0xde, 0xad, 0, 0, 0, 0, 0, 0, 0, 0, 0x80, 0, 0];
    let err = SegmentReader::new(&stream).next().unwrap().unwrap_err();
    assert!(matches!(err, DecodeError::UnknownSegmentType { .. }));
}

#[test]
fn decode_presentation_composition() {
    let payload = [
        0x07, 0x80, 0x04, 0x38, // 1920x1080
        0x10, // frame rate
        0x00, 0x01, // composition number
        0x80, // epoch start
        0x00, // no palette update
        0x02, // palette id
        0x01, // one object
        0x00, 0x05, // object id
        0x01, // window id
        0x00, // flags
        0x00, 0x64, 0x00, 0xc8, // x=100, y=200
    ];
    let raw = segment_bytes(0, TAG_PCS, &payload);
    let record = SegmentReader::new(&raw).next().unwrap().unwrap();
    match record.decode().unwrap() {
        Segment::PresentationComposition(pcs) => {
            assert_eq!(pcs.width, 1920);
            assert_eq!(pcs.height, 1080);
            assert_eq!(pcs.palette_id, 2);
            assert!(!pcs.palette_update);
            assert_eq!(
                pcs.objects,
                vec![CompositionObject {
                    object_id: 5,
                    window_id: 1,
                    forced: false,
                    x: 100,
                    y: 200,
                    crop: None,
                }]
            );
        }
        other => panic!("expected PCS, got {:?}", other),
    }
}

#[test]
fn decode_window_definition() {
    let payload = [0x01, 0x07, 0x00, 0x0a, 0x00, 0x14, 0x00, 0x1e, 0x00, 0x28];
    let raw = segment_bytes(0, TAG_WDS, &payload);
    let record = SegmentReader::new(&raw).next().unwrap().unwrap();
    match record.decode().unwrap() {
        Segment::WindowDefinition(windows) => {
            assert_eq!(
                windows,
                vec![Window {
                    id: 7,
                    x: 10,
                    y: 20,
                    width: 30,
                    height: 40,
                }]
            );
        }
        other => panic!("expected WDS, got {:?}", other),
    }
}

#[test]
fn decode_palette_definition_stores_ycrcb_order() {
    let payload = [
        0x03, 0x00, // palette id 3, version 0
        0x01, 235, 130, 120, 0xff, // index 1: Y=235, Cr=130, Cb=120
    ];
    let raw = segment_bytes(0, TAG_PDS, &payload);
    let record = SegmentReader::new(&raw).next().unwrap().unwrap();
    match record.decode().unwrap() {
        Segment::PaletteDefinition(table) => {
            assert_eq!(table.id, 3);
            let entry = table.get(1);
            assert_eq!((entry.y, entry.cr, entry.cb, entry.alpha), (235, 130, 120, 0xff));
            assert_eq!(table.get(0).alpha, 0);
        }
        other => panic!("expected PDS, got {:?}", other),
    }
}

#[test]
fn decode_object_definition_first_and_continuation() {
    let first = [
        0x00, 0x09, // object id 9
        0x00, // version
        0x80, // first in sequence
        0x00, 0x00, 0x08, // declared length 8 (4 header + 4 RLE)
        0x00, 0x04, 0x00, 0x02, // 4x2
        0xaa, 0xbb,
    ];
    let raw = segment_bytes(0, TAG_ODS, &first);
    let record = SegmentReader::new(&raw).next().unwrap().unwrap();
    match record.decode().unwrap() {
        Segment::ObjectDefinition(ods) => {
            assert!(ods.first_in_sequence);
            assert!(!ods.last_in_sequence);
            let header = ods.header.unwrap();
            assert_eq!((header.width, header.height, header.data_len), (4, 2, 4));
            assert_eq!(ods.data, &[0xaa, 0xbb]);
        }
        other => panic!("expected ODS, got {:?}", other),
    }

    let continuation = [0x00, 0x09, 0x00, 0x40, 0xcc, 0xdd];
    let raw = segment_bytes(0, TAG_ODS, &continuation);
    let record = SegmentReader::new(&raw).next().unwrap().unwrap();
    match record.decode().unwrap() {
        Segment::ObjectDefinition(ods) => {
            assert!(!ods.first_in_sequence);
            assert!(ods.last_in_sequence);
            assert!(ods.header.is_none());
            assert_eq!(ods.data, &[0xcc, 0xdd]);
        }
        other => panic!("expected ODS, got {:?}", other),
    }
}
