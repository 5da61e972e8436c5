//! End-to-end decodes of small hand-built streams.

use subraster::{
    decode, decode_pgs, decode_vobsub, CancelToken, ContainerKind, DecodeError, DecodeOptions,
    DecodeStatus,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Frame a PGS segment: magic, PTS, DTS, type, length, payload.
fn segment(pts: u32, kind: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = b"PG".to_vec();
    out.extend_from_slice(&pts.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.push(kind);
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

/// A palette whose index 1 is opaque white.
fn white_palette() -> Vec<u8> {
    vec![0x00, 0x00, 0x01, 235, 128, 128, 0xff]
}

/// A 4x2 object that is entirely palette index 1.
fn ods_4x2(object_id: u16) -> Vec<u8> {
    let rle: &[u8] = &[0x00, 0x84, 0x01, 0x00, 0x00, 0x00, 0x84, 0x01, 0x00, 0x00];
    let mut payload = object_id.to_be_bytes().to_vec();
    payload.extend_from_slice(&[0x00, 0xc0]);
    payload.extend_from_slice(&((rle.len() + 4) as u32).to_be_bytes()[1..4]);
    payload.extend_from_slice(&[0x00, 0x04, 0x00, 0x02]);
    payload.extend_from_slice(rle);
    payload
}

fn pcs(object_id: Option<u16>, forced: bool) -> Vec<u8> {
    let mut payload = vec![
        0x07, 0x80, 0x04, 0x38, // 1920x1080
        0x10, 0x00, 0x01, 0x80, // frame rate, number, state
        0x00, 0x00, // no palette update, palette 0
    ];
    match object_id {
        Some(id) => {
            payload.push(0x01);
            payload.extend_from_slice(&id.to_be_bytes());
            payload.push(0x00); // window 0
            payload.push(if forced { 0x80 } else { 0x00 });
            payload.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        }
        None => payload.push(0x00),
    }
    payload
}

/// One complete display set showing `object_id` at time `pts`.
fn display_set(pts: u32, object_id: u16, forced: bool) -> Vec<u8> {
    let mut out = segment(pts, 0x14, &white_palette());
    out.extend_from_slice(&segment(pts, 0x15, &ods_4x2(object_id)));
    out.extend_from_slice(&segment(pts, 0x16, &pcs(Some(object_id), forced)));
    out.extend_from_slice(&segment(pts, 0x80, &[]));
    out
}

/// A display set that clears the screen at time `pts`.
fn clearing_set(pts: u32) -> Vec<u8> {
    let mut out = segment(pts, 0x16, &pcs(None, false));
    out.extend_from_slice(&segment(pts, 0x80, &[]));
    out
}

const EXAMPLE_IDX: &str = "\
# VobSub index file, v7 (do not modify this line!)
palette: 000000, f0f0f0, cccccc, 999999, 3333fa, 1111bb, fa3333, bb1111, \
33fa33, 11bb11, fafa33, bbbb11, fa33fa, bb11bb, 33fafa, 11bbbb
timestamp: 00:00:01:500, filepos: 000000000
";

/// A 4x2 all-code-1 SPU packet wrapped in a pack and a PES packet.
fn example_sub_stream() -> Vec<u8> {
    let mut spu = Vec::new();
    spu.extend_from_slice(&36u16.to_be_bytes());
    spu.extend_from_slice(&6u16.to_be_bytes());
    spu.extend_from_slice(&[0x11, 0x11]); // both RLE fields
    spu.extend_from_slice(&0u16.to_be_bytes());
    spu.extend_from_slice(&30u16.to_be_bytes());
    spu.push(0x01);
    spu.extend_from_slice(&[0x03, 0x00, 0x10]);
    spu.extend_from_slice(&[0x04, 0x00, 0xf0]);
    spu.extend_from_slice(&[0x05, 0x06, 0x40, 0x67, 0x03, 0x20, 0x33]);
    spu.extend_from_slice(&[0x06, 0x00, 0x04, 0x00, 0x05]);
    spu.push(0xff);
    spu.extend_from_slice(&150u16.to_be_bytes());
    spu.extend_from_slice(&30u16.to_be_bytes());
    spu.extend_from_slice(&[0x02, 0xff]);

    let mut out = vec![
        0x00, 0x00, 0x01, 0xba, // pack start
        0x44, 0x02, 0xc4, 0x82, 0x04, 0xa9, 0x00, 0x00, 0x03, 0xf8,
    ];
    out.extend_from_slice(&[0x00, 0x00, 0x01, 0xbd]);
    out.extend_from_slice(&((spu.len() + 4) as u16).to_be_bytes());
    out.extend_from_slice(&[0x81, 0x00, 0x00, 0x20]);
    out.extend_from_slice(&spu);
    out
}

#[test]
fn pgs_display_and_clear_yields_one_event() {
    init_logging();
    let mut stream = display_set(0, 1, false);
    stream.extend_from_slice(&clearing_set(900_000));

    let outcome = decode_pgs(&stream, &DecodeOptions::default()).unwrap();
    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
    assert_eq!(outcome.status(), DecodeStatus::Decoded);
    assert_eq!(outcome.events.len(), 1);
    let event = &outcome.events[0];
    assert_eq!((event.start_ms(), event.end_ms()), (0, 10_000));
    assert_eq!((event.image.width(), event.image.height()), (4, 2));
    assert_eq!(event.image.foreground_count(), 8);
}

#[test]
fn pgs_later_end_segment_closes_the_event() {
    init_logging();
    // Display set at time zero, then a lone end segment ten seconds in.
    let mut stream = display_set(0, 1, false);
    stream.extend_from_slice(&segment(900_000, 0x80, &[]));

    let outcome = decode_pgs(&stream, &DecodeOptions::default()).unwrap();
    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
    assert_eq!(outcome.events.len(), 1);
    let event = &outcome.events[0];
    assert_eq!((event.start_ms(), event.end_ms()), (0, 10_000));
    assert_eq!(event.image.foreground_count(), 8);
}

#[test]
fn pgs_events_are_ordered_and_non_overlapping() {
    init_logging();
    let mut stream = display_set(0, 1, false);
    stream.extend_from_slice(&display_set(450_000, 2, false));
    stream.extend_from_slice(&clearing_set(1_350_000));

    let outcome = decode_pgs(&stream, &DecodeOptions::default()).unwrap();
    assert_eq!(outcome.events.len(), 2);
    assert_eq!(
        (outcome.events[0].start_ms(), outcome.events[0].end_ms()),
        (0, 5000)
    );
    assert_eq!(
        (outcome.events[1].start_ms(), outcome.events[1].end_ms()),
        (5000, 15_000)
    );
    for pair in outcome.events.windows(2) {
        assert!(pair[0].end <= pair[1].start);
    }
    for (i, event) in outcome.events.iter().enumerate() {
        assert_eq!(event.index, i);
        assert!(event.start < event.end);
    }
}

#[test]
fn pgs_forced_flag_is_propagated() {
    init_logging();
    let mut stream = display_set(0, 1, true);
    stream.extend_from_slice(&clearing_set(900_000));
    let outcome = decode_pgs(&stream, &DecodeOptions::default()).unwrap();
    assert!(outcome.events[0].forced);
}

#[test]
fn pgs_unknown_segment_type_is_fatal() {
    init_logging();
    let mut stream = display_set(0, 1, false);
    stream.extend_from_slice(&segment(0, 0x42, &[]));
    let err = decode_pgs(&stream, &DecodeOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        DecodeError::UnknownSegmentType { kind: 0x42, .. }
    ));
}

#[test]
fn pgs_decode_is_deterministic() {
    init_logging();
    let mut stream = display_set(0, 1, false);
    stream.extend_from_slice(&clearing_set(450_000));
    let a = decode_pgs(&stream, &DecodeOptions::default()).unwrap();
    let b = decode_pgs(&stream, &DecodeOptions::default()).unwrap();
    assert_eq!(a.events.len(), b.events.len());
    for (x, y) in a.events.iter().zip(&b.events) {
        assert_eq!((x.start, x.end, x.forced), (y.start, y.end, y.forced));
        assert!(x.image.pixels().eq(y.image.pixels()));
    }
}

#[test]
fn cancellation_aborts_decoding() {
    init_logging();
    let token = CancelToken::new();
    token.cancel();
    let options = DecodeOptions {
        cancel: Some(token),
        ..DecodeOptions::default()
    };
    let stream = display_set(0, 1, false);
    assert!(matches!(
        decode_pgs(&stream, &options).unwrap_err(),
        DecodeError::Cancelled
    ));
    assert!(matches!(
        decode_vobsub(&example_sub_stream(), EXAMPLE_IDX, &options).unwrap_err(),
        DecodeError::Cancelled
    ));
}

#[test]
fn vobsub_end_to_end() {
    init_logging();
    let outcome = decode(
        ContainerKind::VobSub,
        &example_sub_stream(),
        Some(EXAMPLE_IDX),
        &DecodeOptions::default(),
    )
    .unwrap();
    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
    assert_eq!(outcome.events.len(), 1);
    let event = &outcome.events[0];
    assert_eq!((event.start_ms(), event.end_ms()), (1500, 3000));
    assert_eq!(event.image.foreground_count(), 8);
}

#[test]
fn vobsub_without_index_is_fatal() {
    init_logging();
    let err = decode(
        ContainerKind::VobSub,
        &example_sub_stream(),
        None,
        &DecodeOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, DecodeError::MissingIndexFile { .. }));
}

#[test]
fn empty_input_decodes_to_no_usable_events() {
    init_logging();
    let outcome = decode_pgs(&[], &DecodeOptions::default()).unwrap();
    assert_eq!(outcome.status(), DecodeStatus::NoUsableEvents);
    assert!(outcome.events.is_empty());
}
