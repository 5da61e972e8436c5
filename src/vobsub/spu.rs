//! DVD subpicture (SPU) packets.
//!
//! For background, see [this documentation on the DVD subtitle
//! format][subs].  An SPU packet carries two interlaced fields of 2-bit
//! run-length data plus a chain of control sequences giving timing,
//! position, and the 4-entry palette and alpha maps.
//!
//! [subs]: http://sam.zoy.org/writings/dvd/subtitles/

use log::{trace, warn};
use nom::{
    branch::alt,
    bytes::complete::{tag, take, take_until},
    combinator::{map, value},
    multi::many_till,
    number::complete::be_u16,
    sequence::preceded,
    IResult,
};

use crate::pixmap::MAX_PIXELS;
use crate::util::BytesFormatter;

/// Location at which to display the subtitle, with right and bottom
/// edges inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coordinates {
    x1: u16,
    y1: u16,
    x2: u16,
    y2: u16,
}

impl Coordinates {
    /// The leftmost edge of the subtitle.
    pub fn left(&self) -> u16 {
        self.x1
    }

    /// The topmost edge of the subtitle.
    pub fn top(&self) -> u16 {
        self.y1
    }

    /// The width of the subtitle.
    pub fn width(&self) -> u16 {
        self.x2 + 1 - self.x1
    }

    /// The height of the subtitle.
    pub fn height(&self) -> u16 {
        self.y2 + 1 - self.y1
    }
}

/// Parse four 4-bit values from two bytes.
fn nibble_pairs(i: &[u8]) -> IResult<&[u8], [u8; 4]> {
    let (i, b) = take(2usize)(i)?;
    Ok((i, [b[0] >> 4, b[0] & 0x0f, b[1] >> 4, b[1] & 0x0f]))
}

#[test]
fn parse_nibble_pairs() {
    assert_eq!(
        nibble_pairs(&[0x03, 0x10][..]),
        Ok((&[][..], [0x00, 0x03, 0x01, 0x00]))
    );
}

/// Parse four packed 12-bit coordinates as a rectangle.
fn coordinates(i: &[u8]) -> IResult<&[u8], Coordinates> {
    let (i, b) = take(6usize)(i)?;
    Ok((
        i,
        Coordinates {
            x1: u16::from(b[0]) << 4 | u16::from(b[1] >> 4),
            x2: u16::from(b[1] & 0x0f) << 8 | u16::from(b[2]),
            y1: u16::from(b[3]) << 4 | u16::from(b[4] >> 4),
            y2: u16::from(b[4] & 0x0f) << 8 | u16::from(b[5]),
        },
    ))
}

/// Parse a pair of 16-bit RLE field offsets.
fn rle_offsets(i: &[u8]) -> IResult<&[u8], [u16; 2]> {
    let (i, first) = be_u16(i)?;
    let (i, second) = be_u16(i)?;
    Ok((i, [first, second]))
}

/// Skip a color/contrast change command; the payload starts with its own
/// length, which includes the length field itself.
fn color_change(i: &[u8]) -> IResult<&[u8], ()> {
    let (i, size) = be_u16(i)?;
    let (i, _) = take(usize::from(size).saturating_sub(2))(i)?;
    Ok((i, ()))
}

/// Individual commands which may appear in a control sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
enum ControlCommand<'a> {
    /// Display this subtitle even if subtitles are turned off.
    Force,
    /// Start displaying at this sequence's date.
    StartDate,
    /// Stop displaying at this sequence's date.
    StopDate,
    /// Map each of the four pixel codes to a 4-bit palette index.
    Palette([u8; 4]),
    /// Map each of the four pixel codes to 4 bits of alpha.
    Alpha([u8; 4]),
    /// Where on screen to display the subtitle.
    Coordinates(Coordinates),
    /// Offsets of the first and second interlaced field in the packet.
    RleOffsets([u16; 2]),
    /// A mid-display color/contrast change, which we skip over.
    ColorChange,
    /// Trailing data we don't know how to parse.
    Unsupported(&'a [u8]),
}

fn control_command(i: &[u8]) -> IResult<&[u8], ControlCommand> {
    alt((
        value(ControlCommand::Force, tag(&[0x00][..])),
        value(ControlCommand::StartDate, tag(&[0x01][..])),
        value(ControlCommand::StopDate, tag(&[0x02][..])),
        map(
            preceded(tag(&[0x03][..]), nibble_pairs),
            ControlCommand::Palette,
        ),
        map(
            preceded(tag(&[0x04][..]), nibble_pairs),
            ControlCommand::Alpha,
        ),
        map(
            preceded(tag(&[0x05][..]), coordinates),
            ControlCommand::Coordinates,
        ),
        map(
            preceded(tag(&[0x06][..]), rle_offsets),
            ControlCommand::RleOffsets,
        ),
        value(
            ControlCommand::ColorChange,
            preceded(tag(&[0x07][..]), color_change),
        ),
        // Capture anything else so we have something to log.  The `next`
        // field still lets us find the following control sequence.
        map(take_until(&[0xff][..]), ControlCommand::Unsupported),
    ))(i)
}

/// The control packet for a subtitle.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ControlSequence<'a> {
    /// Display time, in 1/100ths of a second after the packet's base
    /// time.
    date: u16,
    /// Offset of the next control sequence, relative to the start of the
    /// packet.  A sequence pointing at itself is the last one.
    next: u16,
    commands: Vec<ControlCommand<'a>>,
}

fn control_sequence(i: &[u8]) -> IResult<&[u8], ControlSequence> {
    let (i, date) = be_u16(i)?;
    let (i, next) = be_u16(i)?;
    let (i, (commands, _)) = many_till(control_command, tag(&[0xff][..]))(i)?;
    Ok((
        i,
        ControlSequence {
            date,
            next,
            commands,
        },
    ))
}

#[test]
fn parse_control_sequence() {
    let input_1 = &[
        0x00, 0x00, 0x0f, 0x41, // date, next
        0x01, // start date
        0x03, 0x03, 0x10, // palette
        0x04, 0xff, 0xf0, // alpha
        0x05, 0x29, 0xb4, 0xe6, 0x3c, 0x54, 0x00, // coordinates
        0x06, 0x00, 0x04, 0x07, 0x7b, // RLE offsets
        0xff,
    ][..];
    let expected_1 = ControlSequence {
        date: 0x0000,
        next: 0x0f41,
        commands: vec![
            ControlCommand::StartDate,
            ControlCommand::Palette([0x0, 0x3, 0x1, 0x0]),
            ControlCommand::Alpha([0xf, 0xf, 0xf, 0x0]),
            ControlCommand::Coordinates(Coordinates {
                x1: 0x29b,
                x2: 0x4e6,
                y1: 0x3c5,
                y2: 0x400,
            }),
            ControlCommand::RleOffsets([0x0004, 0x077b]),
        ],
    };
    assert_eq!(control_sequence(input_1), Ok((&[][..], expected_1)));

    let input_2 = &[0x00, 0x77, 0x0f, 0x41, 0x02, 0xff][..];
    let expected_2 = ControlSequence {
        date: 0x0077,
        next: 0x0f41,
        commands: vec![ControlCommand::StopDate],
    };
    assert_eq!(control_sequence(input_2), Ok((&[][..], expected_2)));

    let input_3 = &[0x00, 0x00, 0x0b, 0x30, 0x01, 0x00, 0xff][..];
    let expected_3 = ControlSequence {
        date: 0x0000,
        next: 0x0b30,
        commands: vec![ControlCommand::StartDate, ControlCommand::Force],
    };
    assert_eq!(control_sequence(input_3), Ok((&[][..], expected_3)));
}

/// One fully parsed SPU packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Spu {
    /// Display start, in 1/100ths of a second after the base time.
    pub start_date: Option<u16>,
    /// Display end, in 1/100ths of a second after the base time.
    pub stop_date: Option<u16>,
    /// Display this subtitle even when subtitles are off.
    pub forced: bool,
    /// Where on screen to show the image.
    pub coordinates: Coordinates,
    /// Pixel code to 16-color palette index.
    pub palette_map: [u8; 4],
    /// Pixel code to 4-bit alpha.
    pub alpha_map: [u8; 4],
    /// Decoded pixel codes in row-major order, one byte each.
    pub image: Vec<u8>,
}

/// Parse an assembled SPU packet.  Errors here are per-subtitle and
/// recoverable; the caller reports them and moves on.
pub(crate) fn parse_spu(data: &[u8]) -> Result<Spu, String> {
    if data.len() < 4 {
        return Err("packet is too short".to_string());
    }
    let initial_control_offset = usize::from(u16::from_be_bytes([data[2], data[3]]));

    let mut start_date = None;
    let mut stop_date = None;
    let mut forced = false;
    let mut coords: Option<Coordinates> = None;
    let mut palette = None;
    let mut alpha = None;
    let mut offsets: Option<[u16; 2]> = None;

    // Walk the chain of control sequences by explicit offset.
    let mut control_offset = initial_control_offset;
    loop {
        trace!("looking for control sequence at 0x{:x}", control_offset);
        let control_data = data.get(control_offset..).ok_or_else(|| {
            format!(
                "control offset is 0x{:x}, but packet is only 0x{:x} bytes",
                control_offset,
                data.len()
            )
        })?;
        let (_, control) =
            control_sequence(control_data).map_err(|e| format!("bad control sequence: {:?}", e))?;
        trace!("parsed control sequence: {:?}", control);
        for command in &control.commands {
            match *command {
                ControlCommand::Force => forced = true,
                ControlCommand::StartDate => start_date = start_date.or(Some(control.date)),
                ControlCommand::StopDate => stop_date = stop_date.or(Some(control.date)),
                ControlCommand::Palette(p) => palette = palette.or(Some(p)),
                ControlCommand::Alpha(a) => alpha = alpha.or(Some(a)),
                ControlCommand::Coordinates(ref c) => {
                    if c.x2 <= c.x1 || c.y2 <= c.y1 {
                        return Err("invalid bounding box".to_string());
                    }
                    coords = coords.or(Some(c.clone()));
                }
                ControlCommand::RleOffsets(r) => offsets = Some(r),
                ControlCommand::ColorChange => {}
                ControlCommand::Unsupported(b) => {
                    warn!("unsupported control sequence: {:?}", BytesFormatter(b));
                }
            }
        }
        let next = usize::from(control.next);
        if next == control_offset {
            break;
        } else if next < control_offset {
            return Err("control offset went backwards".to_string());
        }
        control_offset = next;
    }

    let coordinates = coords.ok_or("no coordinates for subtitle")?;
    let palette = palette.ok_or("no palette for subtitle")?;
    let alpha = alpha.ok_or("no alpha map for subtitle")?;
    let offsets = offsets.ok_or("no RLE offsets for subtitle")?;

    // Scan lines may overlap each other and the control data, so cap
    // both fields at the first two bytes of the control packet.
    let start_0 = usize::from(offsets[0]);
    let start_1 = usize::from(offsets[1]);
    let end = (initial_control_offset + 2).min(data.len());
    if start_0 > start_1 || start_1 > end {
        return Err("invalid scan line offsets".to_string());
    }
    let image = decompress(
        usize::from(coordinates.width()),
        usize::from(coordinates.height()),
        [&data[start_0..end], &data[start_1..end]],
    )?;

    // The parse order of the maps is the reverse of the pixel codes the
    // RLE data uses.
    Ok(Spu {
        start_date,
        stop_date,
        forced,
        coordinates,
        palette_map: [palette[3], palette[2], palette[1], palette[0]],
        alpha_map: [alpha[3], alpha[2], alpha[1], alpha[0]],
        image,
    })
}

/// A nibble-at-a-time reader over one RLE field.
struct NibbleReader<'a> {
    data: &'a [u8],
    nibble: usize,
}

impl<'a> NibbleReader<'a> {
    fn new(data: &'a [u8]) -> NibbleReader<'a> {
        NibbleReader { data, nibble: 0 }
    }

    fn next(&mut self) -> Result<u8, String> {
        let byte = self
            .data
            .get(self.nibble / 2)
            .ok_or("ran out of RLE data")?;
        let value = if self.nibble % 2 == 0 {
            byte >> 4
        } else {
            byte & 0x0f
        };
        self.nibble += 1;
        Ok(value)
    }

    /// Scan lines are byte-aligned.
    fn align(&mut self) {
        if self.nibble % 2 == 1 {
            self.nibble += 1;
        }
    }
}

/// Read one run: up to four nibbles accumulate into a length and a 2-bit
/// pixel code.  A length of `None` means "fill to the end of the line".
fn decode_run(reader: &mut NibbleReader) -> Result<(Option<usize>, u8), String> {
    let mut v: u32 = 0;
    let mut t: u32 = 1;
    loop {
        v = v << 4 | u32::from(reader.next()?);
        t <<= 2;
        if !(v < t && t <= 0x40) {
            break;
        }
    }
    let color = (v & 3) as u8;
    if v < 4 {
        Ok((None, color))
    } else {
        Ok((Some((v >> 2) as usize), color))
    }
}

/// Decompress the two interlaced RLE fields into one row-major buffer of
/// 2-bit pixel codes.  Even lines come from the first field.
pub(crate) fn decompress(
    width: usize,
    height: usize,
    fields: [&[u8]; 2],
) -> Result<Vec<u8>, String> {
    trace!(
        "decompressing {}x{} subpicture, fields [0x{:x}, 0x{:x}] bytes",
        width,
        height,
        fields[0].len(),
        fields[1].len()
    );
    if width == 0 || height == 0 {
        return Err(format!("degenerate dimensions {}x{}", width, height));
    }
    if width.checked_mul(height).map_or(true, |a| a > MAX_PIXELS) {
        return Err(format!("implausible dimensions {}x{}", width, height));
    }
    let mut image = vec![0u8; width * height];
    let mut readers = [NibbleReader::new(fields[0]), NibbleReader::new(fields[1])];
    for y in 0..height {
        let reader = &mut readers[y % 2];
        let mut x = 0;
        while x < width {
            let (run, color) = decode_run(reader)?;
            let run = run.unwrap_or(width - x);
            if run > width - x {
                return Err(format!("scan line {} is too long", y));
            }
            image[y * width + x..y * width + x + run].fill(color);
            x += run;
        }
        reader.align();
    }
    Ok(image)
}

#[test]
fn decompress_short_runs() {
    // One nibble per run: count 2, code 1 is 0b1001 = 0x9.
    let field = [0x99u8];
    assert_eq!(decompress(4, 1, [&field, &[]]).unwrap(), vec![1, 1, 1, 1]);
}

#[test]
fn decompress_fill_to_end_of_line() {
    // Four zero-count nibbles ending in code 2 fill the line.
    let field = [0x00u8, 0x02];
    assert_eq!(decompress(6, 1, [&field, &[]]).unwrap(), vec![2; 6]);
}

#[test]
fn decompress_interlaces_fields() {
    let even = [0x99u8]; // line 0: four pixels of code 1
    let odd = [0x9au8]; // line 1: two of code 1, two of code 2
    assert_eq!(
        decompress(4, 2, [&even, &odd]).unwrap(),
        vec![1, 1, 1, 1, 1, 1, 2, 2]
    );
}

#[test]
fn decompress_rejects_overlong_line() {
    // Count 15 code 0 overflows a 4-pixel line: 0x3c = 0b0011_1100.
    let field = [0x3cu8];
    assert!(decompress(4, 1, [&field, &[]]).is_err());
}

#[test]
fn decompress_rejects_missing_data() {
    assert!(decompress(4, 2, [&[0x99u8], &[]]).is_err());
}

#[cfg(test)]
pub(crate) fn build_test_spu() -> Vec<u8> {
    // A 4x2 image of code 1, palette index 1, fully opaque, at
    // (100, 50), shown from +0 to +1.5 seconds.
    let mut packet = Vec::new();
    packet.extend_from_slice(&36u16.to_be_bytes()); // total size
    packet.extend_from_slice(&6u16.to_be_bytes()); // control offset
    packet.push(0x11); // field 0: line 0
    packet.push(0x11); // field 1: line 1
    // First control sequence at offset 6.
    packet.extend_from_slice(&0u16.to_be_bytes()); // date
    packet.extend_from_slice(&30u16.to_be_bytes()); // next
    packet.push(0x01); // start date
    packet.extend_from_slice(&[0x03, 0x00, 0x10]); // palette: code 1 -> 1
    packet.extend_from_slice(&[0x04, 0x00, 0xf0]); // alpha: code 1 -> 0xf
    packet.extend_from_slice(&[0x05, 0x06, 0x40, 0x67, 0x03, 0x20, 0x33]);
    packet.extend_from_slice(&[0x06, 0x00, 0x04, 0x00, 0x05]); // RLE offsets
    packet.push(0xff);
    // Second control sequence at offset 30.
    packet.extend_from_slice(&150u16.to_be_bytes()); // date: +1.5s
    packet.extend_from_slice(&30u16.to_be_bytes()); // next: itself
    packet.push(0x02); // stop date
    packet.push(0xff);
    assert_eq!(packet.len(), 36);
    packet
}

#[test]
fn parse_whole_spu_packet() {
    let packet = build_test_spu();
    let spu = parse_spu(&packet).unwrap();
    assert_eq!(spu.start_date, Some(0));
    assert_eq!(spu.stop_date, Some(150));
    assert!(!spu.forced);
    assert_eq!((spu.coordinates.left(), spu.coordinates.top()), (100, 50));
    assert_eq!(
        (spu.coordinates.width(), spu.coordinates.height()),
        (4, 2)
    );
    assert_eq!(spu.palette_map, [0, 1, 0, 0]);
    assert_eq!(spu.alpha_map, [0, 0xf, 0, 0]);
    assert_eq!(spu.image, vec![1; 8]);
}
