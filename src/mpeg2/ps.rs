//! MPEG-2 Program Streams (PS).
//!
//! This is the container format at the top level of a `.sub` file: a
//! series of packs, each introduced by a pack header and carrying PES
//! packets.

use std::fmt;

use log::{debug, trace, warn};
use nom::{
    bytes::streaming::{tag, take},
    IResult,
};

use super::clock::Clock;
use super::pes;
use crate::errors::{DecodeError, Result};

const PACK_START_CODE: [u8; 4] = [0x00, 0x00, 0x01, 0xba];

/// A parsed [MPEG-2 Program Stream pack header][MPEG-PS].
///
/// [MPEG-PS]: https://en.wikipedia.org/wiki/MPEG_program_stream
#[derive(Debug, PartialEq, Eq)]
pub struct Header {
    /// The System Clock Reference (SCR) with its extension.
    pub scr: Clock,
    /// The bit rate, in units of 50 bytes per second.
    pub bit_rate: u32,
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "[PS pack @ {}, {} kbps]",
            self.scr,
            (self.bit_rate * 50 * 8) / 1024
        )
    }
}

/// Parse an MPEG-2 pack header, including any stuffing bytes.
pub fn header(i: &[u8]) -> IResult<&[u8], Header> {
    let (i, _) = tag(&PACK_START_CODE[..])(i)?;
    let (i, b) = take(10usize)(i)?;
    let markers_ok = b[0] >> 6 == 0b01
        && b[0] & 0x04 != 0
        && b[2] & 0x04 != 0
        && b[4] & 0x04 != 0
        && b[5] & 0x01 != 0
        && b[8] & 0x03 == 0x03;
    if !markers_ok {
        return Err(nom::Err::Error(nom::error::Error::new(
            i,
            nom::error::ErrorKind::Tag,
        )));
    }
    let base = u64::from(b[0] >> 3 & 0x07) << 30
        | u64::from(b[0] & 0x03) << 28
        | u64::from(b[1]) << 20
        | u64::from(b[2] >> 3 & 0x1f) << 15
        | u64::from(b[2] & 0x03) << 13
        | u64::from(b[3]) << 5
        | u64::from(b[4] >> 3 & 0x1f);
    let ext = u16::from(b[4] & 0x03) << 7 | u16::from(b[5] >> 1 & 0x7f);
    let bit_rate = u32::from(b[6]) << 14 | u32::from(b[7]) << 6 | u32::from(b[8] >> 2);
    let stuffing = usize::from(b[9] & 0x07);
    let (i, _) = take(stuffing)(i)?;
    Ok((
        i,
        Header {
            scr: Clock::base(base).with_ext(ext),
            bit_rate,
        },
    ))
}

/// A PES packet together with the pack header that introduced it.
#[derive(Debug, PartialEq, Eq)]
pub struct PesPacket<'a> {
    pub ps_header: Header,
    pub pes_packet: pes::Packet<'a>,
}

fn pes_packet(i: &[u8]) -> IResult<&[u8], PesPacket> {
    let (i, ps_header) = header(i)?;
    let (i, pes_packet) = pes::packet(i)?;
    Ok((
        i,
        PesPacket {
            ps_header,
            pes_packet,
        },
    ))
}

/// An iterator over the PES packets of a Program Stream.  Garbage
/// between packs is skipped; a pack cut off by the end of the input is
/// a fatal error.
pub struct PesPackets<'a> {
    input: &'a [u8],
    remaining: &'a [u8],
}

impl<'a> PesPackets<'a> {
    fn offset(&self) -> usize {
        self.input.len() - self.remaining.len()
    }
}

impl<'a> Iterator for PesPackets<'a> {
    type Item = Result<PesPacket<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            // Scan forward to the next pack start code.
            let start = self
                .remaining
                .windows(PACK_START_CODE.len())
                .position(|window| window == PACK_START_CODE);
            let Some(start) = start else {
                self.remaining = &[];
                trace!("reached end of program stream");
                return None;
            };
            self.remaining = &self.remaining[start..];
            match pes_packet(self.remaining) {
                Ok((remaining, packet)) => {
                    self.remaining = remaining;
                    trace!("decoded {}", packet.ps_header);
                    return Some(Ok(packet));
                }
                Err(nom::Err::Incomplete(needed)) => {
                    let offset = self.offset();
                    self.remaining = &[];
                    warn!("program stream ends mid-pack, needed {:?}", needed);
                    return Some(Err(DecodeError::TruncatedStream { offset }));
                }
                // Looked like a pack but didn't parse; skip the start
                // code and keep scanning.
                Err(err) => {
                    debug!("skipping malformed pack at 0x{:x}: {:?}", self.offset(), err);
                    self.remaining = &self.remaining[PACK_START_CODE.len()..];
                }
            }
        }
    }
}

/// Iterate over the PES packets of an MPEG-2 Program Stream.
pub fn pes_packets(input: &[u8]) -> PesPackets {
    PesPackets {
        input,
        remaining: input,
    }
}

#[cfg(test)]
pub(crate) fn pack_header_bytes() -> Vec<u8> {
    // SCR base 2887744 with extension 84, bit rate 0, no stuffing.
    vec![
        0x00, 0x00, 0x01, 0xba, 0x44, 0x02, 0xc4, 0x82, 0x04, 0xa9, 0x00, 0x00, 0x03, 0xf8,
    ]
}

#[test]
fn parse_pack_header() {
    let bytes = pack_header_bytes();
    let (rest, parsed) = header(&bytes).unwrap();
    assert!(rest.is_empty());
    assert_eq!(parsed.scr, Clock::base(2887744).with_ext(84));
    assert_eq!(parsed.bit_rate, 0);
}

#[test]
fn iterate_packets_skipping_garbage() {
    let mut stream = vec![0xde, 0xad, 0xbe, 0xef];
    stream.extend_from_slice(&pack_header_bytes());
    stream.extend_from_slice(&[
        0x00, 0x00, 0x01, 0xbd, // PES start code
        0x00, 0x08, // length
        0x81, 0x00, 0x00, // header, no header data
        0x20, // substream id
        0x01, 0x02, 0x03, 0x04, // payload
    ]);
    let packets: Vec<_> = pes_packets(&stream).collect::<Result<Vec<_>>>().unwrap();
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].pes_packet.substream_id, 0x20);
    assert_eq!(packets[0].pes_packet.data, &[0x01, 0x02, 0x03, 0x04]);
}

#[test]
fn truncated_pack_is_fatal() {
    let mut stream = pack_header_bytes();
    stream.truncate(stream.len() - 4);
    let err = pes_packets(&stream).next().unwrap().unwrap_err();
    assert!(matches!(err, DecodeError::TruncatedStream { .. }));
}
