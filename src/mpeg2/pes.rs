//! MPEG-2 Packetized Elementary Streams (PES).
//!
//! These packets are nested inside the Program Stream packets of a
//! `.sub` file; the DVD subpicture stream rides in private stream 1.

use std::fmt;

use nom::{
    bytes::streaming::tag,
    combinator::rest,
    multi::length_value,
    number::streaming::{be_u16, be_u8},
    IResult,
};

use super::clock::{timestamp, Clock};
use crate::util::BytesFormatter;

/// Which timestamps a PES header carries.
///
/// See the [PES header documentation][PES] for details.
///
/// [PES]: http://dvd.sourceforge.net/dvdinfo/pes-hdr.html
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PtsDtsFlags {
    /// No time stamps.
    #[default]
    None,
    /// Presentation Time Stamp only.
    Pts,
    /// Presentation and Decode Time Stamps.
    PtsDts,
}

/// Presentation and Decode Time Stamps, if present.
#[derive(Debug, PartialEq, Eq)]
pub struct PtsDts {
    /// Presentation Time Stamp.
    pub pts: Clock,
    /// Decode Time Stamp.
    pub dts: Option<Clock>,
}

fn pts_dts(flags: PtsDtsFlags) -> impl Fn(&[u8]) -> IResult<&[u8], Option<PtsDts>> {
    move |i: &[u8]| match flags {
        PtsDtsFlags::None => Ok((i, None)),
        PtsDtsFlags::Pts => {
            let (i, pts) = timestamp(0b0010)(i)?;
            Ok((i, Some(PtsDts { pts, dts: None })))
        }
        PtsDtsFlags::PtsDts => {
            let (i, pts) = timestamp(0b0011)(i)?;
            let (i, dts) = timestamp(0b0001)(i)?;
            Ok((i, Some(PtsDts { pts, dts: Some(dts) })))
        }
    }
}

#[test]
fn parse_pts_dts() {
    assert_eq!(pts_dts(PtsDtsFlags::None)(&[][..]), Ok((&[][..], None)));
    assert_eq!(
        pts_dts(PtsDtsFlags::Pts)(&[0x21, 0x00, 0xab, 0xe9, 0xc1][..]),
        Ok((
            &[][..],
            Some(PtsDts {
                pts: Clock::base(2815200),
                dts: None,
            })
        ))
    );
}

/// Flags describing which optional header data fields follow.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct HeaderDataFlags {
    pub pts_dts_flags: PtsDtsFlags,
    pub escr_flag: bool,
    pub es_rate_flag: bool,
    pub dsm_trick_mode_flag: bool,
    pub additional_copy_info_flag: bool,
    pub crc_flag: bool,
    pub extension_flag: bool,
}

fn header_data_flags(i: &[u8]) -> IResult<&[u8], HeaderDataFlags> {
    let (i, byte) = be_u8(i)?;
    let pts_dts_flags = match byte >> 6 {
        0b00 => PtsDtsFlags::None,
        0b10 => PtsDtsFlags::Pts,
        0b11 => PtsDtsFlags::PtsDts,
        _ => {
            return Err(nom::Err::Error(nom::error::Error::new(
                i,
                nom::error::ErrorKind::Tag,
            )))
        }
    };
    Ok((
        i,
        HeaderDataFlags {
            pts_dts_flags,
            escr_flag: byte & 0x20 != 0,
            es_rate_flag: byte & 0x10 != 0,
            dsm_trick_mode_flag: byte & 0x08 != 0,
            additional_copy_info_flag: byte & 0x04 != 0,
            crc_flag: byte & 0x02 != 0,
            extension_flag: byte & 0x01 != 0,
        },
    ))
}

#[test]
fn parse_header_data_flags() {
    assert_eq!(
        header_data_flags(&[0x80][..]),
        Ok((
            &[][..],
            HeaderDataFlags {
                pts_dts_flags: PtsDtsFlags::Pts,
                ..HeaderDataFlags::default()
            }
        ))
    );
}

/// Optional PES header data.  There is plenty more we could pull out
/// here, but nothing else matters for subtitles.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct HeaderData {
    pub flags: HeaderDataFlags,
    pub pts_dts: Option<PtsDts>,
}

/// Parse the header data flags, the length byte, and that many bytes of
/// header data, discarding fields we don't deserialize.
fn header_data(i: &[u8]) -> IResult<&[u8], HeaderData> {
    let (i, flags) = header_data_flags(i)?;
    let pts_dts_flags = flags.pts_dts_flags;
    let (i, pts_dts) = length_value(be_u8, move |i| pts_dts(pts_dts_flags)(i))(i)?;
    Ok((i, HeaderData { flags, pts_dts }))
}

#[test]
fn parse_header_data() {
    assert_eq!(
        header_data(&[0x00, 0x00][..]),
        Ok((&[][..], HeaderData::default()))
    );
    assert_eq!(
        header_data(&[0x80, 0x05, 0x21, 0x00, 0xab, 0xe9, 0xc1][..]),
        Ok((
            &[][..],
            HeaderData {
                flags: HeaderDataFlags {
                    pts_dts_flags: PtsDtsFlags::Pts,
                    ..HeaderDataFlags::default()
                },
                pts_dts: Some(PtsDts {
                    pts: Clock::base(2815200),
                    dts: None,
                }),
            }
        ))
    );
}

/// The fixed PES header byte after the packet length.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Header {
    pub scrambling_control: u8,
    pub priority: bool,
    pub data_alignment_indicator: bool,
    pub copyright: bool,
    pub original: bool,
}

fn header(i: &[u8]) -> IResult<&[u8], Header> {
    let (i, byte) = be_u8(i)?;
    if byte >> 6 != 0b10 {
        return Err(nom::Err::Error(nom::error::Error::new(
            i,
            nom::error::ErrorKind::Tag,
        )));
    }
    Ok((
        i,
        Header {
            scrambling_control: byte >> 4 & 0x03,
            priority: byte & 0x08 != 0,
            data_alignment_indicator: byte & 0x04 != 0,
            copyright: byte & 0x02 != 0,
            original: byte & 0x01 != 0,
        },
    ))
}

/// A private stream 1 PES packet.
#[derive(PartialEq, Eq)]
pub struct Packet<'a> {
    pub header: Header,
    pub header_data: HeaderData,
    /// DVD substream ID; subpictures use `0x20..=0x3f`.
    pub substream_id: u8,
    /// The substream payload.
    pub data: &'a [u8],
}

impl<'a> Packet<'a> {
    /// Is this packet part of a DVD subpicture stream?
    pub fn is_subpicture(&self) -> bool {
        (0x20..=0x3f).contains(&self.substream_id)
    }
}

impl<'a> fmt::Debug for Packet<'a> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Packet")
            .field("header", &self.header)
            .field("header_data", &self.header_data)
            .field("substream_id", &self.substream_id)
            .field("data", &BytesFormatter(self.data))
            .finish()
    }
}

fn packet_body(i: &[u8]) -> IResult<&[u8], Packet> {
    let (i, header) = header(i)?;
    let (i, header_data) = header_data(i)?;
    let (i, substream_id) = be_u8(i)?;
    let (i, data) = rest(i)?;
    Ok((
        i,
        Packet {
            header,
            header_data,
            substream_id,
            data,
        },
    ))
}

/// Parse a private stream 1 PES packet, starting at its start code.
pub fn packet(i: &[u8]) -> IResult<&[u8], Packet> {
    let (i, _) = tag(&[0x00, 0x00, 0x01, 0xbd][..])(i)?;
    length_value(be_u16, packet_body)(i)
}

#[test]
fn parse_packet() {
    let input = &[
        0x00, 0x00, 0x01, 0xbd, // start code
        0x00, 0x10, // length
        0x81, // header byte: original
        0x80, 0x05, 0x21, 0x00, 0xab, 0xe9, 0xc1, // header data with PTS
        0x20, // substream id
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // payload
        0xff, // trailing byte outside the packet
    ][..];

    let expected = Packet {
        header: Header {
            original: true,
            ..Header::default()
        },
        header_data: HeaderData {
            flags: HeaderDataFlags {
                pts_dts_flags: PtsDtsFlags::Pts,
                ..HeaderDataFlags::default()
            },
            pts_dts: Some(PtsDts {
                pts: Clock::base(2815200),
                dts: None,
            }),
        },
        substream_id: 0x20,
        data: &[0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    };

    assert_eq!(packet(input), Ok((&[0xff][..], expected)));
}
