//! Parsing the `*.idx` file that accompanies a `*.sub` file.
//!
//! The index is a line-oriented text file.  We only care about two
//! keys: the 16-color `palette`, and the `timestamp` entries giving the
//! start time and byte offset of each subpicture packet in the `.sub`
//! stream.

use image::Rgb;
use lazy_static::lazy_static;
use log::trace;
use nom::{
    bytes::complete::tag,
    character::complete::one_of,
    combinator::{map_opt, map_res},
    multi::separated_list1,
    IResult,
};
use regex::Regex;

use crate::errors::{DecodeError, Result};
use crate::time::Pts;

/// The 16-color palette shared by every subtitle in the stream.
pub type Palette = [Rgb<u8>; 16];

fn hex_digit_value(i: &[u8]) -> IResult<&[u8], u8> {
    map_opt(one_of("0123456789abcdefABCDEF"), |c: char| {
        c.to_digit(16).and_then(|d| cast::u8(d).ok())
    })(i)
}

fn hex_u8(i: &[u8]) -> IResult<&[u8], u8> {
    let (i, high) = hex_digit_value(i)?;
    let (i, low) = hex_digit_value(i)?;
    Ok((i, high << 4 | low))
}

fn rgb(i: &[u8]) -> IResult<&[u8], Rgb<u8>> {
    let (i, r) = hex_u8(i)?;
    let (i, g) = hex_u8(i)?;
    let (i, b) = hex_u8(i)?;
    Ok((i, Rgb([r, g, b])))
}

#[test]
fn parse_rgb() {
    assert_eq!(rgb(&b"1234ab"[..]), Ok((&b""[..], Rgb([0x12, 0x34, 0xab]))));
}

fn palette(i: &[u8]) -> IResult<&[u8], Palette> {
    map_res(
        separated_list1(tag(&b", "[..]), rgb),
        <[Rgb<u8>; 16]>::try_from,
    )(i)
}

#[test]
fn parse_palette() {
    let input = &b"\
000000, f0f0f0, cccccc, 999999, 3333fa, 1111bb, fa3333, bb1111, \
33fa33, 11bb11, fafa33, bbbb11, fa33fa, bb11bb, 33fafa, 11bbbb"[..];
    let (rest, parsed) = palette(input).unwrap();
    assert!(rest.is_empty());
    assert_eq!(parsed[0], Rgb([0x00, 0x00, 0x00]));
    assert_eq!(parsed[1], Rgb([0xf0, 0xf0, 0xf0]));
    assert_eq!(parsed[15], Rgb([0x11, 0xbb, 0xbb]));
}

/// One `timestamp:` line: when a subtitle starts and where its packet
/// lives in the `.sub` stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Display start time.
    pub start: Pts,
    /// Byte offset of the packet in the `.sub` stream.
    pub filepos: usize,
}

/// A parsed `*.idx` file.
#[derive(Debug, Clone)]
pub struct Index {
    palette: Palette,
    entries: Vec<IndexEntry>,
}

impl Index {
    /// Parse the text of an `*.idx` file.
    pub fn parse(input: &str) -> Result<Index> {
        lazy_static! {
            static ref KEY_VALUE: Regex = Regex::new("^([A-Za-z/ ]+): (.*)").unwrap();
            static ref TIMESTAMP: Regex = Regex::new(
                r"^(\d+):(\d{2}):(\d{2}):(\d{3}), filepos: ([0-9a-fA-F]+)$"
            )
            .unwrap();
        }

        let invalid = |reason: String| DecodeError::MissingIndexFile { reason };

        let mut palette_value: Option<Palette> = None;
        let mut entries = Vec::new();
        for line in input.lines() {
            let Some(cap) = KEY_VALUE.captures(line) else {
                continue;
            };
            let key = &cap[1];
            let value = &cap[2];
            match key {
                "palette" => {
                    let (_, parsed) = palette(value.as_bytes()).map_err(|e| {
                        invalid(format!("could not parse palette: {:?}", e))
                    })?;
                    palette_value = Some(parsed);
                }
                "timestamp" => {
                    let cap = TIMESTAMP.captures(value).ok_or_else(|| {
                        invalid(format!("malformed timestamp line: {:?}", value))
                    })?;
                    let field = |i: usize| -> u64 {
                        // The pattern guarantees each field is numeric.
                        cap[i].parse().unwrap_or_default()
                    };
                    let ms = ((field(1) * 60 + field(2)) * 60 + field(3)) * 1000 + field(4);
                    let filepos = usize::from_str_radix(&cap[5], 16).map_err(|e| {
                        invalid(format!("bad filepos in {:?}: {}", value, e))
                    })?;
                    entries.push(IndexEntry {
                        start: Pts::from_ms(ms),
                        filepos,
                    });
                }
                _ => trace!("unimplemented idx key: {}", key),
            }
        }

        Ok(Index {
            palette: palette_value
                .ok_or_else(|| invalid("no palette line".to_string()))?,
            entries,
        })
    }

    /// The 16-color palette for this stream.
    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    /// The timestamp entries, in file order.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }
}

#[cfg(test)]
pub(crate) const EXAMPLE_IDX: &str = "\
# VobSub index file, v7 (do not modify this line!)
size: 1920x1080
palette: 000000, f0f0f0, cccccc, 999999, 3333fa, 1111bb, fa3333, bb1111, \
33fa33, 11bb11, fafa33, bbbb11, fa33fa, bb11bb, 33fafa, 11bbbb
langidx: 0
id: en, index: 0
timestamp: 00:00:01:500, filepos: 000000000
timestamp: 00:00:42:200, filepos: 000005000
";

#[test]
fn parse_index() {
    let idx = Index::parse(EXAMPLE_IDX).unwrap();
    assert_eq!(idx.palette()[0], Rgb([0x00, 0x00, 0x00]));
    assert_eq!(idx.palette()[15], Rgb([0x11, 0xbb, 0xbb]));
    assert_eq!(
        idx.entries(),
        &[
            IndexEntry {
                start: Pts::from_ms(1500),
                filepos: 0,
            },
            IndexEntry {
                start: Pts::from_ms(42_200),
                filepos: 0x5000,
            },
        ]
    );
}

#[test]
fn index_without_palette_is_rejected() {
    let err = Index::parse("size: 720x480\n").unwrap_err();
    assert!(matches!(err, DecodeError::MissingIndexFile { .. }));
}
