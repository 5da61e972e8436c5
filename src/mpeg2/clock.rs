//! The MPEG-2 System Time Clock.

use std::fmt;

use nom::{bytes::streaming::take, IResult};

use crate::time::Pts;

/// The 90 kHz, 33-bit [System Time Clock][STC] (STC) plus the 9-bit STC
/// extension, which counts 1/300ths of a tick.
///
/// [STC]: http://www.bretl.com/mpeghtml/STC.HTM
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Clock {
    value: u64,
}

impl Clock {
    /// Construct a `Clock` from a 33-bit System Time Clock value.
    pub fn base(stc: u64) -> Clock {
        Clock { value: stc << 9 }
    }

    /// Return a new `Clock` with the 9-bit extension set.
    pub fn with_ext(self, ext: u16) -> Clock {
        Clock {
            value: self.value & !0x1ff | u64::from(ext),
        }
    }

    /// The 90 kHz tick count, dropping the extension.
    pub fn to_pts(self) -> Pts {
        Pts::from_ticks(self.value >> 9)
    }

    /// Convert to seconds.
    pub fn to_seconds(self) -> f64 {
        let base = (self.value >> 9) as f64;
        let ext = (self.value & 0x1ff) as f64;
        (base + ext / 300.0) / 90000.0
    }
}

impl fmt::Display for Clock {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut s = self.to_seconds();
        let h = (s / 3600.0).trunc();
        s %= 3600.0;
        let m = (s / 60.0).trunc();
        s %= 60.0;
        write!(f, "{}:{:02}:{:1.3}", h, m, s)
    }
}

/// Parse the 5-byte timestamp field used for PTS and DTS values: a 4-bit
/// prefix, then the 33 clock bits interleaved with 3 marker bits.
pub fn timestamp(prefix: u8) -> impl Fn(&[u8]) -> IResult<&[u8], Clock> {
    move |i: &[u8]| {
        let (i, b) = take(5usize)(i)?;
        let markers_ok = b[0] & 0x01 == 0x01 && b[2] & 0x01 == 0x01 && b[4] & 0x01 == 0x01;
        if b[0] >> 4 != prefix || !markers_ok {
            return Err(nom::Err::Error(nom::error::Error::new(
                i,
                nom::error::ErrorKind::Tag,
            )));
        }
        let stc = u64::from(b[0] >> 1 & 0x07) << 30
            | u64::from(b[1]) << 22
            | u64::from(b[2] >> 1 & 0x7f) << 15
            | u64::from(b[3]) << 7
            | u64::from(b[4] >> 1);
        Ok((i, Clock::base(stc)))
    }
}

#[test]
fn parse_timestamp() {
    assert_eq!(
        timestamp(0b0010)(&[0x21, 0x00, 0xab, 0xe9, 0xc1][..]),
        Ok((&[][..], Clock::base(2815200)))
    );
    // Wrong prefix nibble.
    assert!(timestamp(0b0011)(&[0x21, 0x00, 0xab, 0xe9, 0xc1][..]).is_err());
    // Missing marker bit.
    assert!(timestamp(0b0010)(&[0x20, 0x00, 0xab, 0xe9, 0xc1][..]).is_err());
}

#[test]
fn clock_arithmetic() {
    let clock = Clock::base(2815200);
    assert!((clock.to_seconds() - 31.28).abs() < 1e-9);
    assert_eq!(clock.to_pts().to_ms(), 31280);
    assert!((clock.with_ext(150).to_seconds() - 31.28).abs() < 1e-7);
}
