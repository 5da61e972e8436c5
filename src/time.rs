//! Presentation timestamps.
//!
//! Both PGS and VobSub ultimately express time as a 90 kHz tick count.
//! Everything inside the pipeline stays in ticks; conversion to
//! milliseconds happens once, at the boundary.

use std::fmt;

/// Ticks per millisecond of the 90 kHz presentation clock.
const TICKS_PER_MS: u64 = 90;

/// A presentation timestamp, in 90 kHz ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pts(u64);

impl Pts {
    /// Construct from a raw 90 kHz tick count.
    pub fn from_ticks(ticks: u64) -> Pts {
        Pts(ticks)
    }

    /// Construct from a millisecond value.
    pub fn from_ms(ms: u64) -> Pts {
        Pts(ms * TICKS_PER_MS)
    }

    /// The raw 90 kHz tick count.
    pub fn ticks(self) -> u64 {
        self.0
    }

    /// This timestamp in milliseconds, truncated.
    pub fn to_ms(self) -> u64 {
        self.0 / TICKS_PER_MS
    }

    /// This timestamp shifted later by `ms` milliseconds.
    pub fn plus_ms(self, ms: u64) -> Pts {
        Pts(self.0 + ms * TICKS_PER_MS)
    }
}

impl fmt::Display for Pts {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let ms = self.to_ms();
        let s = ms / 1000;
        write!(f, "{}:{:02}:{:02}.{:03}", s / 3600, s / 60 % 60, s % 60, ms % 1000)
    }
}

#[test]
fn pts_converts_ticks_to_ms() {
    assert_eq!(Pts::from_ticks(900_000).to_ms(), 10_000);
    assert_eq!(Pts::from_ms(10_000), Pts::from_ticks(900_000));
    assert_eq!(Pts::from_ticks(0).plus_ms(3000), Pts::from_ticks(270_000));
}

#[test]
fn pts_displays_as_clock_time() {
    assert_eq!(Pts::from_ms(3_723_456).to_string(), "1:02:03.456");
}
