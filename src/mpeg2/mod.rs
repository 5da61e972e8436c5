//! The MPEG-2 container plumbing beneath DVD subtitles.

pub mod clock;
pub mod pes;
pub mod ps;
