//! Decode image-based subtitles into clean, timestamped raster images.
//!
//! DVDs and Blu-rays don't store subtitles as text.  They store them as
//! compressed bitmaps with timing attached: Blu-ray PGS streams
//! (`.sup` files) and DVD VobSub streams (`.sub` plus `.idx`).  This
//! crate parses both formats and turns them into a uniform sequence of
//! [`SubtitleEvent`]s, each holding a binarized image ready for a text
//! recognition engine, plus the interval it is shown for.
//!
//! Decoding is strict about stream framing and lenient about content: a
//! broken length field or unknown segment type aborts with a
//! [`DecodeError`], while a single corrupt subtitle image is dropped
//! with a [`DecodeWarning`] and decoding continues.
//!
//! ```
//! use subraster::{decode_pgs, DecodeOptions, DecodeStatus};
//!
//! let outcome = decode_pgs(&[], &DecodeOptions::default()).unwrap();
//! assert_eq!(outcome.status(), DecodeStatus::NoUsableEvents);
//! ```
//!
//! Nothing here runs OCR itself; see [`recognize_events`] for driving an
//! engine of your choice over the decoded images.

#![warn(missing_docs)]

mod binarize;
mod cancel;
mod decode;
mod errors;
mod event;
mod mpeg2;
mod palette;
mod pgs;
mod pixmap;
mod recognize;
mod time;
mod util;
mod vobsub;

pub use crate::binarize::{binarize, ThresholdPolicy};
pub use crate::cancel::CancelToken;
pub use crate::decode::{decode, decode_pgs, decode_vobsub, ContainerKind, DecodeOptions};
pub use crate::errors::{DecodeError, DecodeWarning, Result};
pub use crate::event::{DecodeOutcome, DecodeStatus, SubtitleEvent};
pub use crate::pixmap::{Pixel, Pixmap, RasterImage};
pub use crate::recognize::{
    recognize_events, LangHint, RecognitionOutcome, RecognizedText, TextRecognizer,
    DEFAULT_MARGIN,
};
pub use crate::time::Pts;
pub use crate::vobsub::{Index, IndexEntry, Palette};
