//! Error and warning types for subtitle decoding.
//!
//! Errors split into two tiers.  A [`DecodeError`] invalidates the whole
//! byte stream and aborts the decode with no events.  A [`DecodeWarning`]
//! is scoped to a single frame or object: the offending event is dropped
//! and decoding continues with the next segment.

use crate::time::Pts;

/// A convenient `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, DecodeError>;

/// A fatal decoding error.  Any of these aborts the decode for the whole
/// file; the caller receives no events.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// A declared length pointed past the end of the input.
    #[error("input ended unexpectedly at offset 0x{offset:x}")]
    TruncatedStream {
        /// Byte offset at which the stream ran out.
        offset: usize,
    },

    /// A PGS segment carried a type tag outside the recognized set.  Once
    /// this happens the segment framing can no longer be trusted, so the
    /// reader stops rather than guessing.
    #[error("unknown segment type 0x{kind:02x} at offset 0x{offset:x}")]
    UnknownSegmentType {
        /// The unrecognized type tag.
        kind: u8,
        /// Byte offset of the segment header.
        offset: usize,
    },

    /// A VobSub `.sub` payload was supplied without a usable companion
    /// `.idx` index.  VobSub cannot be decoded without one.
    #[error("missing or unusable VobSub index: {reason}")]
    MissingIndexFile {
        /// Why the index was missing or rejected.
        reason: String,
    },

    /// The caller's cancellation token was triggered between segments.
    #[error("decoding was cancelled")]
    Cancelled,
}

/// A recoverable, frame-scoped problem recorded during decoding.  Each
/// warning carries the approximate stream timestamp at which it occurred.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeWarning {
    /// An object was still missing fragments when its display set ended.
    #[error("object {object_id} was incomplete at {at} ({got} of {wanted} bytes)")]
    IncompleteObject {
        /// The object whose fragments never completed.
        object_id: u16,
        /// Approximate timestamp of the owning display set.
        at: Pts,
        /// Bytes of RLE payload actually received.
        got: usize,
        /// Bytes of RLE payload the first fragment declared.
        wanted: usize,
    },

    /// RLE decompression did not reproduce the declared pixel grid.
    #[error("RLE data for object {object_id} at {at} did not match its declared size: {detail}")]
    RleLengthMismatch {
        /// The object whose bitmap failed to decompress.
        object_id: u16,
        /// Approximate timestamp of the owning display set.
        at: Pts,
        /// What went wrong.
        detail: String,
    },

    /// A composition referenced a palette that had not been defined yet.
    #[error("composition at {at} references undefined palette {palette_id}")]
    UnknownPaletteId {
        /// The undefined palette ID.
        palette_id: u8,
        /// Approximate timestamp of the composition.
        at: Pts,
    },

    /// An event's computed end was not strictly after its start, or it
    /// produced no image, so it was dropped.
    #[error("dropped degenerate event: start {start}, end {end}")]
    EmptyOrDegenerateEvent {
        /// Start timestamp of the dropped event.
        start: Pts,
        /// Computed end timestamp of the dropped event.
        end: Pts,
    },
}
