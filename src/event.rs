//! Subtitle display events and the decode outcome.

use log::warn;

use crate::errors::DecodeWarning;
use crate::pixmap::RasterImage;
use crate::time::Pts;

/// One subtitle display event: a binarized image plus the interval it is
/// visible for.  Events in an outcome are ordered by start time and
/// pairwise non-overlapping.
#[derive(Debug, Clone)]
pub struct SubtitleEvent {
    /// Position of this event in the output sequence, starting at 0.
    pub index: usize,
    /// When the image appears.
    pub start: Pts,
    /// When the image is cleared.  Always strictly after `start`.
    pub end: Pts,
    /// Should this subtitle be shown even when subtitles are off?
    pub forced: bool,
    /// The binarized image to hand to a recognition engine.
    pub image: RasterImage,
}

impl SubtitleEvent {
    /// Start time in milliseconds.
    pub fn start_ms(&self) -> u64 {
        self.start.to_ms()
    }

    /// End time in milliseconds.
    pub fn end_ms(&self) -> u64 {
        self.end.to_ms()
    }
}

/// How a complete, non-fatal decode went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// At least one usable event was produced.
    Decoded,
    /// The decode finished cleanly but produced no usable events.  This
    /// is distinct from a fatal parse error.
    NoUsableEvents,
}

/// The result of a successful (possibly warning-laden) decode: every
/// usable event, plus a structured record of what was dropped.
#[derive(Debug)]
pub struct DecodeOutcome {
    /// Ordered, non-overlapping display events.
    pub events: Vec<SubtitleEvent>,
    /// Recoverable problems encountered along the way.
    pub warnings: Vec<DecodeWarning>,
}

impl DecodeOutcome {
    /// Whether the decode produced anything usable.
    pub fn status(&self) -> DecodeStatus {
        if self.events.is_empty() {
            DecodeStatus::NoUsableEvents
        } else {
            DecodeStatus::Decoded
        }
    }
}

/// An event as accumulated by a container pipeline, before ordering and
/// overlap normalization.
#[derive(Debug)]
pub(crate) struct PendingEvent {
    pub start: Pts,
    pub end: Pts,
    pub forced: bool,
    pub image: RasterImage,
}

/// Normalize accumulated events into the final outcome: stable-sort by
/// start, clamp each end to the next start, and drop anything degenerate
/// with a warning.
pub(crate) fn finish_events(
    mut pending: Vec<PendingEvent>,
    mut warnings: Vec<DecodeWarning>,
) -> DecodeOutcome {
    pending.sort_by_key(|e| e.start);
    let mut events = Vec::with_capacity(pending.len());
    for i in 0..pending.len() {
        let next_start = pending.get(i + 1).map(|e| e.start);
        let e = &pending[i];
        let mut end = e.end;
        if let Some(next_start) = next_start {
            if end > next_start {
                end = next_start;
            }
        }
        if end <= e.start {
            warn!("dropping degenerate event at {}", e.start);
            warnings.push(DecodeWarning::EmptyOrDegenerateEvent {
                start: e.start,
                end,
            });
            continue;
        }
        events.push(SubtitleEvent {
            index: events.len(),
            start: e.start,
            end,
            forced: e.forced,
            image: pending[i].image.clone(),
        });
    }
    DecodeOutcome { events, warnings }
}

#[cfg(test)]
fn pending(start_ms: u64, end_ms: u64) -> PendingEvent {
    PendingEvent {
        start: Pts::from_ms(start_ms),
        end: Pts::from_ms(end_ms),
        forced: false,
        image: RasterImage::blank(1, 1),
    }
}

#[test]
fn finish_orders_events_and_clamps_overlaps() {
    let outcome = finish_events(vec![pending(2000, 5000), pending(0, 3000)], vec![]);
    assert_eq!(outcome.events.len(), 2);
    assert_eq!(outcome.events[0].start_ms(), 0);
    assert_eq!(outcome.events[0].end_ms(), 2000);
    assert_eq!(outcome.events[1].start_ms(), 2000);
    assert_eq!(outcome.events[1].end_ms(), 5000);
    for pair in outcome.events.windows(2) {
        assert!(pair[0].end <= pair[1].start);
    }
}

#[test]
fn finish_drops_degenerate_events_with_a_warning() {
    let outcome = finish_events(vec![pending(1000, 1000), pending(2000, 4000)], vec![]);
    assert_eq!(outcome.events.len(), 1);
    assert_eq!(outcome.events[0].index, 0);
    assert_eq!(outcome.warnings.len(), 1);
    assert!(matches!(
        outcome.warnings[0],
        DecodeWarning::EmptyOrDegenerateEvent { .. }
    ));
}

#[test]
fn empty_outcome_reports_no_usable_events() {
    let outcome = finish_events(vec![], vec![]);
    assert_eq!(outcome.status(), DecodeStatus::NoUsableEvents);
}
