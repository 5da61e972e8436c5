//! Handing decoded images to a text recognition engine.
//!
//! We don't bundle an engine; callers supply anything that can turn a
//! prepared grayscale image into text.  This module prepares the images
//! (dark text on a white background with a margin, which is what OCR
//! engines are trained on) and drives the engine across a decode's
//! events.

use image::GrayImage;
use log::{debug, warn};

use crate::event::SubtitleEvent;
use crate::time::Pts;

/// The margin added around each image before recognition, in pixels.
/// Engines misread glyphs that touch the image edge.
pub const DEFAULT_MARGIN: usize = 10;

/// An ISO 639-2 three-letter language code to pass to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LangHint(String);

impl LangHint {
    /// Build a language hint from a three-letter code.
    pub fn new(code: &str) -> Option<LangHint> {
        if code.len() == 3 && code.chars().all(|c| c.is_ascii_lowercase()) {
            Some(LangHint(code.to_string()))
        } else {
            None
        }
    }

    /// The three-letter code.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Something that can read text out of a prepared image.
pub trait TextRecognizer {
    /// The engine's error type.
    type Error;

    /// Recognize the text in one image.
    fn recognize(
        &mut self,
        image: &GrayImage,
        lang: Option<&LangHint>,
    ) -> std::result::Result<String, Self::Error>;
}

/// One recognized subtitle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognizedText {
    /// The index of the event this text came from.
    pub index: usize,
    /// When the subtitle appears.
    pub start: Pts,
    /// When the subtitle is cleared.
    pub end: Pts,
    /// The recognized text, trimmed.
    pub text: String,
}

/// What came out of running a recognizer over a decode's events.
#[derive(Debug)]
pub struct RecognitionOutcome<E> {
    /// Events the engine read non-empty text from.
    pub texts: Vec<RecognizedText>,
    /// Events the engine failed on, with its error for each.  An engine
    /// failure affects only its own event.
    pub failures: Vec<(usize, E)>,
}

/// Run a recognizer over every event, skipping any that produce no
/// text.  An engine error on one event is recorded and recognition
/// continues with the rest.
pub fn recognize_events<R: TextRecognizer>(
    events: &[SubtitleEvent],
    recognizer: &mut R,
    lang: Option<&LangHint>,
) -> RecognitionOutcome<R::Error> {
    let mut texts = Vec::with_capacity(events.len());
    let mut failures = Vec::new();
    for event in events {
        let image = event.image.to_gray_image(DEFAULT_MARGIN);
        let text = match recognizer.recognize(&image, lang) {
            Ok(text) => text,
            Err(err) => {
                warn!("recognition failed for event {}", event.index);
                failures.push((event.index, err));
                continue;
            }
        };
        let text = text.trim();
        if text.is_empty() {
            debug!("no text recognized for event {}", event.index);
            continue;
        }
        texts.push(RecognizedText {
            index: event.index,
            start: event.start,
            end: event.end,
            text: text.to_string(),
        });
    }
    RecognitionOutcome { texts, failures }
}

#[cfg(test)]
use crate::pixmap::RasterImage;

#[cfg(test)]
struct CountingRecognizer;

#[cfg(test)]
impl TextRecognizer for CountingRecognizer {
    type Error = String;

    fn recognize(
        &mut self,
        image: &GrayImage,
        lang: Option<&LangHint>,
    ) -> std::result::Result<String, String> {
        // Count dark pixels so tests can see the image we were handed.
        let dark = image.pixels().filter(|p| p.0[0] == 0).count();
        if dark == 0 {
            Ok(String::new())
        } else {
            Ok(format!("{}:{}", lang.map_or("und", LangHint::as_str), dark))
        }
    }
}

#[test]
fn lang_hints_are_three_lowercase_letters() {
    assert!(LangHint::new("eng").is_some());
    assert!(LangHint::new("en").is_none());
    assert!(LangHint::new("ENG").is_none());
    assert!(LangHint::new("e1g").is_none());
}

#[test]
fn recognize_skips_blank_events() {
    let mut filled = RasterImage::blank(2, 1);
    filled.put(0, 0, true);
    let events = vec![
        SubtitleEvent {
            index: 0,
            start: Pts::from_ms(0),
            end: Pts::from_ms(1000),
            forced: false,
            image: RasterImage::blank(2, 1),
        },
        SubtitleEvent {
            index: 1,
            start: Pts::from_ms(2000),
            end: Pts::from_ms(3000),
            forced: false,
            image: filled,
        },
    ];
    let lang = LangHint::new("eng");
    let outcome = recognize_events(&events, &mut CountingRecognizer, lang.as_ref());
    assert!(outcome.failures.is_empty());
    assert_eq!(outcome.texts.len(), 1);
    assert_eq!(outcome.texts[0].index, 1);
    assert_eq!(outcome.texts[0].text, "eng:1");
}

#[cfg(test)]
struct FlakyRecognizer;

#[cfg(test)]
impl TextRecognizer for FlakyRecognizer {
    type Error = String;

    fn recognize(
        &mut self,
        image: &GrayImage,
        _lang: Option<&LangHint>,
    ) -> std::result::Result<String, String> {
        let dark = image.pixels().filter(|p| p.0[0] == 0).count();
        match dark {
            0 => Ok(String::new()),
            1 => Ok("dot".to_string()),
            n => Err(format!("{} marks", n)),
        }
    }
}

#[test]
fn engine_failure_on_one_event_does_not_stop_the_rest() {
    fn event_with_foreground(index: usize, count: usize) -> SubtitleEvent {
        let mut image = RasterImage::blank(4, 1);
        for x in 0..count {
            image.put(x, 0, true);
        }
        SubtitleEvent {
            index,
            start: Pts::from_ms(index as u64 * 1000),
            end: Pts::from_ms(index as u64 * 1000 + 500),
            forced: false,
            image,
        }
    }
    let events = vec![
        event_with_foreground(0, 1),
        event_with_foreground(1, 2),
        event_with_foreground(2, 1),
    ];
    let outcome = recognize_events(&events, &mut FlakyRecognizer, None);
    assert_eq!(outcome.failures, vec![(1, "2 marks".to_string())]);
    let indices: Vec<usize> = outcome.texts.iter().map(|t| t.index).collect();
    assert_eq!(indices, vec![0, 2]);
    assert_eq!(outcome.texts[0].text, "dot");
}
