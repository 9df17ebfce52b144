//! Digit extraction over preprocessed variants.
//!
//! Two modes: one OCR pass over a whole rendering, or per-glyph recognition
//! of segmented digit cells. Both accept only results of exactly the
//! required code length; there is no fallback to shorter partial matches.

use crate::engine::{OcrEngine, OcrProfile, RecognitionMode};
use crate::preprocess::{normalize_cell, DigitCell, Strategy};
use image::GrayImage;

/// Confidence a whole-image pass is assigned when it hits the exact length.
///
/// Fixed at the required length so it ties with a fully-segmented result and
/// earlier strategies win by attempt order.
#[must_use]
pub fn whole_image_confidence(code_length: usize) -> u32 {
    code_length as u32
}

/// A candidate code produced by one (variant, mode) attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionCandidate {
    /// Preprocessing family that produced the rendering
    pub strategy: Strategy,
    /// The recognized digits
    pub digits: String,
    /// Strategy-defined ranking score, not a calibrated probability
    pub confidence: u32,
}

/// Strip everything but ASCII digits from a raw engine result.
#[must_use]
pub fn digits_only(raw: &str) -> String {
    raw.chars().filter(char::is_ascii_digit).collect()
}

/// Profile cascade for whole-image recognition: every segmentation mode,
/// first with the digit whitelist, then without.
fn whole_image_profiles() -> Vec<OcrProfile> {
    const MODES: [RecognitionMode; 5] = [
        RecognitionMode::SingleWord,
        RecognitionMode::SingleLine,
        RecognitionMode::SingleBlock,
        RecognitionMode::SparseText,
        RecognitionMode::SingleChar,
    ];
    let mut profiles = Vec::with_capacity(MODES.len() * 2);
    for digits_only in [true, false] {
        for mode in MODES {
            profiles.push(OcrProfile::new(mode, digits_only));
        }
    }
    profiles
}

/// Run the engine over one whole rendering.
///
/// Returns the first result whose digit count matches `code_length`
/// exactly; shorter or longer results are rejected, never truncated.
pub async fn whole_image(
    engine: &dyn OcrEngine,
    image: &GrayImage,
    code_length: usize,
) -> Option<String> {
    for profile in whole_image_profiles() {
        let raw = match engine.recognize(image, profile).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(error = %e, "ocr pass failed");
                continue;
            }
        };
        let cleaned = digits_only(&raw);
        if cleaned.len() == code_length {
            return Some(cleaned);
        }
        tracing::trace!(raw = %raw, cleaned = %cleaned, "whole-image result rejected");
    }
    None
}

/// Per-glyph recognition of segmented digit cells.
///
/// Each cell is normalized to a fixed canvas and recognized under a short
/// single-character cascade; accepted digits concatenate in left-to-right
/// cell order. The combination is discarded unless exactly `code_length`
/// digits were recognized. Returns the digits and the confidence (count of
/// recognized digits).
pub async fn segmented(
    engine: &dyn OcrEngine,
    cells: &[DigitCell],
    code_length: usize,
) -> Option<(String, u32)> {
    const CELL_MODES: [RecognitionMode; 3] = [
        RecognitionMode::SingleChar,
        RecognitionMode::SingleWord,
        RecognitionMode::SingleLine,
    ];

    let mut digits = String::new();
    for cell in cells {
        let canvas = normalize_cell(cell);
        for mode in CELL_MODES {
            let raw = match engine.recognize(&canvas, OcrProfile::new(mode, true)).await {
                Ok(raw) => raw,
                Err(e) => {
                    tracing::debug!(error = %e, "cell ocr pass failed");
                    continue;
                }
            };
            let cleaned = digits_only(&raw);
            if cleaned.len() == 1 {
                digits.push_str(&cleaned);
                break;
            }
        }
    }

    let recognized = digits.len();
    if recognized == code_length {
        Some((digits, recognized as u32))
    } else {
        tracing::trace!(recognized, required = code_length, "segmented result discarded");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ScriptedOcr;
    use image::Luma;

    fn cell(x: u32) -> DigitCell {
        DigitCell {
            x,
            y: 5,
            width: 12,
            height: 22,
            image: GrayImage::from_pixel(12, 22, Luma([255])),
        }
    }

    #[test]
    fn test_digits_only() {
        assert_eq!(digits_only(" 12 3a4\n"), "1234");
        assert_eq!(digits_only("abc"), "");
    }

    #[tokio::test]
    async fn test_whole_image_walks_the_profile_cascade() {
        // First two profiles give garbage, third gives an exact-length hit
        let engine = ScriptedOcr::queued(["", "12", "1z2i34"]);
        let image = GrayImage::new(90, 32);

        let code = whole_image(&engine, &image, 4).await;
        assert_eq!(code.as_deref(), Some("1234"));
        assert_eq!(engine.call_count(), 3);
    }

    #[tokio::test]
    async fn test_whole_image_never_accepts_partial_matches() {
        // Every profile returns three digits for a four-digit code
        let engine = ScriptedOcr::always("123");
        let image = GrayImage::new(90, 32);

        assert_eq!(whole_image(&engine, &image, 4).await, None);
    }

    #[tokio::test]
    async fn test_whole_image_survives_engine_errors() {
        let engine = ScriptedOcr::failing();
        let image = GrayImage::new(90, 32);

        assert_eq!(whole_image(&engine, &image, 4).await, None);
    }

    #[tokio::test]
    async fn test_segmented_concatenates_in_cell_order() {
        let engine = ScriptedOcr::queued(["7", "3", "0", "9"]);
        let cells = vec![cell(10), cell(42), cell(74), cell(106)];

        let result = segmented(&engine, &cells, 4).await;
        assert_eq!(result, Some(("7309".to_string(), 4)));
    }

    #[tokio::test]
    async fn test_segmented_discards_incomplete_recognition() {
        // Second cell never yields a single digit across its whole cascade
        let engine = ScriptedOcr::queued(["7", "", "", "", "0", "9"]);
        let cells = vec![cell(10), cell(42), cell(74), cell(106)];

        assert_eq!(segmented(&engine, &cells, 4).await, None);
    }

    #[tokio::test]
    async fn test_segmented_retries_cell_modes_before_giving_up() {
        // First mode returns junk, second mode lands the digit
        let engine = ScriptedOcr::queued(["xy", "7"]);
        let cells = vec![cell(10)];

        let result = segmented(&engine, &cells, 1).await;
        assert_eq!(result, Some(("7".to_string(), 1)));
    }
}
