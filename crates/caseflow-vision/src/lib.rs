//! Recognition pipeline for the portal's numeric CAPTCHA.
//!
//! Splits into three layers: preprocessing (competing binarizations of the
//! captured graphic), an OCR engine port, and extraction (whole-image and
//! per-digit modes with exact-length acceptance).

pub mod engine;
pub mod error;
pub mod extract;
pub mod preprocess;

pub use engine::{OcrEngine, OcrProfile, RecognitionMode, TesseractOcr};
pub use error::{Result, VisionError};
pub use extract::{digits_only, whole_image_confidence, RecognitionCandidate};
pub use preprocess::{variants, DigitCell, PreprocessingVariant, Strategy, VariantKind};

#[cfg(any(test, feature = "fake-ocr"))]
pub use engine::ScriptedOcr;
