//! OCR engine port.
//!
//! Recognition strategies are expressed as ([`RecognitionMode`],
//! digit-whitelist) profiles so competing extraction passes can share one
//! engine. The production engine shells out to the `tesseract` binary;
//! tests use a scripted engine.

use crate::error::{Result, VisionError};
use caseflow_core::OcrConfig;
use image::GrayImage;

/// Page-segmentation mode handed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionMode {
    /// A uniform block of text (psm 6)
    SingleBlock,
    /// A single line (psm 7)
    SingleLine,
    /// A single word (psm 8)
    SingleWord,
    /// A single character (psm 10)
    SingleChar,
    /// Sparse text in no particular order (psm 11)
    SparseText,
}

impl RecognitionMode {
    /// Tesseract `--psm` value for this mode.
    #[must_use]
    pub fn psm(self) -> &'static str {
        match self {
            Self::SingleBlock => "6",
            Self::SingleLine => "7",
            Self::SingleWord => "8",
            Self::SingleChar => "10",
            Self::SparseText => "11",
        }
    }
}

/// One engine configuration attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OcrProfile {
    /// Segmentation mode
    pub mode: RecognitionMode,
    /// Restrict recognition to the digits 0-9
    pub digits_only: bool,
}

impl OcrProfile {
    /// Profile constructor.
    #[must_use]
    pub fn new(mode: RecognitionMode, digits_only: bool) -> Self {
        Self { mode, digits_only }
    }
}

/// Engine interface: one preprocessed image in, raw text out.
#[async_trait::async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognize text in `image` under the given profile.
    async fn recognize(&self, image: &GrayImage, profile: OcrProfile) -> Result<String>;
}

/// Engine backed by the `tesseract` command-line binary.
///
/// The image is written to a temporary PNG and the binary is invoked with
/// `--oem 3`, the profile's `--psm`, and a digit whitelist when requested.
pub struct TesseractOcr {
    command: String,
    language: String,
}

impl TesseractOcr {
    /// Engine using the configured binary path and language.
    #[must_use]
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            command: config.tesseract_cmd.clone(),
            language: config.language.clone(),
        }
    }

    /// Check that the binary can be executed at all.
    pub async fn probe(&self) -> Result<()> {
        let output = tokio::process::Command::new(&self.command)
            .arg("--version")
            .output()
            .await
            .map_err(|e| {
                VisionError::EngineUnavailable(format!("{}: {e}", self.command))
            })?;
        if output.status.success() {
            Ok(())
        } else {
            Err(VisionError::EngineUnavailable(format!(
                "{} exited with {}",
                self.command, output.status
            )))
        }
    }
}

#[async_trait::async_trait]
impl OcrEngine for TesseractOcr {
    async fn recognize(&self, image: &GrayImage, profile: OcrProfile) -> Result<String> {
        let input = tempfile::Builder::new()
            .prefix("caseflow-ocr-")
            .suffix(".png")
            .tempfile()?;
        image
            .save(input.path())
            .map_err(|e| VisionError::Image(e.to_string()))?;

        let mut command = tokio::process::Command::new(&self.command);
        command
            .arg(input.path())
            .arg("stdout")
            .args(["-l", &self.language])
            .args(["--oem", "3"])
            .args(["--psm", profile.mode.psm()]);
        if profile.digits_only {
            command.args(["-c", "tessedit_char_whitelist=0123456789"]);
        }

        let output = command
            .output()
            .await
            .map_err(|e| VisionError::EngineUnavailable(format!("{}: {e}", self.command)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VisionError::Engine(format!(
                "exit {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::trace!(psm = profile.mode.psm(), digits_only = profile.digits_only, raw = %text, "ocr pass");
        Ok(text)
    }
}

#[cfg(any(test, feature = "fake-ocr"))]
pub use scripted::ScriptedOcr;

#[cfg(any(test, feature = "fake-ocr"))]
mod scripted {
    use super::{OcrEngine, OcrProfile, Result, VisionError};
    use image::GrayImage;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    enum Script {
        Queue(Mutex<VecDeque<String>>),
        Always(String),
        Fail,
    }

    /// Deterministic OCR engine for tests.
    pub struct ScriptedOcr {
        script: Script,
        calls: AtomicU32,
    }

    impl ScriptedOcr {
        /// Return the queued responses in order; empty string once drained.
        pub fn queued<I, S>(responses: I) -> Self
        where
            I: IntoIterator<Item = S>,
            S: Into<String>,
        {
            Self {
                script: Script::Queue(Mutex::new(
                    responses.into_iter().map(Into::into).collect(),
                )),
                calls: AtomicU32::new(0),
            }
        }

        /// Return the same text on every call.
        pub fn always(text: &str) -> Self {
            Self {
                script: Script::Always(text.to_string()),
                calls: AtomicU32::new(0),
            }
        }

        /// Fail every call.
        pub fn failing() -> Self {
            Self {
                script: Script::Fail,
                calls: AtomicU32::new(0),
            }
        }

        /// How many recognitions were attempted.
        pub fn call_count(&self) -> u32 {
            self.calls.load(Ordering::Relaxed)
        }
    }

    #[async_trait::async_trait]
    impl OcrEngine for ScriptedOcr {
        async fn recognize(&self, _image: &GrayImage, _profile: OcrProfile) -> Result<String> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            match &self.script {
                Script::Queue(queue) => Ok(queue
                    .lock()
                    .expect("scripted ocr queue")
                    .pop_front()
                    .unwrap_or_default()),
                Script::Always(text) => Ok(text.clone()),
                Script::Fail => Err(VisionError::Engine("scripted failure".to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_psm_mapping() {
        assert_eq!(RecognitionMode::SingleBlock.psm(), "6");
        assert_eq!(RecognitionMode::SingleLine.psm(), "7");
        assert_eq!(RecognitionMode::SingleWord.psm(), "8");
        assert_eq!(RecognitionMode::SingleChar.psm(), "10");
        assert_eq!(RecognitionMode::SparseText.psm(), "11");
    }

    #[tokio::test]
    async fn test_scripted_queue_drains_in_order() {
        let engine = ScriptedOcr::queued(["12", "1234"]);
        let image = GrayImage::new(1, 1);
        let profile = OcrProfile::new(RecognitionMode::SingleWord, true);

        assert_eq!(engine.recognize(&image, profile).await.expect("first"), "12");
        assert_eq!(engine.recognize(&image, profile).await.expect("second"), "1234");
        assert_eq!(engine.recognize(&image, profile).await.expect("drained"), "");
        assert_eq!(engine.call_count(), 3);
    }
}
