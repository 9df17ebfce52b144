use caseflow_browser::BrowserError;
use caseflow_vision::VisionError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CaptchaError>;

#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("all recognition strategies exhausted after {attempts} attempts")]
    Exhausted {
        /// How many full resolution attempts were made
        attempts: u32,
    },

    #[error("manual code rejected: {0}")]
    ManualCodeRejected(String),

    #[error("no manual code supplied within the wait window")]
    ManualCodeUnavailable,

    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("vision error: {0}")]
    Vision(#[from] VisionError),
}

impl CaptchaError {
    /// True for errors that end the driver session rather than one attempt.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Browser(e) if e.is_fatal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CaptchaError::Exhausted { attempts: 3 };
        assert_eq!(
            err.to_string(),
            "all recognition strategies exhausted after 3 attempts"
        );
    }

    #[test]
    fn test_fatal_classification() {
        let fatal = CaptchaError::Browser(BrowserError::Driver("gone".to_string()));
        assert!(fatal.is_fatal());
        assert!(!CaptchaError::ManualCodeUnavailable.is_fatal());
    }
}
