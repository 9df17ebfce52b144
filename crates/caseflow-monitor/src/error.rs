use caseflow_browser::BrowserError;
use caseflow_captcha::CaptchaError;
use caseflow_core::ConfigError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MonitorError>;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("captcha error: {0}")]
    Captcha(#[from] CaptchaError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("monitor is already running")]
    AlreadyRunning,

    #[error("monitor is not running")]
    NotRunning,
}

impl MonitorError {
    /// True when the underlying driver session is gone and the loop must
    /// end; every other error is absorbed into the next cycle's retry.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Browser(e) => e.is_fatal(),
            Self::Captcha(e) => e.is_fatal(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        let fatal = MonitorError::Browser(BrowserError::Driver("gone".to_string()));
        assert!(fatal.is_fatal());

        let recoverable = MonitorError::Browser(BrowserError::ElementNotFound(
            "confirm button".to_string(),
        ));
        assert!(!recoverable.is_fatal());
        assert!(!MonitorError::Authentication("bad code".to_string()).is_fatal());
    }
}
