use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    /// The driver session itself is gone. Fatal for the current run;
    /// everything else below is recoverable by the caller.
    #[error("driver failure: {0}")]
    Driver(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("no element found for role: {0}")]
    ElementNotFound(String),

    #[error("element interaction failed: {0}")]
    Interaction(String),

    #[error("script execution failed: {0}")]
    Script(String),

    #[error("stale element handle: {0}")]
    StaleElement(u64),
}

impl BrowserError {
    /// True for errors that end the driver session rather than one action.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Driver(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BrowserError::ElementNotFound("username field".to_string());
        assert_eq!(err.to_string(), "no element found for role: username field");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(BrowserError::Driver("connection lost".to_string()).is_fatal());
        assert!(!BrowserError::Interaction("click intercepted".to_string()).is_fatal());
        assert!(!BrowserError::ElementNotFound("confirm button".to_string()).is_fatal());
    }
}
