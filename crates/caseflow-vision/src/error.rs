use thiserror::Error;

pub type Result<T> = std::result::Result<T, VisionError>;

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("OCR engine failed: {0}")]
    Engine(String),

    #[error("OCR engine not available: {0}")]
    EngineUnavailable(String),

    #[error("invalid image data: {0}")]
    Image(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VisionError::Engine("exit code 1".to_string());
        assert_eq!(err.to_string(), "OCR engine failed: exit code 1");
    }
}
