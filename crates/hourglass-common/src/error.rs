//! Error types for Hourglass
//!
//! `HourglassError` covers the three failure families the engine knows about:
//! bad configuration (caught while loading), bad administrative input, and
//! storage failures while persisting cooldown state.

/// Application-specific error types
#[derive(thiserror::Error, Debug)]
pub enum HourglassError {
    #[error("caused: {0}")]
    IllegalArgument(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("storage error: {0}")]
    StorageError(String),

    #[error("internal error: {0}")]
    InternalError(String),
}

impl HourglassError {
    pub fn config(msg: impl Into<String>) -> Self {
        HourglassError::ConfigError(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        HourglassError::StorageError(msg.into())
    }

    pub fn illegal_argument(msg: impl Into<String>) -> Self {
        HourglassError::IllegalArgument(msg.into())
    }

    /// Whether this error came from durable storage rather than input
    pub fn is_storage(&self) -> bool {
        matches!(self, HourglassError::StorageError(_))
    }
}

impl From<std::io::Error> for HourglassError {
    fn from(value: std::io::Error) -> Self {
        HourglassError::StorageError(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HourglassError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HourglassError::config("bad duration 'abc' for key 'home'");
        assert_eq!(
            err.to_string(),
            "configuration error: bad duration 'abc' for key 'home'"
        );

        let err = HourglassError::illegal_argument("seconds must be positive");
        assert_eq!(err.to_string(), "caused: seconds must be positive");

        let err = HourglassError::storage("corrupt file");
        assert_eq!(err.to_string(), "storage error: corrupt file");
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: HourglassError = io.into();
        assert!(err.is_storage());
    }
}
