use thiserror::Error;

/// Top-level error type for the Keyturn system.
///
/// Subsystem crates define their own error types and implement
/// `From<KeyturnError>` so that `?` works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KeyturnError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for KeyturnError {
    fn from(err: toml::de::Error) -> Self {
        KeyturnError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for KeyturnError {
    fn from(err: toml::ser::Error) -> Self {
        KeyturnError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for KeyturnError {
    fn from(err: serde_json::Error) -> Self {
        KeyturnError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for Keyturn operations.
pub type Result<T> = std::result::Result<T, KeyturnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KeyturnError::Config("missing field".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field");

        let err = KeyturnError::Validation("email must not be empty".to_string());
        assert_eq!(err.to_string(), "Validation failed: email must not be empty");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: KeyturnError = io_err.into();
        assert!(matches!(err, KeyturnError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("not = [valid").unwrap_err();
        let err: KeyturnError = toml_err.into();
        assert!(matches!(err, KeyturnError::Config(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: KeyturnError = json_err.into();
        assert!(matches!(err, KeyturnError::Serialization(_)));
    }
}
