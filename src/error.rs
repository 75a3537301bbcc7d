//! Error types for cidata-rs

use thiserror::Error;

/// Main error type for cidata-rs operations
#[derive(Error, Debug)]
pub enum CidataError {
    #[error("Storage backend connection unavailable: {0}")]
    ConnectionUnavailable(String),

    #[error("Packaging error: {0}")]
    Packaging(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CidataError {
    /// Create a backend error with context
    pub fn backend(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Self::Backend(format!("{}: {}", context, err))
    }

    /// Create a packaging error with context
    pub fn packaging(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Self::Packaging(format!("{}: {}", context, err))
    }

    /// Create a parse error with context
    pub fn parse(context: impl std::fmt::Display, err: impl std::fmt::Display) -> Self {
        Self::Parse(format!("{}: {}", context, err))
    }

    /// Whether the error means the volume no longer exists
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_carries_context() {
        let err = CidataError::backend("defining volume 'ci1.iso'", "pool is full");
        assert_eq!(
            err.to_string(),
            "Backend error: defining volume 'ci1.iso': pool is full"
        );
    }

    #[test]
    fn test_is_not_found() {
        assert!(CidataError::NotFound("key".into()).is_not_found());
        assert!(!CidataError::Parse("bad".into()).is_not_found());
    }
}
