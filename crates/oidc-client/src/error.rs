//! Error types for storage and transport seams
//!
//! Grant functions and flows never return these: they degrade to documented
//! fallback values instead. Errors only surface where the client is built or
//! where a persisted value cannot be read or written.

/// Errors from client construction and persistence.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("token parse error: {0}")]
    TokenParse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Result alias for client operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages_are_descriptive() {
        assert_eq!(
            Error::Storage("key token unreadable".into()).to_string(),
            "storage error: key token unreadable"
        );
        assert!(
            Error::InvalidUrl("relative URL without a base".into())
                .to_string()
                .starts_with("invalid URL:")
        );
    }
}
