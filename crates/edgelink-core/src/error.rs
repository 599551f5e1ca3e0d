//! # Error Types
//!
//! Domain-specific error types for edgelink-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  edgelink-core errors (this file)                                      │
//! │  └── CoreError        - Malformed options, topics or properties        │
//! │                                                                         │
//! │  edgelink-cloud errors (separate crate)                                │
//! │  └── CloudError       - Transport, codec and listener failures         │
//! │                                                                         │
//! │  Flow: CoreError → CloudError::Configuration → caller of activate()    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while building options or parsing topics.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// An option has a value that cannot be used.
    ///
    /// ## When This Occurs
    /// - Empty control prefix
    /// - Control prefix containing the topic separator
    /// - Zero lifecycle publish delay
    #[error("Invalid option '{key}': {reason}")]
    InvalidOption { key: String, reason: String },

    /// The properties source could not be parsed.
    #[error("Failed to parse properties: {0}")]
    PropertiesParse(String),

    /// A topic does not belong to the device namespace.
    #[error("Topic '{0}' is outside the device namespace")]
    ForeignTopic(String),
}

impl CoreError {
    /// Shorthand for [`CoreError::InvalidOption`].
    pub fn invalid_option(key: &str, reason: impl Into<String>) -> Self {
        CoreError::InvalidOption {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<toml::de::Error> for CoreError {
    fn from(err: toml::de::Error) -> Self {
        CoreError::PropertiesParse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::invalid_option("topic.control-prefix", "must not be empty");
        assert!(err.to_string().contains("topic.control-prefix"));
        assert!(err.to_string().contains("must not be empty"));
    }
}
