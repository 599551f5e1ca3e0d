//! # Cloud Error Types
//!
//! Error types for the cloud service and its clients.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Cloud Error Categories                            │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Configuration  │  │   Transport     │  │     Codec               │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Configuration  │  │  Transport      │  │  Encode                 │ │
//! │  │  ConfigLoad     │  │  NotConnected   │  │  Decode                 │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Listener      │  │   Registry      │  │      Internal           │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  Listener       │  │  NotFound       │  │  ServiceUnavailable     │ │
//! │  │  (never thrown) │  │  InvalidTopic   │  │  Internal               │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Propagation
//! - Configuration and transport errors go back to whoever triggered the call.
//! - Listener errors are wrapped in `Listener` and logged by the fan-out
//!   loop; they never stop dispatch to the remaining listeners.
//! - A debounced announcement that fails at fire time is logged, not retried.

use edgelink_core::CoreError;
use thiserror::Error;

/// Result type alias for cloud operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Cloud error type covering service, client and codec failures.
#[derive(Debug, Error)]
pub enum CloudError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Options could not be built; the previous options stay in effect.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// Options file could not be read.
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// The data service rejected a publish/subscribe call.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The data service is not connected and cannot queue the request.
    #[error("Not connected")]
    NotConnected,

    // =========================================================================
    // Codec Errors
    // =========================================================================
    #[error("Failed to encode payload: {0}")]
    Encode(String),

    #[error("Failed to decode payload: {0}")]
    Decode(String),

    // =========================================================================
    // Listener / Registry Errors
    // =========================================================================
    /// A listener failed during fan-out.
    #[error("Listener for '{app_id}' failed in {callback}: {reason}")]
    Listener {
        app_id: String,
        callback: &'static str,
        reason: String,
    },

    /// No application with that id is registered.
    #[error("Application not found: {0}")]
    NotFound(String),

    /// Topic outside the device namespace or malformed application id.
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// The service cannot run (no runtime, already dropped).
    #[error("Cloud service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<CoreError> for CloudError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ForeignTopic(topic) => CloudError::InvalidTopic(topic),
            other => CloudError::Configuration(other.to_string()),
        }
    }
}

impl From<std::io::Error> for CloudError {
    fn from(err: std::io::Error) -> Self {
        CloudError::ConfigLoad(err.to_string())
    }
}

impl From<prost::EncodeError> for CloudError {
    fn from(err: prost::EncodeError) -> Self {
        CloudError::Encode(err.to_string())
    }
}

impl From<prost::DecodeError> for CloudError {
    fn from(err: prost::DecodeError) -> Self {
        CloudError::Decode(err.to_string())
    }
}

// =============================================================================
// Error Categorization
// =============================================================================

impl CloudError {
    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(self, CloudError::Configuration(_) | CloudError::ConfigLoad(_))
    }

    /// Returns true if the data service refused the request.
    pub fn is_transport_error(&self) -> bool {
        matches!(self, CloudError::Transport(_) | CloudError::NotConnected)
    }

    /// Returns true if a payload could not be converted.
    pub fn is_codec_error(&self) -> bool {
        matches!(self, CloudError::Encode(_) | CloudError::Decode(_))
    }
}
