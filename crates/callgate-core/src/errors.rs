//! Error types for the callgate core

use std::fmt::Display;
use thiserror::Error;

/// Result type for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors that can occur while negotiating, coordinating or streaming a call
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed or missing request fields
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// A live session already uses this call id
    #[error("Call already in progress: {call_id}")]
    DuplicateCall { call_id: String },

    /// The transport engine could not complete an operation
    #[error("Transport error in {operation}: {details}")]
    Transport { operation: String, details: String },

    /// Reading or writing media failed mid-stream
    #[error("Streaming error: {message}")]
    Streaming { message: String },

    /// The callback URL could not be reached
    #[error("Callback delivery failed: {message}")]
    CallbackDelivery { message: String },

    /// Invalid or unreadable configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Media source I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a duplicate call error
    pub fn duplicate_call(call_id: impl Into<String>) -> Self {
        Self::DuplicateCall {
            call_id: call_id.into(),
        }
    }

    /// Create a transport error for a named operation
    pub fn transport(operation: impl Into<String>, details: impl Display) -> Self {
        Self::Transport {
            operation: operation.into(),
            details: details.to_string(),
        }
    }

    /// Create a streaming error
    pub fn streaming(message: impl Display) -> Self {
        Self::Streaming {
            message: message.to_string(),
        }
    }

    /// Create a callback delivery error
    pub fn callback(message: impl Display) -> Self {
        Self::CallbackDelivery {
            message: message.to_string(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Whether the error was caused by the caller's request rather than the gateway
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation { .. } | Self::DuplicateCall { .. })
    }
}

impl From<config::ConfigError> for GatewayError {
    fn from(err: config::ConfigError) -> Self {
        Self::config(err.to_string())
    }
}
