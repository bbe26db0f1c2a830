//! Error types for mathchat
//!
//! This module defines the error taxonomy shared by the request pipeline,
//! the session store, and the HTTP surface, using `thiserror` for ergonomic
//! error handling.

use thiserror::Error;

/// Main error type for mathchat operations
///
/// The variants mirror the failure classes the user is told about:
/// invalid input, an unreachable service, a service that answered with an
/// error, and local storage trouble.
#[derive(Error, Debug)]
pub enum MathchatError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing or empty user input
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Connection refused, DNS failure, deadline exceeded
    #[error("Service unreachable: {0}")]
    Transport(String),

    /// The completion service responded but signaled an error
    #[error("Service returned an error (status {status}): {message}")]
    Upstream {
        /// HTTP status reported by the service
        status: u16,
        /// Upstream body or schema problem, kept for diagnosis
        message: String,
    },

    /// Session storage write failures
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP client construction errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Filesystem watcher errors
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),
}

/// Result type alias for mathchat operations
///
/// Uses `anyhow::Error` so callers can attach context while the
/// `MathchatError` variant stays recoverable through `downcast_ref`.
pub type Result<T> = anyhow::Result<T>;
