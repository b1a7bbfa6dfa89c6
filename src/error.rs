//! Error types for Libro
//!
//! This module defines error types using thiserror for ergonomic error handling.
//! Errors are grouped by where they originate (remote API, local storage,
//! configuration) so callers can decide how to react without string matching.
//!
//! ## Taxonomy
//!
//! - `Transport` - the request never produced a response (DNS, connect, timeout)
//! - `Auth` - the server answered 401 and the single refresh-and-retry cycle
//!   did not recover it
//! - `Application` - any other non-2xx answer, with the server's message
//! - `Storage` - a local read, write or delete failed
//!
//! Multi-step library operations that succeed only partially are not errors:
//! they return `SaveOutcome::SavedWithoutContent` or
//! `RemoveOutcome::RemovedContentRetained` instead.

use thiserror::Error;

/// Result type alias using our ShelfError type
pub type Result<T> = std::result::Result<T, ShelfError>;

/// Discriminant of a [`ShelfError`], stable across message changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transport,
    Auth,
    Application,
    InvalidResponse,
    Storage,
    NotAuthenticated,
    InvalidInput,
    Configuration,
    Internal,
}

/// Main error type for Libro
#[derive(Error, Debug)]
pub enum ShelfError {
    // ===== Remote API Errors =====

    /// No response reached us (connection refused, DNS failure, timeout)
    #[error("Network error: {message}")]
    Transport {
        message: String,
        /// Whether this error might be transient
        is_transient: bool,
    },

    /// Server rejected our credentials and refreshing them did not help
    #[error("Authorization failed: {message}")]
    Auth {
        message: String,
        /// Why the refresh attempt failed, when one was made
        refresh_failure: Option<String>,
    },

    /// Server answered with a non-2xx status other than 401
    #[error("API request failed ({status_code}): {message}")]
    Application {
        message: String,
        status_code: u16,
        /// API endpoint that failed
        endpoint: Option<String>,
    },

    /// API returned a body we could not make sense of
    #[error("Invalid API response: {message}")]
    InvalidApiResponse {
        message: String,
        /// Response body snippet for debugging
        response_body: Option<String>,
    },

    /// An operation needed credentials but nobody is signed in
    #[error("Not signed in")]
    NotAuthenticated,

    // ===== Local Storage Errors =====

    /// Local persistence failed (key-value store, secure store, content files)
    #[error("Storage error during {operation}: {message}")]
    Storage {
        operation: String,
        message: String,
    },

    /// Database schema migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    // ===== Input / Configuration Errors =====

    /// Generic input validation error
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration is invalid or incomplete
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Internal error that should not normally occur
    #[error("Internal error: {0}")]
    InternalError(String),

    // ===== External Library Errors =====

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// Database driver error from sqlx
    #[error("Database error: {0}")]
    SqlxError(#[from] sqlx::Error),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Malformed base URL or endpoint
    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),
}

impl From<reqwest::Error> for ShelfError {
    fn from(err: reqwest::Error) -> Self {
        let is_transient = err.is_timeout() || err.is_connect();
        ShelfError::Transport {
            message: err.to_string(),
            is_transient,
        }
    }
}

// Helper methods for creating common errors
impl ShelfError {
    /// Create a Storage error for the named operation
    pub fn storage<O: Into<String>, M: ToString>(operation: O, message: M) -> Self {
        ShelfError::Storage {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    /// Create an Application error
    pub fn application<S: Into<String>>(
        message: S,
        status_code: u16,
        endpoint: Option<String>,
    ) -> Self {
        ShelfError::Application {
            message: message.into(),
            status_code,
            endpoint,
        }
    }

    /// Create an Auth error
    pub fn auth<S: Into<String>>(message: S, refresh_failure: Option<String>) -> Self {
        ShelfError::Auth {
            message: message.into(),
            refresh_failure,
        }
    }

    /// Create a Transport error
    pub fn transport<S: Into<String>>(message: S, is_transient: bool) -> Self {
        ShelfError::Transport {
            message: message.into(),
            is_transient,
        }
    }

    /// Create an InvalidInput error with a message
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        ShelfError::InvalidInput(message.into())
    }

    /// Create an InternalError with a message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        ShelfError::InternalError(message.into())
    }

    /// Discriminated kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            ShelfError::Transport { .. } => ErrorKind::Transport,
            ShelfError::Auth { .. } => ErrorKind::Auth,
            ShelfError::Application { .. } => ErrorKind::Application,
            ShelfError::InvalidApiResponse { .. } => ErrorKind::InvalidResponse,
            ShelfError::NotAuthenticated => ErrorKind::NotAuthenticated,
            ShelfError::Storage { .. }
            | ShelfError::MigrationFailed(_)
            | ShelfError::SqlxError(_)
            | ShelfError::IoError(_) => ErrorKind::Storage,
            ShelfError::InvalidInput(_) | ShelfError::SerdeJsonError(_) => ErrorKind::InvalidInput,
            ShelfError::InvalidConfiguration(_) | ShelfError::UrlError(_) => {
                ErrorKind::Configuration
            }
            ShelfError::InternalError(_) => ErrorKind::Internal,
        }
    }

    /// Check if error is retryable (transient network errors, 5xx answers)
    ///
    /// Nothing in this crate retries automatically apart from the single
    /// 401-triggered refresh; this is a hint for the UI.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ShelfError::Transport { is_transient: true, .. }
                | ShelfError::Application { status_code: 500..=599, .. }
        )
    }

    /// Check if the user needs to sign in (again)
    pub fn is_auth_error(&self) -> bool {
        matches!(self, ShelfError::Auth { .. } | ShelfError::NotAuthenticated)
    }

    /// Check if error is related to local persistence
    pub fn is_storage_error(&self) -> bool {
        self.kind() == ErrorKind::Storage
    }

    /// Server-provided message for application errors, otherwise the display text
    ///
    /// This is what a sign-in form shows inline.
    pub fn message(&self) -> String {
        match self {
            ShelfError::Application { message, .. }
            | ShelfError::Auth { message, .. }
            | ShelfError::Transport { message, .. } => message.clone(),
            _ => self.to_string(),
        }
    }

    /// Get user-friendly error message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            ShelfError::Transport { .. } => {
                "Could not reach the library server. Check your connection and try again.".to_string()
            }
            ShelfError::Auth { .. } | ShelfError::NotAuthenticated => {
                "Your session has expired. Please sign in again.".to_string()
            }
            ShelfError::Application { message, .. } if !message.is_empty() => message.clone(),
            ShelfError::Storage { operation, .. } => {
                format!("Could not save changes on this device ({}).", operation)
            }
            _ => self.to_string(),
        }
    }
}
