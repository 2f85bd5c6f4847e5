// TgDL - Chat Media Downloader
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Error types for the downloader core
//!
//! # Error Categories
//!
//! ### Connection/Login
//! - Transport or handshake failures → `ConnectionError`, `AuthenticationFailed`
//! - Caller walked away from a code/password prompt → `LoginAborted`
//! - Prompt not answered within the configured bound → `Timeout`
//!
//! ### Operation preconditions
//! - Scan/download before login completed → `NotAuthorized`
//! - A second long-running operation on the same session → `OperationInProgress`
//!
//! ### Scan
//! - Unparseable chat reference → `InvalidChatReference`
//! - Collaborator could not resolve the reference → `EntityNotFound`
//!
//! ### Download
//! - Failure isolated to one item → `ItemDownload`, `MediaUnavailable`, `FileSizeMismatch`
//! - Cooperative stop → `Cancelled` (never counted as a failure)
//!
//! ## Propagation
//!
//! Connection- and resolution-level errors abort the whole operation and reach
//! the caller unmodified. Per-item errors are tallied into the download summary
//! and never abort the batch. Nothing in the core retries on its own.

use thiserror::Error;

/// Result type alias using our DownloaderError type
pub type Result<T> = std::result::Result<T, DownloaderError>;

/// Main error type for the downloader core
#[derive(Error, Debug)]
pub enum DownloaderError {
    // ===== Connection / Login Errors =====

    /// Transport-level failure talking to the messaging service
    #[error("Connection error: {message}")]
    ConnectionError { message: String },

    /// The service rejected a code, password or session
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// The caller dropped the code/password prompt without answering
    #[error("Login aborted before the {prompt} was supplied")]
    LoginAborted { prompt: String },

    /// Scan or download attempted before the session reached Authenticated
    #[error("Not authorized: log in before scanning or downloading")]
    NotAuthorized,

    /// Another long-running operation holds the connection
    #[error("Another operation is already running on this connection: {0}")]
    OperationInProgress(String),

    // ===== Scan Errors =====

    /// Chat reference could not be parsed
    #[error("Invalid chat reference: {0}")]
    InvalidChatReference(String),

    /// The messaging service could not resolve the chat reference
    #[error("Chat or channel not found: {0}")]
    EntityNotFound(String),

    // ===== Download Errors =====

    /// Failure isolated to a single media item
    #[error("Download of message {message_id} failed: {message}")]
    ItemDownload { message_id: i64, message: String },

    /// The message no longer exists or no longer carries media
    #[error("Message {0} has no downloadable media")]
    MediaUnavailable(i64),

    /// Written file does not match the size announced by the service
    #[error("Download file size mismatch: expected {expected} bytes, got {actual} bytes")]
    FileSizeMismatch { expected: u64, actual: u64 },

    // ===== Configuration/State Errors =====

    /// Configuration is invalid or incomplete
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Application state is invalid for the requested operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Generic input validation error
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Capability not offered by the messaging collaborator
    #[error("Not supported: {0}")]
    NotSupported(String),

    // ===== General Errors =====

    /// Operation was cancelled by user or system
    #[error("Operation cancelled")]
    Cancelled,

    /// Operation timed out
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    /// Internal error that should not normally occur
    #[error("Internal error: {0}")]
    InternalError(String),

    // ===== External Library Errors =====

    /// HTTP client error from reqwest
    #[error("HTTP client error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<std::num::ParseIntError> for DownloaderError {
    fn from(err: std::num::ParseIntError) -> Self {
        DownloaderError::InvalidInput(format!("Failed to parse integer: {}", err))
    }
}

impl From<tokio::task::JoinError> for DownloaderError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            DownloaderError::Cancelled
        } else {
            DownloaderError::InternalError(format!("Background task panicked: {}", err))
        }
    }
}

// Helper methods for creating common errors
impl DownloaderError {
    /// Create a ConnectionError with a message
    pub fn connection<S: Into<String>>(message: S) -> Self {
        DownloaderError::ConnectionError {
            message: message.into(),
        }
    }

    /// Create an AuthenticationFailed error
    pub fn auth_failed<S: Into<String>>(message: S) -> Self {
        DownloaderError::AuthenticationFailed {
            message: message.into(),
        }
    }

    /// Create an ItemDownload error for one message
    pub fn item<S: Into<String>>(message_id: i64, message: S) -> Self {
        DownloaderError::ItemDownload {
            message_id,
            message: message.into(),
        }
    }

    /// Create an InvalidInput error with a message
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        DownloaderError::InvalidInput(message.into())
    }

    /// Create an InternalError with a message
    pub fn internal<S: Into<String>>(message: S) -> Self {
        DownloaderError::InternalError(message.into())
    }

    /// Check if error means the user has to (re-)authenticate
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            DownloaderError::AuthenticationFailed { .. }
                | DownloaderError::LoginAborted { .. }
                | DownloaderError::NotAuthorized
        )
    }

    /// Check if error is confined to a single download item
    pub fn is_item_error(&self) -> bool {
        matches!(
            self,
            DownloaderError::ItemDownload { .. }
                | DownloaderError::MediaUnavailable(_)
                | DownloaderError::FileSizeMismatch { .. }
        )
    }

    /// Check if error aborts the whole operation it was raised in
    ///
    /// Per-item errors and cooperative cancellation never do.
    pub fn aborts_operation(&self) -> bool {
        !self.is_item_error() && !matches!(self, DownloaderError::Cancelled)
    }

    /// Get user-friendly error message suitable for display
    pub fn user_message(&self) -> String {
        match self {
            DownloaderError::NotAuthorized => {
                "You are not logged in. Please log in before scanning or downloading.".to_string()
            }
            DownloaderError::EntityNotFound(reference) => {
                format!("Could not find a chat or channel for '{}'. Check the link or handle.", reference)
            }
            DownloaderError::InvalidChatReference(reference) => {
                format!("'{}' is not a valid chat link, @handle or id.", reference)
            }
            DownloaderError::LoginAborted { prompt } => {
                format!("Login cancelled: no {} was entered.", prompt)
            }
            DownloaderError::Timeout(secs) => {
                format!("Login timed out after {} seconds. Please try again.", secs)
            }
            DownloaderError::OperationInProgress(kind) => {
                format!("Please wait for the running {} to finish.", kind)
            }
            DownloaderError::ConnectionError { message } => {
                format!("Could not reach the messaging service: {}", message)
            }
            _ => self.to_string(),
        }
    }
}
