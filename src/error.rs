//! Unified error handling for the shortcast crate
//!
//! Every fallible operation in the library returns [`Error`]. The variants
//! follow the engine's error taxonomy: some are surfaced to the caller
//! immediately (bad schedule requests, terminal-state mutations), some are
//! transient and simply retried on a later cycle (quota, credentials), and a
//! few are programming-invariant violations that stop the worker.
//!
//! # Usage
//!
//! ```rust,ignore
//! use shortcast::error::{Error, ErrorCategory, ShortcastErrorTrait};
//!
//! fn handle(err: Error) {
//!     if err.is_fatal() {
//!         tracing::error!(error = %err, "operator intervention required");
//!     } else if err.is_recoverable() {
//!         tracing::warn!(error = %err, "will retry next cycle");
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

use crate::models::{AccountId, ProjectId, UploadId, UploadStatus, VideoId};
pub use crate::transport::TransportError;

/// Common trait for shortcast error types
pub trait ShortcastErrorTrait: std::error::Error {
    /// Check if this error is transient (a later cycle may succeed)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Bad scheduling input
    Scheduling,
    /// Quota admission
    Quota,
    /// Account credentials
    Credentials,
    /// Upload transport failures
    Transport,
    /// Upload lifecycle violations
    State,
    /// Storage and I/O errors
    Storage,
    /// Configuration and validation errors
    Config,
    /// Broken internal invariants
    Invariant,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduling => "scheduling",
            Self::Quota => "quota",
            Self::Credentials => "credentials",
            Self::Transport => "transport",
            Self::State => "state",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Invariant => "invariant",
        }
    }
}

/// Unified error type for the shortcast crate
#[derive(Error, Debug)]
pub enum Error {
    /// Rejected scheduling input; nothing was created
    #[error("Invalid schedule request: {reason}")]
    InvalidScheduleRequest { reason: String },

    /// No project can admit the requested cost right now
    #[error("Quota exceeded: requested {requested} units, {remaining} remaining")]
    QuotaExceeded {
        project_id: Option<ProjectId>,
        requested: u64,
        remaining: u64,
    },

    /// The account's access token could not be obtained this cycle
    #[error("Credentials expired for account {account_id}: {reason}")]
    CredentialExpired { account_id: AccountId, reason: String },

    /// Retryable transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Content or policy rejection; retrying cannot help
    #[error("Permanently rejected: {reason}")]
    PermanentRejection { reason: String },

    /// Attempt to mutate a `done` or `failed` upload
    #[error("Upload {upload_id} is {status} and can no longer be changed")]
    ImmutableTerminalState {
        upload_id: UploadId,
        status: UploadStatus,
    },

    /// Transition not present in the upload state table
    #[error("Upload {upload_id} cannot {action} while {from}")]
    InvalidTransition {
        upload_id: UploadId,
        from: UploadStatus,
        action: &'static str,
    },

    /// Video is already bound to a live upload
    #[error("Video {video_id} is already picked")]
    VideoAlreadyPicked { video_id: VideoId },

    /// Referenced record does not exist
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Internal invariant broken; fatal to the worker
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[source] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),
}

impl ShortcastErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::QuotaExceeded { .. } | Self::CredentialExpired { .. } => true,
            Self::Transport(e) => e.is_retryable(),
            Self::Io(_) => true,
            Self::InvalidScheduleRequest { .. }
            | Self::PermanentRejection { .. }
            | Self::ImmutableTerminalState { .. }
            | Self::InvalidTransition { .. }
            | Self::VideoAlreadyPicked { .. }
            | Self::NotFound { .. }
            | Self::InvariantViolation(_)
            | Self::Database(_)
            | Self::Json(_)
            | Self::Config(_) => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidScheduleRequest { .. } | Self::VideoAlreadyPicked { .. } => {
                ErrorCategory::Scheduling
            }
            Self::QuotaExceeded { .. } => ErrorCategory::Quota,
            Self::CredentialExpired { .. } => ErrorCategory::Credentials,
            Self::Transport(_) | Self::PermanentRejection { .. } => ErrorCategory::Transport,
            Self::ImmutableTerminalState { .. }
            | Self::InvalidTransition { .. }
            | Self::NotFound { .. } => ErrorCategory::State,
            Self::Database(_) | Self::Io(_) | Self::Json(_) => ErrorCategory::Storage,
            Self::Config(_) => ErrorCategory::Config,
            Self::InvariantViolation(_) => ErrorCategory::Invariant,
        }
    }
}

impl Error {
    /// Create an invalid schedule request error
    pub fn invalid_schedule(reason: impl Into<String>) -> Self {
        Self::InvalidScheduleRequest {
            reason: reason.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Create an invariant violation
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Classify a transport failure as retryable or permanent
    pub fn from_transport(err: TransportError) -> Self {
        if err.is_retryable() {
            Self::Transport(err)
        } else {
            Self::PermanentRejection {
                reason: err.to_string(),
            }
        }
    }

    /// Whether the worker must stop for operator intervention
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}

// Conversion from rusqlite::Error
impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err)
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
