//! Collaborator interfaces consumed by the dispatcher
//!
//! The engine does not talk to the video host or the OAuth server itself.
//! It receives an [`UploadTransport`] that streams the bytes and a
//! [`CredentialProvider`] that hands out access tokens, and classifies their
//! failures into retryable and permanent ones.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{Account, Upload, UploadId, Video, VideoId};

// ============================================================================
// Transport Errors
// ============================================================================

/// Failures reported by the upload transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Connection-level failure
    #[error("network error: {0}")]
    Network(String),

    /// The host throttled the request
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The call did not finish within the configured timeout
    #[error("upload timed out")]
    Timeout,

    /// Host-side error with HTTP status
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Content refused by the host's policy checks
    #[error("rejected by policy: {0}")]
    Rejected(String),

    /// The account's grant was revoked
    #[error("credentials revoked: {0}")]
    CredentialsRevoked(String),

    /// Malformed request (bad metadata, unsupported media)
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Whether a later attempt may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited(_) | Self::Timeout => true,
            Self::Server { status, .. } => *status >= 500,
            Self::Rejected(_) | Self::CredentialsRevoked(_) | Self::InvalidRequest(_) => false,
        }
    }
}

// ============================================================================
// Request Types
// ============================================================================

/// Visibility of the published video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    Public,
    #[default]
    Unlisted,
    Private,
}

impl Privacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Unlisted => "unlisted",
            Self::Private => "private",
        }
    }
}

impl FromStr for Privacy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "unlisted" => Ok(Self::Unlisted),
            "private" => Ok(Self::Private),
            other => Err(Error::config(format!(
                "invalid privacy '{other}', expected public, unlisted or private"
            ))),
        }
    }
}

/// Short-lived OAuth access token
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Everything the transport needs to publish one video
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub upload_id: UploadId,
    pub video_id: VideoId,
    /// Reference the collaborator resolves to a byte stream
    pub source_video_id: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub privacy: Privacy,
}

impl UploadRequest {
    pub fn new(upload: &Upload, video: &Video, privacy: Privacy) -> Self {
        Self {
            upload_id: upload.id,
            video_id: video.id,
            source_video_id: video.source_video_id.clone(),
            title: upload.title.clone(),
            description: upload.description.clone(),
            tags: upload.tags.clone(),
            privacy,
        }
    }
}

// ============================================================================
// Collaborator Traits
// ============================================================================

/// Streams a video to the host and returns the published video id
///
/// Implementations own any temporary artifacts and must clean them up
/// before returning, whatever the outcome.
#[async_trait]
pub trait UploadTransport: Send + Sync {
    async fn upload(
        &self,
        token: &AccessToken,
        request: &UploadRequest,
    ) -> std::result::Result<String, TransportError>;
}

/// Supplies a valid access token for an account at dispatch time
///
/// Failures should be reported as [`Error::CredentialExpired`]; the
/// dispatcher skips the whole account for the cycle.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn access_token(&self, account: &Account) -> Result<AccessToken>;
}

// ============================================================================
// Dry-run implementations
// ============================================================================

/// Transport that publishes nothing and returns synthetic ids
#[derive(Debug, Default, Clone)]
pub struct DryRunTransport;

#[async_trait]
impl UploadTransport for DryRunTransport {
    async fn upload(
        &self,
        _token: &AccessToken,
        request: &UploadRequest,
    ) -> std::result::Result<String, TransportError> {
        tracing::info!(
            upload_id = %request.upload_id,
            source = %request.source_video_id,
            title = %request.title,
            privacy = request.privacy.as_str(),
            "Dry run: skipping upload"
        );
        Ok(format!("dry-run-{}", Uuid::new_v4().simple()))
    }
}

/// Hands every account the same token
#[derive(Debug, Clone)]
pub struct StaticCredentials {
    token: AccessToken,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(token),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn access_token(&self, _account: &Account) -> Result<AccessToken> {
        Ok(self.token.clone())
    }
}
