//! Upload lifecycle
//!
//! ```text
//!            claim              succeed
//! scheduled ───────► uploading ────────► done
//!    ▲ │                │  ▲
//!    │ │ pause          │  │ claim
//!    │ ▼                │  │
//!  paused ◄──pause── retry ◄─ fail (retryable, under limit)
//!    │                  ▲
//!    └─────resume───────┘ (when retry_count > 0)
//!
//! uploading ── fail (permanent or limit reached) ──► failed
//! ```
//!
//! [`UploadStateMachine::apply`] is the single transition function. It works
//! on values and never touches storage; callers persist the result with a
//! compare-and-set on the status they started from.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{truncate_to_minute, ProjectId, Upload, UploadMetadata, UploadStatus};

/// Default number of retryable failures before an upload is abandoned
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Something that happens to an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    /// The dispatcher took the upload for this cycle
    Claim {
        project_id: ProjectId,
        run_id: Uuid,
        at: DateTime<Utc>,
    },
    /// The transport published the video
    Succeed {
        youtube_video_id: String,
        at: DateTime<Utc>,
    },
    /// The transport failed
    Fail {
        reason: String,
        retryable: bool,
        at: DateTime<Utc>,
    },
    /// The account was deactivated
    Pause { at: DateTime<Utc> },
    /// The account was reactivated
    Resume { at: DateTime<Utc> },
    Reschedule {
        scheduled_for: DateTime<Utc>,
        at: DateTime<Utc>,
    },
    EditMetadata {
        metadata: UploadMetadata,
        at: DateTime<Utc>,
    },
}

impl UploadEvent {
    /// Short verb used in error messages
    pub fn action(&self) -> &'static str {
        match self {
            Self::Claim { .. } => "claim",
            Self::Succeed { .. } => "succeed",
            Self::Fail { .. } => "fail",
            Self::Pause { .. } => "pause",
            Self::Resume { .. } => "resume",
            Self::Reschedule { .. } => "reschedule",
            Self::EditMetadata { .. } => "edit",
        }
    }

    fn at(&self) -> DateTime<Utc> {
        match self {
            Self::Claim { at, .. }
            | Self::Succeed { at, .. }
            | Self::Fail { at, .. }
            | Self::Pause { at }
            | Self::Resume { at }
            | Self::Reschedule { at, .. }
            | Self::EditMetadata { at, .. } => *at,
        }
    }
}

/// Transition function for uploads
#[derive(Debug, Clone, Copy)]
pub struct UploadStateMachine {
    max_retries: u32,
}

impl Default for UploadStateMachine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl UploadStateMachine {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries: max_retries.max(1),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Apply `event` to `upload`, returning the updated copy
    pub fn apply(&self, upload: &Upload, event: UploadEvent) -> Result<Upload> {
        use UploadStatus::*;

        if upload.status.is_terminal() {
            return Err(Error::ImmutableTerminalState {
                upload_id: upload.id,
                status: upload.status,
            });
        }

        let invalid = || Error::InvalidTransition {
            upload_id: upload.id,
            from: upload.status,
            action: event.action(),
        };

        let mut next = upload.clone();
        next.updated_at = event.at();

        match (upload.status, &event) {
            (Scheduled | Retry, UploadEvent::Claim { project_id, run_id, .. }) => {
                next.status = Uploading;
                next.api_project_id = Some(*project_id);
                next.run_id = Some(*run_id);
            }
            (Uploading, UploadEvent::Succeed { youtube_video_id, .. }) => {
                next.status = Done;
                next.youtube_video_id = Some(youtube_video_id.clone());
                next.error = None;
            }
            (Uploading, UploadEvent::Fail { reason, retryable, .. }) => {
                next.error = Some(reason.clone());
                if *retryable {
                    next.retry_count = upload.retry_count + 1;
                    next.status = if next.retry_count >= self.max_retries {
                        Failed
                    } else {
                        Retry
                    };
                } else {
                    next.status = Failed;
                }
            }
            (Scheduled | Retry, UploadEvent::Pause { .. }) => {
                next.status = Paused;
            }
            (Paused, UploadEvent::Resume { .. }) => {
                next.status = if upload.retry_count > 0 { Retry } else { Scheduled };
            }
            (Scheduled | Retry | Paused, UploadEvent::Reschedule { scheduled_for, .. }) => {
                next.scheduled_for = truncate_to_minute(*scheduled_for);
            }
            (Scheduled | Retry | Paused, UploadEvent::EditMetadata { metadata, .. }) => {
                next.title = metadata.title.clone();
                next.description = metadata.description.clone();
                next.tags = metadata.tags.clone();
            }
            _ => return Err(invalid()),
        }

        Ok(next)
    }
}
