//! Core data structures for the upload scheduler
//!
//! This module defines the records the engine reads and writes: API projects
//! with their daily quota, publishing accounts, candidate videos and the
//! uploads that bind a video to an account at a point in time.

use chrono::{DateTime, Duration, DurationRound, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Identity of an API credential set
pub type ProjectId = Uuid;

/// Identity of a publishing account (one channel)
pub type AccountId = Uuid;

/// Identity of a candidate video
pub type VideoId = Uuid;

/// Identity of a scheduled upload
pub type UploadId = Uuid;

// ============================================================================
// API Project
// ============================================================================

/// A Google API credential set with a fixed daily quota
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiProject {
    pub id: ProjectId,
    pub name: String,
    pub daily_quota: u64,
    pub quota_used_today: u64,
    /// Next reset instant; always in the future relative to the last reset
    pub quota_reset_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl ApiProject {
    /// Create a project whose first window ends at the next UTC midnight
    pub fn new(name: impl Into<String>, daily_quota: u64, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            daily_quota,
            quota_used_today: 0,
            quota_reset_at: next_utc_midnight(now),
            created_at: now,
        }
    }

    /// Quota units still available today
    pub fn remaining(&self) -> u64 {
        self.daily_quota.saturating_sub(self.quota_used_today)
    }

    /// Whether an action of the given cost fits today
    pub fn has_headroom(&self, cost: u64) -> bool {
        self.remaining() >= cost
    }
}

// ============================================================================
// Cadence
// ============================================================================

/// Uploads per day targeted for one account (1-3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Cadence(u8);

impl Cadence {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 3;

    /// Validate a raw cadence value
    pub fn new(per_day: u8) -> Result<Self> {
        if !(Self::MIN..=Self::MAX).contains(&per_day) {
            return Err(Error::invalid_schedule(format!(
                "cadence must be between {} and {} uploads per day, got {per_day}",
                Self::MIN,
                Self::MAX
            )));
        }
        Ok(Self(per_day))
    }

    pub fn per_day(&self) -> usize {
        self.0 as usize
    }
}

impl Default for Cadence {
    fn default() -> Self {
        Self(2)
    }
}

impl TryFrom<u8> for Cadence {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Cadence> for u8 {
    fn from(cadence: Cadence) -> Self {
        cadence.0
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/day", self.0)
    }
}

// ============================================================================
// Account
// ============================================================================

/// A publishing channel bound to one API project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub display_name: String,
    pub channel_id: Option<String>,
    pub api_project_id: ProjectId,
    pub theme: String,
    pub active: bool,
    /// Preferred times of day, in slot order
    pub upload_times: Vec<NaiveTime>,
    pub cadence: Cadence,
    /// Whether dispatch may charge a different project when the bound one is exhausted
    pub allow_rotation: bool,
    /// Default hashtags for the account's theme
    pub default_tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Create an active account with the default 10:00 / 18:00 slots
    pub fn new(
        display_name: impl Into<String>,
        api_project_id: ProjectId,
        theme: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name: display_name.into(),
            channel_id: None,
            api_project_id,
            theme: theme.into(),
            active: true,
            upload_times: default_upload_times(),
            cadence: Cadence::default(),
            allow_rotation: true,
            default_tags: Vec::new(),
            created_at: now,
        }
    }

    pub fn with_upload_times(mut self, times: Vec<NaiveTime>) -> Self {
        self.upload_times = times;
        self
    }

    pub fn with_cadence(mut self, cadence: Cadence) -> Self {
        self.cadence = cadence;
        self
    }

    pub fn with_rotation(mut self, allow: bool) -> Self {
        self.allow_rotation = allow;
        self
    }

    pub fn with_default_tags(mut self, tags: Vec<String>) -> Self {
        self.default_tags = tags;
        self
    }
}

fn default_upload_times() -> Vec<NaiveTime> {
    [(10, 0), (18, 0)]
        .into_iter()
        .filter_map(|(h, m)| NaiveTime::from_hms_opt(h, m, 0))
        .collect()
}

// ============================================================================
// Video
// ============================================================================

/// A candidate short produced by the discovery collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Video {
    pub id: VideoId,
    /// Identifier on the source platform
    pub source_video_id: String,
    pub title: Option<String>,
    pub channel_title: Option<String>,
    pub theme: String,
    /// Trusted to be <= 60 by the upstream collaborator
    pub duration_seconds: u32,
    pub picked: bool,
    pub created_at: DateTime<Utc>,
}

impl Video {
    pub fn new(
        source_video_id: impl Into<String>,
        theme: impl Into<String>,
        duration_seconds: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_video_id: source_video_id.into(),
            title: None,
            channel_title: None,
            theme: theme.into(),
            duration_seconds,
            picked: false,
            created_at: now,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

// ============================================================================
// Upload Status
// ============================================================================

/// Lifecycle state of an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Scheduled,
    Uploading,
    Retry,
    Paused,
    Done,
    Failed,
}

impl UploadStatus {
    pub fn all() -> [Self; 6] {
        [
            Self::Scheduled,
            Self::Uploading,
            Self::Retry,
            Self::Paused,
            Self::Done,
            Self::Failed,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Uploading => "uploading",
            Self::Retry => "retry",
            Self::Paused => "paused",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    /// `done` and `failed` accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// States the dispatcher may claim from
    pub fn is_dispatchable(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Retry)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "uploading" => Ok(Self::Uploading),
            "retry" => Ok(Self::Retry),
            "paused" => Ok(Self::Paused),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            other => Err(Error::invariant(format!("unknown upload status '{other}'"))),
        }
    }
}

// ============================================================================
// Upload
// ============================================================================

/// Title, description and tags sent with an upload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

/// Caller-supplied overrides for derived metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataOverrides {
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl UploadMetadata {
    /// Derive metadata from the video and the account's theme tags
    pub fn derive(video: &Video, account: &Account, overrides: MetadataOverrides) -> Self {
        let tags = overrides
            .tags
            .unwrap_or_else(|| account.default_tags.clone());

        let title = overrides.title.unwrap_or_else(|| {
            video
                .title
                .clone()
                .unwrap_or_else(|| video.source_video_id.clone())
        });

        let description = overrides.description.unwrap_or_else(|| {
            let hashtags = account
                .default_tags
                .iter()
                .map(|t| {
                    if t.starts_with('#') {
                        t.clone()
                    } else {
                        format!("#{t}")
                    }
                })
                .collect::<Vec<_>>()
                .join(" ");
            format!("Amazing content! Follow for more.\n\n{hashtags}")
                .trim_end()
                .to_string()
        });

        Self {
            title,
            description,
            tags,
        }
    }
}

/// The unit of work the engine manages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upload {
    pub id: UploadId,
    pub account_id: AccountId,
    pub video_id: VideoId,
    pub status: UploadStatus,
    pub scheduled_for: DateTime<Utc>,
    /// Project actually charged; bound when the upload is claimed
    pub api_project_id: Option<ProjectId>,
    pub retry_count: u32,
    pub error: Option<String>,
    pub youtube_video_id: Option<String>,
    /// Dispatch attempt that last touched this upload
    pub run_id: Option<Uuid>,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Upload {
    /// Create a new upload in the `scheduled` state
    pub fn new(
        account_id: AccountId,
        video_id: VideoId,
        scheduled_for: DateTime<Utc>,
        metadata: UploadMetadata,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            video_id,
            status: UploadStatus::Scheduled,
            scheduled_for,
            api_project_id: None,
            retry_count: 0,
            error: None,
            youtube_video_id: None,
            run_id: None,
            title: metadata.title,
            description: metadata.description,
            tags: metadata.tags,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn metadata(&self) -> UploadMetadata {
        UploadMetadata {
            title: self.title.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
        }
    }

    /// Whether the dispatcher should pick this upload up at `now`
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status.is_dispatchable() && self.scheduled_for <= now
    }
}

/// One audit row per upload transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadHistoryEntry {
    pub upload_id: UploadId,
    pub status: UploadStatus,
    pub run_id: Option<Uuid>,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl UploadHistoryEntry {
    pub fn for_upload(upload: &Upload) -> Self {
        Self {
            upload_id: upload.id,
            status: upload.status,
            run_id: upload.run_id,
            error: upload.error.clone(),
            recorded_at: upload.updated_at,
        }
    }
}

/// Permanent record of a committed quota charge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaCharge {
    pub project_id: ProjectId,
    pub cost: u64,
    pub used_before: u64,
    pub used_after: u64,
    pub charged_at: DateTime<Utc>,
}

// ============================================================================
// Time helpers
// ============================================================================

/// Drop seconds and sub-second precision
pub fn truncate_to_minute(at: DateTime<Utc>) -> DateTime<Utc> {
    at.duration_trunc(Duration::minutes(1)).unwrap_or(at)
}

/// First instant of the next UTC calendar day
pub fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + Duration::days(1);
    tomorrow
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc())
        .unwrap_or(now + Duration::days(1))
}
