//! Repository Pattern for Scheduler State
//!
//! This module provides trait-based repository abstractions so the ledger,
//! dispatcher and service never depend on a concrete storage engine:
//! - Easy testing with the in-memory implementation
//! - SQLite for single-node deployments
//! - Clear separation between scheduling logic and persistence
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Ledger / Dispatcher / Service                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Repository Traits                         │
//! │  ProjectRepository, AccountRepository, VideoRepository,     │
//! │  UploadRepository  (combined as `Store`)                    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                   ┌──────────┴──────────┐
//!                   ▼                     ▼
//!          ┌─────────────────┐   ┌─────────────────┐
//!          │     SQLite      │   │    In-memory    │
//!          │   SqliteStore   │   │   MemoryStore   │
//!          └─────────────────┘   └─────────────────┘
//! ```
//!
//! Upload state changes go through [`UploadRepository::update_if_status`],
//! a compare-and-set keyed on the status the caller last observed. Exactly
//! one of several racing writers wins.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::models::{
    Account, AccountId, ApiProject, ProjectId, QuotaCharge, Upload, UploadHistoryEntry, UploadId,
    UploadStatus, Video, VideoId,
};

// ============================================================================
// Query Types
// ============================================================================

/// Filter for listing uploads
#[derive(Debug, Clone)]
pub struct UploadFilter {
    pub account_id: Option<AccountId>,
    pub status: Option<UploadStatus>,
    pub limit: usize,
}

impl Default for UploadFilter {
    fn default() -> Self {
        Self {
            account_id: None,
            status: None,
            limit: 100,
        }
    }
}

impl UploadFilter {
    pub fn for_account(account_id: AccountId) -> Self {
        Self {
            account_id: Some(account_id),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: UploadStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn matches(&self, upload: &Upload) -> bool {
        self.account_id.map_or(true, |id| upload.account_id == id)
            && self.status.map_or(true, |s| upload.status == s)
    }
}

/// Filter for listing videos
#[derive(Debug, Clone, Default)]
pub struct VideoFilter {
    pub theme: Option<String>,
    pub picked: Option<bool>,
    pub limit: Option<usize>,
}

// ============================================================================
// Repository Traits
// ============================================================================

/// API projects and their quota counters
pub trait ProjectRepository: Send + Sync {
    fn insert_project(&self, project: &ApiProject) -> Result<()>;

    fn get_project(&self, id: ProjectId) -> Result<Option<ApiProject>>;

    /// All projects, oldest first
    fn list_projects(&self) -> Result<Vec<ApiProject>>;

    /// Persist the ledger's view of a project's counters
    fn save_quota(&self, id: ProjectId, used: u64, reset_at: DateTime<Utc>) -> Result<()>;

    /// Add `cost` to the project's usage if it stays within the daily quota
    ///
    /// Check and increment are one atomic step, also across processes sharing
    /// the store. Returns the new usage, or `None` when the project cannot
    /// afford it or does not exist.
    fn take_quota(&self, id: ProjectId, cost: u64) -> Result<Option<u64>>;

    /// Subtract `cost` from the project's usage, never going below zero
    fn return_quota(&self, id: ProjectId, cost: u64) -> Result<u64>;

    fn record_charge(&self, charge: &QuotaCharge) -> Result<()>;

    fn list_charges(&self, project_id: ProjectId) -> Result<Vec<QuotaCharge>>;
}

/// Publishing accounts
pub trait AccountRepository: Send + Sync {
    fn insert_account(&self, account: &Account) -> Result<()>;

    fn get_account(&self, id: AccountId) -> Result<Option<Account>>;

    fn list_accounts(&self) -> Result<Vec<Account>>;

    /// Returns false when the account does not exist
    fn set_account_active(&self, id: AccountId, active: bool) -> Result<bool>;
}

/// Candidate videos
pub trait VideoRepository: Send + Sync {
    /// Insert or refresh a video keyed by its source id; returns the stored row
    fn upsert_video(&self, video: &Video) -> Result<Video>;

    fn get_video(&self, id: VideoId) -> Result<Option<Video>>;

    fn list_videos(&self, filter: &VideoFilter) -> Result<Vec<Video>>;

    /// Flip `picked` from false to true; false if already picked or missing
    fn mark_video_picked(&self, id: VideoId) -> Result<bool>;

    fn unmark_video_picked(&self, id: VideoId) -> Result<()>;
}

/// Uploads and their transition history
pub trait UploadRepository: Send + Sync {
    /// Fails with [`Error::VideoAlreadyPicked`] if the video already has a live upload
    fn insert_upload(&self, upload: &Upload) -> Result<()>;

    fn get_upload(&self, id: UploadId) -> Result<Option<Upload>>;

    /// Uploads matching the filter, latest `scheduled_for` first
    fn list_uploads(&self, filter: &UploadFilter) -> Result<Vec<Upload>>;

    /// `scheduled`/`retry` uploads with `scheduled_for <= now`, earliest first
    fn due_uploads(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Upload>>;

    /// Write `upload` only if the stored status still equals `expected`
    fn update_if_status(&self, upload: &Upload, expected: UploadStatus) -> Result<bool>;

    /// Delete only if the stored status still equals `expected`
    fn delete_if_status(&self, id: UploadId, expected: UploadStatus) -> Result<bool>;

    /// Scheduled instants of the account's non-terminal uploads
    fn account_slots(&self, account_id: AccountId) -> Result<Vec<(UploadId, DateTime<Utc>)>>;

    fn count_by_status(&self) -> Result<BTreeMap<UploadStatus, usize>>;

    /// Uploads created at or after `since`
    fn count_created_since(&self, since: DateTime<Utc>) -> Result<usize>;

    fn append_history(&self, entry: &UploadHistoryEntry) -> Result<()>;

    fn history(&self, upload_id: UploadId) -> Result<Vec<UploadHistoryEntry>>;
}

/// Everything the engine persists
pub trait Store: ProjectRepository + AccountRepository + VideoRepository + UploadRepository {}

impl<T> Store for T where
    T: ProjectRepository + AccountRepository + VideoRepository + UploadRepository
{
}

// ============================================================================
// In-memory Implementation
// ============================================================================

#[derive(Default)]
struct MemoryState {
    projects: HashMap<ProjectId, ApiProject>,
    charges: Vec<QuotaCharge>,
    accounts: HashMap<AccountId, Account>,
    videos: HashMap<VideoId, Video>,
    uploads: HashMap<UploadId, Upload>,
    history: Vec<UploadHistoryEntry>,
}

/// In-memory store
///
/// A single mutex guards all tables, so every method is atomic.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ProjectRepository for MemoryStore {
    fn insert_project(&self, project: &ApiProject) -> Result<()> {
        self.state().projects.insert(project.id, project.clone());
        Ok(())
    }

    fn get_project(&self, id: ProjectId) -> Result<Option<ApiProject>> {
        Ok(self.state().projects.get(&id).cloned())
    }

    fn list_projects(&self) -> Result<Vec<ApiProject>> {
        let mut projects: Vec<_> = self.state().projects.values().cloned().collect();
        projects.sort_by_key(|p| (p.created_at, p.id));
        Ok(projects)
    }

    fn save_quota(&self, id: ProjectId, used: u64, reset_at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state();
        let project = state
            .projects
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("project", id))?;
        project.quota_used_today = used;
        project.quota_reset_at = reset_at;
        Ok(())
    }

    fn take_quota(&self, id: ProjectId, cost: u64) -> Result<Option<u64>> {
        let mut state = self.state();
        let Some(project) = state.projects.get_mut(&id) else {
            return Ok(None);
        };
        if !project.has_headroom(cost) {
            return Ok(None);
        }
        project.quota_used_today += cost;
        Ok(Some(project.quota_used_today))
    }

    fn return_quota(&self, id: ProjectId, cost: u64) -> Result<u64> {
        let mut state = self.state();
        let project = state
            .projects
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("project", id))?;
        project.quota_used_today = project.quota_used_today.saturating_sub(cost);
        Ok(project.quota_used_today)
    }

    fn record_charge(&self, charge: &QuotaCharge) -> Result<()> {
        self.state().charges.push(charge.clone());
        Ok(())
    }

    fn list_charges(&self, project_id: ProjectId) -> Result<Vec<QuotaCharge>> {
        Ok(self
            .state()
            .charges
            .iter()
            .filter(|c| c.project_id == project_id)
            .cloned()
            .collect())
    }
}

impl AccountRepository for MemoryStore {
    fn insert_account(&self, account: &Account) -> Result<()> {
        self.state().accounts.insert(account.id, account.clone());
        Ok(())
    }

    fn get_account(&self, id: AccountId) -> Result<Option<Account>> {
        Ok(self.state().accounts.get(&id).cloned())
    }

    fn list_accounts(&self) -> Result<Vec<Account>> {
        let mut accounts: Vec<_> = self.state().accounts.values().cloned().collect();
        accounts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(accounts)
    }

    fn set_account_active(&self, id: AccountId, active: bool) -> Result<bool> {
        match self.state().accounts.get_mut(&id) {
            Some(account) => {
                account.active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl VideoRepository for MemoryStore {
    fn upsert_video(&self, video: &Video) -> Result<Video> {
        let mut state = self.state();
        let existing = state
            .videos
            .values_mut()
            .find(|v| v.source_video_id == video.source_video_id);

        if let Some(existing) = existing {
            existing.title = video.title.clone();
            existing.channel_title = video.channel_title.clone();
            existing.duration_seconds = video.duration_seconds;
            return Ok(existing.clone());
        }

        state.videos.insert(video.id, video.clone());
        Ok(video.clone())
    }

    fn get_video(&self, id: VideoId) -> Result<Option<Video>> {
        Ok(self.state().videos.get(&id).cloned())
    }

    fn list_videos(&self, filter: &VideoFilter) -> Result<Vec<Video>> {
        let mut videos: Vec<_> = self
            .state()
            .videos
            .values()
            .filter(|v| filter.theme.as_deref().map_or(true, |t| v.theme == t))
            .filter(|v| filter.picked.map_or(true, |p| v.picked == p))
            .cloned()
            .collect();
        videos.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            videos.truncate(limit);
        }
        Ok(videos)
    }

    fn mark_video_picked(&self, id: VideoId) -> Result<bool> {
        match self.state().videos.get_mut(&id) {
            Some(video) if !video.picked => {
                video.picked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn unmark_video_picked(&self, id: VideoId) -> Result<()> {
        if let Some(video) = self.state().videos.get_mut(&id) {
            video.picked = false;
        }
        Ok(())
    }
}

impl UploadRepository for MemoryStore {
    fn insert_upload(&self, upload: &Upload) -> Result<()> {
        let mut state = self.state();
        let live = state
            .uploads
            .values()
            .any(|u| u.video_id == upload.video_id && !u.status.is_terminal());
        if live {
            return Err(Error::VideoAlreadyPicked {
                video_id: upload.video_id,
            });
        }
        state.uploads.insert(upload.id, upload.clone());
        Ok(())
    }

    fn get_upload(&self, id: UploadId) -> Result<Option<Upload>> {
        Ok(self.state().uploads.get(&id).cloned())
    }

    fn list_uploads(&self, filter: &UploadFilter) -> Result<Vec<Upload>> {
        let mut uploads: Vec<_> = self
            .state()
            .uploads
            .values()
            .filter(|u| filter.matches(u))
            .cloned()
            .collect();
        uploads.sort_by(|a, b| b.scheduled_for.cmp(&a.scheduled_for).then(a.id.cmp(&b.id)));
        uploads.truncate(filter.limit);
        Ok(uploads)
    }

    fn due_uploads(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Upload>> {
        let mut due: Vec<_> = self
            .state()
            .uploads
            .values()
            .filter(|u| u.is_due(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.scheduled_for.cmp(&b.scheduled_for).then(a.id.cmp(&b.id)));
        due.truncate(limit);
        Ok(due)
    }

    fn update_if_status(&self, upload: &Upload, expected: UploadStatus) -> Result<bool> {
        let mut state = self.state();
        match state.uploads.get_mut(&upload.id) {
            Some(stored) if stored.status == expected => {
                *stored = upload.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn delete_if_status(&self, id: UploadId, expected: UploadStatus) -> Result<bool> {
        let mut state = self.state();
        if state.uploads.get(&id).map(|u| u.status) != Some(expected) {
            return Ok(false);
        }
        state.uploads.remove(&id);
        Ok(true)
    }

    fn account_slots(&self, account_id: AccountId) -> Result<Vec<(UploadId, DateTime<Utc>)>> {
        Ok(self
            .state()
            .uploads
            .values()
            .filter(|u| u.account_id == account_id && !u.status.is_terminal())
            .map(|u| (u.id, u.scheduled_for))
            .collect())
    }

    fn count_by_status(&self) -> Result<BTreeMap<UploadStatus, usize>> {
        let mut counts = BTreeMap::new();
        for upload in self.state().uploads.values() {
            *counts.entry(upload.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    fn count_created_since(&self, since: DateTime<Utc>) -> Result<usize> {
        Ok(self
            .state()
            .uploads
            .values()
            .filter(|u| u.created_at >= since)
            .count())
    }

    fn append_history(&self, entry: &UploadHistoryEntry) -> Result<()> {
        self.state().history.push(entry.clone());
        Ok(())
    }

    fn history(&self, upload_id: UploadId) -> Result<Vec<UploadHistoryEntry>> {
        Ok(self
            .state()
            .history
            .iter()
            .filter(|h| h.upload_id == upload_id)
            .cloned()
            .collect())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UploadMetadata;
    use crate::storage::SqliteStore;
    use chrono::{Duration, TimeZone};

    fn create_test_stores() -> Vec<Box<dyn Store>> {
        vec![
            Box::new(SqliteStore::in_memory().unwrap()),
            Box::new(MemoryStore::new()),
        ]
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap()
    }

    fn seed(store: &dyn Store) -> (ApiProject, Account, Video) {
        let project = ApiProject::new("main", 10_000, t0());
        store.insert_project(&project).unwrap();
        let account = Account::new("cats", project.id, "pets", t0())
            .with_default_tags(vec!["shorts".into()]);
        store.insert_account(&account).unwrap();
        let video = store
            .upsert_video(&Video::new("src-1", "pets", 42, t0()).with_title("Cat"))
            .unwrap();
        (project, account, video)
    }

    fn upload_at(account: &Account, video: &Video, at: DateTime<Utc>) -> Upload {
        Upload::new(
            account.id,
            video.id,
            at,
            UploadMetadata {
                title: "Cat".into(),
                description: "d".into(),
                tags: vec!["a".into(), "b".into()],
            },
            t0(),
        )
    }

    #[test]
    fn test_project_round_trip_and_quota_save() {
        for store in create_test_stores() {
            let (project, _, _) = seed(store.as_ref());
            let loaded = store.get_project(project.id).unwrap().unwrap();
            assert_eq!(loaded, project);

            let reset = t0() + Duration::days(1);
            store.save_quota(project.id, 1600, reset).unwrap();
            let loaded = store.get_project(project.id).unwrap().unwrap();
            assert_eq!(loaded.quota_used_today, 1600);
            assert_eq!(loaded.quota_reset_at, reset);
        }
    }

    #[test]
    fn test_account_round_trip_and_toggle() {
        for store in create_test_stores() {
            let (_, account, _) = seed(store.as_ref());
            assert_eq!(store.get_account(account.id).unwrap().unwrap(), account);

            assert!(store.set_account_active(account.id, false).unwrap());
            assert!(!store.get_account(account.id).unwrap().unwrap().active);
            assert!(!store
                .set_account_active(uuid::Uuid::new_v4(), false)
                .unwrap());
        }
    }

    #[test]
    fn test_upsert_video_keeps_identity() {
        for store in create_test_stores() {
            let (_, _, video) = seed(store.as_ref());
            let again = store
                .upsert_video(&Video::new("src-1", "pets", 30, t0()).with_title("Renamed"))
                .unwrap();
            assert_eq!(again.id, video.id);
            assert_eq!(again.title.as_deref(), Some("Renamed"));
            assert_eq!(again.duration_seconds, 30);
        }
    }

    #[test]
    fn test_mark_video_picked_once() {
        for store in create_test_stores() {
            let (_, _, video) = seed(store.as_ref());
            assert!(store.mark_video_picked(video.id).unwrap());
            assert!(!store.mark_video_picked(video.id).unwrap());

            let unpicked = store
                .list_videos(&VideoFilter {
                    picked: Some(false),
                    ..Default::default()
                })
                .unwrap();
            assert!(unpicked.is_empty());

            store.unmark_video_picked(video.id).unwrap();
            assert!(!store.get_video(video.id).unwrap().unwrap().picked);
        }
    }

    #[test]
    fn test_upload_round_trip() {
        for store in create_test_stores() {
            let (_, account, video) = seed(store.as_ref());
            let upload = upload_at(&account, &video, t0());
            store.insert_upload(&upload).unwrap();
            assert_eq!(store.get_upload(upload.id).unwrap().unwrap(), upload);
        }
    }

    #[test]
    fn test_one_live_upload_per_video() {
        for store in create_test_stores() {
            let (_, account, video) = seed(store.as_ref());
            let first = upload_at(&account, &video, t0());
            store.insert_upload(&first).unwrap();

            let second = upload_at(&account, &video, t0() + Duration::hours(1));
            let err = store.insert_upload(&second).unwrap_err();
            assert!(matches!(err, Error::VideoAlreadyPicked { .. }));

            // A terminal upload no longer blocks the video
            let mut failed = first.clone();
            failed.status = UploadStatus::Failed;
            assert!(store
                .update_if_status(&failed, UploadStatus::Scheduled)
                .unwrap());
            store.insert_upload(&second).unwrap();
        }
    }

    #[test]
    fn test_due_uploads_ordering_and_boundary() {
        for store in create_test_stores() {
            let (_, account, _) = seed(store.as_ref());
            let now = t0() + Duration::hours(2);
            let mut ids = Vec::new();
            for (i, offset) in [60, 0, 30, -5].iter().enumerate() {
                let video = store
                    .upsert_video(&Video::new(format!("v{i}"), "pets", 20, t0()))
                    .unwrap();
                let upload = upload_at(&account, &video, now - Duration::minutes(*offset));
                store.insert_upload(&upload).unwrap();
                ids.push(upload.id);
            }

            let due = store.due_uploads(now, 10).unwrap();
            // -5 is in the future; 0 equals now and is due
            assert_eq!(due.len(), 3);
            assert_eq!(due[0].id, ids[0]);
            assert_eq!(due[1].id, ids[2]);
            assert_eq!(due[2].id, ids[1]);

            assert_eq!(store.due_uploads(now, 1).unwrap().len(), 1);
        }
    }

    #[test]
    fn test_update_if_status_is_compare_and_set() {
        for store in create_test_stores() {
            let (_, account, video) = seed(store.as_ref());
            let upload = upload_at(&account, &video, t0());
            store.insert_upload(&upload).unwrap();

            let mut claimed = upload.clone();
            claimed.status = UploadStatus::Uploading;
            assert!(store
                .update_if_status(&claimed, UploadStatus::Scheduled)
                .unwrap());
            // Second writer observed the same stale status and loses
            assert!(!store
                .update_if_status(&claimed, UploadStatus::Scheduled)
                .unwrap());
        }
    }

    #[test]
    fn test_delete_if_status() {
        for store in create_test_stores() {
            let (_, account, video) = seed(store.as_ref());
            let upload = upload_at(&account, &video, t0());
            store.insert_upload(&upload).unwrap();

            assert!(!store.delete_if_status(upload.id, UploadStatus::Retry).unwrap());
            assert!(store
                .delete_if_status(upload.id, UploadStatus::Scheduled)
                .unwrap());
            assert!(store.get_upload(upload.id).unwrap().is_none());
        }
    }

    #[test]
    fn test_counts_and_history() {
        for store in create_test_stores() {
            let (_, account, video) = seed(store.as_ref());
            let upload = upload_at(&account, &video, t0());
            store.insert_upload(&upload).unwrap();
            store
                .append_history(&UploadHistoryEntry::for_upload(&upload))
                .unwrap();

            let counts = store.count_by_status().unwrap();
            assert_eq!(counts.get(&UploadStatus::Scheduled), Some(&1));
            assert_eq!(store.count_created_since(t0()).unwrap(), 1);
            assert_eq!(
                store
                    .count_created_since(t0() + Duration::seconds(1))
                    .unwrap(),
                0
            );

            let history = store.history(upload.id).unwrap();
            assert_eq!(history.len(), 1);
            assert_eq!(history[0].status, UploadStatus::Scheduled);
        }
    }

    #[test]
    fn test_charges_recorded_per_project() {
        for store in create_test_stores() {
            let (project, _, _) = seed(store.as_ref());
            store
                .record_charge(&QuotaCharge {
                    project_id: project.id,
                    cost: 1600,
                    used_before: 0,
                    used_after: 1600,
                    charged_at: t0(),
                })
                .unwrap();
            assert_eq!(store.list_charges(project.id).unwrap().len(), 1);
            assert!(store.list_charges(uuid::Uuid::new_v4()).unwrap().is_empty());
        }
    }

    #[test]
    fn test_take_quota_is_conditional() {
        for store in create_test_stores() {
            let (project, _, _) = seed(store.as_ref());

            assert_eq!(store.take_quota(project.id, 6000).unwrap(), Some(6000));
            assert_eq!(store.take_quota(project.id, 4000).unwrap(), Some(10_000));
            assert_eq!(store.take_quota(project.id, 1).unwrap(), None);
            assert_eq!(store.take_quota(uuid::Uuid::new_v4(), 1).unwrap(), None);

            assert_eq!(store.return_quota(project.id, 4000).unwrap(), 6000);
            assert_eq!(store.return_quota(project.id, 9000).unwrap(), 0);
            assert_eq!(
                store.get_project(project.id).unwrap().unwrap().quota_used_today,
                0
            );
            assert!(store.return_quota(uuid::Uuid::new_v4(), 1).is_err());
        }
    }
}
