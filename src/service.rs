//! Library surface for scheduling uploads
//!
//! [`SchedulingService`] is what a dashboard, CLI or API layer calls. It
//! validates requests, runs the planner, and applies administrative
//! transitions (reschedule, metadata edits, pause/resume, delete) through the
//! upload state machine. Dispatch itself lives in
//! [`crate::scheduler::Dispatcher`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::models::{
    Account, AccountId, ApiProject, Cadence, MetadataOverrides, ProjectId, Upload,
    UploadHistoryEntry, UploadId, UploadMetadata, UploadStatus, Video, VideoId,
};
use crate::quota::{QuotaLedger, QuotaStatus};
use crate::scheduler::{PlannedSlot, SchedulePlanner, UploadEvent, UploadStateMachine};
use crate::storage::{
    SharedProjectRepository, SharedStore, Store, UploadFilter, VideoFilter,
};

/// Compare-and-set attempts before an administrative change gives up
const MAX_CAS_ATTEMPTS: usize = 3;

/// Upper bound on uploads touched by one pause/resume
const ACCOUNT_SCAN_LIMIT: usize = 10_000;

// ============================================================================
// Request and response types
// ============================================================================

/// Service settings
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub upload_cost: u64,
    pub default_daily_quota: u64,
    pub max_retries: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            upload_cost: crate::quota::DEFAULT_UPLOAD_COST,
            default_daily_quota: 10_000,
            max_retries: crate::scheduler::DEFAULT_MAX_RETRIES,
        }
    }
}

/// Input for [`SchedulingService::create_account`]
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub display_name: String,
    pub api_project_id: ProjectId,
    pub theme: String,
    pub channel_id: Option<String>,
    /// Empty keeps the 10:00 / 18:00 defaults
    pub upload_times: Vec<NaiveTime>,
    pub cadence: Cadence,
    pub allow_rotation: bool,
    pub default_tags: Vec<String>,
}

impl NewAccount {
    pub fn new(
        display_name: impl Into<String>,
        api_project_id: ProjectId,
        theme: impl Into<String>,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            api_project_id,
            theme: theme.into(),
            channel_id: None,
            upload_times: Vec::new(),
            cadence: Cadence::default(),
            allow_rotation: true,
            default_tags: Vec::new(),
        }
    }
}

/// One explicit (account, video, time) triple for bulk scheduling
#[derive(Debug, Clone)]
pub struct ScheduleItem {
    pub account_id: AccountId,
    pub video_id: VideoId,
    pub scheduled_for: DateTime<Utc>,
    pub overrides: MetadataOverrides,
}

/// Numbers shown on the operator dashboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardMetrics {
    pub uploads_by_status: BTreeMap<UploadStatus, usize>,
    pub total_uploads: usize,
    /// Uploads created since the start of the current UTC day
    pub uploads_today: usize,
    pub active_accounts: usize,
    pub total_accounts: usize,
    pub quota: QuotaStatus,
}

// ============================================================================
// Service
// ============================================================================

/// Scheduling operations over a store and quota ledger
pub struct SchedulingService {
    store: SharedStore,
    ledger: Arc<QuotaLedger>,
    planner: SchedulePlanner,
    machine: UploadStateMachine,
    config: ServiceConfig,
}

impl SchedulingService {
    /// Build the service and its ledger over a concrete store
    pub fn new<S>(store: Arc<S>, planner: SchedulePlanner, config: ServiceConfig) -> Result<Self>
    where
        S: Store + 'static,
    {
        let projects: SharedProjectRepository = store.clone();
        let ledger = Arc::new(QuotaLedger::load(projects, config.upload_cost)?);
        Ok(Self::with_ledger(store, ledger, planner, config))
    }

    /// Build the service around an existing ledger
    pub fn with_ledger(
        store: SharedStore,
        ledger: Arc<QuotaLedger>,
        planner: SchedulePlanner,
        config: ServiceConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            planner,
            machine: UploadStateMachine::new(config.max_retries),
            config,
        }
    }

    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    pub fn ledger(&self) -> Arc<QuotaLedger> {
        self.ledger.clone()
    }

    // ------------------------------------------------------------------------
    // Projects, accounts, videos
    // ------------------------------------------------------------------------

    /// Register an API project; `None` uses the configured default quota
    pub fn create_project(&self, name: &str, daily_quota: Option<u64>) -> Result<ApiProject> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::invalid_schedule("project name must not be empty"));
        }
        let quota = daily_quota.unwrap_or(self.config.default_daily_quota);
        if quota == 0 {
            return Err(Error::invalid_schedule("daily quota must be greater than 0"));
        }

        let project = ApiProject::new(name, quota, Utc::now());
        self.ledger.add_project(&project)?;
        tracing::info!(project_id = %project.id, name, daily_quota = quota, "Project created");
        Ok(project)
    }

    pub fn list_projects(&self) -> Result<Vec<ApiProject>> {
        self.ledger.refresh()?;
        Ok(self.ledger.snapshot())
    }

    pub fn create_account(&self, input: NewAccount) -> Result<Account> {
        if input.display_name.trim().is_empty() {
            return Err(Error::invalid_schedule("account name must not be empty"));
        }
        if self.store.get_project(input.api_project_id)?.is_none() {
            return Err(Error::not_found("project", input.api_project_id));
        }
        if input.upload_times.len() > usize::from(Cadence::MAX) {
            return Err(Error::invalid_schedule(format!(
                "at most {} upload times per account",
                Cadence::MAX
            )));
        }

        let mut account = Account::new(
            input.display_name.trim(),
            input.api_project_id,
            input.theme,
            Utc::now(),
        )
        .with_cadence(input.cadence)
        .with_rotation(input.allow_rotation)
        .with_default_tags(input.default_tags);
        if !input.upload_times.is_empty() {
            account = account.with_upload_times(input.upload_times);
        }
        account.channel_id = input.channel_id;

        self.store.insert_account(&account)?;
        tracing::info!(account_id = %account.id, name = %account.display_name, "Account created");
        Ok(account)
    }

    pub fn get_account(&self, id: AccountId) -> Result<Account> {
        self.store
            .get_account(id)?
            .ok_or_else(|| Error::not_found("account", id))
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>> {
        self.store.list_accounts()
    }

    /// Record a candidate video from discovery; re-adding refreshes it
    pub fn add_video(&self, video: &Video) -> Result<Video> {
        self.store.upsert_video(video)
    }

    pub fn get_video(&self, id: VideoId) -> Result<Video> {
        self.store
            .get_video(id)?
            .ok_or_else(|| Error::not_found("video", id))
    }

    pub fn list_videos(&self, filter: &VideoFilter) -> Result<Vec<Video>> {
        self.store.list_videos(filter)
    }

    // ------------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------------

    fn occupied(
        &self,
        account_id: AccountId,
        except: Option<UploadId>,
    ) -> Result<Vec<DateTime<Utc>>> {
        Ok(self
            .store
            .account_slots(account_id)?
            .into_iter()
            .filter(|(id, _)| Some(*id) != except)
            .map(|(_, at)| at)
            .collect())
    }

    /// Schedule one video for an account at (or near) `at`
    pub fn pick_video(
        &self,
        video_id: VideoId,
        account_id: AccountId,
        at: DateTime<Utc>,
        overrides: MetadataOverrides,
    ) -> Result<Upload> {
        let account = self.get_account(account_id)?;
        let video = self.get_video(video_id)?;
        if video.picked {
            return Err(Error::VideoAlreadyPicked { video_id });
        }

        let scheduled_for = self.planner.place(&self.occupied(account_id, None)?, at)?;
        let metadata = UploadMetadata::derive(&video, &account, overrides);
        let upload = Upload::new(account.id, video.id, scheduled_for, metadata, Utc::now());

        self.create_upload(&upload)?;
        tracing::info!(
            upload_id = %upload.id,
            account_id = %account.id,
            video_id = %video.id,
            scheduled_for = %upload.scheduled_for,
            "Video picked"
        );
        Ok(upload)
    }

    /// Plan without persisting anything
    pub fn preview_schedule(
        &self,
        account_id: AccountId,
        count: usize,
        start: DateTime<Utc>,
        cadence: Option<Cadence>,
    ) -> Result<Vec<PlannedSlot>> {
        let account = self.get_account(account_id)?;
        let cadence = cadence.unwrap_or(account.cadence);
        self.planner
            .plan(&account, count, start, cadence, &self.occupied(account_id, None)?)
    }

    /// Spread videos over days at the account's cadence
    ///
    /// All inputs are validated before anything is written; if a write fails
    /// midway, the uploads already created are removed again.
    pub fn bulk_schedule(
        &self,
        account_id: AccountId,
        video_ids: &[VideoId],
        start: DateTime<Utc>,
        cadence: Option<Cadence>,
    ) -> Result<Vec<Upload>> {
        if video_ids.is_empty() {
            return Err(Error::invalid_schedule("at least one video is required"));
        }
        let account = self.get_account(account_id)?;
        let videos = self.unpicked_videos(video_ids)?;
        let cadence = cadence.unwrap_or(account.cadence);

        let plan = self.planner.plan(
            &account,
            videos.len(),
            start,
            cadence,
            &self.occupied(account_id, None)?,
        )?;

        let now = Utc::now();
        let uploads: Vec<Upload> = videos
            .iter()
            .zip(&plan)
            .map(|(video, slot)| {
                let metadata =
                    UploadMetadata::derive(video, &account, MetadataOverrides::default());
                Upload::new(account.id, video.id, slot.scheduled_for, metadata, now)
            })
            .collect();

        self.create_all(&uploads)?;
        tracing::info!(
            account_id = %account.id,
            count = uploads.len(),
            cadence = %cadence,
            "Bulk schedule created"
        );
        Ok(uploads)
    }

    /// Schedule explicit (account, video, time) items all-or-nothing
    pub fn bulk_schedule_items(&self, items: Vec<ScheduleItem>) -> Result<Vec<Upload>> {
        if items.is_empty() {
            return Err(Error::invalid_schedule("at least one item is required"));
        }

        let video_ids: Vec<VideoId> = items.iter().map(|i| i.video_id).collect();
        let videos = self.unpicked_videos(&video_ids)?;

        let mut accounts: HashMap<AccountId, Account> = HashMap::new();
        let mut occupied: HashMap<AccountId, Vec<DateTime<Utc>>> = HashMap::new();
        let now = Utc::now();
        let mut uploads = Vec::with_capacity(items.len());

        for (item, video) in items.into_iter().zip(videos) {
            if !accounts.contains_key(&item.account_id) {
                let account = self.get_account(item.account_id)?;
                occupied.insert(account.id, self.occupied(account.id, None)?);
                accounts.insert(account.id, account);
            }
            let account = &accounts[&item.account_id];
            let taken = occupied.entry(account.id).or_default();

            let scheduled_for = self.planner.place(taken, item.scheduled_for)?;
            taken.push(scheduled_for);

            let metadata = UploadMetadata::derive(&video, account, item.overrides);
            uploads.push(Upload::new(account.id, video.id, scheduled_for, metadata, now));
        }

        self.create_all(&uploads)?;
        tracing::info!(count = uploads.len(), "Bulk items scheduled");
        Ok(uploads)
    }

    /// Load videos, rejecting duplicates and already-picked ones
    fn unpicked_videos(&self, ids: &[VideoId]) -> Result<Vec<Video>> {
        let mut seen = HashSet::new();
        ids.iter()
            .map(|id| {
                if !seen.insert(*id) {
                    return Err(Error::invalid_schedule(format!("video {id} listed twice")));
                }
                let video = self.get_video(*id)?;
                if video.picked {
                    return Err(Error::VideoAlreadyPicked { video_id: *id });
                }
                Ok(video)
            })
            .collect()
    }

    /// Mark the video picked, insert the upload and log its first history row
    fn create_upload(&self, upload: &Upload) -> Result<()> {
        if !self.store.mark_video_picked(upload.video_id)? {
            return Err(Error::VideoAlreadyPicked {
                video_id: upload.video_id,
            });
        }
        if let Err(e) = self.store.insert_upload(upload) {
            self.store.unmark_video_picked(upload.video_id)?;
            return Err(e);
        }
        self.store
            .append_history(&UploadHistoryEntry::for_upload(upload))
    }

    fn create_all(&self, uploads: &[Upload]) -> Result<()> {
        for (i, upload) in uploads.iter().enumerate() {
            if let Err(e) = self.create_upload(upload) {
                tracing::warn!(error = %e, created = i, "Bulk schedule failed, rolling back");
                for created in &uploads[..i] {
                    self.store
                        .delete_if_status(created.id, UploadStatus::Scheduled)?;
                    self.store.unmark_video_picked(created.video_id)?;
                }
                return Err(e);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Upload queries and administration
    // ------------------------------------------------------------------------

    pub fn get_upload(&self, id: UploadId) -> Result<Upload> {
        self.store
            .get_upload(id)?
            .ok_or_else(|| Error::not_found("upload", id))
    }

    pub fn list_uploads(&self, filter: &UploadFilter) -> Result<Vec<Upload>> {
        self.store.list_uploads(filter)
    }

    pub fn upload_history(&self, id: UploadId) -> Result<Vec<UploadHistoryEntry>> {
        self.store.history(id)
    }

    /// Read, transition and compare-and-set, retrying on concurrent writes
    fn mutate<F>(&self, id: UploadId, event_for: F) -> Result<Upload>
    where
        F: Fn(&Upload) -> Result<UploadEvent>,
    {
        let mut last = None;
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.get_upload(id)?;
            let next = self.machine.apply(&current, event_for(&current)?)?;
            if self.store.update_if_status(&next, current.status)? {
                self.store
                    .append_history(&UploadHistoryEntry::for_upload(&next))?;
                return Ok(next);
            }
            last = Some(current);
        }
        let current = last.ok_or_else(|| Error::not_found("upload", id))?;
        Err(Error::InvalidTransition {
            upload_id: id,
            from: current.status,
            action: "update",
        })
    }

    /// Move an upload to a new time, applying the collision rule
    pub fn reschedule(&self, id: UploadId, at: DateTime<Utc>) -> Result<Upload> {
        let upload = self.mutate(id, |current| {
            let occupied = self.occupied(current.account_id, Some(current.id))?;
            Ok(UploadEvent::Reschedule {
                scheduled_for: self.planner.place(&occupied, at)?,
                at: Utc::now(),
            })
        })?;
        tracing::info!(
            upload_id = %id,
            scheduled_for = %upload.scheduled_for,
            "Upload rescheduled"
        );
        Ok(upload)
    }

    /// Replace title, description or tags
    pub fn update_metadata(&self, id: UploadId, overrides: MetadataOverrides) -> Result<Upload> {
        self.mutate(id, |current| {
            let mut metadata = current.metadata();
            if let Some(title) = &overrides.title {
                metadata.title = title.clone();
            }
            if let Some(description) = &overrides.description {
                metadata.description = description.clone();
            }
            if let Some(tags) = &overrides.tags {
                metadata.tags = tags.clone();
            }
            Ok(UploadEvent::EditMetadata {
                metadata,
                at: Utc::now(),
            })
        })
    }

    /// Remove a pending upload and free its video
    pub fn delete_upload(&self, id: UploadId) -> Result<()> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let upload = self.get_upload(id)?;
            if upload.status.is_terminal() {
                return Err(Error::ImmutableTerminalState {
                    upload_id: id,
                    status: upload.status,
                });
            }
            if upload.status == UploadStatus::Uploading {
                return Err(Error::InvalidTransition {
                    upload_id: id,
                    from: upload.status,
                    action: "delete",
                });
            }
            if self.store.delete_if_status(id, upload.status)? {
                self.store.unmark_video_picked(upload.video_id)?;
                tracing::info!(upload_id = %id, "Upload deleted");
                return Ok(());
            }
        }
        Err(Error::InvalidTransition {
            upload_id: id,
            from: self.get_upload(id)?.status,
            action: "delete",
        })
    }

    // ------------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------------

    /// Deactivate an account and hold its pending uploads
    ///
    /// In-flight uploads finish normally. Returns the number paused.
    pub fn pause_account(&self, id: AccountId) -> Result<usize> {
        if !self.store.set_account_active(id, false)? {
            return Err(Error::not_found("account", id));
        }

        let mut paused = 0;
        for status in [UploadStatus::Scheduled, UploadStatus::Retry] {
            paused += self.transition_account(id, status, |_| UploadEvent::Pause {
                at: Utc::now(),
            })?;
        }
        tracing::info!(account_id = %id, paused, "Account paused");
        Ok(paused)
    }

    /// Reactivate an account and release its held uploads
    pub fn resume_account(&self, id: AccountId) -> Result<usize> {
        if !self.store.set_account_active(id, true)? {
            return Err(Error::not_found("account", id));
        }

        let resumed = self.transition_account(id, UploadStatus::Paused, |_| UploadEvent::Resume {
            at: Utc::now(),
        })?;
        tracing::info!(account_id = %id, resumed, "Account resumed");
        Ok(resumed)
    }

    fn transition_account<F>(&self, id: AccountId, status: UploadStatus, event: F) -> Result<usize>
    where
        F: Fn(&Upload) -> UploadEvent,
    {
        let uploads = self.store.list_uploads(
            &UploadFilter::for_account(id)
                .with_status(status)
                .with_limit(ACCOUNT_SCAN_LIMIT),
        )?;

        let mut count = 0;
        for upload in uploads {
            let next = self.machine.apply(&upload, event(&upload))?;
            // A concurrent claim wins; that upload is left to the dispatcher
            if self.store.update_if_status(&next, upload.status)? {
                self.store
                    .append_history(&UploadHistoryEntry::for_upload(&next))?;
                count += 1;
            }
        }
        Ok(count)
    }

    // ------------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------------

    pub fn quota_status(&self) -> Result<QuotaStatus> {
        self.ledger.refresh()?;
        Ok(self.ledger.status())
    }

    pub fn dashboard_metrics(&self) -> Result<DashboardMetrics> {
        let counts = self.store.count_by_status()?;
        let mut uploads_by_status: BTreeMap<UploadStatus, usize> =
            UploadStatus::all().into_iter().map(|s| (s, 0)).collect();
        uploads_by_status.extend(counts);

        let today = crate::models::next_utc_midnight(Utc::now()) - chrono::Duration::days(1);
        let accounts = self.store.list_accounts()?;

        Ok(DashboardMetrics {
            total_uploads: uploads_by_status.values().sum(),
            uploads_by_status,
            uploads_today: self.store.count_created_since(today)?,
            active_accounts: accounts.iter().filter(|a| a.active).count(),
            total_accounts: accounts.len(),
            quota: self.quota_status()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use chrono::{Duration, TimeZone};

    struct Fixture {
        service: SchedulingService,
        account: Account,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let service =
            SchedulingService::new(store, SchedulePlanner::seeded(30, 11), ServiceConfig::default())
                .unwrap();
        let project = service.create_project("main", None).unwrap();
        let account = service
            .create_account(NewAccount::new("cats", project.id, "pets"))
            .unwrap();
        Fixture { service, account }
    }

    fn videos(service: &SchedulingService, n: usize) -> Vec<VideoId> {
        (0..n)
            .map(|i| {
                service
                    .add_video(&Video::new(format!("src{i}"), "pets", 30, Utc::now()))
                    .unwrap()
                    .id
            })
            .collect()
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_pick_marks_video_and_rejects_second_pick() {
        let f = fixture();
        let ids = videos(&f.service, 1);

        let upload = f
            .service
            .pick_video(ids[0], f.account.id, start(), MetadataOverrides::default())
            .unwrap();
        assert_eq!(upload.status, UploadStatus::Scheduled);
        assert_eq!(upload.scheduled_for, start());
        assert!(f.service.get_video(ids[0]).unwrap().picked);

        let err = f
            .service
            .pick_video(ids[0], f.account.id, start(), MetadataOverrides::default())
            .unwrap_err();
        assert!(matches!(err, Error::VideoAlreadyPicked { .. }));
    }

    #[test]
    fn test_pick_at_taken_minute_is_jittered() {
        let f = fixture();
        let ids = videos(&f.service, 2);
        let first = f
            .service
            .pick_video(ids[0], f.account.id, start(), MetadataOverrides::default())
            .unwrap();
        let second = f
            .service
            .pick_video(ids[1], f.account.id, start(), MetadataOverrides::default())
            .unwrap();
        assert_ne!(first.scheduled_for, second.scheduled_for);
        assert!((second.scheduled_for - start()).num_minutes().abs() <= 30);
    }

    #[test]
    fn test_bulk_schedule_rejects_picked_video_without_writing() {
        let f = fixture();
        let ids = videos(&f.service, 3);
        f.service
            .pick_video(ids[2], f.account.id, start(), MetadataOverrides::default())
            .unwrap();

        let err = f
            .service
            .bulk_schedule(f.account.id, &ids, start(), None)
            .unwrap_err();
        assert!(matches!(err, Error::VideoAlreadyPicked { .. }));
        assert_eq!(
            f.service
                .list_uploads(&UploadFilter::for_account(f.account.id))
                .unwrap()
                .len(),
            1
        );
        assert!(!f.service.get_video(ids[0]).unwrap().picked);
    }

    #[test]
    fn test_bulk_schedule_duplicate_ids_rejected() {
        let f = fixture();
        let ids = videos(&f.service, 1);
        let err = f
            .service
            .bulk_schedule(f.account.id, &[ids[0], ids[0]], start(), None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidScheduleRequest { .. }));
    }

    #[test]
    fn test_bulk_schedule_items_places_each() {
        let f = fixture();
        let ids = videos(&f.service, 2);
        let items = ids
            .iter()
            .map(|id| ScheduleItem {
                account_id: f.account.id,
                video_id: *id,
                scheduled_for: start(),
                overrides: MetadataOverrides::default(),
            })
            .collect();

        let uploads = f.service.bulk_schedule_items(items).unwrap();
        assert_eq!(uploads.len(), 2);
        assert_ne!(uploads[0].scheduled_for, uploads[1].scheduled_for);
    }

    #[test]
    fn test_delete_frees_video() {
        let f = fixture();
        let ids = videos(&f.service, 1);
        let upload = f
            .service
            .pick_video(ids[0], f.account.id, start(), MetadataOverrides::default())
            .unwrap();

        f.service.delete_upload(upload.id).unwrap();
        assert!(!f.service.get_video(ids[0]).unwrap().picked);
        assert!(matches!(
            f.service.get_upload(upload.id),
            Err(Error::NotFound { .. })
        ));
    }

    #[test]
    fn test_reschedule_and_metadata_edit() {
        let f = fixture();
        let ids = videos(&f.service, 1);
        let upload = f
            .service
            .pick_video(ids[0], f.account.id, start(), MetadataOverrides::default())
            .unwrap();

        let later = start() + Duration::hours(5);
        let moved = f.service.reschedule(upload.id, later).unwrap();
        assert_eq!(moved.scheduled_for, later);

        let edited = f
            .service
            .update_metadata(
                upload.id,
                MetadataOverrides {
                    title: Some("New title".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(edited.title, "New title");
        assert_eq!(edited.description, upload.description);

        let history = f.service.upload_history(upload.id).unwrap();
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_pause_and_resume_account() {
        let f = fixture();
        let ids = videos(&f.service, 2);
        f.service
            .bulk_schedule(f.account.id, &ids, start(), None)
            .unwrap();

        assert_eq!(f.service.pause_account(f.account.id).unwrap(), 2);
        assert!(!f.service.get_account(f.account.id).unwrap().active);
        let paused = f
            .service
            .list_uploads(
                &UploadFilter::for_account(f.account.id).with_status(UploadStatus::Paused),
            )
            .unwrap();
        assert_eq!(paused.len(), 2);

        assert_eq!(f.service.resume_account(f.account.id).unwrap(), 2);
        let scheduled = f
            .service
            .list_uploads(
                &UploadFilter::for_account(f.account.id).with_status(UploadStatus::Scheduled),
            )
            .unwrap();
        assert_eq!(scheduled.len(), 2);
    }

    #[test]
    fn test_create_account_requires_known_project() {
        let f = fixture();
        let err = f
            .service
            .create_account(NewAccount::new("dogs", uuid::Uuid::new_v4(), "pets"))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn test_dashboard_metrics() {
        let f = fixture();
        let ids = videos(&f.service, 3);
        f.service
            .bulk_schedule(f.account.id, &ids, start(), None)
            .unwrap();

        let metrics = f.service.dashboard_metrics().unwrap();
        assert_eq!(metrics.total_uploads, 3);
        assert_eq!(metrics.uploads_by_status[&UploadStatus::Scheduled], 3);
        assert_eq!(metrics.uploads_by_status[&UploadStatus::Done], 0);
        assert_eq!(metrics.uploads_today, 3);
        assert_eq!(metrics.active_accounts, 1);
        assert_eq!(metrics.quota.total_quota, 10_000);
        assert_eq!(metrics.quota.uploads_remaining, 6);
    }
}
