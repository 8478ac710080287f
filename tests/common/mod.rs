//! Common test utilities

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use shortcast::error::{Error, Result};
use shortcast::models::{
    Account, AccountId, ApiProject, ProjectId, QuotaCharge, Upload, UploadMetadata, Video,
};
use shortcast::quota::QuotaLedger;
use shortcast::scheduler::{Dispatcher, DispatcherConfig};
use shortcast::storage::{
    AccountRepository, MemoryStore, ProjectRepository, SharedProjectRepository, UploadRepository,
    VideoRepository,
};
use shortcast::transport::{
    AccessToken, CredentialProvider, TransportError, UploadRequest, UploadTransport,
};

/// Fixed "now" used across scenarios
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
}

// ============================================================================
// Scripted collaborators
// ============================================================================

/// Transport that replays queued outcomes, then succeeds
#[derive(Default)]
pub struct ScriptedTransport {
    outcomes: Mutex<VecDeque<std::result::Result<String, TransportError>>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    uploaded: Mutex<Vec<shortcast::models::UploadId>>,
}

impl ScriptedTransport {
    pub fn push_failure(&self, err: TransportError) {
        self.outcomes.lock().unwrap().push_back(Err(err));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Upload ids in the order the transport saw them
    pub fn uploaded(&self) -> Vec<shortcast::models::UploadId> {
        self.uploaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl UploadTransport for ScriptedTransport {
    async fn upload(
        &self,
        _token: &AccessToken,
        request: &UploadRequest,
    ) -> std::result::Result<String, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.uploaded.lock().unwrap().push(request.upload_id);

        let delay = *self.delay.lock().unwrap();
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }

        let next = self.outcomes.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(format!("yt-{}", request.upload_id.simple())))
    }
}

/// Credential provider that refuses selected accounts
#[derive(Default)]
pub struct ScriptedCredentials {
    expired: Mutex<HashSet<AccountId>>,
    requests: AtomicUsize,
}

impl ScriptedCredentials {
    pub fn expire(&self, account_id: AccountId) {
        self.expired.lock().unwrap().insert(account_id);
    }

    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for ScriptedCredentials {
    async fn access_token(&self, account: &Account) -> Result<AccessToken> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        // Give a concurrent cycle a chance to interleave
        tokio::task::yield_now().await;

        if self.expired.lock().unwrap().contains(&account.id) {
            return Err(Error::CredentialExpired {
                account_id: account.id,
                reason: "refresh token revoked".into(),
            });
        }
        Ok(AccessToken::new(format!("token-{}", account.id.simple())))
    }
}

/// Project repository whose charge log is unwritable
pub struct ChargeLogDown(pub Arc<MemoryStore>);

impl ProjectRepository for ChargeLogDown {
    fn insert_project(&self, project: &ApiProject) -> Result<()> {
        self.0.insert_project(project)
    }

    fn get_project(&self, id: ProjectId) -> Result<Option<ApiProject>> {
        self.0.get_project(id)
    }

    fn list_projects(&self) -> Result<Vec<ApiProject>> {
        self.0.list_projects()
    }

    fn save_quota(&self, id: ProjectId, used: u64, reset_at: DateTime<Utc>) -> Result<()> {
        self.0.save_quota(id, used, reset_at)
    }

    fn take_quota(&self, id: ProjectId, cost: u64) -> Result<Option<u64>> {
        self.0.take_quota(id, cost)
    }

    fn return_quota(&self, id: ProjectId, cost: u64) -> Result<u64> {
        self.0.return_quota(id, cost)
    }

    fn record_charge(&self, _charge: &QuotaCharge) -> Result<()> {
        Err(Error::Io(std::io::Error::other("charge log unavailable")))
    }

    fn list_charges(&self, project_id: ProjectId) -> Result<Vec<QuotaCharge>> {
        self.0.list_charges(project_id)
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Store, ledger and scripted collaborators wired together
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub ledger: Arc<QuotaLedger>,
    pub transport: Arc<ScriptedTransport>,
    pub credentials: Arc<ScriptedCredentials>,
}

impl Harness {
    pub fn new(upload_cost: u64) -> Self {
        let store = Arc::new(MemoryStore::new());
        let repo: SharedProjectRepository = store.clone();
        let ledger = Arc::new(QuotaLedger::load(repo, upload_cost).unwrap());
        Self {
            store,
            ledger,
            transport: Arc::new(ScriptedTransport::default()),
            credentials: Arc::new(ScriptedCredentials::default()),
        }
    }

    /// Register a project whose window ends at the next midnight after [`t0`]
    pub fn project(&self, name: &str, daily_quota: u64, used: u64) -> ApiProject {
        let mut project = ApiProject::new(name, daily_quota, t0());
        project.quota_used_today = used;
        self.ledger.add_project(&project).unwrap();
        project
    }

    pub fn account(&self, project: &ApiProject) -> Account {
        let account = Account::new("channel", project.id, "pets", t0());
        self.store.insert_account(&account).unwrap();
        account
    }

    /// Insert a picked video and a scheduled upload for it
    pub fn upload(&self, account: &Account, scheduled_for: DateTime<Utc>) -> Upload {
        let video = Video::new(uuid::Uuid::new_v4().to_string(), "pets", 30, t0())
            .with_title("A short");
        let video = self.store.upsert_video(&video).unwrap();
        assert!(self.store.mark_video_picked(video.id).unwrap());

        let metadata = UploadMetadata {
            title: "A short".into(),
            description: "#pets".into(),
            tags: vec!["pets".into()],
        };
        let upload = Upload::new(account.id, video.id, scheduled_for, metadata, t0());
        self.store.insert_upload(&upload).unwrap();
        upload
    }

    pub fn reload(&self, upload: &Upload) -> Upload {
        self.store.get_upload(upload.id).unwrap().unwrap()
    }

    pub fn dispatcher(&self, config: DispatcherConfig) -> Dispatcher {
        Dispatcher::new(
            self.store.clone(),
            self.ledger.clone(),
            self.transport.clone(),
            self.credentials.clone(),
            config,
        )
    }
}
