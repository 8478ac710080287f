//! One poll cycle of the upload worker
//!
//! A cycle selects the due uploads, pauses those whose account was
//! deactivated, and pushes the rest through
//! credentials → rotation + reservation → claim → transport → outcome.
//! Only the dispatcher moves uploads into and out of `uploading`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use uuid::Uuid;

use super::state::{UploadEvent, UploadStateMachine, DEFAULT_MAX_RETRIES};
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{Account, AccountId, Upload, UploadHistoryEntry, UploadStatus};
use crate::quota::{QuotaLedger, Reservation};
use crate::storage::{SharedStore, UploadFilter};
use crate::transport::{
    AccessToken, CredentialProvider, Privacy, TransportError, UploadRequest, UploadTransport,
};

/// Upper bound on stranded uploads recovered at startup
const RECOVERY_SCAN_LIMIT: usize = 10_000;

// ============================================================================
// Configuration
// ============================================================================

/// Dispatcher tuning
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Uploads attempted per cycle
    pub batch_size: usize,
    /// Due rows fetched per cycle (covers paused-account rows skipped over)
    pub scan_limit: usize,
    /// Concurrent transport calls within a cycle
    pub parallelism: usize,
    pub transport_timeout: Duration,
    pub max_retries: u32,
    pub privacy: Privacy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            scan_limit: 100,
            parallelism: 1,
            transport_timeout: Duration::from_secs(300),
            max_retries: DEFAULT_MAX_RETRIES,
            privacy: Privacy::default(),
        }
    }
}

// ============================================================================
// Cycle Report
// ============================================================================

/// What a cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub started_at: Option<DateTime<Utc>>,
    /// Another cycle was running; nothing was done
    pub skipped: bool,
    /// Uploads taken into the batch
    pub selected: usize,
    pub succeeded: usize,
    pub retrying: usize,
    pub failed: usize,
    pub paused: usize,
    pub deferred_quota: usize,
    pub skipped_credentials: usize,
    pub lost_claims: usize,
}

impl CycleReport {
    fn skipped(now: DateTime<Utc>) -> Self {
        Self {
            started_at: Some(now),
            skipped: true,
            ..Default::default()
        }
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Succeeded => self.succeeded += 1,
            Outcome::Retrying => self.retrying += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Deferred => self.deferred_quota += 1,
            Outcome::LostClaim => self.lost_claims += 1,
        }
    }

    /// Uploads that reached the transport
    pub fn attempted(&self) -> usize {
        self.succeeded + self.retrying + self.failed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Retrying,
    Failed,
    Deferred,
    LostClaim,
}

struct BatchItem {
    upload: Upload,
    account: Arc<Account>,
    token: AccessToken,
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Drives due uploads through the transport
pub struct Dispatcher {
    store: SharedStore,
    ledger: Arc<QuotaLedger>,
    transport: Arc<dyn UploadTransport>,
    credentials: Arc<dyn CredentialProvider>,
    machine: UploadStateMachine,
    config: DispatcherConfig,
    cycle_guard: tokio::sync::Mutex<()>,
}

impl Dispatcher {
    pub fn new(
        store: SharedStore,
        ledger: Arc<QuotaLedger>,
        transport: Arc<dyn UploadTransport>,
        credentials: Arc<dyn CredentialProvider>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            transport,
            credentials,
            machine: UploadStateMachine::new(config.max_retries),
            config,
            cycle_guard: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Run one cycle at `now`
    ///
    /// Per-upload failures are recorded on the upload. Storage errors abort
    /// the cycle; invariant violations are returned for the caller to stop on.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let Ok(_guard) = self.cycle_guard.try_lock() else {
            tracing::debug!("Dispatch cycle already running, skipping");
            metrics::record_cycle("skipped", 0.0);
            return Ok(CycleReport::skipped(now));
        };

        let started = Instant::now();
        let result = self.run_cycle_locked(now).await;
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(report) => {
                metrics::record_cycle("completed", elapsed);
                if report.selected > 0 || report.paused > 0 {
                    tracing::info!(
                        selected = report.selected,
                        succeeded = report.succeeded,
                        retrying = report.retrying,
                        failed = report.failed,
                        paused = report.paused,
                        deferred_quota = report.deferred_quota,
                        skipped_credentials = report.skipped_credentials,
                        lost_claims = report.lost_claims,
                        elapsed_secs = elapsed,
                        "Dispatch cycle completed"
                    );
                } else {
                    tracing::debug!("Dispatch cycle found nothing due");
                }
            }
            Err(_) => metrics::record_cycle("aborted", elapsed),
        }
        result
    }

    async fn run_cycle_locked(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let mut report = CycleReport {
            started_at: Some(now),
            ..Default::default()
        };

        let due = self.store.due_uploads(now, self.config.scan_limit)?;
        let mut accounts: HashMap<AccountId, Arc<Account>> = HashMap::new();
        let mut batch: Vec<(Upload, Arc<Account>)> = Vec::new();

        for upload in due {
            if batch.len() >= self.config.batch_size {
                break;
            }

            let account = match accounts.get(&upload.account_id) {
                Some(account) => account.clone(),
                None => {
                    let account = self
                        .store
                        .get_account(upload.account_id)?
                        .map(Arc::new)
                        .ok_or_else(|| {
                            Error::invariant(format!(
                                "upload {} references missing account {}",
                                upload.id, upload.account_id
                            ))
                        })?;
                    accounts.insert(account.id, account.clone());
                    account
                }
            };

            if !account.active {
                if self.pause(&upload, now)? {
                    report.paused += 1;
                }
                continue;
            }

            batch.push((upload, account));
        }

        report.selected = batch.len();

        // One token per account per cycle
        let mut tokens: HashMap<AccountId, Option<AccessToken>> = HashMap::new();
        let mut items = Vec::with_capacity(batch.len());
        for (upload, account) in batch {
            if !tokens.contains_key(&account.id) {
                let token = match self.credentials.access_token(&account).await {
                    Ok(token) => Some(token),
                    Err(e) => {
                        tracing::warn!(
                            account_id = %account.id,
                            error = %e,
                            "Credentials unavailable, skipping account this cycle"
                        );
                        None
                    }
                };
                tokens.insert(account.id, token);
            }

            match tokens.get(&account.id).cloned().flatten() {
                Some(token) => items.push(BatchItem {
                    upload,
                    account,
                    token,
                }),
                None => report.skipped_credentials += 1,
            }
        }
        metrics::record_credential_skips(report.skipped_credentials);

        let parallelism = self.config.parallelism.max(1);
        let outcomes: Vec<Result<Outcome>> = stream::iter(items)
            .map(|item| self.process(item, now))
            .buffer_unordered(parallelism)
            .collect()
            .await;

        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    if first_error.is_none() || e.is_fatal() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Move an inactive account's due upload to `paused`
    fn pause(&self, upload: &Upload, now: DateTime<Utc>) -> Result<bool> {
        let paused = self.machine.apply(upload, UploadEvent::Pause { at: now })?;
        if !self.store.update_if_status(&paused, upload.status)? {
            return Ok(false);
        }
        self.store
            .append_history(&UploadHistoryEntry::for_upload(&paused))?;
        tracing::info!(
            upload_id = %upload.id,
            account_id = %upload.account_id,
            "Account inactive, upload paused"
        );
        Ok(true)
    }

    async fn process(&self, item: BatchItem, now: DateTime<Utc>) -> Result<Outcome> {
        let BatchItem {
            upload,
            account,
            token,
        } = item;

        let video = self.store.get_video(upload.video_id)?.ok_or_else(|| {
            Error::invariant(format!(
                "upload {} references missing video {}",
                upload.id, upload.video_id
            ))
        })?;

        let reservation = match self.ledger.reserve_for(&account, self.ledger.upload_cost()) {
            Ok(reservation) => reservation,
            Err(Error::QuotaExceeded {
                requested,
                remaining,
                ..
            }) => {
                tracing::warn!(
                    upload_id = %upload.id,
                    account_id = %account.id,
                    requested,
                    remaining,
                    "Quota exhausted, deferring upload"
                );
                metrics::record_quota_deferral();
                return Ok(Outcome::Deferred);
            }
            Err(e) => return Err(e),
        };

        let claimed = match self.claim(&upload, reservation.project_id(), now) {
            Ok(Some(claimed)) => claimed,
            Ok(None) => {
                self.ledger.release(reservation)?;
                tracing::info!(upload_id = %upload.id, "Claim lost to another writer");
                metrics::record_lost_claim();
                return Ok(Outcome::LostClaim);
            }
            Err(e) => {
                if let Err(release_err) = self.ledger.release(reservation) {
                    tracing::error!(error = %release_err, "Failed to release reservation");
                }
                return Err(e);
            }
        };

        tracing::info!(
            upload_id = %claimed.id,
            project_id = %reservation.project_id(),
            attempt = claimed.retry_count + 1,
            "Uploading"
        );

        let request = UploadRequest::new(&claimed, &video, self.config.privacy);
        let result = match tokio::time::timeout(
            self.config.transport_timeout,
            self.transport.upload(&token, &request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        };

        // Outcome first, reservation second
        match result {
            Ok(youtube_video_id) => {
                let persisted = self
                    .machine
                    .apply(
                        &claimed,
                        UploadEvent::Succeed {
                            youtube_video_id: youtube_video_id.clone(),
                            at: now,
                        },
                    )
                    .and_then(|done| self.finish(&done).map(|()| done));
                self.settle(reservation, true, claimed.id, now);
                let done = persisted?;
                tracing::info!(
                    upload_id = %done.id,
                    youtube_video_id = %youtube_video_id,
                    "Upload published"
                );
                metrics::record_upload_outcome("done");
                Ok(Outcome::Succeeded)
            }
            Err(err) => {
                let persisted = self
                    .machine
                    .apply(
                        &claimed,
                        UploadEvent::Fail {
                            reason: err.to_string(),
                            retryable: err.is_retryable(),
                            at: now,
                        },
                    )
                    .and_then(|next| self.finish(&next).map(|()| next));
                self.settle(reservation, false, claimed.id, now);
                let next = persisted?;

                let outcome = if next.status == UploadStatus::Retry {
                    Outcome::Retrying
                } else {
                    Outcome::Failed
                };
                tracing::warn!(
                    upload_id = %next.id,
                    error = %err,
                    retryable = err.is_retryable(),
                    retry_count = next.retry_count,
                    status = %next.status,
                    "Upload attempt failed"
                );
                metrics::record_upload_outcome(next.status.as_str());
                Ok(outcome)
            }
        }
    }

    /// Conditional move to `uploading`; `None` when another writer got there first
    fn claim(
        &self,
        upload: &Upload,
        project_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Upload>> {
        let claimed = self.machine.apply(
            upload,
            UploadEvent::Claim {
                project_id,
                run_id: Uuid::new_v4(),
                at: now,
            },
        )?;
        if !self.store.update_if_status(&claimed, upload.status)? {
            return Ok(None);
        }
        self.store
            .append_history(&UploadHistoryEntry::for_upload(&claimed))?;
        Ok(Some(claimed))
    }

    /// Commit or release a reservation once the attempt is over
    ///
    /// Errors are only logged; the upload's outcome is already recorded.
    fn settle(
        &self,
        reservation: Reservation,
        published: bool,
        upload_id: Uuid,
        now: DateTime<Utc>,
    ) {
        let project_id = reservation.project_id();
        let result = if published {
            self.ledger.commit(reservation, now).map(|_| ())
        } else {
            self.ledger.release(reservation)
        };
        if let Err(e) = result {
            tracing::error!(
                upload_id = %upload_id,
                project_id = %project_id,
                published,
                error = %e,
                "Failed to settle quota reservation"
            );
        }
    }

    /// Persist the outcome of an in-flight upload
    fn finish(&self, upload: &Upload) -> Result<()> {
        if !self
            .store
            .update_if_status(upload, UploadStatus::Uploading)?
        {
            return Err(Error::invariant(format!(
                "upload {} left uploading while in flight",
                upload.id
            )));
        }
        self.store
            .append_history(&UploadHistoryEntry::for_upload(upload))
    }

    /// Return uploads stranded in `uploading` by a previous process to the retry loop
    ///
    /// Must only run while no cycle is in flight (worker startup).
    pub fn recover_interrupted(&self, now: DateTime<Utc>) -> Result<usize> {
        let stranded = self.store.list_uploads(
            &UploadFilter::default()
                .with_status(UploadStatus::Uploading)
                .with_limit(RECOVERY_SCAN_LIMIT),
        )?;

        let mut recovered = 0;
        for upload in stranded {
            let next = self.machine.apply(
                &upload,
                UploadEvent::Fail {
                    reason: "interrupted before the transport reported back".into(),
                    retryable: true,
                    at: now,
                },
            )?;
            if self
                .store
                .update_if_status(&next, UploadStatus::Uploading)?
            {
                self.store
                    .append_history(&UploadHistoryEntry::for_upload(&next))?;
                tracing::warn!(
                    upload_id = %next.id,
                    status = %next.status,
                    "Recovered interrupted upload"
                );
                recovered += 1;
            }
        }
        Ok(recovered)
    }
}
