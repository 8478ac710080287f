//! Per-project daily quota accounting
//!
//! Admission is a two-step protocol: [`QuotaLedger::try_reserve`]
//! provisionally takes the units and hands back a [`Reservation`], which must
//! then be resolved exactly once with [`QuotaLedger::commit`] (the upload went
//! out) or [`QuotaLedger::release`] (it did not).
//!
//! The project repository holds the authoritative counters. Other processes
//! (CLI commands next to a running worker) add projects and reset usage
//! through the same store, so the ledger re-reads the projects before every
//! decision and takes units with a conditional increment in the store. The
//! in-memory copy only tracks what this process holds in unresolved
//! reservations.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::rotation;
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{Account, ApiProject, ProjectId, QuotaCharge};
use crate::storage::SharedProjectRepository;

/// Cost of one video upload in API units
pub const DEFAULT_UPLOAD_COST: u64 = 1600;

// ============================================================================
// Reservation
// ============================================================================

/// Provisional hold on quota units
///
/// Not `Clone`: consuming it in `commit` or `release` is the only way to
/// resolve it.
#[must_use = "a reservation must be committed or released"]
#[derive(Debug, PartialEq, Eq)]
pub struct Reservation {
    id: Uuid,
    project_id: ProjectId,
    cost: u64,
}

impl Reservation {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    pub fn cost(&self) -> u64 {
        self.cost
    }
}

// ============================================================================
// Status views
// ============================================================================

/// Aggregate quota view across all projects
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuotaStatus {
    pub total_quota: u64,
    pub total_used: u64,
    pub total_remaining: u64,
    pub total_projects: usize,
    /// Projects that can still afford one upload
    pub projects_available: usize,
    pub uploads_remaining: u64,
    pub upload_cost: u64,
    pub projects: Vec<ProjectQuota>,
}

/// Quota view of a single project
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectQuota {
    pub id: ProjectId,
    pub name: String,
    pub daily_quota: u64,
    pub used: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

impl From<&ApiProject> for ProjectQuota {
    fn from(project: &ApiProject) -> Self {
        Self {
            id: project.id,
            name: project.name.clone(),
            daily_quota: project.daily_quota,
            used: project.quota_used_today,
            remaining: project.remaining(),
            reset_at: project.quota_reset_at,
        }
    }
}

// ============================================================================
// Ledger
// ============================================================================

struct Entry {
    project: ApiProject,
    /// Units held by unresolved reservations
    outstanding: u64,
}

#[derive(Default)]
struct LedgerState {
    entries: HashMap<ProjectId, Entry>,
}

impl LedgerState {
    /// Replace the cached projects with `projects`, keeping local reservations
    fn sync(&mut self, projects: Vec<ApiProject>) {
        let mut entries = HashMap::with_capacity(projects.len());
        for project in projects {
            let outstanding = self.entries.get(&project.id).map_or(0, |e| e.outstanding);
            metrics::set_quota_remaining(&project.name, project.remaining());
            entries.insert(
                project.id,
                Entry {
                    project,
                    outstanding,
                },
            );
        }
        self.entries = entries;
    }

    fn entry_mut(&mut self, id: ProjectId) -> Result<&mut Entry> {
        self.entries
            .get_mut(&id)
            .ok_or_else(|| Error::invariant(format!("unknown project {id}")))
    }

    fn projects(&self) -> Vec<ApiProject> {
        let mut projects: Vec<_> = self.entries.values().map(|e| e.project.clone()).collect();
        projects.sort_by_key(|p| (p.created_at, p.id));
        projects
    }
}

/// Daily quota ledger shared by the dispatcher and the service
pub struct QuotaLedger {
    repo: SharedProjectRepository,
    upload_cost: u64,
    state: Mutex<LedgerState>,
}

impl QuotaLedger {
    /// Build the ledger from the projects currently persisted
    pub fn load(repo: SharedProjectRepository, upload_cost: u64) -> Result<Self> {
        let mut state = LedgerState::default();
        state.sync(repo.list_projects()?);

        tracing::debug!(projects = state.entries.len(), "Quota ledger loaded");

        Ok(Self {
            repo,
            upload_cost,
            state: Mutex::new(state),
        })
    }

    pub fn upload_cost(&self) -> u64 {
        self.upload_cost
    }

    fn state(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Re-read every project from the repository
    pub fn refresh(&self) -> Result<()> {
        let mut state = self.state();
        self.refresh_locked(&mut state)
    }

    fn refresh_locked(&self, state: &mut LedgerState) -> Result<()> {
        state.sync(self.repo.list_projects()?);
        Ok(())
    }

    /// Persist a new project and start tracking it
    pub fn add_project(&self, project: &ApiProject) -> Result<()> {
        let mut state = self.state();
        self.repo.insert_project(project)?;
        metrics::set_quota_remaining(&project.name, project.remaining());
        state.entries.insert(
            project.id,
            Entry {
                project: project.clone(),
                outstanding: 0,
            },
        );
        Ok(())
    }

    /// Provisionally take `cost` units from a project
    ///
    /// Fails with [`Error::QuotaExceeded`] without changing anything when the
    /// project cannot afford it.
    pub fn try_reserve(&self, project_id: ProjectId, cost: u64) -> Result<Reservation> {
        let mut state = self.state();
        self.refresh_locked(&mut state)?;
        self.reserve_locked(&mut state, project_id, cost)
    }

    /// Choose a charging project for the account and reserve on it atomically
    pub fn reserve_for(&self, account: &Account, cost: u64) -> Result<Reservation> {
        let mut state = self.state();
        self.refresh_locked(&mut state)?;
        let project_id = rotation::select_project(
            account,
            state.entries.values().map(|e| &e.project),
            cost,
        )?;
        if project_id != account.api_project_id {
            tracing::info!(
                account_id = %account.id,
                bound_project = %account.api_project_id,
                project_id = %project_id,
                "Rotating upload to another project"
            );
        }
        self.reserve_locked(&mut state, project_id, cost)
    }

    fn reserve_locked(
        &self,
        state: &mut LedgerState,
        project_id: ProjectId,
        cost: u64,
    ) -> Result<Reservation> {
        let entry = state.entry_mut(project_id)?;

        let Some(used) = self.repo.take_quota(project_id, cost)? else {
            // Counters may have moved since the refresh
            entry.project = self.repo.get_project(project_id)?.ok_or_else(|| {
                Error::invariant(format!("project {project_id} vanished from the store"))
            })?;
            return Err(Error::QuotaExceeded {
                project_id: Some(project_id),
                requested: cost,
                remaining: entry.project.remaining(),
            });
        };

        let project = &mut entry.project;
        project.quota_used_today = used;
        entry.outstanding += cost;
        metrics::set_quota_remaining(&project.name, project.remaining());

        tracing::debug!(
            project_id = %project_id,
            cost,
            used,
            daily_quota = project.daily_quota,
            "Quota reserved"
        );

        Ok(Reservation {
            id: Uuid::new_v4(),
            project_id,
            cost,
        })
    }

    /// Make a reservation permanent and record the charge
    ///
    /// The reservation is resolved even when recording the charge fails; the
    /// units stay spent in the store.
    pub fn commit(&self, reservation: Reservation, now: DateTime<Utc>) -> Result<QuotaCharge> {
        let mut state = self.state();
        let entry = state.entry_mut(reservation.project_id)?;
        entry.outstanding = entry.outstanding.saturating_sub(reservation.cost);

        let used_after = entry.project.quota_used_today;
        let charge = QuotaCharge {
            project_id: reservation.project_id,
            cost: reservation.cost,
            used_before: used_after.saturating_sub(reservation.cost),
            used_after,
            charged_at: now,
        };
        self.repo.record_charge(&charge)?;

        tracing::debug!(
            project_id = %reservation.project_id,
            cost = reservation.cost,
            used = used_after,
            "Quota committed"
        );
        Ok(charge)
    }

    /// Return a reservation's units to the project
    ///
    /// The reservation is resolved even when the store update fails; the
    /// units then come back at the next daily reset.
    pub fn release(&self, reservation: Reservation) -> Result<()> {
        let mut state = self.state();
        let entry = state.entry_mut(reservation.project_id)?;
        entry.outstanding = entry.outstanding.saturating_sub(reservation.cost);

        let used = self
            .repo
            .return_quota(reservation.project_id, reservation.cost)?;
        let project = &mut entry.project;
        project.quota_used_today = used;
        metrics::set_quota_remaining(&project.name, project.remaining());

        tracing::debug!(
            project_id = %reservation.project_id,
            cost = reservation.cost,
            used,
            "Quota released"
        );
        Ok(())
    }

    /// Reset every project whose window has elapsed
    ///
    /// Units held by unresolved reservations carry into the new window.
    /// Returns the ids of the projects that were reset.
    pub fn reset_due(&self, now: DateTime<Utc>) -> Result<Vec<ProjectId>> {
        let mut state = self.state();
        self.refresh_locked(&mut state)?;
        let mut reset = Vec::new();

        for (id, entry) in state.entries.iter_mut() {
            let project = &mut entry.project;
            if project.quota_reset_at > now {
                continue;
            }

            let mut next = project.quota_reset_at;
            while next <= now {
                next += Duration::hours(24);
            }

            self.repo.save_quota(*id, entry.outstanding, next)?;
            project.quota_used_today = entry.outstanding;
            project.quota_reset_at = next;
            metrics::set_quota_remaining(&project.name, project.remaining());

            tracing::info!(
                project_id = %id,
                name = %project.name,
                carried_over = entry.outstanding,
                next_reset = %next,
                "Daily quota reset"
            );
            reset.push(*id);
        }

        metrics::record_quota_resets(reset.len());
        reset.sort();
        Ok(reset)
    }

    /// Reset every project now, keeping each project's next reset instant
    ///
    /// Operator escape hatch for a counter that is known to be wrong.
    pub fn force_reset(&self) -> Result<usize> {
        let mut state = self.state();
        self.refresh_locked(&mut state)?;
        let mut count = 0;
        for (id, entry) in state.entries.iter_mut() {
            let project = &mut entry.project;
            self.repo
                .save_quota(*id, entry.outstanding, project.quota_reset_at)?;
            project.quota_used_today = entry.outstanding;
            metrics::set_quota_remaining(&project.name, project.remaining());
            count += 1;
        }
        tracing::warn!(projects = count, "Quota counters forcibly reset");
        Ok(count)
    }

    /// Cached state of one project, as of the last refresh or mutation
    pub fn project(&self, id: ProjectId) -> Option<ApiProject> {
        self.state().entries.get(&id).map(|e| e.project.clone())
    }

    /// Current state of every project, oldest first
    pub fn snapshot(&self) -> Vec<ApiProject> {
        self.state().projects()
    }

    /// Units held by unresolved reservations on a project
    pub fn outstanding(&self, id: ProjectId) -> u64 {
        self.state().entries.get(&id).map_or(0, |e| e.outstanding)
    }

    /// Aggregate quota view
    pub fn status(&self) -> QuotaStatus {
        let projects = self.snapshot();
        let cost = self.upload_cost.max(1);

        let total_quota = projects.iter().map(|p| p.daily_quota).sum();
        let total_used = projects.iter().map(|p| p.quota_used_today).sum();
        let total_remaining: u64 = projects.iter().map(|p| p.remaining()).sum();

        QuotaStatus {
            total_quota,
            total_used,
            total_remaining,
            total_projects: projects.len(),
            projects_available: projects.iter().filter(|p| p.has_headroom(cost)).count(),
            uploads_remaining: projects.iter().map(|p| p.remaining() / cost).sum(),
            upload_cost: self.upload_cost,
            projects: projects.iter().map(ProjectQuota::from).collect(),
        }
    }
}
