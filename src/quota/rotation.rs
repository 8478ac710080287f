//! Charging-project selection at dispatch time
//!
//! An upload is charged to its account's bound project whenever that project
//! can afford it. When it cannot, and the account allows rotation, the
//! project with the most remaining quota takes the charge instead. Ties go to
//! the lowest project id so that the choice is reproducible.
//!
//! Rotation is a per-upload decision. The account's stored project binding
//! is never touched.

use crate::error::{Error, Result};
use crate::models::{Account, ApiProject, ProjectId};

/// Pick the project to charge `cost` units for an upload of `account`
///
/// `projects` is the ledger's current view. The bound project must be part
/// of it; a missing bound project is an invariant violation.
pub fn select_project<'a, I>(account: &Account, projects: I, cost: u64) -> Result<ProjectId>
where
    I: IntoIterator<Item = &'a ApiProject>,
{
    let projects: Vec<&ApiProject> = projects.into_iter().collect();

    let bound = projects
        .iter()
        .find(|p| p.id == account.api_project_id)
        .ok_or_else(|| {
            Error::invariant(format!(
                "account {} is bound to unknown project {}",
                account.id, account.api_project_id
            ))
        })?;

    if bound.has_headroom(cost) {
        return Ok(bound.id);
    }

    if !account.allow_rotation {
        return Err(Error::QuotaExceeded {
            project_id: Some(bound.id),
            requested: cost,
            remaining: bound.remaining(),
        });
    }

    projects
        .iter()
        .filter(|p| p.has_headroom(cost))
        .max_by(|a, b| a.remaining().cmp(&b.remaining()).then(b.id.cmp(&a.id)))
        .map(|p| p.id)
        .ok_or_else(|| Error::QuotaExceeded {
            project_id: None,
            requested: cost,
            remaining: projects.iter().map(|p| p.remaining()).max().unwrap_or(0),
        })
}
