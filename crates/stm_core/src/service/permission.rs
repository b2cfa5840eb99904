//! Permission engine.
//!
//! # Responsibility
//! - Answer membership, ownership and assignment questions from persisted
//!   project and task state.
//!
//! # Invariants
//! - Never mutates storage.
//! - Every check yields one of three outcomes: authorized, denied, or
//!   lookup failed. A lookup failure is never reported as a denial, and a
//!   denial is never reported as success.
//! - Checks run on the caller's unit of work so the decision and the
//!   following mutation observe the same snapshot.

use crate::model::project::ProjectId;
use crate::model::task::TaskId;
use crate::repo::project_repo::ProjectRepository;
use crate::repo::store::RepoError;
use crate::repo::task_repo::TaskRepository;
use crate::service::error::{Denial, Missing, ServiceError, ServiceResult};
use log::debug;
use std::fmt::{Display, Formatter};

/// Why a check could not reach a decision.
#[derive(Debug)]
pub enum LookupFailure {
    ProjectNotFound(ProjectId),
    TaskNotFound(TaskId),
    /// The task exists but is not bound to a project.
    TaskWithoutProject(TaskId),
    Storage(RepoError),
}

impl Display for LookupFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProjectNotFound(id) => write!(f, "project not found: {id}"),
            Self::TaskNotFound(id) => write!(f, "task not found: {id}"),
            Self::TaskWithoutProject(id) => write!(f, "task {id} does not belong to a project"),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl From<LookupFailure> for ServiceError {
    fn from(value: LookupFailure) -> Self {
        match value {
            LookupFailure::ProjectNotFound(id) => Self::NotFound(Missing::Project(id)),
            LookupFailure::TaskNotFound(id) => Self::NotFound(Missing::Task(id)),
            LookupFailure::TaskWithoutProject(id) => Self::NotFound(Missing::ProjectOfTask(id)),
            LookupFailure::Storage(err) => Self::from(err),
        }
    }
}

/// Outcome of one permission check.
#[must_use]
#[derive(Debug)]
pub enum Verdict {
    Authorized,
    Denied(Denial),
    LookupFailed(LookupFailure),
}

impl Verdict {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized)
    }

    /// Converts the verdict into a manager result.
    pub fn require(self) -> ServiceResult<()> {
        match self {
            Self::Authorized => Ok(()),
            Self::Denied(denial) => Err(ServiceError::NotAuthorized(denial)),
            Self::LookupFailed(failure) => Err(failure.into()),
        }
    }
}

/// Read-only permission checks over one unit of work.
pub struct PermissionEngine<'r, R: ?Sized> {
    repo: &'r R,
}

impl<'r, R> PermissionEngine<'r, R>
where
    R: ProjectRepository + TaskRepository + ?Sized,
{
    pub fn new(repo: &'r R) -> Self {
        Self { repo }
    }

    /// Authorized iff `user` is in the project's member set.
    pub fn verify_membership_project(&self, project_id: ProjectId, user: &str) -> Verdict {
        let verdict = match self.repo.get_project(project_id) {
            Err(err) => Verdict::LookupFailed(LookupFailure::Storage(err)),
            Ok(None) => Verdict::LookupFailed(LookupFailure::ProjectNotFound(project_id)),
            Ok(Some(project)) if project.is_member(user) => Verdict::Authorized,
            Ok(Some(_)) => Verdict::Denied(Denial::NotMember { project_id }),
        };
        trace_verdict("membership_project", &verdict);
        verdict
    }

    /// Resolves the task's project, then checks membership there.
    pub fn verify_membership_task(&self, task_id: TaskId, user: &str) -> Verdict {
        match self.project_of_task(task_id) {
            Ok(project_id) => self.verify_membership_project(project_id, user),
            Err(failure) => {
                let verdict = Verdict::LookupFailed(failure);
                trace_verdict("membership_task", &verdict);
                verdict
            }
        }
    }

    /// Membership in the owning project of every task; first non-authorized
    /// outcome wins. An empty id list is authorized.
    pub fn verify_membership_tasks(&self, task_ids: &[TaskId], user: &str) -> Verdict {
        for task_id in task_ids {
            let verdict = self.verify_membership_task(*task_id, user);
            if !verdict.is_authorized() {
                return verdict;
            }
        }
        Verdict::Authorized
    }

    /// Authorized iff `user` is the project owner.
    pub fn verify_ownership(&self, project_id: ProjectId, user: &str) -> Verdict {
        let verdict = match self.repo.get_project(project_id) {
            Err(err) => Verdict::LookupFailed(LookupFailure::Storage(err)),
            Ok(None) => Verdict::LookupFailed(LookupFailure::ProjectNotFound(project_id)),
            Ok(Some(project)) if project.is_owner(user) => Verdict::Authorized,
            Ok(Some(_)) => Verdict::Denied(Denial::NotOwner { project_id }),
        };
        trace_verdict("ownership", &verdict);
        verdict
    }

    /// Authorized iff the task is currently assigned to `user`.
    pub fn verify_assignment(&self, task_id: TaskId, user: &str) -> Verdict {
        let verdict = match self.repo.get_task(task_id) {
            Err(err) => Verdict::LookupFailed(LookupFailure::Storage(err)),
            Ok(None) => Verdict::LookupFailed(LookupFailure::TaskNotFound(task_id)),
            Ok(Some(task)) if task.assigned_user.as_deref() == Some(user) => Verdict::Authorized,
            Ok(Some(_)) => Verdict::Denied(Denial::NotAssigned { task_id }),
        };
        trace_verdict("assignment", &verdict);
        verdict
    }

    /// The owning project's `needs_assignment` flag.
    pub fn assignment_required(&self, task_id: TaskId) -> Result<bool, LookupFailure> {
        let project_id = self.project_of_task(task_id)?;
        match self.repo.get_project(project_id) {
            Err(err) => Err(LookupFailure::Storage(err)),
            Ok(None) => Err(LookupFailure::ProjectNotFound(project_id)),
            Ok(Some(project)) => Ok(project.needs_assignment),
        }
    }

    fn project_of_task(&self, task_id: TaskId) -> Result<ProjectId, LookupFailure> {
        match self.repo.get_task(task_id) {
            Err(err) => Err(LookupFailure::Storage(err)),
            Ok(None) => Err(LookupFailure::TaskNotFound(task_id)),
            Ok(Some(task)) => task
                .project_id
                .ok_or(LookupFailure::TaskWithoutProject(task_id)),
        }
    }
}

fn trace_verdict(check: &str, verdict: &Verdict) {
    match verdict {
        Verdict::Authorized => {}
        Verdict::Denied(_) => {
            debug!("event=permission_check module=permission status=denied check={check}")
        }
        Verdict::LookupFailed(_) => {
            debug!("event=permission_check module=permission status=error check={check}")
        }
    }
}
