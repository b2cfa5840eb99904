//! Manager error taxonomy.
//!
//! # Responsibility
//! - Carry a precise reason for every rejected manager operation.
//! - Collapse reasons into the five client-facing kinds the boundary maps
//!   onto status codes.
//!
//! # Invariants
//! - "Not authorized" and "entity missing" are distinct variants.
//! - Only `Internal`-kind errors may carry storage detail; the boundary
//!   must not echo them to clients.

use crate::model::project::{ProjectId, ProjectValidationError};
use crate::model::task::{TaskId, TaskValidationError};
use crate::model::user::UserIdError;
use crate::repo::store::RepoError;
use log::{debug, error};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Client-facing error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotAuthorized,
    NotFound,
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::NotAuthorized => "not_authorized",
            Self::NotFound => "not_found",
            Self::Conflict => "conflict",
            Self::Internal => "internal",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a permission check or lifecycle rule refused the actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    NotMember { project_id: ProjectId },
    NotOwner { project_id: ProjectId },
    NotAssigned { task_id: TaskId },
    OwnerCannotLeave { project_id: ProjectId },
    OwnerCannotBeRemoved { project_id: ProjectId },
    NonOwnerRemovingOther { project_id: ProjectId },
    /// A project may only be created with the requesting user as owner.
    NotDraftOwner,
}

impl Display for Denial {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotMember { project_id } => {
                write!(f, "user is not a member of project {project_id}")
            }
            Self::NotOwner { project_id } => write!(f, "user is not the owner of project {project_id}"),
            Self::NotAssigned { task_id } => write!(f, "user is not assigned to task {task_id}"),
            Self::OwnerCannotLeave { project_id } => write!(
                f,
                "the owner cannot leave project {project_id}; delete it instead"
            ),
            Self::OwnerCannotBeRemoved { project_id } => {
                write!(f, "the owner of project {project_id} cannot be removed")
            }
            Self::NonOwnerRemovingOther { project_id } => write!(
                f,
                "only the owner of project {project_id} may remove other users"
            ),
            Self::NotDraftOwner => write!(f, "projects can only be created with yourself as owner"),
        }
    }
}

/// Entity a lookup could not find.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    Project(ProjectId),
    Task(TaskId),
    /// Task exists but is not bound to any project.
    ProjectOfTask(TaskId),
}

impl Display for Missing {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Project(id) => write!(f, "project not found: {id}"),
            Self::Task(id) => write!(f, "task not found: {id}"),
            Self::ProjectOfTask(id) => write!(f, "task {id} does not belong to a project"),
        }
    }
}

/// State that makes an otherwise valid request impossible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    TasksAlreadyUsed,
    AlreadyMember { project_id: ProjectId },
    AlreadyAssigned { task_id: TaskId },
    VersionMismatch {
        task_id: TaskId,
        expected: i64,
        actual: i64,
    },
}

impl Display for Conflict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TasksAlreadyUsed => write!(f, "the given tasks are already used in other projects"),
            Self::AlreadyMember { project_id } => {
                write!(f, "user is already a member of project {project_id}")
            }
            Self::AlreadyAssigned { task_id } => {
                write!(f, "task {task_id} already has an assigned user")
            }
            Self::VersionMismatch {
                task_id,
                expected,
                actual,
            } => write!(
                f,
                "task {task_id} was modified concurrently (expected version {expected}, found {actual})"
            ),
        }
    }
}

/// Error returned by project and task managers.
#[derive(Debug)]
pub enum ServiceError {
    InvalidProject(ProjectValidationError),
    InvalidTaskDraft {
        index: usize,
        error: TaskValidationError,
    },
    InvalidProcessPoints {
        task_id: TaskId,
        error: TaskValidationError,
    },
    InvalidUser(UserIdError),
    NotAuthorized(Denial),
    NotFound(Missing),
    Conflict(Conflict),
    /// The operation timeout elapsed before commit; nothing was written.
    DeadlineExceeded { timeout: Duration },
    Internal(RepoError),
}

impl ServiceError {
    /// Client-facing category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidProject(_)
            | Self::InvalidTaskDraft { .. }
            | Self::InvalidProcessPoints { .. }
            | Self::InvalidUser(_) => ErrorKind::Validation,
            Self::NotAuthorized(_) => ErrorKind::NotAuthorized,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::DeadlineExceeded { .. } | Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidProject(err) => write!(f, "{err}"),
            Self::InvalidTaskDraft { index, error } => write!(f, "task #{index}: {error}"),
            Self::InvalidProcessPoints { task_id, error } => write!(f, "task {task_id}: {error}"),
            Self::InvalidUser(err) => write!(f, "{err}"),
            Self::NotAuthorized(denial) => write!(f, "not authorized: {denial}"),
            Self::NotFound(missing) => write!(f, "{missing}"),
            Self::Conflict(conflict) => write!(f, "{conflict}"),
            Self::DeadlineExceeded { timeout } => {
                write!(f, "operation exceeded its {}ms deadline", timeout.as_millis())
            }
            Self::Internal(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidProject(err) => Some(err),
            Self::InvalidTaskDraft { error, .. } => Some(error),
            Self::InvalidProcessPoints { error, .. } => Some(error),
            Self::InvalidUser(err) => Some(err),
            Self::Internal(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for ServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::ProjectNotFound(id) => Self::NotFound(Missing::Project(id)),
            RepoError::TaskNotFound(id) => Self::NotFound(Missing::Task(id)),
            other => Self::Internal(other),
        }
    }
}

impl From<ProjectValidationError> for ServiceError {
    fn from(value: ProjectValidationError) -> Self {
        Self::InvalidProject(value)
    }
}

impl From<UserIdError> for ServiceError {
    fn from(value: UserIdError) -> Self {
        Self::InvalidUser(value)
    }
}

/// Runs one manager operation and logs how it ended.
///
/// Rejections are logged at debug level by kind only; internal failures are
/// logged at error level with detail.
pub(crate) fn observed<T>(
    event: &'static str,
    op: impl FnOnce() -> ServiceResult<T>,
) -> ServiceResult<T> {
    let started_at = Instant::now();
    let result = op();
    if let Err(err) = &result {
        let duration_ms = started_at.elapsed().as_millis();
        match err.kind() {
            ErrorKind::Internal => error!(
                "event={event} module=service status=error kind=internal duration_ms={duration_ms} error={err}"
            ),
            kind => debug!(
                "event={event} module=service status=rejected kind={kind} duration_ms={duration_ms}"
            ),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::{Conflict, Denial, ErrorKind, Missing, ServiceError};
    use crate::model::project::ProjectValidationError;
    use crate::repo::store::RepoError;
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn every_variant_maps_to_one_kind() {
        let id = Uuid::new_v4();
        let cases = [
            (
                ServiceError::InvalidProject(ProjectValidationError::NoTasks),
                ErrorKind::Validation,
            ),
            (
                ServiceError::NotAuthorized(Denial::NotOwner { project_id: id }),
                ErrorKind::NotAuthorized,
            ),
            (
                ServiceError::NotFound(Missing::Task(id)),
                ErrorKind::NotFound,
            ),
            (
                ServiceError::Conflict(Conflict::TasksAlreadyUsed),
                ErrorKind::Conflict,
            ),
            (
                ServiceError::DeadlineExceeded {
                    timeout: Duration::from_millis(5),
                },
                ErrorKind::Internal,
            ),
        ];
        for (error, kind) in cases {
            assert_eq!(error.kind(), kind, "{error}");
        }
    }

    #[test]
    fn repo_not_found_is_client_facing_but_transport_errors_are_internal() {
        let id = Uuid::new_v4();
        assert!(matches!(
            ServiceError::from(RepoError::ProjectNotFound(id)),
            ServiceError::NotFound(Missing::Project(found)) if found == id
        ));
        assert_eq!(
            ServiceError::from(RepoError::Unavailable("down".to_string())).kind(),
            ErrorKind::Internal
        );
    }
}
