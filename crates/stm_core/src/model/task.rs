//! Task domain model.
//!
//! # Responsibility
//! - Define the task record, its creation draft and draft validation.
//! - Own the assignment state machine (`Unassigned` <-> `Assigned(user)`).
//!
//! # Invariants
//! - `0 <= process_points <= max_process_points` and `max_process_points >= 1`.
//! - A task has at most one assigned user; re-assignment requires an
//!   explicit unassign first.
//! - `project_id` is a back-reference only; `None` means the task is staged
//!   and not yet bound to a project.

use crate::model::geometry::{validate_polygon_feature, GeometryError};
use crate::model::project::ProjectId;
use crate::model::user::UserId;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable task identifier, generated by storage.
pub type TaskId = Uuid;

/// Persisted task record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    /// Owning project, if the task has been bound to one.
    pub project_id: Option<ProjectId>,
    pub process_points: i64,
    pub max_process_points: i64,
    /// Raw GeoJSON feature, validated at creation.
    pub geometry: String,
    pub assigned_user: Option<UserId>,
    /// Incremented on every mutation of this task.
    pub version: i64,
}

impl Task {
    /// Current assignment state of this task.
    pub fn assignment(&self) -> Assignment {
        match &self.assigned_user {
            Some(user) => Assignment::Assigned(user.clone()),
            None => Assignment::Unassigned,
        }
    }
}

/// Input for creating one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    #[serde(default)]
    pub process_points: i64,
    pub max_process_points: i64,
    pub geometry: String,
}

/// Upper bound for `max_process_points`, the 32-bit wire range of clients.
pub const MAX_PROCESS_POINTS: i64 = i32::MAX as i64;

impl TaskDraft {
    /// Checks point bounds and geometry structure.
    pub fn validate(&self) -> Result<(), TaskValidationError> {
        if self.process_points < 0
            || self.max_process_points < 1
            || self.max_process_points > MAX_PROCESS_POINTS
            || self.max_process_points < self.process_points
        {
            return Err(TaskValidationError::ProcessPointsOutOfRange {
                points: self.process_points,
                max: self.max_process_points,
            });
        }
        validate_polygon_feature(&self.geometry).map_err(TaskValidationError::Geometry)
    }
}

/// Checks `points` against the `[0, max]` range of an existing task.
pub fn validate_process_points(points: i64, max: i64) -> Result<(), TaskValidationError> {
    if points < 0 || points > max {
        return Err(TaskValidationError::ProcessPointsOutOfRange { points, max });
    }
    Ok(())
}

/// Task input validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskValidationError {
    ProcessPointsOutOfRange { points: i64, max: i64 },
    Geometry(GeometryError),
}

impl Display for TaskValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ProcessPointsOutOfRange { points, max } => {
                write!(f, "process points out of range ({points} / {max})")
            }
            Self::Geometry(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TaskValidationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ProcessPointsOutOfRange { .. } => None,
            Self::Geometry(err) => Some(err),
        }
    }
}

/// Assignment state of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    Unassigned,
    Assigned(UserId),
}

impl Assignment {
    /// `Unassigned --assign(u)--> Assigned(u)`.
    ///
    /// There is no `Assigned(u) -> Assigned(v)` edge.
    pub fn assign(&self, user: &str) -> Result<Assignment, AssignmentError> {
        match self {
            Self::Unassigned => Ok(Self::Assigned(user.to_string())),
            Self::Assigned(holder) => Err(AssignmentError::AlreadyAssigned(holder.clone())),
        }
    }

    /// `Assigned(u) --unassign(requester = u)--> Unassigned`.
    pub fn unassign(&self, requester: &str) -> Result<Assignment, AssignmentError> {
        match self {
            Self::Assigned(holder) if holder == requester => Ok(Self::Unassigned),
            Self::Assigned(holder) => Err(AssignmentError::HeldByOther(holder.clone())),
            Self::Unassigned => Err(AssignmentError::NotAssigned),
        }
    }

    /// The holding user, if any.
    pub fn user(&self) -> Option<&str> {
        match self {
            Self::Assigned(user) => Some(user.as_str()),
            Self::Unassigned => None,
        }
    }
}

/// Rejected assignment transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentError {
    AlreadyAssigned(UserId),
    HeldByOther(UserId),
    NotAssigned,
}

impl Display for AssignmentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyAssigned(_) => write!(f, "task is already assigned"),
            Self::HeldByOther(_) => write!(f, "task is assigned to another user"),
            Self::NotAssigned => write!(f, "task is not assigned"),
        }
    }
}

impl Error for AssignmentError {}
