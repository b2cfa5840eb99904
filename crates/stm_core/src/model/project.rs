//! Project domain model.
//!
//! # Responsibility
//! - Define the project record and its creation draft.
//! - Validate drafts before anything touches storage.
//! - Derive progress aggregates from live task state.
//!
//! # Invariants
//! - `owner` is always contained in `users`.
//! - `task_ids` lists each task at most once; a task belongs to one project.
//! - `total_process_points` / `done_process_points` are never persisted; they
//!   are recomputed from tasks on every read.

use crate::model::task::{Task, TaskId};
use crate::model::user::UserId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable project identifier, generated by storage.
pub type ProjectId = Uuid;

/// Default upper bound for `description` length, in characters.
pub const DEFAULT_MAX_DESCRIPTION_LENGTH: usize = 10_000;

/// Persisted project record plus derived progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub description: String,
    /// Ordered as bound at creation, then by insertion.
    pub task_ids: Vec<TaskId>,
    pub users: BTreeSet<UserId>,
    pub owner: UserId,
    /// When true, only a task's assigned user may report its progress.
    pub needs_assignment: bool,
    /// Sum of `max_process_points` over the project's tasks.
    pub total_process_points: i64,
    /// Sum of `process_points` over the project's tasks.
    pub done_process_points: i64,
}

impl Project {
    pub fn is_member(&self, user: &str) -> bool {
        self.users.contains(user)
    }

    pub fn is_owner(&self, user: &str) -> bool {
        self.owner == user
    }

    /// Replaces the progress aggregates with sums over `tasks`.
    ///
    /// Only tasks that belong to this project are counted.
    pub fn with_progress(mut self, tasks: &[Task]) -> Self {
        let mut total: i64 = 0;
        let mut done: i64 = 0;
        for task in tasks.iter().filter(|task| task.project_id == Some(self.id)) {
            total = total.saturating_add(task.max_process_points);
            done = done.saturating_add(task.process_points);
        }
        self.total_process_points = total;
        self.done_process_points = done;
        self
    }
}

/// Client-supplied input for creating a project.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectDraft {
    /// Must be unset; ids are assigned by storage.
    pub id: Option<ProjectId>,
    pub name: String,
    pub description: String,
    pub task_ids: Vec<TaskId>,
    pub users: Vec<UserId>,
    pub owner: UserId,
    pub needs_assignment: bool,
}

impl ProjectDraft {
    /// Checks every precondition that needs no storage access.
    ///
    /// Order matches the order callers see errors in: id, owner, owner
    /// membership, name, tasks, description.
    pub fn validate(&self, max_description_length: usize) -> Result<(), ProjectValidationError> {
        if self.id.is_some() {
            return Err(ProjectValidationError::IdAlreadySet);
        }
        if self.owner.trim().is_empty() {
            return Err(ProjectValidationError::MissingOwner);
        }
        if !self.users.iter().any(|user| user == &self.owner) {
            return Err(ProjectValidationError::OwnerNotInUsers);
        }
        if self.users.iter().any(|user| user.trim().is_empty()) {
            return Err(ProjectValidationError::BlankUser);
        }
        if self.name.trim().is_empty() {
            return Err(ProjectValidationError::MissingName);
        }
        if self.task_ids.is_empty() {
            return Err(ProjectValidationError::NoTasks);
        }
        let mut seen = HashSet::with_capacity(self.task_ids.len());
        for task_id in &self.task_ids {
            if !seen.insert(task_id) {
                return Err(ProjectValidationError::DuplicateTaskId(*task_id));
            }
        }
        let length = self.description.chars().count();
        if length > max_description_length {
            return Err(ProjectValidationError::DescriptionTooLong {
                length,
                max: max_description_length,
            });
        }
        Ok(())
    }
}

/// Project draft validation failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectValidationError {
    IdAlreadySet,
    MissingOwner,
    OwnerNotInUsers,
    BlankUser,
    MissingName,
    NoTasks,
    DuplicateTaskId(TaskId),
    DescriptionTooLong { length: usize, max: usize },
}

impl Display for ProjectValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IdAlreadySet => write!(f, "project id must not be set"),
            Self::MissingOwner => write!(f, "project owner must be set"),
            Self::OwnerNotInUsers => write!(f, "project owner must be within users list"),
            Self::BlankUser => write!(f, "project users must not be blank"),
            Self::MissingName => write!(f, "project must have a name"),
            Self::NoTasks => write!(f, "no tasks have been specified"),
            Self::DuplicateTaskId(id) => write!(f, "task {id} is listed more than once"),
            Self::DescriptionTooLong { length, max } => write!(
                f,
                "description too long ({length} characters), maximum allowed is {max}"
            ),
        }
    }
}

impl Error for ProjectValidationError {}

#[cfg(test)]
mod tests {
    use super::{Project, ProjectDraft, ProjectValidationError, DEFAULT_MAX_DESCRIPTION_LENGTH};
    use crate::model::task::Task;
    use std::collections::BTreeSet;
    use uuid::Uuid;

    fn valid_draft() -> ProjectDraft {
        ProjectDraft {
            id: None,
            name: "Village roads".to_string(),
            description: String::new(),
            task_ids: vec![Uuid::new_v4()],
            users: vec!["a".to_string(), "b".to_string()],
            owner: "a".to_string(),
            needs_assignment: false,
        }
    }

    fn validate(draft: &ProjectDraft) -> Result<(), ProjectValidationError> {
        draft.validate(DEFAULT_MAX_DESCRIPTION_LENGTH)
    }

    #[test]
    fn valid_draft_passes() {
        validate(&valid_draft()).expect("draft should be valid");
    }

    #[test]
    fn rejects_preset_id_and_missing_owner() {
        let mut draft = valid_draft();
        draft.id = Some(Uuid::new_v4());
        assert_eq!(validate(&draft), Err(ProjectValidationError::IdAlreadySet));

        let mut draft = valid_draft();
        draft.owner = " ".to_string();
        assert_eq!(validate(&draft), Err(ProjectValidationError::MissingOwner));
    }

    #[test]
    fn owner_must_be_member() {
        let mut draft = valid_draft();
        draft.users = vec!["b".to_string()];
        assert_eq!(validate(&draft), Err(ProjectValidationError::OwnerNotInUsers));
    }

    #[test]
    fn rejects_missing_name_and_tasks() {
        let mut draft = valid_draft();
        draft.name = String::new();
        assert_eq!(validate(&draft), Err(ProjectValidationError::MissingName));

        let mut draft = valid_draft();
        draft.task_ids.clear();
        assert_eq!(validate(&draft), Err(ProjectValidationError::NoTasks));

        let mut draft = valid_draft();
        draft.task_ids.push(draft.task_ids[0]);
        assert!(matches!(
            validate(&draft),
            Err(ProjectValidationError::DuplicateTaskId(_))
        ));
    }

    #[test]
    fn description_limit_counts_characters() {
        let mut draft = valid_draft();
        draft.description = "ä".repeat(10);
        draft.validate(10).expect("10 characters fit a limit of 10");
        assert_eq!(
            draft.validate(9),
            Err(ProjectValidationError::DescriptionTooLong {
                length: 10,
                max: 9
            })
        );
    }

    #[test]
    fn progress_sums_only_own_tasks() {
        let project_id = Uuid::new_v4();
        let task = |project, points, max| Task {
            id: Uuid::new_v4(),
            project_id: Some(project),
            process_points: points,
            max_process_points: max,
            geometry: String::new(),
            assigned_user: None,
            version: 1,
        };
        let project = Project {
            id: project_id,
            name: "p".to_string(),
            description: String::new(),
            task_ids: Vec::new(),
            users: BTreeSet::from(["a".to_string()]),
            owner: "a".to_string(),
            needs_assignment: false,
            total_process_points: 99,
            done_process_points: 99,
        };

        let tasks = vec![
            task(project_id, 3, 10),
            task(project_id, 5, 5),
            task(Uuid::new_v4(), 7, 7),
        ];
        let project = project.with_progress(&tasks);
        assert_eq!(project.total_process_points, 15);
        assert_eq!(project.done_process_points, 8);
    }

    #[test]
    fn progress_saturates_on_extreme_rows() {
        let project_id = Uuid::new_v4();
        let task = |points| Task {
            id: Uuid::new_v4(),
            project_id: Some(project_id),
            process_points: points,
            max_process_points: i64::MAX,
            geometry: String::new(),
            assigned_user: None,
            version: 1,
        };
        let project = Project {
            id: project_id,
            name: "p".to_string(),
            description: String::new(),
            task_ids: Vec::new(),
            users: BTreeSet::from(["a".to_string()]),
            owner: "a".to_string(),
            needs_assignment: false,
            total_process_points: 0,
            done_process_points: 0,
        };

        let project = project.with_progress(&[task(i64::MAX), task(1)]);
        assert_eq!(project.total_process_points, i64::MAX);
        assert_eq!(project.done_process_points, i64::MAX);
    }
}
