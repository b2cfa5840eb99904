//! Task manager.
//!
//! # Responsibility
//! - Stage and add tasks, drive the assignment state machine, report
//!   progress and delete tasks.
//!
//! # Invariants
//! - `0 <= process_points <= max_process_points` after every mutation.
//! - A task has at most one assignee; `Assigned(u) -> Assigned(v)` is
//!   refused with `Conflict`.
//! - Check and mutation share one unit of work, so of two concurrent
//!   `assign_user` calls on one task exactly one commits.

use crate::model::project::ProjectId;
use crate::model::task::{validate_process_points, Assignment, Task, TaskDraft, TaskId};
use crate::model::user::normalize_user_id;
use crate::repo::store::{RepoError, Storage, StorageTx, TxMode};
use crate::repo::task_repo::TaskRepository;
use crate::service::error::{observed, Conflict, Missing, ServiceError, ServiceResult};
use crate::service::options::{Deadline, ServiceOptions};
use crate::service::permission::PermissionEngine;
use log::info;
use std::collections::HashSet;

/// Task use-case facade over a storage backend.
pub struct TaskService<S: Storage> {
    storage: S,
    options: ServiceOptions,
}

impl<S: Storage> TaskService<S> {
    /// Creates a manager with default limits.
    pub fn new(storage: S) -> Self {
        Self::with_options(storage, ServiceOptions::default())
    }

    pub fn with_options(storage: S, options: ServiceOptions) -> Self {
        Self { storage, options }
    }

    /// Lists a project's tasks; requires membership.
    pub fn get_tasks(&self, project_id: ProjectId, user: &str) -> ServiceResult<Vec<Task>> {
        observed("task_list", || {
            let user = normalize_user_id(user)?;
            let tx = self.storage.begin(TxMode::Read)?;
            PermissionEngine::new(&tx)
                .verify_membership_project(project_id, &user)
                .require()?;
            let tasks = tx.list_tasks(project_id)?;
            tx.commit()?;
            Ok(tasks)
        })
    }

    /// Loads one task; requires membership in its project.
    pub fn get_task(&self, task_id: TaskId, user: &str) -> ServiceResult<Task> {
        observed("task_get", || {
            let user = normalize_user_id(user)?;
            let tx = self.storage.begin(TxMode::Read)?;
            PermissionEngine::new(&tx)
                .verify_membership_task(task_id, &user)
                .require()?;
            let task = load_task(&tx, task_id)?;
            tx.commit()?;
            Ok(task)
        })
    }

    /// Stores tasks that belong to no project yet.
    ///
    /// A later `add_project` binds them by id.
    pub fn stage_tasks(&self, drafts: &[TaskDraft]) -> ServiceResult<Vec<Task>> {
        observed("task_stage", || {
            validate_drafts(drafts)?;
            let deadline = Deadline::start(&self.options);
            let tx = self.storage.begin(TxMode::Write)?;
            let created = tx.insert_tasks(drafts, None)?;
            deadline.commit(tx)?;
            info!(
                "event=task_stage module=task status=ok count={}",
                created.len()
            );
            Ok(created)
        })
    }

    /// Appends tasks to an existing project; requires ownership.
    ///
    /// The batch is validated up front and stored all-or-nothing.
    pub fn add_tasks(
        &self,
        drafts: &[TaskDraft],
        project_id: ProjectId,
        requesting_user: &str,
    ) -> ServiceResult<Vec<Task>> {
        observed("task_add", || {
            validate_drafts(drafts)?;
            let requesting_user = normalize_user_id(requesting_user)?;
            let deadline = Deadline::start(&self.options);
            let tx = self.storage.begin(TxMode::Write)?;
            PermissionEngine::new(&tx)
                .verify_ownership(project_id, &requesting_user)
                .require()?;
            let created = tx.insert_tasks(drafts, Some(project_id))?;
            deadline.commit(tx)?;
            info!(
                "event=task_add module=task status=ok project_id={project_id} count={}",
                created.len()
            );
            Ok(created)
        })
    }

    /// `Unassigned -> Assigned(user)`; requires membership.
    pub fn assign_user(&self, task_id: TaskId, user: &str) -> ServiceResult<Task> {
        observed("task_assign", || {
            let user = normalize_user_id(user)?;
            let deadline = Deadline::start(&self.options);
            let tx = self.storage.begin(TxMode::Write)?;
            PermissionEngine::new(&tx)
                .verify_membership_task(task_id, &user)
                .require()?;

            let task = load_task(&tx, task_id)?;
            let next = task
                .assignment()
                .assign(&user)
                .map_err(|_| ServiceError::Conflict(Conflict::AlreadyAssigned { task_id }))?;
            let task = tx.set_assigned_user(task_id, next.user())?;
            deadline.commit(tx)?;
            info!("event=task_assign module=task status=ok task_id={task_id} version={}", task.version);
            Ok(task)
        })
    }

    /// `Assigned(requester) -> Unassigned`.
    ///
    /// Releasing an unassigned task is a no-op for project members.
    pub fn unassign_user(&self, task_id: TaskId, requesting_user: &str) -> ServiceResult<Task> {
        observed("task_unassign", || {
            let requesting_user = normalize_user_id(requesting_user)?;
            let deadline = Deadline::start(&self.options);
            let tx = self.storage.begin(TxMode::Write)?;
            let engine = PermissionEngine::new(&tx);
            let task = load_task(&tx, task_id)?;

            let task = match task.assignment() {
                Assignment::Unassigned => {
                    engine
                        .verify_membership_task(task_id, &requesting_user)
                        .require()?;
                    task
                }
                assigned @ Assignment::Assigned(_) => {
                    engine.verify_assignment(task_id, &requesting_user).require()?;
                    let next = assigned.unassign(&requesting_user).map_err(|_| {
                        ServiceError::Internal(RepoError::InvalidData(format!(
                            "assignment of task {task_id} changed during unassign"
                        )))
                    })?;
                    tx.set_assigned_user(task_id, next.user())?
                }
            };
            deadline.commit(tx)?;
            info!(
                "event=task_unassign module=task status=ok task_id={task_id} version={}",
                task.version
            );
            Ok(task)
        })
    }

    /// Reports progress with last-write-wins semantics.
    ///
    /// Needs the assignment when the project requires one, membership
    /// otherwise. Lowering the value is allowed.
    pub fn set_process_points(
        &self,
        task_id: TaskId,
        new_points: i64,
        requesting_user: &str,
    ) -> ServiceResult<Task> {
        self.set_process_points_checked(task_id, new_points, requesting_user, None)
    }

    /// Like `set_process_points`, but fails with `Conflict` unless the task
    /// is still at `expected_version`.
    pub fn set_process_points_checked(
        &self,
        task_id: TaskId,
        new_points: i64,
        requesting_user: &str,
        expected_version: Option<i64>,
    ) -> ServiceResult<Task> {
        observed("task_set_process_points", || {
            let requesting_user = normalize_user_id(requesting_user)?;
            let deadline = Deadline::start(&self.options);
            let tx = self.storage.begin(TxMode::Write)?;
            let engine = PermissionEngine::new(&tx);
            let verdict = if engine.assignment_required(task_id)? {
                engine.verify_assignment(task_id, &requesting_user)
            } else {
                engine.verify_membership_task(task_id, &requesting_user)
            };
            verdict.require()?;

            let task = load_task(&tx, task_id)?;
            if let Some(expected) = expected_version {
                if expected != task.version {
                    return Err(ServiceError::Conflict(Conflict::VersionMismatch {
                        task_id,
                        expected,
                        actual: task.version,
                    }));
                }
            }
            validate_process_points(new_points, task.max_process_points)
                .map_err(|error| ServiceError::InvalidProcessPoints { task_id, error })?;

            let task = tx.set_process_points(task_id, new_points)?;
            deadline.commit(tx)?;
            info!(
                "event=task_set_process_points module=task status=ok task_id={task_id} version={}",
                task.version
            );
            Ok(task)
        })
    }

    /// Deletes tasks as one batch; requires membership for every id.
    ///
    /// Duplicate ids are ignored; an empty list deletes nothing.
    pub fn delete(&self, task_ids: &[TaskId], requesting_user: &str) -> ServiceResult<usize> {
        observed("task_delete", || {
            let requesting_user = normalize_user_id(requesting_user)?;
            let mut seen = HashSet::with_capacity(task_ids.len());
            let task_ids: Vec<TaskId> = task_ids
                .iter()
                .copied()
                .filter(|id| seen.insert(*id))
                .collect();
            if task_ids.is_empty() {
                return Ok(0);
            }

            let deadline = Deadline::start(&self.options);
            let tx = self.storage.begin(TxMode::Write)?;
            PermissionEngine::new(&tx)
                .verify_membership_tasks(&task_ids, &requesting_user)
                .require()?;
            let removed = tx.delete_tasks(&task_ids)?;
            deadline.commit(tx)?;
            info!("event=task_delete module=task status=ok count={removed}");
            Ok(removed)
        })
    }
}

/// Validates a batch; the first offending draft is reported by index.
pub(crate) fn validate_drafts(drafts: &[TaskDraft]) -> ServiceResult<()> {
    for (index, draft) in drafts.iter().enumerate() {
        draft
            .validate()
            .map_err(|error| ServiceError::InvalidTaskDraft { index, error })?;
    }
    Ok(())
}

fn load_task<R: TaskRepository + ?Sized>(repo: &R, id: TaskId) -> ServiceResult<Task> {
    repo.get_task(id)?
        .ok_or(ServiceError::NotFound(Missing::Task(id)))
}
