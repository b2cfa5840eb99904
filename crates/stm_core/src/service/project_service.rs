//! Project manager.
//!
//! # Responsibility
//! - Create projects, manage membership and delete projects with their
//!   tasks.
//! - Recompute progress aggregates from live task state on every read.
//!
//! # Invariants
//! - Each public operation is one unit of work: permission checks and
//!   mutations share a snapshot and commit together or not at all.
//! - `owner ∈ users` holds after every successful mutation.
//! - A project is deleted only after all of its tasks were deleted in the
//!   same unit of work.

use crate::model::project::{Project, ProjectDraft, ProjectId};
use crate::model::task::{TaskDraft, TaskId};
use crate::model::user::normalize_user_id;
use crate::repo::project_repo::ProjectRepository;
use crate::repo::store::{RepoError, Storage, StorageTx, TxMode};
use crate::repo::task_repo::TaskRepository;
use crate::service::error::{observed, Conflict, Denial, Missing, ServiceError, ServiceResult};
use crate::service::options::{Deadline, ServiceOptions};
use crate::service::permission::{PermissionEngine, Verdict};
use crate::service::task_service::validate_drafts;
use log::info;

/// Project use-case facade over a storage backend.
pub struct ProjectService<S: Storage> {
    storage: S,
    options: ServiceOptions,
}

impl<S: Storage> ProjectService<S> {
    /// Creates a manager with default limits.
    pub fn new(storage: S) -> Self {
        Self::with_options(storage, ServiceOptions::default())
    }

    pub fn with_options(storage: S, options: ServiceOptions) -> Self {
        Self { storage, options }
    }

    /// Creates a project over already staged tasks.
    ///
    /// The requesting user must be the draft owner. Unknown task ids fail
    /// with `NotFound`; tasks bound to another project fail with `Conflict`.
    pub fn add_project(&self, draft: &ProjectDraft, requesting_user: &str) -> ServiceResult<Project> {
        observed("project_add", || {
            let deadline = Deadline::start(&self.options);
            let tx = self.storage.begin(TxMode::Write)?;
            let project = insert_project(&tx, draft, requesting_user, &self.options)?;
            deadline.commit(tx)?;
            info!(
                "event=project_add module=project status=ok project_id={} tasks={}",
                project.id,
                project.task_ids.len()
            );
            Ok(project)
        })
    }

    /// Creates `tasks` and a project over them in one unit of work.
    ///
    /// Ids already listed in `draft.task_ids` are bound first, then the new
    /// tasks in input order.
    pub fn create_project_with_tasks(
        &self,
        draft: &ProjectDraft,
        tasks: &[TaskDraft],
        requesting_user: &str,
    ) -> ServiceResult<Project> {
        observed("project_create_with_tasks", || {
            validate_drafts(tasks)?;
            let deadline = Deadline::start(&self.options);
            let tx = self.storage.begin(TxMode::Write)?;
            let created = tx.insert_tasks(tasks, None)?;

            let mut combined = draft.clone();
            combined.task_ids.extend(created.iter().map(|task| task.id));
            let project = insert_project(&tx, &combined, requesting_user, &self.options)?;
            deadline.commit(tx)?;
            info!(
                "event=project_add module=project status=ok project_id={} tasks={} created_tasks={}",
                project.id,
                project.task_ids.len(),
                created.len()
            );
            Ok(project)
        })
    }

    /// Lists every project `user` is a member of, with progress.
    pub fn get_projects(&self, user: &str) -> ServiceResult<Vec<Project>> {
        observed("project_list", || {
            let user = normalize_user_id(user)?;
            let tx = self.storage.begin(TxMode::Read)?;
            let projects = tx
                .list_projects_for_user(&user)?
                .into_iter()
                .map(|project| with_progress(&tx, project))
                .collect::<ServiceResult<Vec<_>>>()?;
            tx.commit()?;
            Ok(projects)
        })
    }

    /// Loads one project with progress; requires membership.
    pub fn get_project(&self, project_id: ProjectId, user: &str) -> ServiceResult<Project> {
        observed("project_get", || {
            let user = normalize_user_id(user)?;
            let tx = self.storage.begin(TxMode::Read)?;
            PermissionEngine::new(&tx)
                .verify_membership_project(project_id, &user)
                .require()?;
            let project = load_project(&tx, project_id)?;
            let project = with_progress(&tx, project)?;
            tx.commit()?;
            Ok(project)
        })
    }

    /// Loads the project a task belongs to; requires membership.
    pub fn get_project_by_task(&self, task_id: TaskId, user: &str) -> ServiceResult<Project> {
        observed("project_get_by_task", || {
            let user = normalize_user_id(user)?;
            let tx = self.storage.begin(TxMode::Read)?;
            PermissionEngine::new(&tx)
                .verify_membership_task(task_id, &user)
                .require()?;
            let project = tx
                .get_project_by_task(task_id)?
                .ok_or(ServiceError::NotFound(Missing::ProjectOfTask(task_id)))?;
            let project = with_progress(&tx, project)?;
            tx.commit()?;
            Ok(project)
        })
    }

    /// Adds `new_user` as a member; requires ownership.
    pub fn add_user(
        &self,
        new_user: &str,
        project_id: ProjectId,
        requesting_user: &str,
    ) -> ServiceResult<Project> {
        observed("project_add_user", || {
            let new_user = normalize_user_id(new_user)?;
            let requesting_user = normalize_user_id(requesting_user)?;
            let deadline = Deadline::start(&self.options);
            let tx = self.storage.begin(TxMode::Write)?;
            PermissionEngine::new(&tx)
                .verify_ownership(project_id, &requesting_user)
                .require()?;

            let project = load_project(&tx, project_id)?;
            if project.is_member(&new_user) {
                return Err(ServiceError::Conflict(Conflict::AlreadyMember { project_id }));
            }
            let project = tx.add_member(project_id, &new_user)?;
            let project = with_progress(&tx, project)?;
            deadline.commit(tx)?;
            info!(
                "event=project_add_user module=project status=ok project_id={project_id} members={}",
                project.users.len()
            );
            Ok(project)
        })
    }

    /// Removes `user_to_remove` from the project.
    ///
    /// Both users must be members, the owner can never be removed, and only
    /// the owner may remove someone other than themselves.
    pub fn remove_user(
        &self,
        project_id: ProjectId,
        requesting_user: &str,
        user_to_remove: &str,
    ) -> ServiceResult<Project> {
        observed("project_remove_user", || {
            let requesting_user = normalize_user_id(requesting_user)?;
            let user_to_remove = normalize_user_id(user_to_remove)?;
            let deadline = Deadline::start(&self.options);
            let tx = self.storage.begin(TxMode::Write)?;
            let project = remove_member(&tx, project_id, &requesting_user, &user_to_remove)?;
            deadline.commit(tx)?;
            info!(
                "event=project_remove_user module=project status=ok project_id={project_id} members={}",
                project.users.len()
            );
            Ok(project)
        })
    }

    /// Self-removal. The owner cannot leave.
    pub fn leave_project(&self, project_id: ProjectId, requesting_user: &str) -> ServiceResult<Project> {
        observed("project_leave", || {
            let requesting_user = normalize_user_id(requesting_user)?;
            let deadline = Deadline::start(&self.options);
            let tx = self.storage.begin(TxMode::Write)?;
            let engine = PermissionEngine::new(&tx);
            match engine.verify_ownership(project_id, &requesting_user) {
                Verdict::Authorized => {
                    return Err(ServiceError::NotAuthorized(Denial::OwnerCannotLeave {
                        project_id,
                    }));
                }
                Verdict::Denied(_) => {}
                Verdict::LookupFailed(failure) => return Err(failure.into()),
            }
            let project = remove_member(&tx, project_id, &requesting_user, &requesting_user)?;
            deadline.commit(tx)?;
            info!(
                "event=project_leave module=project status=ok project_id={project_id} members={}",
                project.users.len()
            );
            Ok(project)
        })
    }

    /// Deletes the project and all of its tasks; requires ownership.
    pub fn delete_project(&self, project_id: ProjectId, requesting_user: &str) -> ServiceResult<()> {
        observed("project_delete", || {
            let requesting_user = normalize_user_id(requesting_user)?;
            let deadline = Deadline::start(&self.options);
            let tx = self.storage.begin(TxMode::Write)?;
            PermissionEngine::new(&tx)
                .verify_ownership(project_id, &requesting_user)
                .require()?;

            let project = load_project(&tx, project_id)?;
            let removed = tx.delete_tasks(&project.task_ids)?;
            if removed != project.task_ids.len() {
                return Err(ServiceError::Internal(RepoError::InvalidData(format!(
                    "deleted {removed} of {} tasks of project {project_id}",
                    project.task_ids.len()
                ))));
            }
            tx.delete_project(project_id)?;
            deadline.commit(tx)?;
            info!(
                "event=project_delete module=project status=ok project_id={project_id} tasks_removed={removed}"
            );
            Ok(())
        })
    }
}

fn insert_project<T: StorageTx>(
    tx: &T,
    draft: &ProjectDraft,
    requesting_user: &str,
    options: &ServiceOptions,
) -> ServiceResult<Project> {
    let requesting_user = normalize_user_id(requesting_user)?;
    let draft = normalized(draft);
    draft.validate(options.max_description_length)?;
    if draft.owner != requesting_user {
        return Err(ServiceError::NotAuthorized(Denial::NotDraftOwner));
    }

    if let Some(missing) = tx.missing_tasks(&draft.task_ids)?.first() {
        return Err(ServiceError::NotFound(Missing::Task(*missing)));
    }
    if tx.are_tasks_used(&draft.task_ids)? {
        return Err(ServiceError::Conflict(Conflict::TasksAlreadyUsed));
    }

    let project = tx.insert_project(&draft)?;
    with_progress(tx, project)
}

fn remove_member<T: StorageTx>(
    tx: &T,
    project_id: ProjectId,
    requesting_user: &str,
    user_to_remove: &str,
) -> ServiceResult<Project> {
    let engine = PermissionEngine::new(tx);
    engine
        .verify_membership_project(project_id, requesting_user)
        .require()?;
    engine
        .verify_membership_project(project_id, user_to_remove)
        .require()?;

    match engine.verify_ownership(project_id, user_to_remove) {
        Verdict::Authorized => {
            return Err(ServiceError::NotAuthorized(Denial::OwnerCannotBeRemoved {
                project_id,
            }));
        }
        Verdict::Denied(_) => {}
        Verdict::LookupFailed(failure) => return Err(failure.into()),
    }

    if requesting_user != user_to_remove {
        match engine.verify_ownership(project_id, requesting_user) {
            Verdict::Authorized => {}
            Verdict::Denied(_) => {
                return Err(ServiceError::NotAuthorized(Denial::NonOwnerRemovingOther {
                    project_id,
                }));
            }
            Verdict::LookupFailed(failure) => return Err(failure.into()),
        }
    }

    let project = tx.remove_member(project_id, user_to_remove)?;
    with_progress(tx, project)
}

fn normalized(draft: &ProjectDraft) -> ProjectDraft {
    let mut draft = draft.clone();
    draft.owner = draft.owner.trim().to_string();
    for user in &mut draft.users {
        *user = user.trim().to_string();
    }
    draft
}

fn load_project<R: ProjectRepository + ?Sized>(repo: &R, id: ProjectId) -> ServiceResult<Project> {
    repo.get_project(id)?
        .ok_or(ServiceError::NotFound(Missing::Project(id)))
}

fn with_progress<R: TaskRepository + ?Sized>(repo: &R, project: Project) -> ServiceResult<Project> {
    let tasks = repo.list_tasks(project.id)?;
    Ok(project.with_progress(&tasks))
}

#[cfg(test)]
mod tests {
    use super::{normalized, ProjectService};
    use crate::model::project::ProjectDraft;
    use crate::repo::memory_store::MemoryStorage;
    use crate::service::error::{Denial, ServiceError};

    #[test]
    fn normalized_trims_owner_and_users() {
        let draft = ProjectDraft {
            owner: " a ".to_string(),
            users: vec!["a ".to_string(), "\tb".to_string()],
            ..ProjectDraft::default()
        };
        let draft = normalized(&draft);
        assert_eq!(draft.owner, "a");
        assert_eq!(draft.users, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn leaving_an_unknown_project_is_not_found_not_denied() {
        let service = ProjectService::new(MemoryStorage::new());
        let err = service
            .leave_project(uuid::Uuid::new_v4(), "a")
            .expect_err("unknown project");
        assert!(matches!(err, ServiceError::NotFound(_)), "{err:?}");
        assert!(!matches!(
            err,
            ServiceError::NotAuthorized(Denial::OwnerCannotLeave { .. })
        ));
    }
}
