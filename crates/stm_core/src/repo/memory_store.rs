//! In-memory persistence port for tests and embedding.
//!
//! # Responsibility
//! - Mirror the SQLite backend's observable behavior without a database.
//! - Allow tests to inject failures at named points inside a unit of work.
//!
//! # Invariants
//! - Units of work are serialized on one mutex; each works on a private copy
//!   of the state that replaces the shared state only on `commit()`.
//! - Fail points are sampled when a unit of work begins.

use crate::model::project::{Project, ProjectDraft, ProjectId};
use crate::model::task::{Task, TaskDraft, TaskId};
use crate::model::user::UserId;
use crate::repo::project_repo::ProjectRepository;
use crate::repo::store::{RepoError, RepoResult, Storage, StorageTx, TxMode};
use crate::repo::task_repo::TaskRepository;
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Named step where an injected failure fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    InsertProject,
    InsertTasks,
    DeleteTasks,
    DeleteProject,
    Commit,
}

#[derive(Debug, Clone)]
struct StoredProject {
    name: String,
    description: String,
    owner: UserId,
    needs_assignment: bool,
    users: BTreeSet<UserId>,
    sequence: u64,
}

#[derive(Debug, Clone)]
struct StoredTask {
    task: Task,
    position: i64,
    sequence: u64,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    projects: BTreeMap<ProjectId, StoredProject>,
    tasks: BTreeMap<TaskId, StoredTask>,
    sequence: u64,
}

impl MemoryState {
    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }

    fn sorted_tasks(&self, project_id: ProjectId) -> Vec<&StoredTask> {
        let mut tasks: Vec<&StoredTask> = self
            .tasks
            .values()
            .filter(|stored| stored.task.project_id == Some(project_id))
            .collect();
        tasks.sort_by_key(|stored| (stored.position, stored.sequence));
        tasks
    }

    fn project_view(&self, id: ProjectId) -> Option<Project> {
        let stored = self.projects.get(&id)?;
        Some(Project {
            id,
            name: stored.name.clone(),
            description: stored.description.clone(),
            task_ids: self
                .sorted_tasks(id)
                .into_iter()
                .map(|stored| stored.task.id)
                .collect(),
            users: stored.users.clone(),
            owner: stored.owner.clone(),
            needs_assignment: stored.needs_assignment,
            total_process_points: 0,
            done_process_points: 0,
        })
    }
}

/// Shared in-memory storage. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<MemoryState>>,
    fail_points: Arc<Mutex<HashSet<FailPoint>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later unit of work fail at `point`.
    pub fn fail_on(&self, point: FailPoint) -> RepoResult<()> {
        lock(&self.fail_points)?.insert(point);
        Ok(())
    }

    /// Removes all injected failures.
    pub fn clear_fail_points(&self) -> RepoResult<()> {
        lock(&self.fail_points)?.clear();
        Ok(())
    }

    /// Number of stored projects.
    pub fn project_count(&self) -> RepoResult<usize> {
        Ok(lock(&self.state)?.projects.len())
    }

    /// Number of stored tasks, bound or staged.
    pub fn task_count(&self) -> RepoResult<usize> {
        Ok(lock(&self.state)?.tasks.len())
    }
}

/// Open in-memory unit of work.
pub struct MemoryTx<'s> {
    guard: MutexGuard<'s, MemoryState>,
    working: RefCell<MemoryState>,
    fail_points: HashSet<FailPoint>,
}

impl MemoryTx<'_> {
    fn check(&self, point: FailPoint) -> RepoResult<()> {
        if self.fail_points.contains(&point) {
            return Err(RepoError::Unavailable(format!("injected failure at {point:?}")));
        }
        Ok(())
    }
}

impl Storage for MemoryStorage {
    type Tx<'s> = MemoryTx<'s> where Self: 's;

    fn begin(&self, _mode: TxMode) -> RepoResult<MemoryTx<'_>> {
        let guard = lock(&self.state)?;
        let fail_points = lock(&self.fail_points)?.clone();
        let working = RefCell::new(guard.clone());
        Ok(MemoryTx {
            guard,
            working,
            fail_points,
        })
    }
}

impl StorageTx for MemoryTx<'_> {
    fn commit(self) -> RepoResult<()> {
        self.check(FailPoint::Commit)?;
        let MemoryTx {
            mut guard, working, ..
        } = self;
        *guard = working.into_inner();
        Ok(())
    }
}

impl ProjectRepository for MemoryTx<'_> {
    fn list_projects_for_user(&self, user: &str) -> RepoResult<Vec<Project>> {
        let state = self.working.borrow();
        let mut matching: Vec<(&ProjectId, &StoredProject)> = state
            .projects
            .iter()
            .filter(|(_, stored)| stored.users.contains(user))
            .collect();
        matching.sort_by_key(|(_, stored)| stored.sequence);
        Ok(matching
            .into_iter()
            .filter_map(|(id, _)| state.project_view(*id))
            .collect())
    }

    fn get_project(&self, id: ProjectId) -> RepoResult<Option<Project>> {
        Ok(self.working.borrow().project_view(id))
    }

    fn get_project_by_task(&self, task_id: TaskId) -> RepoResult<Option<Project>> {
        let state = self.working.borrow();
        Ok(state
            .tasks
            .get(&task_id)
            .and_then(|stored| stored.task.project_id)
            .and_then(|project_id| state.project_view(project_id)))
    }

    fn are_tasks_used(&self, task_ids: &[TaskId]) -> RepoResult<bool> {
        let state = self.working.borrow();
        Ok(task_ids.iter().any(|id| {
            state
                .tasks
                .get(id)
                .is_some_and(|stored| stored.task.project_id.is_some())
        }))
    }

    fn insert_project(&self, draft: &ProjectDraft) -> RepoResult<Project> {
        self.check(FailPoint::InsertProject)?;
        let mut state = self.working.borrow_mut();
        let id = Uuid::new_v4();
        let sequence = state.next_sequence();

        let mut users: BTreeSet<UserId> = draft.users.iter().cloned().collect();
        users.insert(draft.owner.clone());
        state.projects.insert(
            id,
            StoredProject {
                name: draft.name.clone(),
                description: draft.description.clone(),
                owner: draft.owner.clone(),
                needs_assignment: draft.needs_assignment,
                users,
                sequence,
            },
        );

        for (position, task_id) in draft.task_ids.iter().enumerate() {
            let stored = state
                .tasks
                .get_mut(task_id)
                .filter(|stored| stored.task.project_id.is_none())
                .ok_or(RepoError::TaskNotFound(*task_id))?;
            stored.task.project_id = Some(id);
            stored.task.version += 1;
            stored.position = position as i64;
        }

        state.project_view(id).ok_or(RepoError::ProjectNotFound(id))
    }

    fn add_member(&self, id: ProjectId, user: &str) -> RepoResult<Project> {
        let mut state = self.working.borrow_mut();
        let stored = state
            .projects
            .get_mut(&id)
            .ok_or(RepoError::ProjectNotFound(id))?;
        stored.users.insert(user.to_string());
        state.project_view(id).ok_or(RepoError::ProjectNotFound(id))
    }

    fn remove_member(&self, id: ProjectId, user: &str) -> RepoResult<Project> {
        let mut state = self.working.borrow_mut();
        let stored = state
            .projects
            .get_mut(&id)
            .ok_or(RepoError::ProjectNotFound(id))?;
        stored.users.remove(user);
        state.project_view(id).ok_or(RepoError::ProjectNotFound(id))
    }

    fn delete_project(&self, id: ProjectId) -> RepoResult<()> {
        self.check(FailPoint::DeleteProject)?;
        let mut state = self.working.borrow_mut();
        if !state.projects.contains_key(&id) {
            return Err(RepoError::ProjectNotFound(id));
        }
        // Same guard as the tasks -> projects foreign key in SQLite.
        if state
            .tasks
            .values()
            .any(|stored| stored.task.project_id == Some(id))
        {
            return Err(RepoError::InvalidData(format!(
                "project {id} still has tasks"
            )));
        }
        state.projects.remove(&id);
        Ok(())
    }
}

impl TaskRepository for MemoryTx<'_> {
    fn list_tasks(&self, project_id: ProjectId) -> RepoResult<Vec<Task>> {
        Ok(self
            .working
            .borrow()
            .sorted_tasks(project_id)
            .into_iter()
            .map(|stored| stored.task.clone())
            .collect())
    }

    fn get_task(&self, id: TaskId) -> RepoResult<Option<Task>> {
        Ok(self
            .working
            .borrow()
            .tasks
            .get(&id)
            .map(|stored| stored.task.clone()))
    }

    fn missing_tasks(&self, ids: &[TaskId]) -> RepoResult<Vec<TaskId>> {
        let state = self.working.borrow();
        Ok(ids
            .iter()
            .filter(|id| !state.tasks.contains_key(*id))
            .copied()
            .collect())
    }

    fn insert_tasks(
        &self,
        drafts: &[TaskDraft],
        project_id: Option<ProjectId>,
    ) -> RepoResult<Vec<Task>> {
        self.check(FailPoint::InsertTasks)?;
        let mut state = self.working.borrow_mut();
        let next_position = state
            .tasks
            .values()
            .filter(|stored| stored.task.project_id == project_id)
            .map(|stored| stored.position + 1)
            .max()
            .unwrap_or(0);

        let mut created = Vec::with_capacity(drafts.len());
        for (offset, draft) in drafts.iter().enumerate() {
            let task = Task {
                id: Uuid::new_v4(),
                project_id,
                process_points: draft.process_points,
                max_process_points: draft.max_process_points,
                geometry: draft.geometry.clone(),
                assigned_user: None,
                version: 1,
            };
            let sequence = state.next_sequence();
            state.tasks.insert(
                task.id,
                StoredTask {
                    task: task.clone(),
                    position: next_position + offset as i64,
                    sequence,
                },
            );
            created.push(task);
        }
        Ok(created)
    }

    fn set_assigned_user(&self, id: TaskId, user: Option<&str>) -> RepoResult<Task> {
        let mut state = self.working.borrow_mut();
        let stored = state.tasks.get_mut(&id).ok_or(RepoError::TaskNotFound(id))?;
        stored.task.assigned_user = user.map(str::to_string);
        stored.task.version += 1;
        Ok(stored.task.clone())
    }

    fn set_process_points(&self, id: TaskId, points: i64) -> RepoResult<Task> {
        let mut state = self.working.borrow_mut();
        let stored = state.tasks.get_mut(&id).ok_or(RepoError::TaskNotFound(id))?;
        if points < 0 || points > stored.task.max_process_points {
            return Err(RepoError::InvalidData(format!(
                "process points {points} outside [0, {}] for task {id}",
                stored.task.max_process_points
            )));
        }
        stored.task.process_points = points;
        stored.task.version += 1;
        Ok(stored.task.clone())
    }

    fn delete_tasks(&self, ids: &[TaskId]) -> RepoResult<usize> {
        self.check(FailPoint::DeleteTasks)?;
        let mut state = self.working.borrow_mut();
        Ok(ids
            .iter()
            .filter(|id| state.tasks.remove(*id).is_some())
            .count())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> RepoResult<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| RepoError::Unavailable("memory storage lock poisoned".to_string()))
}
