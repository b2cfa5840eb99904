//! Task repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist task rows, assignment and progress.
//!
//! # Invariants
//! - Every mutation bumps `version` by one.
//! - Table CHECK constraints reject out-of-range process points even if a
//!   caller skipped validation.
//! - Listing order is deterministic: `position ASC`, then insertion order.

use crate::model::project::ProjectId;
use crate::model::task::{Task, TaskDraft, TaskId};
use crate::repo::sqlite_store::{parse_task_row, SqliteTx, TASK_SELECT_SQL};
use crate::repo::store::{RepoError, RepoResult};
use rusqlite::{params, Connection};
use uuid::Uuid;

/// Repository interface for task persistence.
pub trait TaskRepository {
    /// Lists the tasks bound to one project.
    fn list_tasks(&self, project_id: ProjectId) -> RepoResult<Vec<Task>>;
    /// Loads one task by id.
    fn get_task(&self, id: TaskId) -> RepoResult<Option<Task>>;
    /// Returns the ids from `ids` that have no task row.
    fn missing_tasks(&self, ids: &[TaskId]) -> RepoResult<Vec<TaskId>>;
    /// Stores validated drafts, optionally bound to a project, in order.
    fn insert_tasks(
        &self,
        drafts: &[TaskDraft],
        project_id: Option<ProjectId>,
    ) -> RepoResult<Vec<Task>>;
    /// Sets or clears the assignee.
    fn set_assigned_user(&self, id: TaskId, user: Option<&str>) -> RepoResult<Task>;
    /// Overwrites the process points.
    fn set_process_points(&self, id: TaskId, points: i64) -> RepoResult<Task>;
    /// Deletes tasks by id and returns how many rows were removed.
    fn delete_tasks(&self, ids: &[TaskId]) -> RepoResult<usize>;
}

impl TaskRepository for SqliteTx<'_> {
    fn list_tasks(&self, project_id: ProjectId) -> RepoResult<Vec<Task>> {
        let mut stmt = self.conn().prepare(&format!(
            "{TASK_SELECT_SQL}
             WHERE project_id = ?1
             ORDER BY position ASC, rowid ASC;"
        ))?;
        let mut rows = stmt.query([project_id.to_string()])?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next()? {
            tasks.push(parse_task_row(row)?);
        }
        Ok(tasks)
    }

    fn get_task(&self, id: TaskId) -> RepoResult<Option<Task>> {
        load_task(self.conn(), id)
    }

    fn missing_tasks(&self, ids: &[TaskId]) -> RepoResult<Vec<TaskId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT EXISTS(SELECT 1 FROM tasks WHERE id = ?1);")?;
        let mut missing = Vec::new();
        for id in ids {
            let exists: i64 = stmt.query_row([id.to_string()], |row| row.get(0))?;
            if exists == 0 {
                missing.push(*id);
            }
        }
        Ok(missing)
    }

    fn insert_tasks(
        &self,
        drafts: &[TaskDraft],
        project_id: Option<ProjectId>,
    ) -> RepoResult<Vec<Task>> {
        let conn = self.conn();
        let project_text = project_id.map(|id| id.to_string());
        let next_position: i64 = conn.query_row(
            "SELECT COALESCE(MAX(position) + 1, 0) FROM tasks WHERE project_id IS ?1;",
            [project_text.as_deref()],
            |row| row.get(0),
        )?;

        let mut created = Vec::with_capacity(drafts.len());
        for (offset, draft) in drafts.iter().enumerate() {
            let id = Uuid::new_v4();
            conn.execute(
                "INSERT INTO tasks (
                    id,
                    project_id,
                    position,
                    process_points,
                    max_process_points,
                    geometry,
                    assigned_user
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL);",
                params![
                    id.to_string(),
                    project_text.as_deref(),
                    next_position + offset as i64,
                    draft.process_points,
                    draft.max_process_points,
                    draft.geometry.as_str(),
                ],
            )?;
            created.push(load_task(conn, id)?.ok_or(RepoError::TaskNotFound(id))?);
        }
        Ok(created)
    }

    fn set_assigned_user(&self, id: TaskId, user: Option<&str>) -> RepoResult<Task> {
        let changed = self.conn().execute(
            "UPDATE tasks
             SET assigned_user = ?2,
                 version = version + 1
             WHERE id = ?1;",
            params![id.to_string(), user],
        )?;
        if changed == 0 {
            return Err(RepoError::TaskNotFound(id));
        }
        load_task(self.conn(), id)?.ok_or(RepoError::TaskNotFound(id))
    }

    fn set_process_points(&self, id: TaskId, points: i64) -> RepoResult<Task> {
        let changed = self.conn().execute(
            "UPDATE tasks
             SET process_points = ?2,
                 version = version + 1
             WHERE id = ?1;",
            params![id.to_string(), points],
        )?;
        if changed == 0 {
            return Err(RepoError::TaskNotFound(id));
        }
        load_task(self.conn(), id)?.ok_or(RepoError::TaskNotFound(id))
    }

    fn delete_tasks(&self, ids: &[TaskId]) -> RepoResult<usize> {
        let mut stmt = self.conn().prepare("DELETE FROM tasks WHERE id = ?1;")?;
        let mut removed = 0;
        for id in ids {
            removed += stmt.execute([id.to_string()])?;
        }
        Ok(removed)
    }
}

fn load_task(conn: &Connection, id: TaskId) -> RepoResult<Option<Task>> {
    let mut stmt = conn.prepare(&format!("{TASK_SELECT_SQL} WHERE id = ?1;"))?;
    let mut rows = stmt.query([id.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_task_row(row)?));
    }
    Ok(None)
}
