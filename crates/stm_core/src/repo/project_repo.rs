//! Project repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist project rows and membership sets.
//! - Bind staged tasks to a project at creation.
//!
//! # Invariants
//! - `insert_project` always stores the owner as a member.
//! - `task_ids` of a returned project are read from `tasks.project_id`, so
//!   deleting a task can never leave a dangling reference behind.
//! - Returned projects carry zeroed progress; aggregation is a service
//!   concern.

use crate::model::project::{Project, ProjectDraft, ProjectId};
use crate::model::task::TaskId;
use crate::repo::sqlite_store::{parse_uuid, SqliteTx};
use crate::repo::store::{RepoError, RepoResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Repository interface for project persistence.
pub trait ProjectRepository {
    /// Lists projects where `user` is a member, oldest first.
    fn list_projects_for_user(&self, user: &str) -> RepoResult<Vec<Project>>;
    /// Loads one project by id.
    fn get_project(&self, id: ProjectId) -> RepoResult<Option<Project>>;
    /// Loads the project a task is bound to.
    fn get_project_by_task(&self, task_id: TaskId) -> RepoResult<Option<Project>>;
    /// Returns whether any of `task_ids` is already bound to a project.
    fn are_tasks_used(&self, task_ids: &[TaskId]) -> RepoResult<bool>;
    /// Stores a validated draft, binds its tasks and returns the new project.
    fn insert_project(&self, draft: &ProjectDraft) -> RepoResult<Project>;
    /// Adds one member.
    fn add_member(&self, id: ProjectId, user: &str) -> RepoResult<Project>;
    /// Removes one member.
    fn remove_member(&self, id: ProjectId, user: &str) -> RepoResult<Project>;
    /// Deletes the project row and its membership rows.
    fn delete_project(&self, id: ProjectId) -> RepoResult<()>;
}

impl ProjectRepository for SqliteTx<'_> {
    fn list_projects_for_user(&self, user: &str) -> RepoResult<Vec<Project>> {
        let mut stmt = self.conn().prepare(
            "SELECT p.id
             FROM projects p
             INNER JOIN project_users pu ON pu.project_id = p.id
             WHERE pu.user_id = ?1
             ORDER BY p.created_at ASC, p.rowid ASC;",
        )?;
        let mut rows = stmt.query([user])?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next()? {
            let id_text: String = row.get(0)?;
            ids.push(parse_uuid(&id_text, "projects.id")?);
        }

        let mut projects = Vec::with_capacity(ids.len());
        for id in ids {
            let project = load_project(self.conn(), id)?.ok_or_else(|| {
                RepoError::InvalidData(format!("project {id} vanished during listing"))
            })?;
            projects.push(project);
        }
        Ok(projects)
    }

    fn get_project(&self, id: ProjectId) -> RepoResult<Option<Project>> {
        load_project(self.conn(), id)
    }

    fn get_project_by_task(&self, task_id: TaskId) -> RepoResult<Option<Project>> {
        let project_id: Option<Option<String>> = self
            .conn()
            .query_row(
                "SELECT project_id FROM tasks WHERE id = ?1;",
                [task_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        match project_id.flatten() {
            Some(id_text) => load_project(self.conn(), parse_uuid(&id_text, "tasks.project_id")?),
            None => Ok(None),
        }
    }

    fn are_tasks_used(&self, task_ids: &[TaskId]) -> RepoResult<bool> {
        let mut stmt = self.conn().prepare(
            "SELECT EXISTS(
                SELECT 1 FROM tasks WHERE id = ?1 AND project_id IS NOT NULL
            );",
        )?;
        for task_id in task_ids {
            let used: i64 = stmt.query_row([task_id.to_string()], |row| row.get(0))?;
            if used == 1 {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn insert_project(&self, draft: &ProjectDraft) -> RepoResult<Project> {
        let id = Uuid::new_v4();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO projects (id, name, description, owner, needs_assignment)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                id.to_string(),
                draft.name.as_str(),
                draft.description.as_str(),
                draft.owner.as_str(),
                draft.needs_assignment,
            ],
        )?;

        let members: BTreeSet<&str> = draft
            .users
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(draft.owner.as_str()))
            .collect();
        for user in members {
            conn.execute(
                "INSERT INTO project_users (project_id, user_id) VALUES (?1, ?2);",
                params![id.to_string(), user],
            )?;
        }

        for (position, task_id) in draft.task_ids.iter().enumerate() {
            let changed = conn.execute(
                "UPDATE tasks
                 SET project_id = ?1,
                     position = ?2,
                     version = version + 1
                 WHERE id = ?3
                   AND project_id IS NULL;",
                params![id.to_string(), position as i64, task_id.to_string()],
            )?;
            if changed == 0 {
                return Err(RepoError::TaskNotFound(*task_id));
            }
        }

        load_project(conn, id)?.ok_or(RepoError::ProjectNotFound(id))
    }

    fn add_member(&self, id: ProjectId, user: &str) -> RepoResult<Project> {
        ensure_project_exists(self.conn(), id)?;
        self.conn().execute(
            "INSERT OR IGNORE INTO project_users (project_id, user_id) VALUES (?1, ?2);",
            params![id.to_string(), user],
        )?;
        load_project(self.conn(), id)?.ok_or(RepoError::ProjectNotFound(id))
    }

    fn remove_member(&self, id: ProjectId, user: &str) -> RepoResult<Project> {
        ensure_project_exists(self.conn(), id)?;
        self.conn().execute(
            "DELETE FROM project_users WHERE project_id = ?1 AND user_id = ?2;",
            params![id.to_string(), user],
        )?;
        load_project(self.conn(), id)?.ok_or(RepoError::ProjectNotFound(id))
    }

    fn delete_project(&self, id: ProjectId) -> RepoResult<()> {
        let changed = self
            .conn()
            .execute("DELETE FROM projects WHERE id = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::ProjectNotFound(id));
        }
        Ok(())
    }
}

fn ensure_project_exists(conn: &Connection, id: ProjectId) -> RepoResult<()> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM projects WHERE id = ?1);",
        [id.to_string()],
        |row| row.get(0),
    )?;
    if exists == 1 {
        Ok(())
    } else {
        Err(RepoError::ProjectNotFound(id))
    }
}

fn load_project(conn: &Connection, id: ProjectId) -> RepoResult<Option<Project>> {
    let id_text = id.to_string();
    let row = conn
        .query_row(
            "SELECT name, description, owner, needs_assignment
             FROM projects
             WHERE id = ?1;",
            [id_text.as_str()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;

    let Some((name, description, owner, needs_assignment)) = row else {
        return Ok(None);
    };

    let needs_assignment = match needs_assignment {
        0 => false,
        1 => true,
        other => {
            return Err(RepoError::InvalidData(format!(
                "invalid needs_assignment value `{other}` in projects.needs_assignment"
            )));
        }
    };

    let mut users = BTreeSet::new();
    let mut stmt = conn.prepare("SELECT user_id FROM project_users WHERE project_id = ?1;")?;
    let mut rows = stmt.query([id_text.as_str()])?;
    while let Some(row) = rows.next()? {
        users.insert(row.get::<_, String>(0)?);
    }

    if !users.contains(owner.as_str()) {
        return Err(RepoError::InvalidData(format!(
            "owner of project {id} is missing from project_users"
        )));
    }

    let mut task_ids = Vec::new();
    let mut stmt = conn.prepare(
        "SELECT id FROM tasks WHERE project_id = ?1 ORDER BY position ASC, rowid ASC;",
    )?;
    let mut rows = stmt.query([id_text.as_str()])?;
    while let Some(row) = rows.next()? {
        let task_text: String = row.get(0)?;
        task_ids.push(parse_uuid(&task_text, "tasks.id")?);
    }

    Ok(Some(Project {
        id,
        name,
        description,
        task_ids,
        users,
        owner,
        needs_assignment,
        total_process_points: 0,
        done_process_points: 0,
    }))
}
