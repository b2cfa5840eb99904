//! SQLite-backed persistence port.
//!
//! # Responsibility
//! - Open units of work on a migrated connection.
//! - Share row parsing between the project and task repositories.
//!
//! # Invariants
//! - Write units start with `BEGIN IMMEDIATE`; a second writer on another
//!   connection blocks (up to the busy timeout) until the first commits or
//!   rolls back, so "first committer wins" holds for check-then-act flows.
//! - Dropping a `SqliteTx` without commit rolls it back.

use crate::model::task::Task;
use crate::repo::store::{RepoError, RepoResult, Storage, StorageTx, TxMode};
use rusqlite::{Connection, Row, Transaction, TransactionBehavior};
use uuid::Uuid;

pub(crate) const TASK_SELECT_SQL: &str = "SELECT
    id,
    project_id,
    process_points,
    max_process_points,
    geometry,
    assigned_user,
    version
FROM tasks";

/// Production storage over one SQLite connection.
///
/// Each worker thread owns its own connection; the database file is the
/// only state shared between requests.
#[derive(Clone, Copy)]
pub struct SqliteStorage<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteStorage<'conn> {
    /// Wraps a connection returned by `open_db*`.
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

/// Open SQLite unit of work.
pub struct SqliteTx<'conn> {
    tx: Transaction<'conn>,
}

impl SqliteTx<'_> {
    pub(crate) fn conn(&self) -> &Connection {
        &self.tx
    }
}

impl<'conn> Storage for SqliteStorage<'conn> {
    type Tx<'s> = SqliteTx<'s> where Self: 's;

    fn begin(&self, mode: TxMode) -> RepoResult<SqliteTx<'_>> {
        let behavior = match mode {
            TxMode::Read => TransactionBehavior::Deferred,
            TxMode::Write => TransactionBehavior::Immediate,
        };
        let tx = Transaction::new_unchecked(self.conn, behavior)?;
        Ok(SqliteTx { tx })
    }
}

impl StorageTx for SqliteTx<'_> {
    fn commit(self) -> RepoResult<()> {
        self.tx.commit()?;
        Ok(())
    }
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

pub(crate) fn parse_task_row(row: &Row<'_>) -> RepoResult<Task> {
    let id_text: String = row.get("id")?;
    let project_id = match row.get::<_, Option<String>>("project_id")? {
        Some(value) => Some(parse_uuid(&value, "tasks.project_id")?),
        None => None,
    };

    let task = Task {
        id: parse_uuid(&id_text, "tasks.id")?,
        project_id,
        process_points: row.get("process_points")?,
        max_process_points: row.get("max_process_points")?,
        geometry: row.get("geometry")?,
        assigned_user: row.get("assigned_user")?,
        version: row.get("version")?,
    };

    if task.process_points < 0 || task.process_points > task.max_process_points {
        return Err(RepoError::InvalidData(format!(
            "task {} has process points {} outside [0, {}]",
            task.id, task.process_points, task.max_process_points
        )));
    }
    Ok(task)
}
