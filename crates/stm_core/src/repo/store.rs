//! Unit-of-work contract shared by every storage backend.
//!
//! # Responsibility
//! - Group one request's reads and writes into a single all-or-nothing tx.
//! - Define the repository error surfaced by every backend.
//!
//! # Invariants
//! - A tx that is dropped without `commit()` leaves storage untouched.
//! - A `TxMode::Write` tx holds the write lock from `begin` to the end, so
//!   a permission check and the mutation that follows it see one snapshot.

use crate::db::DbError;
use crate::model::project::ProjectId;
use crate::model::task::TaskId;
use crate::repo::project_repo::ProjectRepository;
use crate::repo::task_repo::TaskRepository;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RepoResult<T> = Result<T, RepoError>;

/// Persistence-port error.
#[derive(Debug)]
pub enum RepoError {
    /// Underlying SQLite/bootstrap failure.
    Db(DbError),
    /// Write targeted a project that does not exist.
    ProjectNotFound(ProjectId),
    /// Write targeted a task that does not exist.
    TaskNotFound(TaskId),
    /// Persisted row cannot be converted into a valid record.
    InvalidData(String),
    /// Backend cannot serve requests (poisoned lock, injected fault).
    Unavailable(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::ProjectNotFound(id) => write!(f, "project not found: {id}"),
            Self::TaskNotFound(id) => write!(f, "task not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Unavailable(message) => write!(f, "storage unavailable: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::ProjectNotFound(_) => None,
            Self::TaskNotFound(_) => None,
            Self::InvalidData(_) => None,
            Self::Unavailable(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Lock intent of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMode {
    /// Snapshot reads only.
    Read,
    /// Reads followed by writes; takes the write lock up front.
    Write,
}

/// Source of units of work.
pub trait Storage {
    type Tx<'s>: StorageTx
    where
        Self: 's;

    /// Starts one unit of work.
    fn begin(&self, mode: TxMode) -> RepoResult<Self::Tx<'_>>;
}

/// One open unit of work exposing the full persistence port.
pub trait StorageTx: ProjectRepository + TaskRepository {
    /// Makes every write of this unit durable.
    fn commit(self) -> RepoResult<()>;
}
