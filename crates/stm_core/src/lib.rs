//! Core domain logic for the shared task manager.
//! This crate is the single source of truth for membership, ownership,
//! assignment and progress invariants.

pub mod auth;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use auth::token::{Token, TokenError, TokenSigner};
pub use auth::IdentityProvider;
pub use config::{ConfigError, CoreConfig};
pub use db::{connect_db, open_db, open_db_in_memory, open_db_with, DbError, DbOptions};
pub use logging::{init_logging, logging_status, LogLevel, LoggingError};
pub use model::project::{Project, ProjectDraft, ProjectId, ProjectValidationError};
pub use model::task::{Assignment, Task, TaskDraft, TaskId, TaskValidationError};
pub use model::user::UserId;
pub use repo::memory_store::MemoryStorage;
pub use repo::sqlite_store::SqliteStorage;
pub use repo::store::{RepoError, RepoResult, Storage, StorageTx, TxMode};
pub use service::error::{Conflict, Denial, ErrorKind, Missing, ServiceError, ServiceResult};
pub use service::options::ServiceOptions;
pub use service::permission::{PermissionEngine, Verdict};
pub use service::project_service::ProjectService;
pub use service::task_service::TaskService;

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
