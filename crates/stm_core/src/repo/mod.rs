//! Persistence port and its storage backends.
//!
//! # Responsibility
//! - Define the data access contracts the managers depend on.
//! - Keep SQL and locking details out of permission and lifecycle logic.
//!
//! # Invariants
//! - Every manager operation runs inside exactly one `StorageTx`.
//! - Repository APIs return semantic errors (`ProjectNotFound`,
//!   `TaskNotFound`) in addition to transport errors.
//! - Storage generates every identifier; callers never pick ids.

pub mod memory_store;
pub mod project_repo;
pub mod sqlite_store;
pub mod store;
pub mod task_repo;
