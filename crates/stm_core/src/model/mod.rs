//! Domain model for collaborative mapping projects.
//!
//! # Responsibility
//! - Define projects, tasks and user handles as plain data.
//! - Validate client drafts before they reach storage.
//!
//! # Invariants
//! - Identifiers are storage-assigned UUIDs and never reused.
//! - Progress aggregates are derived from tasks, never stored.

pub mod geometry;
pub mod project;
pub mod task;
pub mod user;
