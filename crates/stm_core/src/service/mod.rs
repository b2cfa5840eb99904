//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate permission checks and repository calls into one unit of
//!   work per operation.
//! - Keep the request boundary decoupled from storage details.

pub mod error;
pub mod options;
pub mod permission;
pub mod project_service;
pub mod task_service;
