//! User handle model.
//!
//! Users are not stored as records of their own. A user is the verified
//! handle yielded by the identity provider, and it appears in project
//! membership sets, as a project owner, and as a task assignee.

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Verified user handle, e.g. an OSM display name.
pub type UserId = String;

/// Rejected user handle input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserIdError {
    /// Handle is empty after trim.
    Empty,
    /// Handle contains control characters.
    ControlCharacter,
}

impl Display for UserIdError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "user id must not be empty"),
            Self::ControlCharacter => write!(f, "user id must not contain control characters"),
        }
    }
}

impl Error for UserIdError {}

/// Trims one user handle and rejects empty or control-character values.
pub fn normalize_user_id(value: &str) -> Result<UserId, UserIdError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(UserIdError::Empty);
    }
    if trimmed.chars().any(char::is_control) {
        return Err(UserIdError::ControlCharacter);
    }
    Ok(trimmed.to_string())
}
