//! Request authentication.
//!
//! # Responsibility
//! - Turn a presented bearer credential into a verified user identifier.
//!
//! # Invariants
//! - Managers only ever receive identifiers that passed an
//!   `IdentityProvider`.

pub mod token;

use crate::model::user::UserId;
use std::time::{SystemTime, UNIX_EPOCH};
use token::{TokenError, TokenSigner};

/// Resolves a request credential to a verified user.
pub trait IdentityProvider {
    /// `credential` is the raw `Authorization` value, if any.
    fn authenticate(&self, credential: Option<&str>) -> Result<UserId, TokenError>;
}

impl IdentityProvider for TokenSigner {
    fn authenticate(&self, credential: Option<&str>) -> Result<UserId, TokenError> {
        let credential = credential.ok_or(TokenError::MissingCredential)?;
        self.verify(credential, unix_now())
    }
}

/// Current time as unix seconds; clocks before the epoch read as 0.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
