//! Manager tuning and unit-of-work completion.

use crate::model::project::DEFAULT_MAX_DESCRIPTION_LENGTH;
use crate::repo::store::StorageTx;
use crate::service::error::{ServiceError, ServiceResult};
use std::time::{Duration, Instant};

/// Limits shared by the project and task managers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceOptions {
    /// Maximum project description length, in characters.
    pub max_description_length: usize,
    /// Upper bound on one operation, measured from begin to commit.
    pub operation_timeout: Option<Duration>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            max_description_length: DEFAULT_MAX_DESCRIPTION_LENGTH,
            operation_timeout: None,
        }
    }
}

/// Start time of one operation against its optional timeout.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    started_at: Instant,
    timeout: Option<Duration>,
}

impl Deadline {
    pub(crate) fn start(options: &ServiceOptions) -> Self {
        Self {
            started_at: Instant::now(),
            timeout: options.operation_timeout,
        }
    }

    pub(crate) fn check(&self) -> ServiceResult<()> {
        match self.timeout {
            Some(timeout) if self.started_at.elapsed() >= timeout => {
                Err(ServiceError::DeadlineExceeded { timeout })
            }
            _ => Ok(()),
        }
    }

    /// Commits `tx` unless the deadline has passed; a late unit of work is
    /// dropped and therefore rolled back.
    pub(crate) fn commit<T: StorageTx>(&self, tx: T) -> ServiceResult<()> {
        self.check()?;
        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Deadline, ServiceOptions};
    use crate::service::error::ServiceError;
    use std::time::Duration;

    #[test]
    fn no_timeout_never_expires() {
        let deadline = Deadline::start(&ServiceOptions::default());
        assert!(deadline.check().is_ok());
    }

    #[test]
    fn zero_timeout_is_always_expired() {
        let deadline = Deadline::start(&ServiceOptions {
            operation_timeout: Some(Duration::ZERO),
            ..ServiceOptions::default()
        });
        assert!(matches!(
            deadline.check(),
            Err(ServiceError::DeadlineExceeded { .. })
        ));
    }
}
