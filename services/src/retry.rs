use std::fmt::Display;
use std::future::Future;

use db::store_error::{ClassifyError, UniqueColumn};
use tracing::warn;
use util::config::AppConfig;

use crate::error::ServiceError;

/// Bounded retry for operations that may hit a unique violation on a column
/// whose values are generated randomly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
}

#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt collided.
    Exhausted { attempts: u32 },
    /// An attempt failed for any other reason.
    Failed(E),
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 5 }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Result<Self, ServiceError> {
        if max_attempts == 0 {
            return Err(ServiceError::BadRequest(
                "Retry policy needs at least one attempt".into(),
            ));
        }
        Ok(Self { max_attempts })
    }

    pub fn from_config() -> Result<Self, ServiceError> {
        Self::new(AppConfig::global().key_retry_max_attempts)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Runs `attempt` (given the 1-based attempt number) until it succeeds,
    /// fails with anything other than a unique violation on `column`, or the
    /// attempt budget runs out.
    pub async fn run<T, E, F, Fut>(
        &self,
        column: UniqueColumn,
        mut attempt: F,
    ) -> Result<T, RetryError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyError + Display,
    {
        for n in 1..=self.max_attempts {
            match attempt(n).await {
                Ok(value) => return Ok(value),
                Err(err) if err.classify().is_unique_violation_on(column) => {
                    warn!(
                        attempt = n,
                        max_attempts = self.max_attempts,
                        table = column.table,
                        column = column.column,
                        "Unique collision, retrying with a new value"
                    );
                }
                Err(err) => return Err(RetryError::Failed(err)),
            }
        }

        warn!(
            attempts = self.max_attempts,
            table = column.table,
            column = column.column,
            "Retry budget exhausted"
        );
        Err(RetryError::Exhausted {
            attempts: self.max_attempts,
        })
    }
}
