//! Bounded retry for optimistic-concurrency conflicts.
//!
//! Status updates read the curator, merge a change and write it back with the
//! resourceVersion they read. When another writer got there first the API
//! server answers 409 and the whole read-modify-write is attempted again, a
//! fixed number of times with a fixed pause.
//!
//! # Example
//!
//! ```ignore
//! use curator::retry::{retry_on_conflict, RetryConfig};
//!
//! let curator = retry_on_conflict(&RetryConfig::default(), "record_condition", || async move {
//!     let mut cc = client.get_curator(ns, name).await?;
//!     cc.set_condition(condition.clone());
//!     client.replace_curator_status(&cc).await
//! })
//! .await?;
//! ```

use std::time::Duration;

use tracing::{error, warn};

use crate::Error;

/// Configuration for conflict retries
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(200),
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.max(1),
            ..Default::default()
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-conflict error, or
/// `max_attempts` conflicts have been seen.
///
/// Only [`Error::Conflict`] is retried. Everything else, `NotFound` in
/// particular, is returned on first sight.
pub async fn retry_on_conflict<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_conflict() => {
                if attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "conflict retries exhausted"
                    );
                    return Err(e);
                }

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    "update conflicted, refetching"
                );
                tokio::time::sleep(config.delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
