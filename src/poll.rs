//! Fixed-interval polling with an optional deadline and cooperative cancellation
//!
//! Every wait in a curation (job result, import, provisioning, teardown,
//! upgrade) is a loop of "fetch, inspect, sleep". The check closure decides
//! whether the wait is over; any error it returns ends the wait immediately,
//! because a resource vanishing mid-run is structural, not transient.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::Error;

/// Interval and deadline for one poll loop
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollConfig {
    /// Pause between checks
    pub interval: Duration,
    /// Give up after this long; `None` waits forever
    pub timeout: Option<Duration>,
}

impl PollConfig {
    /// Create a poll config
    pub fn new(interval: Duration, timeout: Option<Duration>) -> Self {
        Self { interval, timeout }
    }

    /// Poll forever at the given interval
    pub fn unbounded(interval: Duration) -> Self {
        Self {
            interval,
            timeout: None,
        }
    }
}

/// Result of a single check
#[derive(Debug, PartialEq)]
pub enum PollStatus<T> {
    /// Not there yet, check again after the interval
    Pending,
    /// Terminal value
    Ready(T),
}

/// Poll `check` until it returns [`PollStatus::Ready`].
///
/// Returns [`Error::Timeout`] once the configured deadline passes and
/// [`Error::Cancelled`] when `cancel` fires, including mid-sleep.
pub async fn poll_until<T, F, Fut>(
    config: &PollConfig,
    cancel: &CancellationToken,
    what: &str,
    mut check: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<PollStatus<T>, Error>>,
{
    let start = Instant::now();

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled(what.to_string()));
        }

        if let PollStatus::Ready(value) = check().await? {
            return Ok(value);
        }

        if let Some(timeout) = config.timeout {
            if start.elapsed() >= timeout {
                return Err(Error::Timeout {
                    what: what.to_string(),
                    elapsed_secs: start.elapsed().as_secs(),
                });
            }
        }

        trace!(what = %what, "condition not met yet");

        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            _ = cancel.cancelled() => return Err(Error::Cancelled(what.to_string())),
        }
    }
}
