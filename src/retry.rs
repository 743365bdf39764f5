use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{ErrorKind, SyncError};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Consecutive failures tolerated before the operation is abandoned.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub backoff: Duration,
    /// Random extra delay added to each backoff, sampled per attempt.
    pub jitter_min: Duration,
    pub jitter_max: Duration,
    /// A failure this long after the previous one resets the attempt
    /// counter, so a long-running operation is not killed by occasional
    /// blips spread over hours.
    pub reset_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_secs(30),
            jitter_min: Duration::from_secs(1),
            jitter_max: Duration::from_secs(10),
            reset_after: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    fn delay(&self) -> Duration {
        let jitter_ms = rand::random_range(
            self.jitter_min.as_millis() as u64..=self.jitter_max.as_millis() as u64,
        );
        self.backoff + Duration::from_millis(jitter_ms)
    }
}

/// Which failure classes end the retry loop immediately instead of being
/// retried.
#[derive(Debug, Clone, Copy)]
pub struct Classification {
    pub fatal: &'static [ErrorKind],
}

impl Classification {
    pub fn is_fatal(&self, err: &SyncError) -> bool {
        self.fatal.contains(&err.kind())
    }
}

/// Classification used by sync workers: transport and server hiccups are
/// retried, everything that reflects broken local state is not.
pub const SYNC_FATAL: Classification = Classification {
    fatal: &[
        ErrorKind::Validation,
        ErrorKind::FolderMissing,
        ErrorKind::UidInvalid,
        ErrorKind::Store,
    ],
};

/// Runs `op` until it succeeds, a fatal error occurs, or `max_attempts`
/// consecutive failures accumulate. `on_retry` is called before each
/// backoff sleep with the error and the current failure count.
pub async fn with_retry<T, F, Fut, H>(
    policy: &RetryPolicy,
    classification: Classification,
    on_retry: H,
    mut op: F,
) -> Result<T, SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SyncError>>,
    H: Fn(&SyncError, u32),
{
    let mut failures: u32 = 0;
    let mut last_failure: Option<Instant> = None;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if classification.is_fatal(&err) {
                    return Err(err);
                }

                let now = Instant::now();
                if let Some(prev) = last_failure {
                    if now.duration_since(prev) >= policy.reset_after {
                        failures = 0;
                    }
                }
                last_failure = Some(now);
                failures += 1;

                if failures >= policy.max_attempts {
                    return Err(err);
                }

                on_retry(&err, failures);
                tokio::time::sleep(policy.delay()).await;
            }
        }
    }
}
