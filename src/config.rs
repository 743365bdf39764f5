use std::time::Duration;

use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database: DatabaseConfig,
    pub pool: PoolConfig,
    pub timers: TimerConfig,
    pub refresh: RefreshConfig,
    pub retry: RetryPolicy,
    /// UIDs downloaded and committed per queue-drain step.
    pub download_batch: usize,
    /// How many of a folder's newest UIDs download at full speed during
    /// initial backfill; older non-inbox entries are throttled.
    pub backfill_window: usize,
    /// Identifier attached to liveness reports, one per running process.
    pub process_id: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Sessions per account for metadata and body fetches.
    pub read_sessions: usize,
    /// Sessions per account for flag and label writes.
    pub write_sessions: usize,
}

#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// Delay between poll passes on a folder with no pending changes.
    pub poll_interval: Duration,
    /// Shorter delay used for inbox-role folders.
    pub inbox_poll_interval: Duration,
    /// How long a single IDLE wait blocks before falling back to polling.
    pub idle_timeout: Duration,
    /// Cadence of the change-detector task during initial sync.
    pub change_poll_interval: Duration,
    /// Pause between drain batches once only throttled backfill remains.
    pub throttle_wait: Duration,
}

#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// UIDs re-checked for flag changes on every poll pass.
    pub fast_limit: u32,
    /// UIDs re-checked on the slow pass.
    pub slow_limit: u32,
    /// Minimum time between slow passes.
    pub slow_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
            },
            pool: PoolConfig {
                read_sessions: 6,
                write_sessions: 1,
            },
            timers: TimerConfig {
                poll_interval: Duration::from_secs(30),
                inbox_poll_interval: Duration::from_secs(10),
                idle_timeout: Duration::from_secs(30),
                change_poll_interval: Duration::from_secs(30),
                throttle_wait: Duration::from_secs(1),
            },
            refresh: RefreshConfig {
                fast_limit: 100,
                slow_limit: 2000,
                slow_interval: Duration::from_secs(3600),
            },
            retry: RetryPolicy::default(),
            download_batch: 20,
            backfill_window: 500,
            process_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        Ok(Self {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")?,
            },
            pool: PoolConfig {
                read_sessions: std::env::var("MAILSYNC_READ_SESSIONS")
                    .unwrap_or_else(|_| "6".to_string())
                    .parse()?,
                write_sessions: std::env::var("MAILSYNC_WRITE_SESSIONS")
                    .unwrap_or_else(|_| "1".to_string())
                    .parse()?,
            },
            timers: TimerConfig {
                poll_interval: Duration::from_secs(
                    std::env::var("MAILSYNC_POLL_INTERVAL_SECS")
                        .unwrap_or_else(|_| "30".to_string())
                        .parse()?,
                ),
                inbox_poll_interval: Duration::from_secs(
                    std::env::var("MAILSYNC_INBOX_POLL_INTERVAL_SECS")
                        .unwrap_or_else(|_| "10".to_string())
                        .parse()?,
                ),
                idle_timeout: Duration::from_secs(
                    std::env::var("MAILSYNC_IDLE_TIMEOUT_SECS")
                        .unwrap_or_else(|_| "30".to_string())
                        .parse()?,
                ),
                change_poll_interval: Duration::from_secs(
                    std::env::var("MAILSYNC_CHANGE_POLL_INTERVAL_SECS")
                        .unwrap_or_else(|_| "30".to_string())
                        .parse()?,
                ),
                throttle_wait: Duration::from_millis(
                    std::env::var("MAILSYNC_THROTTLE_WAIT_MS")
                        .unwrap_or_else(|_| "1000".to_string())
                        .parse()?,
                ),
            },
            refresh: RefreshConfig {
                fast_limit: std::env::var("MAILSYNC_FAST_REFRESH_LIMIT")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()?,
                slow_limit: std::env::var("MAILSYNC_SLOW_REFRESH_LIMIT")
                    .unwrap_or_else(|_| "2000".to_string())
                    .parse()?,
                slow_interval: Duration::from_secs(
                    std::env::var("MAILSYNC_SLOW_REFRESH_INTERVAL_SECS")
                        .unwrap_or_else(|_| "3600".to_string())
                        .parse()?,
                ),
            },
            retry: RetryPolicy {
                max_attempts: std::env::var("MAILSYNC_RETRY_MAX_ATTEMPTS")
                    .unwrap_or_else(|_| "5".to_string())
                    .parse()?,
                backoff: Duration::from_secs(
                    std::env::var("MAILSYNC_RETRY_BACKOFF_SECS")
                        .unwrap_or_else(|_| "30".to_string())
                        .parse()?,
                ),
                ..defaults.retry
            },
            download_batch: std::env::var("MAILSYNC_DOWNLOAD_BATCH")
                .unwrap_or_else(|_| "20".to_string())
                .parse()?,
            backfill_window: std::env::var("MAILSYNC_BACKFILL_WINDOW")
                .unwrap_or_else(|_| "500".to_string())
                .parse()?,
            process_id: std::env::var("MAILSYNC_PROCESS_ID").unwrap_or(defaults.process_id),
        })
    }
}
