use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A point-in-time record that one folder worker is alive.
#[derive(Debug, Clone, PartialEq)]
pub struct Heartbeat {
    pub process_id: String,
    pub account_id: uuid::Uuid,
    pub folder: String,
    pub state: String,
    pub at: DateTime<Utc>,
}

/// Sink for worker heartbeats. Reporting is fire and forget: an
/// implementation that cannot deliver a beat logs and moves on, it never
/// fails the sync.
#[async_trait]
pub trait LivenessReporter: Send + Sync {
    async fn report(&self, beat: Heartbeat);
}

/// Default reporter, logs each beat at debug level.
#[derive(Debug, Default)]
pub struct LogReporter;

#[async_trait]
impl LivenessReporter for LogReporter {
    async fn report(&self, beat: Heartbeat) {
        tracing::debug!(
            account = %beat.account_id,
            folder = %beat.folder,
            state = %beat.state,
            "folder heartbeat"
        );
    }
}

/// Reporter that forwards beats to an unbounded channel, used by
/// supervisors that watch worker health out of process.
#[derive(Debug)]
pub struct ChannelReporter {
    tx: tokio::sync::mpsc::UnboundedSender<Heartbeat>,
}

impl ChannelReporter {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<Heartbeat>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl LivenessReporter for ChannelReporter {
    async fn report(&self, beat: Heartbeat) {
        if self.tx.send(beat).is_err() {
            tracing::debug!("heartbeat receiver dropped");
        }
    }
}
