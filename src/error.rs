use std::io;

/// Failure classes used by the retry wrapper and the connection pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport-level failure; the session that produced it is unusable.
    Connection,
    /// Server rejected or garbled a command on an otherwise live connection.
    Protocol,
    /// Credentials or account shape are wrong; retrying cannot help.
    Validation,
    /// The folder was deleted locally while its worker was running.
    FolderMissing,
    /// UIDVALIDITY moved forward; cached UIDs are meaningless.
    UidInvalid,
    /// Local database failure.
    Store,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("validation failed for {email}: {reason}")]
    Validation { email: String, reason: String },
    #[error("folder {0} is no longer tracked")]
    FolderMissing(String),
    #[error("uidvalidity changed on {folder}: cached {cached}, server {server}")]
    UidInvalid {
        folder: String,
        cached: u32,
        server: u32,
    },
    #[error("store error: {0}")]
    Store(String),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Connection(_) => ErrorKind::Connection,
            SyncError::Protocol(_) => ErrorKind::Protocol,
            SyncError::Validation { .. } => ErrorKind::Validation,
            SyncError::FolderMissing(_) => ErrorKind::FolderMissing,
            SyncError::UidInvalid { .. } => ErrorKind::UidInvalid,
            SyncError::Store(_) => ErrorKind::Store,
        }
    }

    /// Sessions that produced one of these cannot be trusted with further
    /// commands; the pool drops them instead of returning them to the idle
    /// list.
    pub fn taints_session(&self) -> bool {
        matches!(self.kind(), ErrorKind::Connection | ErrorKind::Protocol)
    }
}

impl From<async_imap::error::Error> for SyncError {
    fn from(err: async_imap::error::Error) -> Self {
        use async_imap::error::Error;
        match err {
            Error::Io(e) => SyncError::Connection(e.to_string()),
            Error::ConnectionLost => SyncError::Connection("connection lost".to_string()),
            other => SyncError::Protocol(other.to_string()),
        }
    }
}

impl From<io::Error> for SyncError {
    fn from(err: io::Error) -> Self {
        SyncError::Connection(err.to_string())
    }
}

impl From<async_native_tls::Error> for SyncError {
    fn from(err: async_native_tls::Error) -> Self {
        SyncError::Connection(err.to_string())
    }
}

impl From<sea_orm::DbErr> for SyncError {
    fn from(err: sea_orm::DbErr) -> Self {
        SyncError::Store(err.to_string())
    }
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        SyncError::Store(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_failures_taint_the_session() {
        let err = SyncError::from(io::Error::new(io::ErrorKind::BrokenPipe, "pipe"));
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.taints_session());
    }

    #[test]
    fn store_and_validation_failures_do_not() {
        let store = SyncError::Store("constraint".to_string());
        assert!(!store.taints_session());

        let validation = SyncError::Validation {
            email: "a@b.c".to_string(),
            reason: "bad credentials".to_string(),
        };
        assert_eq!(validation.kind(), ErrorKind::Validation);
        assert!(!validation.taints_session());
    }
}
