//! Continuous IMAP mailbox synchronization into a local SeaORM store.
//!
//! [`sync::run_account`] reconciles an account's remote folder list, then
//! runs one [`sync::FolderSyncEngine`] per folder, each driving a persisted
//! state machine (initial backfill, incremental poll, UIDVALIDITY recovery)
//! against sessions borrowed from a per-account connection pool. Gmail
//! accounts additionally deduplicate bodies across label folders and expand
//! whole threads through All Mail.
//!
//! This crate is a library: an embedding supervisor builds a
//! [`sync::SyncContext`] per account and awaits [`sync::run_account`],
//! cancelling the context's shutdown token to stop.

pub mod config;
pub mod error;
pub mod imap;
pub mod liveness;
pub mod migration;
pub mod retry;
pub mod store;
pub mod sync;

pub use config::SyncConfig;
pub use error::{ErrorKind, SyncError};
pub use store::Store;
pub use sync::{run_account, FolderSyncEngine, SyncContext, SyncState};
