pub mod client;
pub mod pool;

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::SyncError;

/// Snapshot of a folder as returned by SELECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectInfo {
    pub folder: String,
    pub uid_validity: u32,
    pub uid_next: Option<u32>,
    /// Populated when the server honors CONDSTORE; `None` means flag
    /// changes have to be discovered by re-fetching.
    pub highest_modseq: Option<u64>,
    pub exists: u32,
}

/// One LIST line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFolder {
    pub name: String,
    pub attrs: Vec<FolderAttr>,
}

impl RemoteFolder {
    pub fn selectable(&self) -> bool {
        !self.attrs.contains(&FolderAttr::NoSelect)
    }
}

/// SPECIAL-USE attributes carried on a LIST line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FolderAttr {
    NoSelect,
    All,
    Archive,
    Drafts,
    Flagged,
    Junk,
    Sent,
    Trash,
    Other(String),
}

/// System flags of one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageFlags {
    pub seen: bool,
    pub answered: bool,
    pub flagged: bool,
    pub deleted: bool,
    pub draft: bool,
    pub recent: bool,
}

/// Flag and label metadata for one UID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UidMeta {
    pub uid: u32,
    pub flags: MessageFlags,
    /// Gmail labels, `None` on servers without X-GM-LABELS.
    pub labels: Option<Vec<String>>,
    pub g_msgid: Option<u64>,
    pub g_thrid: Option<u64>,
    pub modseq: Option<u64>,
}

/// A fully downloaded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedUid {
    pub meta: UidMeta,
    pub raw: Vec<u8>,
    pub internal_date: Option<DateTime<Utc>>,
}

/// The engine's view of one IMAP session. A client is SELECT-scoped: every
/// search and fetch below applies to the folder most recently selected.
///
/// Implementations over a real connection live in [`client`]; tests script
/// an in-memory one.
#[async_trait]
pub trait MailClient: Send {
    async fn list_folders(&mut self) -> Result<Vec<RemoteFolder>, SyncError>;

    /// Selects `folder`, with CONDSTORE when available.
    async fn select(&mut self, folder: &str) -> Result<SelectInfo, SyncError>;

    /// Every UID currently present in the selected folder.
    async fn search_all_uids(&mut self) -> Result<BTreeSet<u32>, SyncError>;

    /// UIDs in the range `lo:*`. Servers answer with their highest UID even
    /// when `lo` is past it, so callers filter the result against their
    /// cursor.
    async fn search_uids_from(&mut self, lo: u32) -> Result<BTreeSet<u32>, SyncError>;

    /// UIDs of every message in the given Gmail thread, oldest first.
    async fn search_thread(&mut self, g_thrid: u64) -> Result<Vec<u32>, SyncError>;

    /// Flag/label metadata for the given UIDs.
    async fn fetch_metadata(&mut self, uids: &[u32]) -> Result<Vec<UidMeta>, SyncError>;

    /// Flag metadata for every UID in `lo:*`.
    async fn fetch_flags_since(&mut self, lo: u32) -> Result<Vec<UidMeta>, SyncError>;

    /// Metadata for everything whose MODSEQ is above `modseq`, in one
    /// CHANGEDSINCE fetch.
    async fn fetch_changed_since(&mut self, modseq: u64) -> Result<Vec<UidMeta>, SyncError>;

    /// Full bodies for the given UIDs. UIDs that vanished between search
    /// and fetch are silently absent from the result.
    async fn fetch_bodies(&mut self, uids: &[u32]) -> Result<Vec<FetchedUid>, SyncError>;

    /// Waits for the server to report activity in the selected folder.
    /// Returns `true` on activity, `false` when `timeout` elapsed first.
    async fn idle(&mut self, timeout: Duration) -> Result<bool, SyncError>;
}
