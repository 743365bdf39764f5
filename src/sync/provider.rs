use async_trait::async_trait;

use crate::error::SyncError;
use crate::imap::{FolderAttr, MailClient, RemoteFolder, UidMeta};
use crate::store::entities::{account, folder};
use crate::store::{FolderSpec, Store};
use crate::sync::queue::{DownloadQueue, QueueEntry};

/// Canonical folder roles shared by all providers. Stored on the folder
/// row as a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderRole {
    Inbox,
    Sent,
    Drafts,
    Trash,
    Spam,
    Archive,
    Starred,
    Important,
    All,
}

impl FolderRole {
    pub fn as_str(self) -> &'static str {
        match self {
            FolderRole::Inbox => "inbox",
            FolderRole::Sent => "sent",
            FolderRole::Drafts => "drafts",
            FolderRole::Trash => "trash",
            FolderRole::Spam => "spam",
            FolderRole::Archive => "archive",
            FolderRole::Starred => "starred",
            FolderRole::Important => "important",
            FolderRole::All => "all",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inbox" => Some(FolderRole::Inbox),
            "sent" => Some(FolderRole::Sent),
            "drafts" => Some(FolderRole::Drafts),
            "trash" => Some(FolderRole::Trash),
            "spam" => Some(FolderRole::Spam),
            "archive" => Some(FolderRole::Archive),
            "starred" => Some(FolderRole::Starred),
            "important" => Some(FolderRole::Important),
            "all" => Some(FolderRole::All),
            _ => None,
        }
    }
}

/// Role from LIST special-use attributes. Authoritative when present.
pub fn classify_by_attrs(attrs: &[FolderAttr]) -> Option<FolderRole> {
    for attr in attrs {
        let role = match attr {
            FolderAttr::All => Some(FolderRole::All),
            FolderAttr::Archive => Some(FolderRole::Archive),
            FolderAttr::Drafts => Some(FolderRole::Drafts),
            FolderAttr::Flagged => Some(FolderRole::Starred),
            FolderAttr::Junk => Some(FolderRole::Spam),
            FolderAttr::Sent => Some(FolderRole::Sent),
            FolderAttr::Trash => Some(FolderRole::Trash),
            FolderAttr::Other(name) if name == "\\Important" => Some(FolderRole::Important),
            _ => None,
        };
        if role.is_some() {
            return role;
        }
    }
    None
}

/// Fallback role from the folder name. Covers servers that don't send
/// special-use attributes, matching a few common localizations.
pub fn classify_by_name(name: &str) -> Option<FolderRole> {
    let lowered = name.to_lowercase();
    let lowered = lowered
        .strip_prefix("[gmail]/")
        .or_else(|| lowered.strip_prefix("[google mail]/"))
        .unwrap_or(&lowered);
    match lowered {
        "inbox" => Some(FolderRole::Inbox),
        "sent" | "sent items" | "sent messages" | "sent mail" | "gesendet" | "enviados"
        | "posta inviata" => Some(FolderRole::Sent),
        "drafts" | "draft" | "entwürfe" | "brouillons" | "borradores" => Some(FolderRole::Drafts),
        "trash" | "bin" | "deleted items" | "deleted messages" | "papierkorb" | "corbeille"
        | "papelera" => Some(FolderRole::Trash),
        "spam" | "junk" | "junk mail" | "bulk mail" => Some(FolderRole::Spam),
        "archive" | "archives" | "archiv" => Some(FolderRole::Archive),
        "all mail" => Some(FolderRole::All),
        "starred" => Some(FolderRole::Starred),
        "important" => Some(FolderRole::Important),
        _ => None,
    }
}

/// What to create locally and which folders get their own sync worker,
/// inbox first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderPlan {
    pub specs: Vec<FolderSpec>,
    pub sync_order: Vec<String>,
}

/// Everything a drain step needs besides the session.
pub struct DrainContext<'a> {
    pub store: &'a Store,
    pub write_lock: &'a tokio::sync::Mutex<()>,
    pub account: &'a account::Model,
    pub folder: &'a folder::Model,
    pub batch: usize,
}

/// Provider-specific sync behavior. One strategy object per account,
/// composed into the folder engines.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Whether the engine should run changed-since polling when the server
    /// advertises CONDSTORE.
    fn supports_condstore(&self) -> bool;

    /// Whether draining the canonical folder expands whole threads.
    fn supports_threading(&self) -> bool;

    /// Canonical role for a listed folder, attributes first.
    fn classify_folder(&self, name: &str, attrs: &[FolderAttr]) -> Option<FolderRole>;

    /// Turns the remote LIST into local folder specs and the worker order.
    fn plan_folders(
        &self,
        account: &account::Model,
        remote: &[RemoteFolder],
    ) -> Result<FolderPlan, SyncError>;

    /// Builds queue entries for newly discovered UIDs, fetching per-UID
    /// metadata where the protocol has any.
    async fn queue_entries(
        &self,
        client: &mut dyn MailClient,
        uids: &[u32],
    ) -> Result<Vec<QueueEntry>, SyncError>;

    /// Downloads and persists the next chunk of the queue. Returns how
    /// many UID records were written; 0 means the queue was empty.
    async fn drain_next(
        &self,
        drain: &DrainContext<'_>,
        client: &mut dyn MailClient,
        queue: &DownloadQueue,
    ) -> Result<usize, SyncError>;

    /// Called after refreshed metadata was applied, with the metas that
    /// were seen. Gmail rebuilds thread labels here; generic IMAP has
    /// nothing to do.
    async fn reconcile_metadata(
        &self,
        drain: &DrainContext<'_>,
        metas: &[UidMeta],
    ) -> Result<(), SyncError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attributes_beat_names() {
        let attrs = vec![FolderAttr::Trash];
        assert_eq!(classify_by_attrs(&attrs), Some(FolderRole::Trash));
        assert_eq!(classify_by_attrs(&[]), None);
        assert_eq!(
            classify_by_attrs(&[FolderAttr::Other("\\Important".to_string())]),
            Some(FolderRole::Important)
        );
    }

    #[test]
    fn localized_names_map_to_roles() {
        assert_eq!(classify_by_name("INBOX"), Some(FolderRole::Inbox));
        assert_eq!(classify_by_name("Sent Items"), Some(FolderRole::Sent));
        assert_eq!(classify_by_name("Papierkorb"), Some(FolderRole::Trash));
        assert_eq!(classify_by_name("[Gmail]/All Mail"), Some(FolderRole::All));
        assert_eq!(classify_by_name("[Gmail]/Spam"), Some(FolderRole::Spam));
        assert_eq!(classify_by_name("Receipts"), None);
    }

    #[test]
    fn role_strings_round_trip() {
        for role in [
            FolderRole::Inbox,
            FolderRole::Sent,
            FolderRole::Drafts,
            FolderRole::Trash,
            FolderRole::Spam,
            FolderRole::Archive,
            FolderRole::Starred,
            FolderRole::Important,
            FolderRole::All,
        ] {
            assert_eq!(FolderRole::parse(role.as_str()), Some(role));
        }
    }
}
