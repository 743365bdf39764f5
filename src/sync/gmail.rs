use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::SyncError;
use crate::imap::{FolderAttr, MailClient, RemoteFolder, UidMeta};
use crate::store::entities::account;
use crate::store::FolderSpec;
use crate::sync::provider::{
    classify_by_attrs, classify_by_name, DrainContext, FolderPlan, FolderRole, Provider,
};
use crate::sync::queue::{DownloadQueue, QueueEntry};

/// Gmail dialect: folders are labels over one message store, All Mail is
/// the canonical source of bodies, and `X-GM-MSGID`/`X-GM-THRID` make
/// deduplication and thread expansion possible.
#[derive(Debug, Default)]
pub struct Gmail;

impl Gmail {
    pub fn new() -> Self {
        Self
    }
}

/// Roles that get a placeholder folder row when the label shows up on a
/// message but the account hides the matching folder from IMAP.
fn canonical_label_role(label: &str) -> Option<FolderRole> {
    match label {
        "\\Sent" => Some(FolderRole::Sent),
        "\\Draft" | "\\Drafts" => Some(FolderRole::Drafts),
        "\\Starred" => Some(FolderRole::Starred),
        "\\Important" => Some(FolderRole::Important),
        _ => None,
    }
}

#[async_trait]
impl Provider for Gmail {
    fn supports_condstore(&self) -> bool {
        true
    }

    fn supports_threading(&self) -> bool {
        true
    }

    fn classify_folder(&self, name: &str, attrs: &[FolderAttr]) -> Option<FolderRole> {
        classify_by_attrs(attrs).or_else(|| classify_by_name(name))
    }

    /// Every selectable label becomes a local folder; dedicated workers
    /// run only for inbox, All Mail, trash and spam. The rest are alias
    /// views over messages All Mail already carries.
    fn plan_folders(
        &self,
        account: &account::Model,
        remote: &[RemoteFolder],
    ) -> Result<FolderPlan, SyncError> {
        let mut specs = Vec::new();
        let mut by_role: Vec<(Option<FolderRole>, String)> = Vec::new();
        for listed in remote {
            if !listed.selectable() {
                continue;
            }
            let role = self.classify_folder(&listed.name, &listed.attrs);
            specs.push(FolderSpec {
                name: listed.name.clone(),
                role: role.map(|r| r.as_str().to_string()),
            });
            by_role.push((role, listed.name.clone()));
        }

        let find = |wanted: FolderRole| {
            by_role
                .iter()
                .find(|(role, _)| *role == Some(wanted))
                .map(|(_, name)| name.clone())
        };

        let inbox = find(FolderRole::Inbox).ok_or_else(|| SyncError::Validation {
            email: account.email.clone(),
            reason: "remote folder list has no inbox".to_string(),
        })?;
        let all_mail = find(FolderRole::All).ok_or_else(|| SyncError::Validation {
            email: account.email.clone(),
            reason: "account does not expose All Mail over IMAP".to_string(),
        })?;

        let mut sync_order = vec![inbox, all_mail];
        sync_order.extend(find(FolderRole::Trash));
        sync_order.extend(find(FolderRole::Spam));
        Ok(FolderPlan { specs, sync_order })
    }

    async fn queue_entries(
        &self,
        client: &mut dyn MailClient,
        uids: &[u32],
    ) -> Result<Vec<QueueEntry>, SyncError> {
        let metas = client.fetch_metadata(uids).await?;
        Ok(metas.iter().map(QueueEntry::from_meta).collect())
    }

    /// Drains one entry. An already-known provider message id turns into a
    /// UID record without a body fetch; in All Mail a new message pulls its
    /// whole thread, oldest first, so threads never sit half-downloaded.
    async fn drain_next(
        &self,
        drain: &DrainContext<'_>,
        client: &mut dyn MailClient,
        queue: &DownloadQueue,
    ) -> Result<usize, SyncError> {
        let Some(entry) = queue.pop() else {
            return Ok(0);
        };

        // Queue entries carry listing-time metadata; refetch so the linked
        // record lands with current flags and labels.
        if let Some(g_msgid) = entry.g_msgid {
            let existing = drain
                .store
                .message_by_gmsgid(drain.account.id, g_msgid)
                .await?;
            if let Some(message) = existing {
                let metas = client.fetch_metadata(&[entry.uid]).await?;
                let Some(meta) = metas.into_iter().find(|m| m.uid == entry.uid) else {
                    // Expunged since it was listed.
                    return Ok(0);
                };
                {
                    let _guard = drain.write_lock.lock().await;
                    drain
                        .store
                        .link_uid(drain.account.id, drain.folder.id, &meta, message.id)
                        .await?;
                }
                self.reconcile_metadata(drain, std::slice::from_ref(&meta))
                    .await?;
                tracing::debug!(
                    folder = %drain.folder.name,
                    uid = entry.uid,
                    g_msgid,
                    "Linked uid to an already-downloaded message"
                );
                return Ok(1);
            }
        }

        let canonical = drain.folder.canonical_role.as_deref() == Some(FolderRole::All.as_str());
        let uids: Vec<u32> = match entry.g_thrid {
            Some(g_thrid) if canonical && self.supports_threading() => {
                queue.remove_thread(g_thrid);
                client.search_thread(g_thrid).await?
            }
            _ => vec![entry.uid],
        };

        let mut written = 0usize;
        let mut seen_metas: Vec<UidMeta> = Vec::new();
        for chunk in uids.chunks(drain.batch.max(1)) {
            let fetched = client.fetch_bodies(chunk).await?;
            if fetched.is_empty() {
                continue;
            }
            let _guard = drain.write_lock.lock().await;
            let outcomes = drain
                .store
                .store_fetched_batch(drain.account, drain.folder, &fetched)
                .await?;
            written += outcomes.len();
            seen_metas.extend(fetched.into_iter().map(|f| f.meta));
        }
        self.reconcile_metadata(drain, &seen_metas).await?;
        Ok(written)
    }

    /// Rebuilds thread label unions for every thread the metas touch and
    /// makes sure canonical labels exist as folder rows.
    async fn reconcile_metadata(
        &self,
        drain: &DrainContext<'_>,
        metas: &[UidMeta],
    ) -> Result<(), SyncError> {
        if metas.is_empty() {
            return Ok(());
        }

        let mut canonical_labels: BTreeSet<&str> = BTreeSet::new();
        let mut thrids: BTreeSet<u64> = BTreeSet::new();
        for meta in metas {
            if let Some(labels) = meta.labels.as_deref() {
                for label in labels {
                    if canonical_label_role(label).is_some() {
                        canonical_labels.insert(label);
                    }
                }
            }
            if let Some(g_thrid) = meta.g_thrid {
                thrids.insert(g_thrid);
            }
        }

        let _guard = drain.write_lock.lock().await;
        for label in canonical_labels {
            let role = match canonical_label_role(label) {
                Some(role) => role,
                None => continue,
            };
            if drain
                .store
                .folder_by_role(drain.account.id, role.as_str())
                .await?
                .is_none()
            {
                let name = label.trim_start_matches('\\');
                drain
                    .store
                    .ensure_folder(drain.account.id, name, Some(role.as_str()))
                    .await?;
                tracing::debug!(account = %drain.account.id, label, "Created placeholder folder for label");
            }
        }
        for g_thrid in thrids {
            drain
                .store
                .recompute_thread_labels(drain.account.id, g_thrid)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_labels_map_to_roles() {
        assert_eq!(canonical_label_role("\\Sent"), Some(FolderRole::Sent));
        assert_eq!(canonical_label_role("\\Draft"), Some(FolderRole::Drafts));
        assert_eq!(canonical_label_role("\\Starred"), Some(FolderRole::Starred));
        assert_eq!(
            canonical_label_role("\\Important"),
            Some(FolderRole::Important)
        );
        assert_eq!(canonical_label_role("\\Inbox"), None);
        assert_eq!(canonical_label_role("Receipts"), None);
    }

    fn gmail_account() -> account::Model {
        account::Model {
            id: uuid::Uuid::new_v4(),
            email: "user@gmail.com".to_string(),
            provider: "gmail".to_string(),
            imap_host: "imap.gmail.com".to_string(),
            imap_port: 993,
            password_encrypted: "secret".to_string(),
            sync_state: "running".to_string(),
            read_pool_size: None,
            write_pool_size: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn worker_order_is_inbox_then_all_mail() {
        let account = gmail_account();
        let remote = vec![
            RemoteFolder {
                name: "Receipts".to_string(),
                attrs: vec![],
            },
            RemoteFolder {
                name: "[Gmail]/All Mail".to_string(),
                attrs: vec![FolderAttr::All],
            },
            RemoteFolder {
                name: "[Gmail]/Trash".to_string(),
                attrs: vec![FolderAttr::Trash],
            },
            RemoteFolder {
                name: "INBOX".to_string(),
                attrs: vec![],
            },
            RemoteFolder {
                name: "[Gmail]".to_string(),
                attrs: vec![FolderAttr::NoSelect],
            },
        ];

        let plan = Gmail::new().plan_folders(&account, &remote).unwrap();
        assert_eq!(
            plan.sync_order,
            vec!["INBOX", "[Gmail]/All Mail", "[Gmail]/Trash"]
        );
        // The [Gmail] container is not selectable and gets no local row.
        assert_eq!(plan.specs.len(), 4);
        assert!(plan
            .specs
            .iter()
            .any(|spec| spec.name == "Receipts" && spec.role.is_none()));
    }

    #[test]
    fn missing_all_mail_is_a_validation_failure() {
        let account = gmail_account();
        let remote = vec![RemoteFolder {
            name: "INBOX".to_string(),
            attrs: vec![],
        }];

        let err = Gmail::new().plan_folders(&account, &remote).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }
}
