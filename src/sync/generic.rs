use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::Utc;

use crate::config::RefreshConfig;
use crate::error::SyncError;
use crate::imap::{FolderAttr, MailClient, RemoteFolder, SelectInfo, UidMeta};
use crate::store::entities::{account, folder_imap_info};
use crate::store::FolderSpec;
use crate::sync::provider::{
    classify_by_attrs, classify_by_name, DrainContext, FolderPlan, FolderRole, Provider,
};
use crate::sync::queue::{DownloadQueue, QueueEntry};

/// Plain RFC 3501 behavior: every selectable folder is synced on its own
/// and bodies are fetched straight off the queue.
#[derive(Debug, Default)]
pub struct GenericImap;

impl GenericImap {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Provider for GenericImap {
    fn supports_condstore(&self) -> bool {
        // Used whenever the server advertises it; the select result is the
        // actual gate.
        true
    }

    fn supports_threading(&self) -> bool {
        false
    }

    fn classify_folder(&self, name: &str, attrs: &[FolderAttr]) -> Option<FolderRole> {
        classify_by_attrs(attrs).or_else(|| classify_by_name(name))
    }

    fn plan_folders(
        &self,
        account: &account::Model,
        remote: &[RemoteFolder],
    ) -> Result<FolderPlan, SyncError> {
        let mut specs = Vec::new();
        let mut named_roles = Vec::new();
        for listed in remote {
            if !listed.selectable() {
                continue;
            }
            let role = self.classify_folder(&listed.name, &listed.attrs);
            specs.push(FolderSpec {
                name: listed.name.clone(),
                role: role.map(|r| r.as_str().to_string()),
            });
            named_roles.push((listed.name.clone(), role));
        }

        if !named_roles
            .iter()
            .any(|(_, role)| *role == Some(FolderRole::Inbox))
        {
            return Err(SyncError::Validation {
                email: account.email.clone(),
                reason: "remote folder list has no inbox".to_string(),
            });
        }

        named_roles.sort_by_key(|(name, role)| (*role != Some(FolderRole::Inbox), name.clone()));
        Ok(FolderPlan {
            specs,
            sync_order: named_roles.into_iter().map(|(name, _)| name).collect(),
        })
    }

    async fn queue_entries(
        &self,
        _client: &mut dyn MailClient,
        uids: &[u32],
    ) -> Result<Vec<QueueEntry>, SyncError> {
        Ok(uids.iter().copied().map(QueueEntry::bare).collect())
    }

    async fn drain_next(
        &self,
        drain: &DrainContext<'_>,
        client: &mut dyn MailClient,
        queue: &DownloadQueue,
    ) -> Result<usize, SyncError> {
        let batch = queue.pop_batch(drain.batch);
        if batch.is_empty() {
            return Ok(0);
        }

        let uids: Vec<u32> = batch.iter().map(|e| e.uid).collect();
        let fetched = client.fetch_bodies(&uids).await?;
        if fetched.is_empty() {
            // Everything in the batch was expunged between listing and
            // fetch; the next deletion pass cleans up.
            return Ok(0);
        }

        let _guard = drain.write_lock.lock().await;
        let outcomes = drain
            .store
            .store_fetched_batch(drain.account, drain.folder, &fetched)
            .await?;
        Ok(outcomes.len())
    }

    async fn reconcile_metadata(
        &self,
        _drain: &DrainContext<'_>,
        _metas: &[UidMeta],
    ) -> Result<(), SyncError> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GenericPollOutcome {
    pub downloaded: usize,
    pub updated: u64,
    pub removed: u64,
}

/// One poll pass without CONDSTORE: UIDNEXT fast path for new mail, then
/// a bounded flag-refresh window that doubles as deletion detection.
pub async fn poll_generic(
    drain: &DrainContext<'_>,
    provider: &dyn Provider,
    client: &mut dyn MailClient,
    select: &SelectInfo,
    info: &folder_imap_info::Model,
    refresh: &RefreshConfig,
) -> Result<GenericPollOutcome, SyncError> {
    let store = drain.store;
    let account_id = drain.account.id;
    let folder_id = drain.folder.id;
    let mut outcome = GenericPollOutcome::default();

    // Nothing was appended if UIDNEXT did not move; skip the search.
    let uidnext_unchanged = match (info.uidnext, select.uid_next) {
        (Some(cached), Some(selected)) => cached == i64::from(selected),
        _ => false,
    };
    if !uidnext_unchanged {
        let max_uid = store.max_uid(account_id, folder_id).await?;
        let from = max_uid.map(|uid| uid.saturating_add(1)).unwrap_or(1);
        let found = client.search_uids_from(from).await?;
        // Servers answer a range beyond the last UID with the highest
        // existing UID, so filter instead of trusting the range.
        let fresh: Vec<u32> = found
            .into_iter()
            .filter(|&uid| max_uid.map_or(true, |max| uid > max))
            .collect();
        if !fresh.is_empty() {
            let entries = provider.queue_entries(client, &fresh).await?;
            let queue = DownloadQueue::new();
            queue.push(entries);
            loop {
                outcome.downloaded += provider.drain_next(drain, client, &queue).await?;
                if queue.is_empty() {
                    break;
                }
            }
        }
    }

    // Dual refresh windows: small on every pass, large on the slow cadence.
    let now = Utc::now();
    let slow_due = match info.last_slow_refresh {
        None => true,
        Some(at) => now
            .signed_duration_since(at)
            .to_std()
            .map_or(true, |elapsed| elapsed >= refresh.slow_interval),
    };
    let limit = if slow_due {
        refresh.slow_limit
    } else {
        refresh.fast_limit
    };

    let window = store.recent_uids(account_id, folder_id, u64::from(limit)).await?;
    if let Some(&lowest) = window.last() {
        let metas = client.fetch_flags_since(lowest).await?;
        let remote_in_window: BTreeSet<u32> = metas.iter().map(|m| m.uid).collect();
        let vanished: Vec<u32> = window
            .iter()
            .copied()
            .filter(|uid| !remote_in_window.contains(uid))
            .collect();
        {
            let _guard = drain.write_lock.lock().await;
            outcome.updated = store.apply_flag_updates(account_id, folder_id, &metas).await?;
            outcome.removed = store
                .remove_vanished_uids(account_id, folder_id, &vanished)
                .await?;
        }
        provider.reconcile_metadata(drain, &metas).await?;
    }
    if slow_due {
        store.mark_slow_refresh(folder_id, now).await?;
    }
    Ok(outcome)
}
