use crate::error::SyncError;
use crate::imap::MailClient;
use crate::sync::provider::{DrainContext, Provider};
use crate::sync::queue::{DownloadQueue, QueueEntry};

/// Result of one changed-since pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondstorePoll {
    /// HIGHESTMODSEQ did not advance; the caller may IDLE or sleep.
    Unchanged,
    Applied {
        downloaded: usize,
        updated: u64,
        removed: u64,
    },
}

/// Incremental sync against a CONDSTORE server: one changed-since query
/// partitioned into new and updated UIDs, plus a full listing for
/// deletions (expunges never show up in changed-since results).
///
/// The caller persists the new cursor only after this returns Ok, so a
/// crash mid-pass re-derives everything from the old cursor.
pub async fn poll_changes(
    drain: &DrainContext<'_>,
    provider: &dyn Provider,
    client: &mut dyn MailClient,
    selected_modseq: u64,
    cached_modseq: u64,
) -> Result<CondstorePoll, SyncError> {
    let store = drain.store;
    let account_id = drain.account.id;
    let folder_id = drain.folder.id;

    if selected_modseq < cached_modseq {
        // Server-side regression. The cursor never rewinds; a real change
        // will push the value past it again.
        tracing::warn!(
            folder = %drain.folder.name,
            cached = cached_modseq,
            selected = selected_modseq,
            "Server reported a HIGHESTMODSEQ below our cursor; ignoring"
        );
        return Ok(CondstorePoll::Unchanged);
    }
    if selected_modseq == cached_modseq {
        return Ok(CondstorePoll::Unchanged);
    }

    let metas = client.fetch_changed_since(cached_modseq).await?;
    let local = store.local_uids(account_id, folder_id).await?;

    let mut fresh_entries: Vec<QueueEntry> = Vec::new();
    let mut updated_metas = Vec::new();
    for meta in metas {
        if local.contains(&meta.uid) {
            updated_metas.push(meta);
        } else {
            fresh_entries.push(QueueEntry::from_meta(&meta));
        }
    }

    let mut downloaded = 0usize;
    if !fresh_entries.is_empty() {
        let queue = DownloadQueue::new();
        queue.push(fresh_entries);
        loop {
            downloaded += provider.drain_next(drain, client, &queue).await?;
            if queue.is_empty() {
                break;
            }
        }
    }

    let updated = {
        let _guard = drain.write_lock.lock().await;
        store
            .apply_flag_updates(account_id, folder_id, &updated_metas)
            .await?
    };
    provider.reconcile_metadata(drain, &updated_metas).await?;

    let remote = client.search_all_uids().await?;
    let local_now = store.local_uids(account_id, folder_id).await?;
    let vanished: Vec<u32> = local_now.difference(&remote).copied().collect();
    let removed = {
        let _guard = drain.write_lock.lock().await;
        store
            .remove_vanished_uids(account_id, folder_id, &vanished)
            .await?
    };

    tracing::debug!(
        folder = %drain.folder.name,
        downloaded,
        updated,
        removed,
        modseq = selected_modseq,
        "Applied changed-since results"
    );
    Ok(CondstorePoll::Applied {
        downloaded,
        updated,
        removed,
    })
}
