use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, SyncError};
use crate::imap::pool::PoolIntent;
use crate::imap::MailClient;
use crate::store::entities::{account, folder};
use crate::sync::queue::DownloadQueue;
use crate::sync::SyncContext;

/// Companion task for the initial sync of large folders: re-lists the
/// folder on a cadence and merges newly appeared UIDs into the shared
/// queue, so mail that arrives during a long backfill is not stuck behind
/// it. Queued UIDs that vanish remotely are pruned; deleting their local
/// records stays with the owning worker.
pub struct ChangeDetector {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ChangeDetector {
    pub fn spawn(
        ctx: Arc<SyncContext>,
        account: account::Model,
        folder: folder::Model,
        queue: Arc<DownloadQueue>,
    ) -> Self {
        let token = ctx.shutdown.child_token();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            detect_loop(ctx, account, folder, queue, loop_token).await;
        });
        Self { token, handle }
    }

    pub async fn stop(self) {
        self.token.cancel();
        if let Err(err) = self.handle.await {
            if !err.is_cancelled() {
                tracing::warn!("Change detector task failed: {}", err);
            }
        }
    }
}

async fn detect_loop(
    ctx: Arc<SyncContext>,
    account: account::Model,
    folder: folder::Model,
    queue: Arc<DownloadQueue>,
    token: CancellationToken,
) {
    let interval = ctx.config.timers.change_poll_interval;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        match scan_once(&ctx, &account, &folder, &queue).await {
            Ok((added, pruned)) => {
                if added > 0 || pruned > 0 {
                    tracing::debug!(
                        folder = %folder.name,
                        added,
                        pruned,
                        "Change detector adjusted the download queue"
                    );
                }
            }
            Err(err) if err.kind() == ErrorKind::UidInvalid => {
                // The owning worker will notice on its next operation and
                // run recovery; scanning against the new numbering would
                // only feed it garbage.
                tracing::debug!(folder = %folder.name, "UIDVALIDITY moved; change detector stopping");
                break;
            }
            Err(err) => {
                tracing::warn!(folder = %folder.name, "Change detection pass failed: {}", err);
            }
        }
    }
}

async fn scan_once(
    ctx: &SyncContext,
    account: &account::Model,
    folder: &folder::Model,
    queue: &DownloadQueue,
) -> Result<(usize, usize), SyncError> {
    let pool = ctx.session_pool(account, PoolIntent::Read);
    let mut session = pool.checkout().await?;

    let select = session.select(&folder.name).await?;
    if let Some(info) = ctx.store.imap_info(folder.id).await? {
        if info.uidvalidity != i64::from(select.uid_validity) {
            return Err(SyncError::UidInvalid {
                folder: folder.name.clone(),
                cached: info.uidvalidity as u32,
                server: select.uid_validity,
            });
        }
    }

    let remote = session.search_all_uids().await?;
    let pruned = queue.retain_known(&remote);

    let local = ctx.store.local_uids(ctx.account_id, folder.id).await?;
    let queued = queue.uids();
    let fresh: Vec<u32> = remote
        .iter()
        .copied()
        .filter(|uid| !local.contains(uid) && !queued.contains(uid))
        .collect();
    let added = if fresh.is_empty() {
        0
    } else {
        let entries = ctx.provider.queue_entries(&mut session, &fresh).await?;
        queue.push(entries)
    };
    Ok((added, pruned))
}
