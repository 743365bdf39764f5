pub mod change;
pub mod condstore;
pub mod folders;
pub mod generic;
pub mod gmail;
pub mod provider;
pub mod queue;
pub mod state;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::{ErrorKind, SyncError};
use crate::imap::pool::{ConnectionPool, PoolIntent, PoolManager, SessionFactory};
use crate::imap::MailClient;
use crate::liveness::{Heartbeat, LivenessReporter};
use crate::retry::{with_retry, SYNC_FATAL};
use crate::store::entities::{account, folder};
use crate::store::Store;

use change::ChangeDetector;
use condstore::CondstorePoll;
use generic::GenericImap;
use gmail::Gmail;
use provider::{DrainContext, FolderRole, Provider};
use queue::DownloadQueue;
pub use state::SyncState;

/// Everything one account's workers share. Constructed once by the
/// supervisor and passed around in an `Arc`.
pub struct SyncContext {
    pub account_id: Uuid,
    pub store: Store,
    pub pools: Arc<PoolManager>,
    pub factory: Arc<dyn SessionFactory>,
    pub provider: Arc<dyn Provider>,
    pub liveness: Arc<dyn LivenessReporter>,
    pub config: SyncConfig,
    /// Serializes message/thread/uid writes across this account's workers.
    /// Held around local writes only, never across network calls.
    pub write_lock: tokio::sync::Mutex<()>,
    pub shutdown: CancellationToken,
}

impl SyncContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account_id: Uuid,
        store: Store,
        pools: Arc<PoolManager>,
        factory: Arc<dyn SessionFactory>,
        provider: Arc<dyn Provider>,
        liveness: Arc<dyn LivenessReporter>,
        config: SyncConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            account_id,
            store,
            pools,
            factory,
            provider,
            liveness,
            config,
            write_lock: tokio::sync::Mutex::new(()),
            shutdown: CancellationToken::new(),
        })
    }

    /// Session pool for this account and intent, honoring the account
    /// row's size override.
    pub fn session_pool(
        &self,
        account: &account::Model,
        intent: PoolIntent,
    ) -> Arc<ConnectionPool> {
        let size = match intent {
            PoolIntent::Read => account.read_pool_size,
            PoolIntent::Write => account.write_pool_size,
        };
        self.pools.pool(
            account.id,
            intent,
            size.map(|n| n.max(1) as usize),
            &self.factory,
        )
    }
}

/// Strategy object for an account row's provider kind.
pub fn provider_for(account: &account::Model) -> Arc<dyn Provider> {
    match account.provider.as_str() {
        "gmail" => Arc::new(Gmail::new()),
        _ => Arc::new(GenericImap::new()),
    }
}

/// Runs one account end to end: reconcile the folder list, then one
/// worker task per folder in the plan. Returns when every worker has
/// stopped; the first worker failure is re-raised after the rest wind
/// down.
pub async fn run_account(ctx: Arc<SyncContext>) -> Result<(), SyncError> {
    let account = ctx.store.account(ctx.account_id).await?;
    ctx.store
        .set_account_sync_state(account.id, "running")
        .await?;
    tracing::info!(
        account = %account.email,
        provider = %account.provider,
        "Account sync starting"
    );

    let plan = match folders::reconcile_account_folders(&ctx, &account).await {
        Ok(plan) => plan,
        Err(err) => {
            if err.kind() == ErrorKind::Validation {
                ctx.store
                    .set_account_sync_state(account.id, "invalid")
                    .await?;
            }
            return Err(err);
        }
    };

    let known = ctx.store.folders(account.id).await?;
    let mut workers = tokio::task::JoinSet::new();
    for name in &plan.sync_order {
        let Some(folder) = known.iter().find(|f| &f.name == name) else {
            continue;
        };
        let engine = FolderSyncEngine::new(ctx.clone(), folder.clone());
        workers.spawn(async move { engine.run().await });
    }

    let mut first_error: Option<SyncError> = None;
    while let Some(joined) = workers.join_next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(join_err) => {
                tracing::error!(account = %account.email, "Folder worker panicked: {}", join_err);
                ctx.shutdown.cancel();
                if first_error.is_none() {
                    first_error = Some(SyncError::Store(format!(
                        "folder worker panicked: {join_err}"
                    )));
                }
                continue;
            }
        };
        if let Err(err) = outcome {
            tracing::error!(account = %account.email, "Folder worker failed: {}", err);
            // A validation failure poisons the whole account; stop the
            // siblings instead of letting them hit the same wall.
            if err.kind() == ErrorKind::Validation {
                ctx.shutdown.cancel();
            }
            if first_error.is_none() {
                first_error = Some(err);
            }
        }
    }

    match first_error {
        Some(err) => Err(err),
        None => {
            ctx.store
                .set_account_sync_state(account.id, "stopped")
                .await?;
            tracing::info!(account = %account.email, "Account sync stopped");
            Ok(())
        }
    }
}

/// One folder's sync worker: loads the persisted state and runs the state
/// machine until finished, cancelled, or dead.
pub struct FolderSyncEngine {
    ctx: Arc<SyncContext>,
    folder: folder::Model,
}

impl FolderSyncEngine {
    pub fn new(ctx: Arc<SyncContext>, folder: folder::Model) -> Self {
        Self { ctx, folder }
    }

    pub async fn run(&self) -> Result<(), SyncError> {
        let account = self.ctx.store.account(self.ctx.account_id).await?;
        let mut state = self.load_state().await?;
        tracing::info!(
            account = %account.email,
            folder = %self.folder.name,
            state = %state,
            "Folder sync worker starting"
        );

        loop {
            if self.ctx.shutdown.is_cancelled() {
                tracing::info!(folder = %self.folder.name, "Folder sync worker stopping");
                return Ok(());
            }
            if self.ctx.store.folder(self.folder.id).await?.is_none() {
                // Deleted locally; the cascade already removed our status
                // row, so there is nothing left to persist.
                tracing::info!(folder = %self.folder.name, "Folder deleted locally; finishing");
                return Ok(());
            }

            self.persist_state(state).await?;
            self.report(state).await;
            if state.is_terminal() {
                tracing::info!(folder = %self.folder.name, "Folder sync finished");
                return Ok(());
            }

            let step = match state {
                SyncState::Initial => {
                    with_retry(
                        &self.ctx.config.retry,
                        SYNC_FATAL,
                        |err, failures| {
                            tracing::warn!(
                                folder = %self.folder.name,
                                failures,
                                "Initial sync failed, retrying: {}",
                                err
                            );
                        },
                        || self.initial_sync(&account),
                    )
                    .await
                }
                SyncState::Poll => {
                    with_retry(
                        &self.ctx.config.retry,
                        SYNC_FATAL,
                        |err, failures| {
                            tracing::warn!(
                                folder = %self.folder.name,
                                failures,
                                "Poll failed, retrying: {}",
                                err
                            );
                        },
                        || self.poll_cycle(&account),
                    )
                    .await
                }
                SyncState::InitialUidInvalid | SyncState::PollUidInvalid => {
                    with_retry(
                        &self.ctx.config.retry,
                        SYNC_FATAL,
                        |err, failures| {
                            tracing::warn!(
                                folder = %self.folder.name,
                                failures,
                                "UID recovery failed, retrying: {}",
                                err
                            );
                        },
                        || self.resync_uids(&account),
                    )
                    .await
                }
                SyncState::Finish => Ok(SyncState::Finish),
            };

            state = match step {
                Ok(next) => next,
                Err(err) => match err.kind() {
                    ErrorKind::UidInvalid => {
                        tracing::warn!(folder = %self.folder.name, "{}", err);
                        state.invalidated()
                    }
                    ErrorKind::FolderMissing => {
                        tracing::warn!(folder = %self.folder.name, "Remote folder is gone: {}", err);
                        SyncState::Finish
                    }
                    ErrorKind::Validation => {
                        self.ctx
                            .store
                            .set_account_sync_state(self.ctx.account_id, "invalid")
                            .await?;
                        return Err(err);
                    }
                    ErrorKind::Connection | ErrorKind::Protocol => {
                        // Retries are exhausted at this point; leave a
                        // trace for whoever reads the status table.
                        if let Err(report_err) = self
                            .ctx
                            .store
                            .update_metrics(
                                self.folder.id,
                                serde_json::json!({ "killed_at": Utc::now() }),
                            )
                            .await
                        {
                            tracing::warn!(
                                folder = %self.folder.name,
                                "Failed to record worker death: {:#}",
                                report_err
                            );
                        }
                        return Err(err);
                    }
                    ErrorKind::Store => return Err(err),
                },
            };
        }
    }

    /// First pass over a folder: mirror the full remote UID listing,
    /// downloading everything unknown while a change detector keeps the
    /// queue in step with a moving mailbox.
    async fn initial_sync(&self, account: &account::Model) -> Result<SyncState, SyncError> {
        let pool = self.ctx.session_pool(account, PoolIntent::Read);
        let mut session = pool.checkout().await?;

        let select = session.select(&self.folder.name).await?;
        if let Some(info) = self.ctx.store.imap_info(self.folder.id).await? {
            if info.uidvalidity != i64::from(select.uid_validity) {
                return Err(SyncError::UidInvalid {
                    folder: self.folder.name.clone(),
                    cached: info.uidvalidity as u32,
                    server: select.uid_validity,
                });
            }
        }
        // Cursor row exists from here on. The select-time HIGHESTMODSEQ is
        // recorded now so the first poll also covers changes made while
        // this pass runs.
        self.ctx
            .store
            .save_cursors(
                self.folder.id,
                select.uid_validity,
                select.uid_next,
                select.highest_modseq,
            )
            .await?;

        let remote = session.search_all_uids().await?;
        let local = self
            .ctx
            .store
            .local_uids(account.id, self.folder.id)
            .await?;

        let vanished: Vec<u32> = local.difference(&remote).copied().collect();
        if !vanished.is_empty() {
            let _guard = self.ctx.write_lock.lock().await;
            self.ctx
                .store
                .remove_vanished_uids(account.id, self.folder.id, &vanished)
                .await?;
        }

        let fresh: Vec<u32> = remote.difference(&local).copied().collect();
        let queue = Arc::new(DownloadQueue::new());
        if !fresh.is_empty() {
            let mut entries = self.ctx.provider.queue_entries(&mut session, &fresh).await?;
            // Everything older than the newest window backfills throttled,
            // leaving bandwidth for inbox-flagged and newly arrived mail.
            entries.sort_by(|a, b| b.uid.cmp(&a.uid));
            for entry in entries.iter_mut().skip(self.ctx.config.backfill_window) {
                if !entry.inbox {
                    entry.throttled = true;
                }
            }
            queue.push(entries);
        }
        self.ctx
            .store
            .update_metrics(
                self.folder.id,
                serde_json::json!({
                    "remote_uid_count": remote.len(),
                    "download_uid_count": queue.len(),
                    "uid_checked_timestamp": Utc::now(),
                }),
            )
            .await?;
        tracing::info!(
            folder = %self.folder.name,
            remote = remote.len(),
            pending = queue.len(),
            removed = vanished.len(),
            "Initial listing complete"
        );

        let detector = ChangeDetector::spawn(
            self.ctx.clone(),
            account.clone(),
            self.folder.clone(),
            queue.clone(),
        );
        let drained = self
            .drain_queue(account, &mut session, &queue, remote.len())
            .await;
        detector.stop().await;
        drained?;

        if self.ctx.shutdown.is_cancelled() {
            // Progress is committed per batch; resume from initial later.
            return Ok(SyncState::Initial);
        }
        Ok(SyncState::Poll)
    }

    async fn drain_queue(
        &self,
        account: &account::Model,
        session: &mut dyn MailClient,
        queue: &DownloadQueue,
        remote_total: usize,
    ) -> Result<(), SyncError> {
        let drain = self.drain_context(account);
        loop {
            if self.ctx.shutdown.is_cancelled() {
                return Ok(());
            }
            let written = self
                .ctx
                .provider
                .drain_next(&drain, session, queue)
                .await?;
            let pending = queue.len();
            self.ctx
                .store
                .update_metrics(
                    self.folder.id,
                    serde_json::json!({
                        "download_uid_count": pending,
                        "queue_checked_at": Utc::now(),
                        "percent": drain_percent(remote_total, pending),
                    }),
                )
                .await?;
            if written > 0 {
                self.report(SyncState::Initial).await;
            }
            if pending == 0 {
                return Ok(());
            }
            if queue.next_is_throttled() {
                tokio::select! {
                    _ = tokio::time::sleep(self.ctx.config.timers.throttle_wait) => {}
                    _ = self.ctx.shutdown.cancelled() => {}
                }
            }
        }
    }

    /// One incremental pass: changed-since when both sides have a
    /// HIGHESTMODSEQ cursor, the UIDNEXT/refresh-window fallback
    /// otherwise. Ends with IDLE or a sleep, so callers can loop tightly.
    async fn poll_cycle(&self, account: &account::Model) -> Result<SyncState, SyncError> {
        let pool = self.ctx.session_pool(account, PoolIntent::Read);
        let mut session = pool.checkout().await?;

        let select = session.select(&self.folder.name).await?;
        let Some(info) = self.ctx.store.imap_info(self.folder.id).await? else {
            tracing::warn!(folder = %self.folder.name, "Poll without cursors; restarting initial sync");
            return Ok(SyncState::Initial);
        };
        if info.uidvalidity != i64::from(select.uid_validity) {
            return Err(SyncError::UidInvalid {
                folder: self.folder.name.clone(),
                cached: info.uidvalidity as u32,
                server: select.uid_validity,
            });
        }

        let interactive = self.role() == Some(FolderRole::Inbox);
        let condstore_pair = if self.ctx.provider.supports_condstore() {
            select
                .highest_modseq
                .zip(info.highestmodseq.map(|m| m as u64))
        } else {
            None
        };

        let mut waited_in_idle = false;
        match condstore_pair {
            Some((selected_modseq, cached_modseq)) => {
                let drain = self.drain_context(account);
                let outcome = condstore::poll_changes(
                    &drain,
                    self.ctx.provider.as_ref(),
                    &mut session,
                    selected_modseq,
                    cached_modseq,
                )
                .await?;
                match outcome {
                    CondstorePoll::Unchanged => {
                        if interactive {
                            // Block for new mail instead of busy-polling
                            // the inbox.
                            session.idle(self.ctx.config.timers.idle_timeout).await?;
                            waited_in_idle = true;
                        }
                    }
                    CondstorePoll::Applied {
                        downloaded,
                        updated,
                        removed,
                    } => {
                        self.ctx
                            .store
                            .save_cursors(
                                self.folder.id,
                                select.uid_validity,
                                select.uid_next,
                                select.highest_modseq,
                            )
                            .await?;
                        self.ctx
                            .store
                            .update_metrics(
                                self.folder.id,
                                serde_json::json!({
                                    "download_uid_count": downloaded,
                                    "update_uid_count": updated,
                                    "delete_uid_count": removed,
                                    "uid_checked_timestamp": Utc::now(),
                                }),
                            )
                            .await?;
                    }
                }
            }
            None => {
                let drain = self.drain_context(account);
                let outcome = generic::poll_generic(
                    &drain,
                    self.ctx.provider.as_ref(),
                    &mut session,
                    &select,
                    &info,
                    &self.ctx.config.refresh,
                )
                .await?;
                self.ctx
                    .store
                    .save_cursors(
                        self.folder.id,
                        select.uid_validity,
                        select.uid_next,
                        select.highest_modseq,
                    )
                    .await?;
                self.ctx
                    .store
                    .update_metrics(
                        self.folder.id,
                        serde_json::json!({
                            "download_uid_count": outcome.downloaded,
                            "update_uid_count": outcome.updated,
                            "delete_uid_count": outcome.removed,
                            "uid_checked_timestamp": Utc::now(),
                        }),
                    )
                    .await?;
            }
        }

        // Park the session before waiting so siblings can use the slot.
        drop(session);

        if !waited_in_idle {
            let delay = if interactive {
                self.ctx.config.timers.inbox_poll_interval
            } else {
                self.ctx.config.timers.poll_interval
            };
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.ctx.shutdown.cancelled() => {}
            }
        }
        Ok(SyncState::Poll)
    }

    /// UIDVALIDITY recovery: relink UIDs whose provider message id we
    /// already hold, download the rest (content hashes reunite renumbered
    /// UIDs on providers without message ids), then drop the stale
    /// numbering and reset the cursors. New references land before old
    /// ones go away, so surviving messages are never orphaned in between.
    async fn resync_uids(&self, account: &account::Model) -> Result<SyncState, SyncError> {
        let pool = self.ctx.session_pool(account, PoolIntent::Read);
        let mut session = pool.checkout().await?;

        let select = session.select(&self.folder.name).await?;
        if let Some(info) = self.ctx.store.imap_info(self.folder.id).await? {
            if i64::from(select.uid_validity) <= info.uidvalidity {
                tracing::debug!(
                    folder = %self.folder.name,
                    "UIDVALIDITY did not advance; treating the invalidation as spurious"
                );
                return Ok(SyncState::Initial);
            }
        }

        let remote = session.search_all_uids().await?;
        let local = self
            .ctx
            .store
            .local_uids(account.id, self.folder.id)
            .await?;

        let fresh: Vec<u32> = remote.difference(&local).copied().collect();
        let mut reused = 0usize;
        let mut downloaded = 0usize;

        // Metadata pass first: a renumbered message keeps its provider
        // message id, so a match relinks the new UID to the message we
        // already hold and skips the body fetch entirely.
        let mut unmatched = Vec::new();
        if !fresh.is_empty() {
            for meta in session.fetch_metadata(&fresh).await? {
                let known = match meta.g_msgid {
                    Some(g_msgid) => {
                        self.ctx
                            .store
                            .message_by_gmsgid(account.id, g_msgid)
                            .await?
                    }
                    None => None,
                };
                match known {
                    Some(message) => {
                        let _guard = self.ctx.write_lock.lock().await;
                        self.ctx
                            .store
                            .link_uid(account.id, self.folder.id, &meta, message.id)
                            .await?;
                        reused += 1;
                    }
                    None => unmatched.push(meta.uid),
                }
            }
        }

        for chunk in unmatched.chunks(self.ctx.config.download_batch.max(1)) {
            let fetched = session.fetch_bodies(chunk).await?;
            if fetched.is_empty() {
                continue;
            }
            let _guard = self.ctx.write_lock.lock().await;
            let outcomes = self
                .ctx
                .store
                .store_fetched_batch(account, &self.folder, &fetched)
                .await?;
            for outcome in outcomes {
                if outcome.created_message {
                    downloaded += 1;
                } else {
                    reused += 1;
                }
            }
        }

        let stale: Vec<u32> = local.difference(&remote).copied().collect();
        if !stale.is_empty() {
            let _guard = self.ctx.write_lock.lock().await;
            self.ctx
                .store
                .remove_vanished_uids(account.id, self.folder.id, &stale)
                .await?;
        }

        // New UIDVALIDITY, HIGHESTMODSEQ cleared; it belongs to the old
        // numbering.
        self.ctx
            .store
            .save_cursors(self.folder.id, select.uid_validity, select.uid_next, None)
            .await?;
        tracing::info!(
            folder = %self.folder.name,
            uidvalidity = select.uid_validity,
            reused,
            downloaded,
            stale = stale.len(),
            "Rebuilt uid mapping after UIDVALIDITY change"
        );
        Ok(SyncState::Initial)
    }

    async fn load_state(&self) -> Result<SyncState, SyncError> {
        let status = self.ctx.store.sync_status(self.folder.id).await?;
        Ok(status
            .and_then(|s| SyncState::parse(&s.state))
            .unwrap_or(SyncState::Initial))
    }

    async fn persist_state(&self, state: SyncState) -> Result<(), SyncError> {
        self.ctx
            .store
            .set_sync_state(self.folder.id, state.as_str())
            .await?;
        Ok(())
    }

    async fn report(&self, state: SyncState) {
        self.ctx
            .liveness
            .report(Heartbeat {
                process_id: self.ctx.config.process_id.clone(),
                account_id: self.ctx.account_id,
                folder: self.folder.name.clone(),
                state: state.as_str().to_string(),
                at: Utc::now(),
            })
            .await;
    }

    fn role(&self) -> Option<FolderRole> {
        self.folder.canonical_role.as_deref().and_then(FolderRole::parse)
    }

    fn drain_context<'a>(&'a self, account: &'a account::Model) -> DrainContext<'a> {
        DrainContext {
            store: &self.ctx.store,
            write_lock: &self.ctx.write_lock,
            account,
            folder: &self.folder,
            batch: self.ctx.config.download_batch,
        }
    }
}

fn drain_percent(remote_total: usize, pending: usize) -> f64 {
    if remote_total == 0 {
        return 100.0;
    }
    let done = remote_total.saturating_sub(pending);
    (done as f64 / remote_total as f64) * 100.0
}
