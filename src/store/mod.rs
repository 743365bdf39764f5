pub mod entities;

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mailparse::MailHeaderMap;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, DatabaseTransaction, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::imap::{FetchedUid, UidMeta};
use entities::{account, folder, folder_imap_info, folder_sync_status, message, thread, uid_record};

pub async fn connect(database_url: &str) -> Result<DatabaseConnection> {
    let db = Database::connect(database_url).await?;
    tracing::info!("Connected to database");
    Ok(db)
}

/// A folder the account should have locally, as derived from LIST.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderSpec {
    pub name: String,
    pub role: Option<String>,
}

/// What a reconciliation pass changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FolderDelta {
    pub created: usize,
    pub deleted: usize,
    pub relabeled: usize,
}

impl FolderDelta {
    pub fn unchanged(&self) -> bool {
        self.created == 0 && self.deleted == 0 && self.relabeled == 0
    }
}

/// Result of persisting one downloaded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOutcome {
    pub message_id: Uuid,
    /// False when an existing row was reused by content hash or Gmail
    /// message id.
    pub created_message: bool,
}

/// All local persistence for the sync engine. Cheap to clone; workers each
/// hold one.
#[derive(Clone)]
pub struct Store {
    db: DatabaseConnection,
}

impl Store {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    // ----- accounts -----

    pub async fn account(&self, account_id: Uuid) -> Result<account::Model> {
        account::Entity::find_by_id(account_id)
            .one(&self.db)
            .await
            .context("Failed to load account")?
            .with_context(|| format!("Account {account_id} does not exist"))
    }

    pub async fn set_account_sync_state(&self, account_id: Uuid, state: &str) -> Result<()> {
        let account = self.account(account_id).await?;
        if account.sync_state == state {
            return Ok(());
        }
        let mut active: account::ActiveModel = account.into();
        active.sync_state = Set(state.to_string());
        active
            .update(&self.db)
            .await
            .context("Failed to update account sync state")?;
        Ok(())
    }

    // ----- folders -----

    pub async fn folders(&self, account_id: Uuid) -> Result<Vec<folder::Model>> {
        folder::Entity::find()
            .filter(folder::Column::AccountId.eq(account_id))
            .all(&self.db)
            .await
            .context("Failed to list folders")
    }

    pub async fn folder(&self, folder_id: Uuid) -> Result<Option<folder::Model>> {
        folder::Entity::find_by_id(folder_id)
            .one(&self.db)
            .await
            .context("Failed to load folder")
    }

    pub async fn folder_by_role(
        &self,
        account_id: Uuid,
        role: &str,
    ) -> Result<Option<folder::Model>> {
        folder::Entity::find()
            .filter(folder::Column::AccountId.eq(account_id))
            .filter(folder::Column::CanonicalRole.eq(role))
            .one(&self.db)
            .await
            .context("Failed to look up folder by role")
    }

    pub async fn ensure_folder(
        &self,
        account_id: Uuid,
        name: &str,
        role: Option<&str>,
    ) -> Result<folder::Model> {
        let existing = folder::Entity::find()
            .filter(folder::Column::AccountId.eq(account_id))
            .filter(folder::Column::Name.eq(name))
            .one(&self.db)
            .await
            .context("Failed to look up folder")?;

        if let Some(folder) = existing {
            return Ok(folder);
        }

        let record = folder::ActiveModel {
            id: Set(Uuid::new_v4()),
            account_id: Set(account_id),
            name: Set(name.to_string()),
            canonical_role: Set(role.map(str::to_string)),
            created_at: Set(Utc::now()),
        };
        record
            .insert(&self.db)
            .await
            .context("Failed to create folder")
    }

    /// Brings the local folder rows in line with `desired` in one
    /// transaction: creates missing rows, deletes vanished ones (children
    /// cascade), and rewrites changed roles. Messages whose last UID went
    /// away with a deleted folder are marked for the sweeper.
    pub async fn reconcile_folders(
        &self,
        account_id: Uuid,
        desired: &[FolderSpec],
    ) -> Result<FolderDelta> {
        let existing = self.folders(account_id).await?;

        let mut to_create: Vec<&FolderSpec> = Vec::new();
        let mut to_relabel: Vec<(folder::Model, Option<String>)> = Vec::new();
        for spec in desired {
            match existing.iter().find(|f| f.name == spec.name) {
                None => to_create.push(spec),
                Some(found) if found.canonical_role != spec.role => {
                    to_relabel.push((found.clone(), spec.role.clone()));
                }
                Some(_) => {}
            }
        }
        let to_delete: Vec<&folder::Model> = existing
            .iter()
            .filter(|f| !desired.iter().any(|spec| spec.name == f.name))
            .collect();

        let delta = FolderDelta {
            created: to_create.len(),
            deleted: to_delete.len(),
            relabeled: to_relabel.len(),
        };
        if delta.unchanged() {
            return Ok(delta);
        }

        let txn = self
            .db
            .begin()
            .await
            .context("Failed to open folder reconciliation transaction")?;

        let now = Utc::now();
        for spec in &to_create {
            let record = folder::ActiveModel {
                id: Set(Uuid::new_v4()),
                account_id: Set(account_id),
                name: Set(spec.name.clone()),
                canonical_role: Set(spec.role.clone()),
                created_at: Set(now),
            };
            record
                .insert(&txn)
                .await
                .context("Failed to create folder")?;
        }

        for (model, role) in to_relabel {
            let mut active: folder::ActiveModel = model.into();
            active.canonical_role = Set(role);
            active
                .update(&txn)
                .await
                .context("Failed to update folder role")?;
        }

        if !to_delete.is_empty() {
            let doomed_ids: Vec<Uuid> = to_delete.iter().map(|f| f.id).collect();

            // Remember which messages those folders referenced before the
            // cascade wipes the records.
            let mut candidates: BTreeSet<Uuid> = BTreeSet::new();
            let referencing = uid_record::Entity::find()
                .filter(uid_record::Column::FolderId.is_in(doomed_ids.clone()))
                .all(&txn)
                .await
                .context("Failed to collect uid records of deleted folders")?;
            for record in referencing {
                candidates.insert(record.message_id);
            }

            folder::Entity::delete_many()
                .filter(folder::Column::Id.is_in(doomed_ids))
                .exec(&txn)
                .await
                .context("Failed to delete folders")?;

            for message_id in candidates {
                mark_if_orphaned(&txn, message_id).await?;
            }
        }

        txn.commit()
            .await
            .context("Failed to commit folder reconciliation")?;

        tracing::info!(
            account = %account_id,
            created = delta.created,
            deleted = delta.deleted,
            relabeled = delta.relabeled,
            "Reconciled folder list"
        );
        Ok(delta)
    }

    // ----- sync status -----

    pub async fn sync_status(
        &self,
        folder_id: Uuid,
    ) -> Result<Option<folder_sync_status::Model>> {
        folder_sync_status::Entity::find()
            .filter(folder_sync_status::Column::FolderId.eq(folder_id))
            .one(&self.db)
            .await
            .context("Failed to load folder sync status")
    }

    pub async fn set_sync_state(&self, folder_id: Uuid, state: &str) -> Result<()> {
        let now = Utc::now();
        match self.sync_status(folder_id).await? {
            Some(status) => {
                if status.state == state {
                    return Ok(());
                }
                let mut active: folder_sync_status::ActiveModel = status.into();
                active.state = Set(state.to_string());
                active.updated_at = Set(now);
                active
                    .update(&self.db)
                    .await
                    .context("Failed to update folder sync state")?;
            }
            None => {
                let record = folder_sync_status::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    folder_id: Set(folder_id),
                    state: Set(state.to_string()),
                    metrics: Set(None),
                    updated_at: Set(now),
                };
                record
                    .insert(&self.db)
                    .await
                    .context("Failed to create folder sync status")?;
            }
        }
        Ok(())
    }

    /// Merges `patch` into the metrics bag, key by key.
    pub async fn update_metrics(&self, folder_id: Uuid, patch: serde_json::Value) -> Result<()> {
        let now = Utc::now();
        match self.sync_status(folder_id).await? {
            Some(status) => {
                let mut bag = status
                    .metrics
                    .clone()
                    .unwrap_or_else(|| serde_json::json!({}));
                if let (Some(obj), Some(patch_obj)) = (bag.as_object_mut(), patch.as_object()) {
                    for (key, value) in patch_obj {
                        obj.insert(key.clone(), value.clone());
                    }
                }
                let mut active: folder_sync_status::ActiveModel = status.into();
                active.metrics = Set(Some(bag));
                active.updated_at = Set(now);
                active
                    .update(&self.db)
                    .await
                    .context("Failed to update folder metrics")?;
            }
            None => {
                let record = folder_sync_status::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    folder_id: Set(folder_id),
                    state: Set("initial".to_string()),
                    metrics: Set(Some(patch)),
                    updated_at: Set(now),
                };
                record
                    .insert(&self.db)
                    .await
                    .context("Failed to create folder sync status")?;
            }
        }
        Ok(())
    }

    // ----- select cursors -----

    pub async fn imap_info(&self, folder_id: Uuid) -> Result<Option<folder_imap_info::Model>> {
        folder_imap_info::Entity::find()
            .filter(folder_imap_info::Column::FolderId.eq(folder_id))
            .one(&self.db)
            .await
            .context("Failed to load folder imap info")
    }

    pub async fn save_cursors(
        &self,
        folder_id: Uuid,
        uidvalidity: u32,
        uidnext: Option<u32>,
        highestmodseq: Option<u64>,
    ) -> Result<()> {
        let now = Utc::now();
        match self.imap_info(folder_id).await? {
            Some(info) => {
                let mut active: folder_imap_info::ActiveModel = info.into();
                active.uidvalidity = Set(i64::from(uidvalidity));
                active.uidnext = Set(uidnext.map(i64::from));
                active.highestmodseq = Set(highestmodseq.map(|m| m as i64));
                active.updated_at = Set(now);
                active
                    .update(&self.db)
                    .await
                    .context("Failed to update folder cursors")?;
            }
            None => {
                let record = folder_imap_info::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    folder_id: Set(folder_id),
                    uidvalidity: Set(i64::from(uidvalidity)),
                    uidnext: Set(uidnext.map(i64::from)),
                    highestmodseq: Set(highestmodseq.map(|m| m as i64)),
                    last_slow_refresh: Set(None),
                    updated_at: Set(now),
                };
                record
                    .insert(&self.db)
                    .await
                    .context("Failed to create folder cursors")?;
            }
        }
        Ok(())
    }

    pub async fn mark_slow_refresh(&self, folder_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        if let Some(info) = self.imap_info(folder_id).await? {
            let mut active: folder_imap_info::ActiveModel = info.into();
            active.last_slow_refresh = Set(Some(at));
            active.updated_at = Set(Utc::now());
            active
                .update(&self.db)
                .await
                .context("Failed to record slow refresh time")?;
        }
        Ok(())
    }

    // ----- uid records -----

    pub async fn local_uids(&self, account_id: Uuid, folder_id: Uuid) -> Result<BTreeSet<u32>> {
        let records = uid_record::Entity::find()
            .filter(uid_record::Column::AccountId.eq(account_id))
            .filter(uid_record::Column::FolderId.eq(folder_id))
            .all(&self.db)
            .await
            .context("Failed to list local uids")?;
        Ok(records.into_iter().map(|r| r.uid as u32).collect())
    }

    /// Highest UID we have a record for; the "seen up to here" cursor is
    /// derived, not stored.
    pub async fn max_uid(&self, account_id: Uuid, folder_id: Uuid) -> Result<Option<u32>> {
        let record = uid_record::Entity::find()
            .filter(uid_record::Column::AccountId.eq(account_id))
            .filter(uid_record::Column::FolderId.eq(folder_id))
            .order_by_desc(uid_record::Column::Uid)
            .one(&self.db)
            .await
            .context("Failed to find max uid")?;
        Ok(record.map(|r| r.uid as u32))
    }

    /// The `limit` most recent UIDs, highest first. Bounds the flag-refresh
    /// window on servers without CONDSTORE.
    pub async fn recent_uids(
        &self,
        account_id: Uuid,
        folder_id: Uuid,
        limit: u64,
    ) -> Result<Vec<u32>> {
        let records = uid_record::Entity::find()
            .filter(uid_record::Column::AccountId.eq(account_id))
            .filter(uid_record::Column::FolderId.eq(folder_id))
            .order_by_desc(uid_record::Column::Uid)
            .limit(limit)
            .all(&self.db)
            .await
            .context("Failed to list recent uids")?;
        Ok(records.into_iter().map(|r| r.uid as u32).collect())
    }

    pub async fn uid_record(
        &self,
        account_id: Uuid,
        folder_id: Uuid,
        uid: u32,
    ) -> Result<Option<uid_record::Model>> {
        uid_record::Entity::find()
            .filter(uid_record::Column::AccountId.eq(account_id))
            .filter(uid_record::Column::FolderId.eq(folder_id))
            .filter(uid_record::Column::Uid.eq(i64::from(uid)))
            .one(&self.db)
            .await
            .context("Failed to load uid record")
    }

    /// Persists one downloaded message and its UID record in a single
    /// transaction. An existing message row is reused when the Gmail
    /// message id or the content hash matches; the body is never stored
    /// twice.
    pub async fn store_fetched_message(
        &self,
        account: &account::Model,
        folder: &folder::Model,
        fetched: &FetchedUid,
    ) -> Result<StoreOutcome> {
        let outcomes = self
            .store_fetched_batch(account, folder, std::slice::from_ref(fetched))
            .await?;
        outcomes
            .into_iter()
            .next()
            .context("Message batch produced no outcome")
    }

    /// Persists one downloaded batch in a single transaction so a crash
    /// mid-batch leaves no half-written messages. Callers hold the account
    /// write lock.
    pub async fn store_fetched_batch(
        &self,
        account: &account::Model,
        folder: &folder::Model,
        batch: &[FetchedUid],
    ) -> Result<Vec<StoreOutcome>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let txn = self
            .db
            .begin()
            .await
            .context("Failed to open message transaction")?;
        let mut outcomes = Vec::with_capacity(batch.len());
        for fetched in batch {
            outcomes.push(store_one(&txn, account, folder, fetched).await?);
        }
        txn.commit()
            .await
            .context("Failed to commit message transaction")?;
        Ok(outcomes)
    }

    pub async fn message_by_gmsgid(
        &self,
        account_id: Uuid,
        g_msgid: u64,
    ) -> Result<Option<message::Model>> {
        message_by_gmsgid_conn(&self.db, account_id, g_msgid as i64).await
    }

    /// Records a UID that points at an already-known message without
    /// downloading the body again.
    pub async fn link_uid(
        &self,
        account_id: Uuid,
        folder_id: Uuid,
        meta: &UidMeta,
        message_id: Uuid,
    ) -> Result<()> {
        let txn = self
            .db
            .begin()
            .await
            .context("Failed to open uid link transaction")?;
        upsert_uid_record(&txn, account_id, folder_id, meta, message_id).await?;
        txn.commit()
            .await
            .context("Failed to commit uid link transaction")?;
        Ok(())
    }

    /// Applies refreshed flag/label metadata to known UIDs. Unknown UIDs
    /// are skipped; the download path owns creating records. Returns how
    /// many rows actually changed.
    pub async fn apply_flag_updates(
        &self,
        account_id: Uuid,
        folder_id: Uuid,
        updates: &[UidMeta],
    ) -> Result<u64> {
        if updates.is_empty() {
            return Ok(0);
        }

        let txn = self
            .db
            .begin()
            .await
            .context("Failed to open flag update transaction")?;
        let mut changed = 0u64;

        for meta in updates {
            let existing = uid_record::Entity::find()
                .filter(uid_record::Column::AccountId.eq(account_id))
                .filter(uid_record::Column::FolderId.eq(folder_id))
                .filter(uid_record::Column::Uid.eq(i64::from(meta.uid)))
                .one(&txn)
                .await
                .context("Failed to load uid record for flag update")?;
            let Some(record) = existing else {
                continue;
            };

            let labels = meta.labels.as_deref().map(labels_json);
            let is_draft = meta.flags.draft || has_draft_label(meta.labels.as_deref());
            let differs = record.is_seen != meta.flags.seen
                || record.is_answered != meta.flags.answered
                || record.is_flagged != meta.flags.flagged
                || record.is_draft != is_draft
                || record.is_deleted != meta.flags.deleted
                || record.is_recent != meta.flags.recent
                || (meta.labels.is_some() && record.g_labels != labels);
            if !differs {
                continue;
            }

            let keep_labels = record.g_labels.clone();
            let mut active: uid_record::ActiveModel = record.into();
            active.is_seen = Set(meta.flags.seen);
            active.is_answered = Set(meta.flags.answered);
            active.is_flagged = Set(meta.flags.flagged);
            active.is_draft = Set(is_draft);
            active.is_deleted = Set(meta.flags.deleted);
            active.is_recent = Set(meta.flags.recent);
            active.g_labels = Set(if meta.labels.is_some() {
                labels
            } else {
                keep_labels
            });
            active.updated_at = Set(Utc::now());
            active
                .update(&txn)
                .await
                .context("Failed to apply flag update")?;
            changed += 1;
        }

        txn.commit()
            .await
            .context("Failed to commit flag updates")?;
        Ok(changed)
    }

    /// Removes UIDs that no longer exist remotely. Each UID commits on its
    /// own so the caller's lock never spans one long transaction; a crash
    /// midway leaves a clean prefix. Messages left without any referencing
    /// UID are flagged for the sweeper, not deleted inline.
    pub async fn remove_vanished_uids(
        &self,
        account_id: Uuid,
        folder_id: Uuid,
        uids: &[u32],
    ) -> Result<u64> {
        let mut removed = 0u64;
        for &uid in uids {
            let txn = self
                .db
                .begin()
                .await
                .context("Failed to open uid removal transaction")?;
            let existing = uid_record::Entity::find()
                .filter(uid_record::Column::AccountId.eq(account_id))
                .filter(uid_record::Column::FolderId.eq(folder_id))
                .filter(uid_record::Column::Uid.eq(i64::from(uid)))
                .one(&txn)
                .await
                .context("Failed to load uid record for removal")?;

            if let Some(record) = existing {
                let message_id = record.message_id;
                uid_record::Entity::delete_by_id(record.id)
                    .exec(&txn)
                    .await
                    .context("Failed to delete uid record")?;
                mark_if_orphaned(&txn, message_id).await?;
                removed += 1;
            }

            txn.commit()
                .await
                .context("Failed to commit uid removal")?;
        }

        if removed > 0 {
            tracing::debug!(folder = %folder_id, removed, "Removed vanished uids");
        }
        Ok(removed)
    }

    pub async fn count_messages(&self, account_id: Uuid) -> Result<u64> {
        message::Entity::find()
            .filter(message::Column::AccountId.eq(account_id))
            .count(&self.db)
            .await
            .context("Failed to count messages")
    }

    /// Rebuilds a thread's label set as the union of its messages' remote
    /// labels. Labels arrive per UID; the thread-level view is derived.
    pub async fn recompute_thread_labels(&self, account_id: Uuid, g_thrid: u64) -> Result<()> {
        let found = thread::Entity::find()
            .filter(thread::Column::AccountId.eq(account_id))
            .filter(thread::Column::GThrid.eq(g_thrid as i64))
            .one(&self.db)
            .await
            .context("Failed to load thread")?;
        let Some(found) = found else {
            return Ok(());
        };

        let message_ids: Vec<Uuid> = message::Entity::find()
            .filter(message::Column::AccountId.eq(account_id))
            .filter(message::Column::ThreadId.eq(found.id))
            .all(&self.db)
            .await
            .context("Failed to list thread messages")?
            .into_iter()
            .map(|m| m.id)
            .collect();

        let mut union: BTreeSet<String> = BTreeSet::new();
        if !message_ids.is_empty() {
            let records = uid_record::Entity::find()
                .filter(uid_record::Column::MessageId.is_in(message_ids))
                .all(&self.db)
                .await
                .context("Failed to list thread uid records")?;
            for record in records {
                if let Some(serde_json::Value::Array(labels)) = record.g_labels {
                    for label in labels {
                        if let serde_json::Value::String(label) = label {
                            union.insert(label);
                        }
                    }
                }
            }
        }

        let labels = if union.is_empty() {
            None
        } else {
            Some(serde_json::json!(union.into_iter().collect::<Vec<_>>()))
        };
        if found.labels == labels {
            return Ok(());
        }
        let mut active: thread::ActiveModel = found.into();
        active.labels = Set(labels);
        active
            .update(&self.db)
            .await
            .context("Failed to update thread labels")?;
        Ok(())
    }
}

// ----- helpers shared by the transactional paths -----

async fn store_one(
    txn: &DatabaseTransaction,
    account: &account::Model,
    folder: &folder::Model,
    fetched: &FetchedUid,
) -> Result<StoreOutcome> {
    let sha = sha256_hex(&fetched.raw);

    let existing = match fetched.meta.g_msgid {
        Some(g_msgid) => {
            let by_msgid = message_by_gmsgid(txn, account.id, g_msgid as i64).await?;
            match by_msgid {
                Some(found) => Some(found),
                None => message_by_sha(txn, account.id, &sha).await?,
            }
        }
        None => message_by_sha(txn, account.id, &sha).await?,
    };

    let (message_id, created_message) = match existing {
        Some(found) => {
            tracing::debug!(
                account = %account.id,
                uid = fetched.meta.uid,
                message = %found.id,
                "Reusing existing message row"
            );
            let found_id = found.id;
            // A new reference revives a message the sweeper was about to
            // collect.
            if found.marked_for_deletion {
                let mut active: message::ActiveModel = found.into();
                active.marked_for_deletion = Set(false);
                active
                    .update(txn)
                    .await
                    .context("Failed to revive message")?;
            }
            (found_id, false)
        }
        None => {
            let thread_id = match fetched.meta.g_thrid {
                Some(g_thrid) => find_or_create_thread(txn, account.id, g_thrid as i64).await?,
                // No native threading: the message is its own thread.
                None => create_singleton_thread(txn, account.id).await?,
            };
            let (subject, from_addr) = parse_envelope(&fetched.raw);
            let record = message::ActiveModel {
                id: Set(Uuid::new_v4()),
                account_id: Set(account.id),
                sha256: Set(sha),
                size: Set(fetched.raw.len() as i64),
                thread_id: Set(Some(thread_id)),
                g_msgid: Set(fetched.meta.g_msgid.map(|v| v as i64)),
                g_thrid: Set(fetched.meta.g_thrid.map(|v| v as i64)),
                subject: Set(subject),
                from_addr: Set(from_addr),
                received_date: Set(fetched.internal_date),
                marked_for_deletion: Set(false),
                created_at: Set(Utc::now()),
            };
            let inserted = record
                .insert(txn)
                .await
                .context("Failed to insert message")?;
            (inserted.id, true)
        }
    };

    upsert_uid_record(txn, account.id, folder.id, &fetched.meta, message_id).await?;
    Ok(StoreOutcome {
        message_id,
        created_message,
    })
}

async fn message_by_sha(
    txn: &DatabaseTransaction,
    account_id: Uuid,
    sha: &str,
) -> Result<Option<message::Model>> {
    message::Entity::find()
        .filter(message::Column::AccountId.eq(account_id))
        .filter(message::Column::Sha256.eq(sha))
        .one(txn)
        .await
        .context("Failed to look up message by hash")
}

async fn message_by_gmsgid(
    txn: &DatabaseTransaction,
    account_id: Uuid,
    g_msgid: i64,
) -> Result<Option<message::Model>> {
    message::Entity::find()
        .filter(message::Column::AccountId.eq(account_id))
        .filter(message::Column::GMsgid.eq(g_msgid))
        .one(txn)
        .await
        .context("Failed to look up message by gmail id")
}

async fn message_by_gmsgid_conn(
    db: &DatabaseConnection,
    account_id: Uuid,
    g_msgid: i64,
) -> Result<Option<message::Model>> {
    message::Entity::find()
        .filter(message::Column::AccountId.eq(account_id))
        .filter(message::Column::GMsgid.eq(g_msgid))
        .one(db)
        .await
        .context("Failed to look up message by gmail id")
}

async fn find_or_create_thread(
    txn: &DatabaseTransaction,
    account_id: Uuid,
    g_thrid: i64,
) -> Result<Uuid> {
    let existing = thread::Entity::find()
        .filter(thread::Column::AccountId.eq(account_id))
        .filter(thread::Column::GThrid.eq(g_thrid))
        .one(txn)
        .await
        .context("Failed to look up thread")?;
    if let Some(found) = existing {
        return Ok(found.id);
    }

    let record = thread::ActiveModel {
        id: Set(Uuid::new_v4()),
        account_id: Set(account_id),
        g_thrid: Set(Some(g_thrid)),
        labels: Set(None),
        created_at: Set(Utc::now()),
    };
    let inserted = record
        .insert(txn)
        .await
        .context("Failed to create thread")?;
    Ok(inserted.id)
}

async fn create_singleton_thread(txn: &DatabaseTransaction, account_id: Uuid) -> Result<Uuid> {
    let record = thread::ActiveModel {
        id: Set(Uuid::new_v4()),
        account_id: Set(account_id),
        g_thrid: Set(None),
        labels: Set(None),
        created_at: Set(Utc::now()),
    };
    let inserted = record
        .insert(txn)
        .await
        .context("Failed to create singleton thread")?;
    Ok(inserted.id)
}

async fn upsert_uid_record(
    txn: &DatabaseTransaction,
    account_id: Uuid,
    folder_id: Uuid,
    meta: &UidMeta,
    message_id: Uuid,
) -> Result<()> {
    let now = Utc::now();
    let labels = meta.labels.as_deref().map(labels_json);
    let is_draft = meta.flags.draft || has_draft_label(meta.labels.as_deref());

    let existing = uid_record::Entity::find()
        .filter(uid_record::Column::AccountId.eq(account_id))
        .filter(uid_record::Column::FolderId.eq(folder_id))
        .filter(uid_record::Column::Uid.eq(i64::from(meta.uid)))
        .one(txn)
        .await
        .context("Failed to look up uid record")?;

    match existing {
        Some(record) => {
            let mut active: uid_record::ActiveModel = record.into();
            active.message_id = Set(message_id);
            active.is_seen = Set(meta.flags.seen);
            active.is_answered = Set(meta.flags.answered);
            active.is_flagged = Set(meta.flags.flagged);
            active.is_draft = Set(is_draft);
            active.is_deleted = Set(meta.flags.deleted);
            active.is_recent = Set(meta.flags.recent);
            active.g_labels = Set(labels);
            active.updated_at = Set(now);
            active
                .update(txn)
                .await
                .context("Failed to update uid record")?;
        }
        None => {
            let record = uid_record::ActiveModel {
                id: Set(Uuid::new_v4()),
                account_id: Set(account_id),
                folder_id: Set(folder_id),
                uid: Set(i64::from(meta.uid)),
                message_id: Set(message_id),
                is_seen: Set(meta.flags.seen),
                is_answered: Set(meta.flags.answered),
                is_flagged: Set(meta.flags.flagged),
                is_draft: Set(is_draft),
                is_deleted: Set(meta.flags.deleted),
                is_recent: Set(meta.flags.recent),
                g_labels: Set(labels),
                updated_at: Set(now),
            };
            record
                .insert(txn)
                .await
                .context("Failed to insert uid record")?;
        }
    }
    Ok(())
}

async fn mark_if_orphaned(txn: &DatabaseTransaction, message_id: Uuid) -> Result<bool> {
    let references = uid_record::Entity::find()
        .filter(uid_record::Column::MessageId.eq(message_id))
        .count(txn)
        .await
        .context("Failed to count message references")?;
    if references > 0 {
        return Ok(false);
    }

    if let Some(found) = message::Entity::find_by_id(message_id)
        .one(txn)
        .await
        .context("Failed to load message for orphan check")?
    {
        if !found.marked_for_deletion {
            let mut active: message::ActiveModel = found.into();
            active.marked_for_deletion = Set(true);
            active
                .update(txn)
                .await
                .context("Failed to mark message for deletion")?;
        }
    }
    Ok(true)
}

fn sha256_hex(raw: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw);
    hex::encode(hasher.finalize())
}

fn parse_envelope(raw: &[u8]) -> (Option<String>, Option<String>) {
    match mailparse::parse_mail(raw) {
        Ok(parsed) => {
            let subject = parsed.headers.get_first_value("Subject");
            let from_addr = parsed.headers.get_first_value("From");
            (subject, from_addr)
        }
        Err(err) => {
            tracing::debug!("Unparseable message headers: {}", err);
            (None, None)
        }
    }
}

fn labels_json(labels: &[String]) -> serde_json::Value {
    let mut sorted: Vec<&str> = labels.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.dedup();
    serde_json::json!(sorted)
}

fn has_draft_label(labels: Option<&[String]>) -> bool {
    labels
        .map(|labels| labels.iter().any(|l| l == "\\Draft"))
        .unwrap_or(false)
}
