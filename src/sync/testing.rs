//! End-to-end engine scenarios against a scripted in-memory server.
//!
//! [`FakeMail`] plays the remote side: tests mutate it between passes the
//! way a real mailbox changes between polls, and the engine runs against
//! it through the same pool and factory seams production uses.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, Database, Set};
use sea_orm_migration::MigratorTrait;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::{ErrorKind, SyncError};
use crate::imap::pool::{PoolManager, SessionFactory};
use crate::imap::{
    FetchedUid, FolderAttr, MailClient, MessageFlags, RemoteFolder, SelectInfo, UidMeta,
};
use crate::liveness::LogReporter;
use crate::migration::Migrator;
use crate::store::entities::account;
use crate::store::Store;

use super::{folders, provider_for, run_account, FolderSyncEngine, SyncContext, SyncState};

#[derive(Clone)]
struct FakeMessage {
    raw: Vec<u8>,
    flags: MessageFlags,
    labels: Option<Vec<String>>,
    g_msgid: Option<u64>,
    g_thrid: Option<u64>,
    modseq: u64,
}

impl FakeMessage {
    fn meta(&self, uid: u32) -> UidMeta {
        UidMeta {
            uid,
            flags: self.flags,
            labels: self.labels.clone(),
            g_msgid: self.g_msgid,
            g_thrid: self.g_thrid,
            modseq: Some(self.modseq),
        }
    }
}

fn plain(raw: &str) -> FakeMessage {
    FakeMessage {
        raw: raw.as_bytes().to_vec(),
        flags: MessageFlags::default(),
        labels: None,
        g_msgid: None,
        g_thrid: None,
        modseq: 1,
    }
}

fn gmail_msg(raw: &str, g_msgid: u64, g_thrid: u64, labels: &[&str]) -> FakeMessage {
    FakeMessage {
        raw: raw.as_bytes().to_vec(),
        flags: MessageFlags::default(),
        labels: Some(labels.iter().map(|l| l.to_string()).collect()),
        g_msgid: Some(g_msgid),
        g_thrid: Some(g_thrid),
        modseq: 1,
    }
}

#[derive(Default)]
struct FakeFolder {
    uid_validity: u32,
    /// `None` plays a server without CONDSTORE.
    highest_modseq: Option<u64>,
    messages: BTreeMap<u32, FakeMessage>,
}

impl FakeFolder {
    fn uid_next(&self) -> u32 {
        self.messages
            .keys()
            .next_back()
            .map(|uid| uid + 1)
            .unwrap_or(1)
    }
}

#[derive(Default)]
struct FakeServer {
    list: Vec<RemoteFolder>,
    folders: BTreeMap<String, FakeFolder>,
    body_fetches: usize,
}

/// Handle to the scripted server, shared by every session the factory
/// hands out.
#[derive(Clone, Default)]
struct FakeMail {
    inner: Arc<StdMutex<FakeServer>>,
}

impl FakeMail {
    fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeServer> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn add_folder(&self, name: &str, attrs: &[FolderAttr], uid_validity: u32, modseq: Option<u64>) {
        let mut server = self.lock();
        server.list.push(RemoteFolder {
            name: name.to_string(),
            attrs: attrs.to_vec(),
        });
        server.folders.insert(
            name.to_string(),
            FakeFolder {
                uid_validity,
                highest_modseq: modseq,
                messages: BTreeMap::new(),
            },
        );
    }

    fn put(&self, folder: &str, uid: u32, message: FakeMessage) {
        let mut server = self.lock();
        let folder = server.folders.get_mut(folder).unwrap();
        if let Some(highest) = folder.highest_modseq.as_mut() {
            *highest = (*highest).max(message.modseq);
        }
        folder.messages.insert(uid, message);
    }

    fn remove(&self, folder: &str, uid: u32) {
        let mut server = self.lock();
        server.folders.get_mut(folder).unwrap().messages.remove(&uid);
    }

    fn set_flags(&self, folder: &str, uid: u32, flags: MessageFlags, modseq: u64) {
        let mut server = self.lock();
        let folder = server.folders.get_mut(folder).unwrap();
        let message = folder.messages.get_mut(&uid).unwrap();
        message.flags = flags;
        message.modseq = modseq;
        if let Some(highest) = folder.highest_modseq.as_mut() {
            *highest = (*highest).max(modseq);
        }
    }

    /// Plays a mailbox rebuild: same messages, new UIDVALIDITY, every UID
    /// shifted by `offset`.
    fn renumber(&self, folder: &str, new_validity: u32, offset: u32) {
        let mut server = self.lock();
        let folder = server.folders.get_mut(folder).unwrap();
        folder.uid_validity = new_validity;
        let old = std::mem::take(&mut folder.messages);
        for (uid, message) in old {
            folder.messages.insert(uid + offset, message);
        }
    }

    fn body_fetches(&self) -> usize {
        self.lock().body_fetches
    }
}

struct FakeClient {
    mail: FakeMail,
    selected: Option<String>,
}

impl FakeClient {
    fn with_selected<T>(&self, f: impl FnOnce(&FakeFolder) -> T) -> Result<T, SyncError> {
        let server = self.mail.lock();
        let name = self
            .selected
            .as_deref()
            .ok_or_else(|| SyncError::Protocol("no folder selected".to_string()))?;
        let folder = server
            .folders
            .get(name)
            .ok_or_else(|| SyncError::Protocol(format!("unknown folder {name}")))?;
        Ok(f(folder))
    }
}

#[async_trait]
impl MailClient for FakeClient {
    async fn list_folders(&mut self) -> Result<Vec<RemoteFolder>, SyncError> {
        Ok(self.mail.lock().list.clone())
    }

    async fn select(&mut self, folder: &str) -> Result<SelectInfo, SyncError> {
        let server = self.mail.lock();
        let state = server
            .folders
            .get(folder)
            .ok_or_else(|| SyncError::Protocol(format!("unknown folder {folder}")))?;
        let info = SelectInfo {
            folder: folder.to_string(),
            uid_validity: state.uid_validity,
            uid_next: Some(state.uid_next()),
            highest_modseq: state.highest_modseq,
            exists: state.messages.len() as u32,
        };
        drop(server);
        self.selected = Some(folder.to_string());
        Ok(info)
    }

    async fn search_all_uids(&mut self) -> Result<BTreeSet<u32>, SyncError> {
        self.with_selected(|folder| folder.messages.keys().copied().collect())
    }

    async fn search_uids_from(&mut self, lo: u32) -> Result<BTreeSet<u32>, SyncError> {
        self.with_selected(|folder| {
            let mut found: BTreeSet<u32> =
                folder.messages.range(lo..).map(|(uid, _)| *uid).collect();
            if found.is_empty() {
                // "lo:*" past the end answers with the highest UID.
                if let Some(max) = folder.messages.keys().next_back() {
                    found.insert(*max);
                }
            }
            found
        })
    }

    async fn search_thread(&mut self, g_thrid: u64) -> Result<Vec<u32>, SyncError> {
        self.with_selected(|folder| {
            folder
                .messages
                .iter()
                .filter(|(_, m)| m.g_thrid == Some(g_thrid))
                .map(|(uid, _)| *uid)
                .collect()
        })
    }

    async fn fetch_metadata(&mut self, uids: &[u32]) -> Result<Vec<UidMeta>, SyncError> {
        self.with_selected(|folder| {
            uids.iter()
                .filter_map(|uid| folder.messages.get(uid).map(|m| m.meta(*uid)))
                .collect()
        })
    }

    async fn fetch_flags_since(&mut self, lo: u32) -> Result<Vec<UidMeta>, SyncError> {
        self.with_selected(|folder| {
            folder
                .messages
                .range(lo..)
                .map(|(uid, m)| m.meta(*uid))
                .collect()
        })
    }

    async fn fetch_changed_since(&mut self, modseq: u64) -> Result<Vec<UidMeta>, SyncError> {
        self.with_selected(|folder| {
            folder
                .messages
                .iter()
                .filter(|(_, m)| m.modseq > modseq)
                .map(|(uid, m)| m.meta(*uid))
                .collect()
        })
    }

    async fn fetch_bodies(&mut self, uids: &[u32]) -> Result<Vec<FetchedUid>, SyncError> {
        let mut server = self.mail.lock();
        let name = self
            .selected
            .clone()
            .ok_or_else(|| SyncError::Protocol("no folder selected".to_string()))?;
        let folder = server
            .folders
            .get(&name)
            .ok_or_else(|| SyncError::Protocol(format!("unknown folder {name}")))?;
        let fetched: Vec<FetchedUid> = uids
            .iter()
            .filter_map(|uid| {
                folder.messages.get(uid).map(|m| FetchedUid {
                    meta: m.meta(*uid),
                    raw: m.raw.clone(),
                    internal_date: None,
                })
            })
            .collect();
        server.body_fetches += fetched.len();
        Ok(fetched)
    }

    async fn idle(&mut self, _timeout: Duration) -> Result<bool, SyncError> {
        // Scripted servers have no spontaneous activity; fall straight
        // through to the next poll.
        Ok(false)
    }
}

struct FakeFactory {
    mail: FakeMail,
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn create(&self) -> Result<Box<dyn MailClient>, SyncError> {
        Ok(Box::new(FakeClient {
            mail: self.mail.clone(),
            selected: None,
        }))
    }
}

struct Harness {
    ctx: Arc<SyncContext>,
    account: account::Model,
}

async fn harness(provider: &str, mail: &FakeMail) -> Harness {
    harness_with(provider, mail, SyncConfig::default()).await
}

async fn harness_with(provider: &str, mail: &FakeMail, config: SyncConfig) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();

    let db = Database::connect("sqlite::memory:").await.unwrap();
    Migrator::up(&db, None).await.unwrap();
    let store = Store::new(db);

    let account = account::ActiveModel {
        id: Set(Uuid::new_v4()),
        email: Set(format!("{}@example.com", Uuid::new_v4())),
        provider: Set(provider.to_string()),
        imap_host: Set("imap.example.com".to_string()),
        imap_port: Set(993),
        password_encrypted: Set("secret".to_string()),
        sync_state: Set("stopped".to_string()),
        read_pool_size: Set(None),
        write_pool_size: Set(None),
        created_at: Set(Utc::now()),
    }
    .insert(store.db())
    .await
    .unwrap();

    let ctx = SyncContext::new(
        account.id,
        store,
        Arc::new(PoolManager::new(config.pool.clone())),
        Arc::new(FakeFactory { mail: mail.clone() }),
        provider_for(&account),
        Arc::new(LogReporter),
        config,
    );
    Harness { ctx, account }
}

/// Reconciles folders and returns the engine for `name`.
async fn engine_for(harness: &Harness, name: &str) -> FolderSyncEngine {
    folders::reconcile_account_folders(&harness.ctx, &harness.account)
        .await
        .unwrap();
    let folder = harness
        .ctx
        .store
        .folders(harness.account.id)
        .await
        .unwrap()
        .into_iter()
        .find(|f| f.name == name)
        .unwrap();
    FolderSyncEngine::new(harness.ctx.clone(), folder)
}

#[tokio::test]
async fn initial_backfill_mirrors_the_remote_listing() {
    let mail = FakeMail::new();
    mail.add_folder("INBOX", &[], 1, None);
    mail.put("INBOX", 101, plain("Subject: a\r\n\r\nfirst"));
    mail.put("INBOX", 102, plain("Subject: b\r\n\r\nsecond"));
    mail.put("INBOX", 103, plain("Subject: c\r\n\r\nthird"));

    let harness = harness("generic", &mail).await;
    let engine = engine_for(&harness, "INBOX").await;

    let next = engine.initial_sync(&harness.account).await.unwrap();
    assert_eq!(next, SyncState::Poll);

    let store = &harness.ctx.store;
    let folder = store.folders(harness.account.id).await.unwrap()[0].clone();
    let local = store.local_uids(harness.account.id, folder.id).await.unwrap();
    assert_eq!(local, BTreeSet::from([101, 102, 103]));
    assert_eq!(store.count_messages(harness.account.id).await.unwrap(), 3);

    let info = store.imap_info(folder.id).await.unwrap().unwrap();
    assert_eq!(info.uidvalidity, 1);
    assert_eq!(info.uidnext, Some(104));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn deep_backfill_paces_itself_behind_the_newest_window() {
    let mail = FakeMail::new();
    mail.add_folder("INBOX", &[], 1, None);
    mail.put("INBOX", 1, plain("Subject: a\r\n\r\nfirst"));
    mail.put("INBOX", 2, plain("Subject: b\r\n\r\nsecond"));
    mail.put("INBOX", 3, plain("Subject: c\r\n\r\nthird"));

    let mut config = SyncConfig::default();
    config.download_batch = 1;
    config.backfill_window = 1;
    let harness = harness_with("generic", &mail, config).await;
    let engine = engine_for(&harness, "INBOX").await;

    let started = tokio::time::Instant::now();
    engine.initial_sync(&harness.account).await.unwrap();
    // Two UIDs sat behind the window; each throttled batch waits out the
    // pacing delay before the next one drains.
    assert!(started.elapsed() >= Duration::from_secs(2));

    let store = &harness.ctx.store;
    assert_eq!(store.count_messages(harness.account.id).await.unwrap(), 3);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn poll_picks_up_new_mail_and_expunges() {
    let mail = FakeMail::new();
    mail.add_folder("INBOX", &[], 1, None);
    mail.put("INBOX", 101, plain("Subject: a\r\n\r\nfirst"));
    mail.put("INBOX", 102, plain("Subject: b\r\n\r\nsecond"));
    mail.put("INBOX", 103, plain("Subject: c\r\n\r\nthird"));

    let harness = harness("generic", &mail).await;
    let engine = engine_for(&harness, "INBOX").await;
    engine.initial_sync(&harness.account).await.unwrap();

    mail.remove("INBOX", 102);
    mail.put("INBOX", 104, plain("Subject: d\r\n\r\nfourth"));

    let next = engine.poll_cycle(&harness.account).await.unwrap();
    assert_eq!(next, SyncState::Poll);

    let store = &harness.ctx.store;
    let folder = store.folders(harness.account.id).await.unwrap()[0].clone();
    let local = store.local_uids(harness.account.id, folder.id).await.unwrap();
    assert_eq!(local, BTreeSet::from([101, 103, 104]));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn condstore_poll_applies_flags_and_new_mail() {
    let mail = FakeMail::new();
    mail.add_folder("INBOX", &[], 1, Some(2));
    mail.put("INBOX", 101, plain("Subject: a\r\n\r\nfirst"));
    mail.put("INBOX", 102, plain("Subject: b\r\n\r\nsecond"));

    let harness = harness("generic", &mail).await;
    let engine = engine_for(&harness, "INBOX").await;
    engine.initial_sync(&harness.account).await.unwrap();
    let fetched_after_initial = mail.body_fetches();

    let seen = MessageFlags {
        seen: true,
        ..MessageFlags::default()
    };
    mail.set_flags("INBOX", 101, seen, 7);
    let mut newcomer = plain("Subject: d\r\n\r\nfourth");
    newcomer.modseq = 8;
    mail.put("INBOX", 104, newcomer);

    let next = engine.poll_cycle(&harness.account).await.unwrap();
    assert_eq!(next, SyncState::Poll);

    let store = &harness.ctx.store;
    let folder = store.folders(harness.account.id).await.unwrap()[0].clone();
    let record = store
        .uid_record(harness.account.id, folder.id, 101)
        .await
        .unwrap()
        .unwrap();
    assert!(record.is_seen);

    let local = store.local_uids(harness.account.id, folder.id).await.unwrap();
    assert_eq!(local, BTreeSet::from([101, 102, 104]));
    // One body for the new message; the flag change came in metadata only.
    assert_eq!(mail.body_fetches(), fetched_after_initial + 1);

    let info = store.imap_info(folder.id).await.unwrap().unwrap();
    assert_eq!(info.highestmodseq, Some(8));
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn uidvalidity_bump_renumbers_without_duplicating_messages() {
    let mail = FakeMail::new();
    mail.add_folder("INBOX", &[], 1, None);
    mail.put("INBOX", 101, plain("Subject: a\r\n\r\nfirst"));
    mail.put("INBOX", 102, plain("Subject: b\r\n\r\nsecond"));
    mail.put("INBOX", 103, plain("Subject: c\r\n\r\nthird"));

    let harness = harness("generic", &mail).await;
    let engine = engine_for(&harness, "INBOX").await;
    engine.initial_sync(&harness.account).await.unwrap();

    mail.renumber("INBOX", 2, 1000);

    let err = engine.poll_cycle(&harness.account).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UidInvalid);

    let next = engine.resync_uids(&harness.account).await.unwrap();
    assert_eq!(next, SyncState::Initial);

    let store = &harness.ctx.store;
    let folder = store.folders(harness.account.id).await.unwrap()[0].clone();
    let local = store.local_uids(harness.account.id, folder.id).await.unwrap();
    assert_eq!(local, BTreeSet::from([1101, 1102, 1103]));
    // Hashes reunited the new numbering with the old rows.
    assert_eq!(store.count_messages(harness.account.id).await.unwrap(), 3);

    let info = store.imap_info(folder.id).await.unwrap().unwrap();
    assert_eq!(info.uidvalidity, 2);
    assert_eq!(info.highestmodseq, None);

    // The follow-up initial pass finds nothing left to download.
    let next = engine.initial_sync(&harness.account).await.unwrap();
    assert_eq!(next, SyncState::Poll);
    assert_eq!(store.count_messages(harness.account.id).await.unwrap(), 3);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn gmail_renumber_relinks_by_message_id_without_downloading() {
    let mail = FakeMail::new();
    mail.add_folder("INBOX", &[], 1, Some(1));
    mail.add_folder("[Gmail]/All Mail", &[FolderAttr::All], 1, Some(1));
    mail.put(
        "[Gmail]/All Mail",
        10,
        gmail_msg("Subject: a\r\n\r\nfirst", 501, 9000, &[]),
    );
    mail.put(
        "[Gmail]/All Mail",
        11,
        gmail_msg("Subject: b\r\n\r\nsecond", 502, 9001, &[]),
    );

    let harness = harness("gmail", &mail).await;
    let engine = engine_for(&harness, "[Gmail]/All Mail").await;
    engine.initial_sync(&harness.account).await.unwrap();
    let fetched_after_initial = mail.body_fetches();

    mail.renumber("[Gmail]/All Mail", 2, 2000);

    let err = engine.poll_cycle(&harness.account).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UidInvalid);

    let next = engine.resync_uids(&harness.account).await.unwrap();
    assert_eq!(next, SyncState::Initial);
    // Every renumbered UID matched on X-GM-MSGID, so no bodies moved.
    assert_eq!(mail.body_fetches(), fetched_after_initial);

    let store = &harness.ctx.store;
    let folder = store
        .folders(harness.account.id)
        .await
        .unwrap()
        .into_iter()
        .find(|f| f.name == "[Gmail]/All Mail")
        .unwrap();
    let local = store.local_uids(harness.account.id, folder.id).await.unwrap();
    assert_eq!(local, BTreeSet::from([2010, 2011]));
    assert_eq!(store.count_messages(harness.account.id).await.unwrap(), 2);

    let info = store.imap_info(folder.id).await.unwrap().unwrap();
    assert_eq!(info.uidvalidity, 2);
}

#[tokio::test]
async fn gmail_dedup_links_the_second_folder_without_a_download() {
    let mail = FakeMail::new();
    mail.add_folder("INBOX", &[], 1, Some(1));
    mail.add_folder("[Gmail]/All Mail", &[FolderAttr::All], 1, Some(1));
    let raw = "Subject: hello\r\n\r\nbody";
    mail.put("INBOX", 5, gmail_msg(raw, 77, 9, &["\\Inbox"]));
    mail.put("[Gmail]/All Mail", 500, gmail_msg(raw, 77, 9, &["\\Inbox"]));

    let harness = harness("gmail", &mail).await;
    let inbox = engine_for(&harness, "INBOX").await;
    inbox.initial_sync(&harness.account).await.unwrap();
    assert_eq!(mail.body_fetches(), 1);

    let all_mail = engine_for(&harness, "[Gmail]/All Mail").await;
    all_mail.initial_sync(&harness.account).await.unwrap();
    // Known X-GM-MSGID: the All Mail copy linked instead of downloading.
    assert_eq!(mail.body_fetches(), 1);

    let store = &harness.ctx.store;
    assert_eq!(store.count_messages(harness.account.id).await.unwrap(), 1);

    let folders = store.folders(harness.account.id).await.unwrap();
    let inbox_folder = folders.iter().find(|f| f.name == "INBOX").unwrap();
    let all_folder = folders
        .iter()
        .find(|f| f.name == "[Gmail]/All Mail")
        .unwrap();
    let a = store
        .uid_record(harness.account.id, inbox_folder.id, 5)
        .await
        .unwrap()
        .unwrap();
    let b = store
        .uid_record(harness.account.id, all_folder.id, 500)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(a.message_id, b.message_id);
}

#[tokio::test]
async fn gmail_thread_expansion_downloads_siblings_together() {
    let mail = FakeMail::new();
    mail.add_folder("INBOX", &[], 1, Some(1));
    mail.add_folder("[Gmail]/All Mail", &[FolderAttr::All], 1, Some(1));
    mail.put(
        "[Gmail]/All Mail",
        10,
        gmail_msg("Subject: q\r\n\r\nquestion", 701, 9000, &[]),
    );
    mail.put(
        "[Gmail]/All Mail",
        11,
        gmail_msg("Subject: Re: q\r\n\r\nanswer", 702, 9000, &[]),
    );

    let harness = harness("gmail", &mail).await;
    let all_mail = engine_for(&harness, "[Gmail]/All Mail").await;
    all_mail.initial_sync(&harness.account).await.unwrap();

    let store = &harness.ctx.store;
    assert_eq!(store.count_messages(harness.account.id).await.unwrap(), 2);
    let folder = store
        .folders(harness.account.id)
        .await
        .unwrap()
        .into_iter()
        .find(|f| f.name == "[Gmail]/All Mail")
        .unwrap();
    let local = store.local_uids(harness.account.id, folder.id).await.unwrap();
    assert_eq!(local, BTreeSet::from([10, 11]));
    assert_eq!(mail.body_fetches(), 2);
}

#[tokio::test]
async fn finished_folders_exit_immediately() {
    let mail = FakeMail::new();
    mail.add_folder("INBOX", &[], 1, None);

    let harness = harness("generic", &mail).await;
    let engine = engine_for(&harness, "INBOX").await;
    let folder = harness.ctx.store.folders(harness.account.id).await.unwrap()[0].clone();
    harness
        .ctx
        .store
        .set_sync_state(folder.id, SyncState::Finish.as_str())
        .await
        .unwrap();

    engine.run().await.unwrap();
    let status = harness
        .ctx
        .store
        .sync_status(folder.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.state, "finish");
}

#[tokio::test]
async fn cancelled_account_run_still_reconciles_and_stops_cleanly() {
    let mail = FakeMail::new();
    mail.add_folder("INBOX", &[], 1, None);
    mail.put("INBOX", 1, plain("Subject: a\r\n\r\nfirst"));

    let harness = harness("generic", &mail).await;
    harness.ctx.shutdown.cancel();
    run_account(harness.ctx.clone()).await.unwrap();

    let folders = harness.ctx.store.folders(harness.account.id).await.unwrap();
    assert_eq!(folders.len(), 1);
    assert_eq!(folders[0].canonical_role.as_deref(), Some("inbox"));

    let account = harness.ctx.store.account(harness.account.id).await.unwrap();
    assert_eq!(account.sync_state, "stopped");
}
