use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use uuid::Uuid;

use super::client::{ImapClient, ImapCredentials};
use super::{FetchedUid, MailClient, RemoteFolder, SelectInfo, UidMeta};
use crate::config::PoolConfig;
use crate::error::SyncError;

/// What a checkout will be used for. Read and write traffic get separate
/// session budgets so bulk downloads cannot starve flag writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolIntent {
    Read,
    Write,
}

/// Dials and authenticates one session. The engine only ever sees
/// sessions through this seam, which is what lets tests substitute a
/// scripted server.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(&self) -> Result<Box<dyn MailClient>, SyncError>;
}

/// Factory over real IMAP connections.
pub struct ImapSessionFactory {
    creds: ImapCredentials,
}

impl ImapSessionFactory {
    pub fn new(creds: ImapCredentials) -> Self {
        Self { creds }
    }
}

#[async_trait]
impl SessionFactory for ImapSessionFactory {
    async fn create(&self) -> Result<Box<dyn MailClient>, SyncError> {
        Ok(Box::new(ImapClient::connect(&self.creds).await?))
    }
}

/// Bounded set of reusable sessions for one account and intent.
///
/// Sessions are created lazily: a checkout first waits for a free slot,
/// then reuses an idle session if one is parked, and only dials when the
/// idle list is empty.
pub struct ConnectionPool {
    factory: Arc<dyn SessionFactory>,
    permits: Arc<Semaphore>,
    parked: Arc<StdMutex<Vec<Box<dyn MailClient>>>>,
}

impl ConnectionPool {
    pub fn new(factory: Arc<dyn SessionFactory>, capacity: usize) -> Self {
        Self {
            factory,
            permits: Arc::new(Semaphore::new(capacity.max(1))),
            parked: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    /// Waits for a slot and returns a session guard. Dialing happens
    /// outside the idle-list lock.
    pub async fn checkout(&self) -> Result<PooledSession, SyncError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SyncError::Connection("connection pool closed".to_string()))?;

        let existing = {
            let mut parked = self.parked.lock().unwrap_or_else(PoisonError::into_inner);
            parked.pop()
        };
        let client = match existing {
            Some(client) => client,
            None => self.factory.create().await?,
        };

        Ok(PooledSession {
            client: Some(client),
            tainted: false,
            home: Arc::clone(&self.parked),
            _permit: permit,
        })
    }

    /// [`checkout`](Self::checkout) bounded by `wait`. An exhausted pool
    /// surfaces as a connection-class error instead of parking the caller
    /// indefinitely.
    pub async fn checkout_timeout(&self, wait: Duration) -> Result<PooledSession, SyncError> {
        match tokio::time::timeout(wait, self.checkout()).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Connection(format!(
                "no free imap session after {:?}",
                wait
            ))),
        }
    }
}

/// A checked-out session. Dropping it parks the session for reuse unless a
/// connection-class error was observed, in which case it is thrown away and
/// the next checkout dials fresh.
pub struct PooledSession {
    client: Option<Box<dyn MailClient>>,
    tainted: bool,
    home: Arc<StdMutex<Vec<Box<dyn MailClient>>>>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("tainted", &self.tainted)
            .finish()
    }
}

impl PooledSession {
    fn client_mut(&mut self) -> Result<&mut (dyn MailClient + 'static), SyncError> {
        match self.client.as_mut() {
            Some(client) => Ok(client.as_mut()),
            None => Err(SyncError::Connection(
                "session already discarded".to_string(),
            )),
        }
    }

    fn observe<T>(&mut self, result: Result<T, SyncError>) -> Result<T, SyncError> {
        if let Err(ref err) = result {
            if err.taints_session() {
                self.tainted = true;
            }
        }
        result
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            if self.tainted {
                tracing::debug!("discarding tainted imap session");
            } else {
                let mut parked = self.home.lock().unwrap_or_else(PoisonError::into_inner);
                parked.push(client);
            }
        }
    }
}

#[async_trait]
impl MailClient for PooledSession {
    async fn list_folders(&mut self) -> Result<Vec<RemoteFolder>, SyncError> {
        let result = self.client_mut()?.list_folders().await;
        self.observe(result)
    }

    async fn select(&mut self, folder: &str) -> Result<SelectInfo, SyncError> {
        let result = self.client_mut()?.select(folder).await;
        self.observe(result)
    }

    async fn search_all_uids(&mut self) -> Result<BTreeSet<u32>, SyncError> {
        let result = self.client_mut()?.search_all_uids().await;
        self.observe(result)
    }

    async fn search_uids_from(&mut self, lo: u32) -> Result<BTreeSet<u32>, SyncError> {
        let result = self.client_mut()?.search_uids_from(lo).await;
        self.observe(result)
    }

    async fn search_thread(&mut self, g_thrid: u64) -> Result<Vec<u32>, SyncError> {
        let result = self.client_mut()?.search_thread(g_thrid).await;
        self.observe(result)
    }

    async fn fetch_metadata(&mut self, uids: &[u32]) -> Result<Vec<UidMeta>, SyncError> {
        let result = self.client_mut()?.fetch_metadata(uids).await;
        self.observe(result)
    }

    async fn fetch_flags_since(&mut self, lo: u32) -> Result<Vec<UidMeta>, SyncError> {
        let result = self.client_mut()?.fetch_flags_since(lo).await;
        self.observe(result)
    }

    async fn fetch_changed_since(&mut self, modseq: u64) -> Result<Vec<UidMeta>, SyncError> {
        let result = self.client_mut()?.fetch_changed_since(modseq).await;
        self.observe(result)
    }

    async fn fetch_bodies(&mut self, uids: &[u32]) -> Result<Vec<FetchedUid>, SyncError> {
        let result = self.client_mut()?.fetch_bodies(uids).await;
        self.observe(result)
    }

    async fn idle(&mut self, timeout: Duration) -> Result<bool, SyncError> {
        let result = self.client_mut()?.idle(timeout).await;
        self.observe(result)
    }
}

/// Owns every pool in the process, keyed by account and intent. Pools are
/// created on first use and live until the manager is dropped.
pub struct PoolManager {
    config: PoolConfig,
    pools: StdMutex<HashMap<(Uuid, PoolIntent), Arc<ConnectionPool>>>,
}

impl PoolManager {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            pools: StdMutex::new(HashMap::new()),
        }
    }

    /// Returns the pool for this account and intent, creating it on first
    /// use. `size_override` is the account row's session count, if set;
    /// sizing and the factory only matter when the pool does not exist
    /// yet.
    pub fn pool(
        &self,
        account_id: Uuid,
        intent: PoolIntent,
        size_override: Option<usize>,
        factory: &Arc<dyn SessionFactory>,
    ) -> Arc<ConnectionPool> {
        let capacity = size_override.unwrap_or(match intent {
            PoolIntent::Read => self.config.read_sessions,
            PoolIntent::Write => self.config.write_sessions,
        });
        let mut pools = self.pools.lock().unwrap_or_else(PoisonError::into_inner);
        let pool = pools
            .entry((account_id, intent))
            .or_insert_with(|| Arc::new(ConnectionPool::new(Arc::clone(factory), capacity)));
        Arc::clone(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubClient {
        fail_select: bool,
    }

    #[async_trait]
    impl MailClient for StubClient {
        async fn list_folders(&mut self) -> Result<Vec<RemoteFolder>, SyncError> {
            Ok(Vec::new())
        }

        async fn select(&mut self, folder: &str) -> Result<SelectInfo, SyncError> {
            if self.fail_select {
                return Err(SyncError::Connection("reset by peer".to_string()));
            }
            Ok(SelectInfo {
                folder: folder.to_string(),
                uid_validity: 1,
                uid_next: Some(1),
                highest_modseq: None,
                exists: 0,
            })
        }

        async fn search_all_uids(&mut self) -> Result<BTreeSet<u32>, SyncError> {
            Ok(BTreeSet::new())
        }

        async fn search_uids_from(&mut self, _lo: u32) -> Result<BTreeSet<u32>, SyncError> {
            Ok(BTreeSet::new())
        }

        async fn search_thread(&mut self, _g_thrid: u64) -> Result<Vec<u32>, SyncError> {
            Ok(Vec::new())
        }

        async fn fetch_metadata(&mut self, _uids: &[u32]) -> Result<Vec<UidMeta>, SyncError> {
            Ok(Vec::new())
        }

        async fn fetch_flags_since(&mut self, _lo: u32) -> Result<Vec<UidMeta>, SyncError> {
            Ok(Vec::new())
        }

        async fn fetch_changed_since(&mut self, _modseq: u64) -> Result<Vec<UidMeta>, SyncError> {
            Ok(Vec::new())
        }

        async fn fetch_bodies(&mut self, _uids: &[u32]) -> Result<Vec<FetchedUid>, SyncError> {
            Ok(Vec::new())
        }

        async fn idle(&mut self, _timeout: Duration) -> Result<bool, SyncError> {
            Ok(false)
        }
    }

    struct CountingFactory {
        created: AtomicUsize,
        fail_select: bool,
    }

    impl CountingFactory {
        fn new(fail_select: bool) -> Arc<Self> {
            Arc::new(Self {
                created: AtomicUsize::new(0),
                fail_select,
            })
        }
    }

    #[async_trait]
    impl SessionFactory for CountingFactory {
        async fn create(&self) -> Result<Box<dyn MailClient>, SyncError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(StubClient {
                fail_select: self.fail_select,
            }))
        }
    }

    #[tokio::test]
    async fn parked_sessions_are_reused() {
        let counting = CountingFactory::new(false);
        let factory: Arc<dyn SessionFactory> = counting.clone();
        let pool = ConnectionPool::new(factory, 2);

        let mut session = pool.checkout().await.unwrap();
        session.select("INBOX").await.unwrap();
        drop(session);

        let mut session = pool.checkout().await.unwrap();
        session.select("INBOX").await.unwrap();
        drop(session);

        assert_eq!(counting.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connection_errors_discard_the_session() {
        let counting = CountingFactory::new(true);
        let factory: Arc<dyn SessionFactory> = counting.clone();
        let pool = ConnectionPool::new(factory, 2);

        let mut session = pool.checkout().await.unwrap();
        assert!(session.select("INBOX").await.is_err());
        drop(session);

        let _session = pool.checkout().await.unwrap();
        assert_eq!(counting.created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn capacity_bounds_concurrent_checkouts() {
        let counting = CountingFactory::new(false);
        let factory: Arc<dyn SessionFactory> = counting.clone();
        let pool = ConnectionPool::new(factory, 1);

        let held = pool.checkout().await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(50), pool.checkout()).await;
        assert!(blocked.is_err(), "second checkout should wait for the slot");

        drop(held);
        let _session = pool.checkout().await.unwrap();
        assert_eq!(counting.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn bounded_checkout_gives_up_when_the_pool_is_busy() {
        let counting = CountingFactory::new(false);
        let factory: Arc<dyn SessionFactory> = counting.clone();
        let pool = ConnectionPool::new(factory, 1);

        let _held = pool.checkout().await.unwrap();
        let err = pool
            .checkout_timeout(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Connection(_)));
    }

    #[tokio::test]
    async fn manager_keys_pools_by_account_and_intent() {
        let manager = PoolManager::new(PoolConfig {
            read_sessions: 2,
            write_sessions: 1,
        });
        let factory: Arc<dyn SessionFactory> = CountingFactory::new(false);
        let account = Uuid::new_v4();

        let read = manager.pool(account, PoolIntent::Read, None, &factory);
        let read_again = manager.pool(account, PoolIntent::Read, None, &factory);
        let write = manager.pool(account, PoolIntent::Write, None, &factory);

        assert!(Arc::ptr_eq(&read, &read_again));
        assert!(!Arc::ptr_eq(&read, &write));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn account_override_widens_the_default_budget() {
        let manager = PoolManager::new(PoolConfig {
            read_sessions: 2,
            write_sessions: 1,
        });
        let factory: Arc<dyn SessionFactory> = CountingFactory::new(false);

        let pool = manager.pool(Uuid::new_v4(), PoolIntent::Write, Some(2), &factory);
        let _held = pool.checkout().await.unwrap();
        let second = tokio::time::timeout(Duration::from_millis(50), pool.checkout()).await;
        assert!(second.is_ok(), "override should allow a second writer");
    }
}
