use std::collections::BTreeSet;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use async_imap::types::{Fetch, Flag, NameAttribute};
use async_imap::Session;
use async_native_tls::TlsStream;
use async_trait::async_trait;
use chrono::Utc;
use futures::io::{AsyncRead, AsyncWrite};
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use super::{FetchedUid, FolderAttr, MailClient, MessageFlags, RemoteFolder, SelectInfo, UidMeta};
use crate::error::SyncError;

/// Wrapper for either TLS or plain IMAP stream
enum StreamWrapper {
    Tls(TlsStream<Compat<TcpStream>>),
    Plain(Compat<TcpStream>),
}

impl AsyncRead for StreamWrapper {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            StreamWrapper::Tls(s) => Pin::new(s).poll_read(cx, buf),
            StreamWrapper::Plain(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for StreamWrapper {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            StreamWrapper::Tls(s) => Pin::new(s).poll_write(cx, buf),
            StreamWrapper::Plain(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            StreamWrapper::Tls(s) => Pin::new(s).poll_flush(cx),
            StreamWrapper::Plain(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            StreamWrapper::Tls(s) => Pin::new(s).poll_close(cx),
            StreamWrapper::Plain(s) => Pin::new(s).poll_close(cx),
        }
    }
}

impl std::fmt::Debug for StreamWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamWrapper::Tls(_) => write!(f, "StreamWrapper::Tls"),
            StreamWrapper::Plain(_) => write!(f, "StreamWrapper::Plain"),
        }
    }
}

unsafe impl Send for StreamWrapper {}
impl Unpin for StreamWrapper {}

/// Everything needed to open one authenticated session.
#[derive(Debug, Clone)]
pub struct ImapCredentials {
    pub host: String,
    pub port: u16,
    pub email: String,
    pub password: String,
    /// Enables the X-GM-* fetch items and thread searches.
    pub gmail: bool,
}

const META_BATCH: usize = 250;
const BODY_BATCH: usize = 50;

/// A live authenticated IMAP session.
///
/// The session is kept in an `Option` because IDLE consumes it and hands it
/// back when the wait ends.
pub struct ImapClient {
    gmail: bool,
    can_idle: bool,
    session: Option<Session<StreamWrapper>>,
}

impl std::fmt::Debug for ImapClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImapClient")
            .field("gmail", &self.gmail)
            .field("can_idle", &self.can_idle)
            .finish()
    }
}

impl ImapClient {
    pub async fn connect(creds: &ImapCredentials) -> Result<Self, SyncError> {
        tracing::info!(host = %creds.host, port = creds.port, "connecting to imap server");

        let tcp = TcpStream::connect((creds.host.as_str(), creds.port)).await?;

        let stream = if creds.port == 993 || creds.port == 3993 {
            let tls = async_native_tls::TlsConnector::new();
            let tls_stream = tls.connect(&creds.host, tcp.compat()).await?;
            StreamWrapper::Tls(tls_stream)
        } else {
            StreamWrapper::Plain(tcp.compat())
        };

        let client = async_imap::Client::new(stream);

        let mut session = match client.login(&creds.email, &creds.password).await {
            Ok(session) => session,
            Err((err, _client)) => {
                // The server answered and refused: credentials, not the
                // network. Transport failures stay retryable.
                return Err(match SyncError::from(err) {
                    SyncError::Connection(msg) => SyncError::Connection(msg),
                    other => SyncError::Validation {
                        email: creds.email.clone(),
                        reason: other.to_string(),
                    },
                });
            }
        };

        let can_idle = match session.capabilities().await {
            Ok(caps) => caps.has_str("IDLE"),
            Err(err) => {
                tracing::debug!("capability probe failed: {}", err);
                false
            }
        };

        tracing::info!(email = %creds.email, can_idle, "imap login successful");
        Ok(Self {
            gmail: creds.gmail,
            can_idle,
            session: Some(session),
        })
    }

    fn session(&mut self) -> Result<&mut Session<StreamWrapper>, SyncError> {
        self.session
            .as_mut()
            .ok_or_else(|| SyncError::Connection("imap session was lost".to_string()))
    }

    fn metadata_items(&self) -> &'static str {
        if self.gmail {
            "(UID FLAGS X-GM-MSGID X-GM-THRID X-GM-LABELS)"
        } else {
            "(UID FLAGS)"
        }
    }

    fn body_items(&self) -> &'static str {
        if self.gmail {
            "(UID FLAGS INTERNALDATE BODY.PEEK[] X-GM-MSGID X-GM-THRID X-GM-LABELS)"
        } else {
            "(UID FLAGS INTERNALDATE BODY.PEEK[])"
        }
    }

    async fn collect_meta(&mut self, set: &str, items: &str) -> Result<Vec<UidMeta>, SyncError> {
        let gmail = self.gmail;
        let session = self.session()?;
        let mut stream = session.uid_fetch(set, items).await?;
        let mut out = Vec::new();
        while let Some(result) = stream.next().await {
            let fetch = match result {
                Ok(fetch) => fetch,
                Err(err) => {
                    tracing::debug!("skipping malformed fetch response: {}", err);
                    continue;
                }
            };
            match meta_from(&fetch, gmail) {
                Some(meta) => out.push(meta),
                // Unsolicited response, or a server that elided the UID.
                None => tracing::debug!("ignoring fetch response without a uid"),
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl MailClient for ImapClient {
    async fn list_folders(&mut self) -> Result<Vec<RemoteFolder>, SyncError> {
        let session = self.session()?;
        let mut stream = session.list(Some(""), Some("*")).await?;
        let mut folders = Vec::new();
        while let Some(result) = stream.next().await {
            let name = result?;
            folders.push(RemoteFolder {
                name: name.name().to_string(),
                attrs: name.attributes().iter().map(folder_attr).collect(),
            });
        }
        Ok(folders)
    }

    async fn select(&mut self, folder: &str) -> Result<SelectInfo, SyncError> {
        let session = self.session()?;

        // Prefer SELECT (CONDSTORE) so HIGHESTMODSEQ comes back; servers
        // without the extension reject it and get a plain SELECT instead.
        let mailbox = match session.select_condstore(folder).await {
            Ok(mailbox) => mailbox,
            Err(err) => {
                tracing::debug!(folder, "condstore select failed, retrying plain: {}", err);
                match session.select(folder).await {
                    Ok(mailbox) => mailbox,
                    // NO on SELECT means the folder itself is gone or
                    // unselectable, not a transport problem.
                    Err(async_imap::error::Error::No(reason)) => {
                        tracing::warn!(folder, %reason, "select refused");
                        return Err(SyncError::FolderMissing(folder.to_string()));
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        };

        let uid_validity = mailbox.uid_validity.ok_or_else(|| {
            SyncError::Protocol(format!("server reported no uidvalidity for {folder}"))
        })?;

        Ok(SelectInfo {
            folder: folder.to_string(),
            uid_validity,
            uid_next: mailbox.uid_next,
            highest_modseq: mailbox.highest_modseq,
            exists: mailbox.exists,
        })
    }

    async fn search_all_uids(&mut self) -> Result<BTreeSet<u32>, SyncError> {
        let session = self.session()?;
        let uids = session.uid_search("ALL").await?;
        Ok(uids.into_iter().collect())
    }

    async fn search_uids_from(&mut self, lo: u32) -> Result<BTreeSet<u32>, SyncError> {
        let session = self.session()?;
        let uids = session.uid_search(&format!("UID {lo}:*")).await?;
        Ok(uids.into_iter().collect())
    }

    async fn search_thread(&mut self, g_thrid: u64) -> Result<Vec<u32>, SyncError> {
        let session = self.session()?;
        let uids = session.uid_search(&format!("X-GM-THRID {g_thrid}")).await?;
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        Ok(uids)
    }

    async fn fetch_metadata(&mut self, uids: &[u32]) -> Result<Vec<UidMeta>, SyncError> {
        let items = self.metadata_items();
        let mut out = Vec::with_capacity(uids.len());
        for chunk in uids.chunks(META_BATCH) {
            let set = uid_sequence(chunk);
            out.extend(self.collect_meta(&set, items).await?);
        }
        Ok(out)
    }

    async fn fetch_flags_since(&mut self, lo: u32) -> Result<Vec<UidMeta>, SyncError> {
        let items = self.metadata_items();
        self.collect_meta(&format!("{lo}:*"), items).await
    }

    async fn fetch_changed_since(&mut self, modseq: u64) -> Result<Vec<UidMeta>, SyncError> {
        let items = if self.gmail {
            format!("(UID FLAGS X-GM-MSGID X-GM-THRID X-GM-LABELS) (CHANGEDSINCE {modseq})")
        } else {
            format!("(UID FLAGS) (CHANGEDSINCE {modseq})")
        };
        self.collect_meta("1:*", &items).await
    }

    async fn fetch_bodies(&mut self, uids: &[u32]) -> Result<Vec<FetchedUid>, SyncError> {
        let gmail = self.gmail;
        let items = self.body_items();
        let mut out = Vec::with_capacity(uids.len());

        for chunk in uids.chunks(BODY_BATCH) {
            let set = uid_sequence(chunk);
            let session = self.session()?;
            let mut stream = session.uid_fetch(&set, items).await?;
            while let Some(result) = stream.next().await {
                let fetch = result?;
                let Some(meta) = meta_from(&fetch, gmail) else {
                    tracing::debug!("ignoring fetch response without a uid");
                    continue;
                };
                let Some(body) = fetch.body() else {
                    // EXPUNGE raced the fetch; the caller treats absence as
                    // a vanished UID.
                    tracing::debug!(uid = meta.uid, "fetch returned no body");
                    continue;
                };
                out.push(FetchedUid {
                    meta,
                    raw: body.to_vec(),
                    internal_date: fetch.internal_date().map(|d| d.with_timezone(&Utc)),
                });
            }
        }
        Ok(out)
    }

    async fn idle(&mut self, timeout: Duration) -> Result<bool, SyncError> {
        if !self.can_idle {
            // Fake idle: the poll loop provides the cadence instead.
            tokio::time::sleep(timeout).await;
            return Ok(false);
        }

        let session = self
            .session
            .take()
            .ok_or_else(|| SyncError::Connection("imap session was lost".to_string()))?;

        let mut handle = session.idle();
        if let Err(err) = handle.init().await {
            return Err(err.into());
        }

        let (idle_wait, _stop) = handle.wait();
        let activity = match tokio::time::timeout(timeout, idle_wait).await {
            Ok(Ok(_response)) => true,
            Ok(Err(err)) => return Err(err.into()),
            Err(_elapsed) => false,
        };

        let session = handle.done().await?;
        self.session = Some(session);
        Ok(activity)
    }
}

fn uid_sequence(uids: &[u32]) -> String {
    uids.iter()
        .map(|u| u.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn folder_attr(attr: &NameAttribute) -> FolderAttr {
    match attr {
        NameAttribute::NoSelect => FolderAttr::NoSelect,
        NameAttribute::All => FolderAttr::All,
        NameAttribute::Archive => FolderAttr::Archive,
        NameAttribute::Drafts => FolderAttr::Drafts,
        NameAttribute::Flagged => FolderAttr::Flagged,
        NameAttribute::Junk => FolderAttr::Junk,
        NameAttribute::Sent => FolderAttr::Sent,
        NameAttribute::Trash => FolderAttr::Trash,
        // Extensions keep their raw string, e.g. Gmail's "\Important".
        NameAttribute::Extension(value) => FolderAttr::Other(value.to_string()),
        other => FolderAttr::Other(format!("{other:?}")),
    }
}

fn meta_from(fetch: &Fetch, gmail: bool) -> Option<UidMeta> {
    let uid = fetch.uid?;
    Some(UidMeta {
        uid,
        flags: flags_from(fetch),
        labels: gmail.then(|| fetch.gmail_labels()),
        g_msgid: if gmail { fetch.gmail_msgid() } else { None },
        g_thrid: if gmail { fetch.gmail_thrid() } else { None },
        modseq: fetch.modseq,
    })
}

fn flags_from(fetch: &Fetch) -> MessageFlags {
    let mut flags = MessageFlags::default();
    for flag in fetch.flags() {
        match flag {
            Flag::Seen => flags.seen = true,
            Flag::Answered => flags.answered = true,
            Flag::Flagged => flags.flagged = true,
            Flag::Deleted => flags.deleted = true,
            Flag::Draft => flags.draft = true,
            Flag::Recent => flags.recent = true,
            _ => {}
        }
    }
    flags
}
