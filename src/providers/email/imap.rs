//! IMAP provider implementation.
//!
//! This module provides an [`EmailProvider`] implementation for any IMAP4rev1
//! server, including Gmail and the Proton Mail Bridge.
//!
//! # Protocol Details
//!
//! - Uses IMAP4rev1 (RFC 3501) via `async-imap`, over `tokio-rustls` or plain
//!   TCP bridged with the `tokio-util` compat layer
//! - Messages are addressed as `FOLDER:UID`; UIDs survive expunges, sequence
//!   numbers do not
//! - Listing uses `BODY.PEEK[]` so it never sets `\Seen`
//! - Move prefers `UID MOVE` and falls back to COPY + `\Deleted` + EXPUNGE
//! - Expunges are limited to the one UID when the server advertises UIDPLUS
//! - Every command is bounded by [`MAILBOX_TIMEOUT`]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_imap::types::{Fetch, Flag};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use futures::TryStreamExt;
use mail_parser::{Addr, MessageParser};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::rustls::ClientConfig;
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tokio_util::either::Either;

use super::{EmailProvider, ProviderError, Result, MAILBOX_TIMEOUT};
use crate::config::{keys, ConfigError, ProviderKind, ResolvedConfig};
use crate::domain::{make_preview, Email, EmailId, Sender};
use crate::providers::PROBE_TIMEOUT;

/// IMAP connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImapConfig {
    /// IMAP server hostname.
    pub host: String,
    /// IMAP server port (typically 993 for TLS, 143 for plain).
    pub port: u16,
    /// Whether to wrap the connection in TLS.
    pub use_tls: bool,
    /// Login name.
    pub username: String,
    /// Password or app-specific password.
    pub password: String,
}

impl ImapConfig {
    /// Creates a configuration for a typical TLS setup on port 993.
    pub fn tls(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port: 993,
            use_tls: true,
            username: username.into(),
            password: password.into(),
        }
    }

    /// Reads the `email.imap.*` keys, applying per-provider defaults.
    ///
    /// `gmail` defaults to `imap.gmail.com:993` over TLS and `proton` to the
    /// local Bridge on `127.0.0.1:1143` without TLS. Explicit keys win.
    pub fn from_config(
        config: &ResolvedConfig,
        kind: ProviderKind,
    ) -> std::result::Result<Self, ConfigError> {
        let (default_host, default_port, default_tls) = match kind {
            ProviderKind::Gmail => (Some("imap.gmail.com"), 993, true),
            ProviderKind::Proton => (Some("127.0.0.1"), 1143, false),
            ProviderKind::Imap | ProviderKind::Office365 => (None, 993, true),
        };

        let host = match (config.get(keys::IMAP_HOST), default_host) {
            (Some(host), _) if !host.trim().is_empty() => host.trim().to_string(),
            (_, Some(host)) => host.to_string(),
            _ => return Err(ConfigError::Missing(keys::IMAP_HOST.to_string())),
        };

        Ok(Self {
            host,
            port: config.get_parsed(keys::IMAP_PORT)?.unwrap_or(default_port),
            use_tls: config.get_bool(keys::IMAP_SSL)?.unwrap_or(default_tls),
            username: config.require(keys::EMAIL_USERNAME)?.to_string(),
            password: config.require(keys::EMAIL_PASSWORD)?.to_string(),
        })
    }
}

/// TLS or plain TCP, behind the futures-io compat layer async-imap expects.
type ImapStream = Compat<Either<TlsStream<TcpStream>, TcpStream>>;

/// Type alias for the IMAP session.
type ImapSession = async_imap::Session<ImapStream>;

/// Logged-in session plus the folder it currently has selected.
struct Connection {
    session: ImapSession,
    selected: Option<String>,
    /// Server accepts `UID EXPUNGE` (RFC 4315).
    uidplus: bool,
}

impl Connection {
    /// Selects `path` read-write unless it is already selected.
    async fn select(&mut self, path: &str) -> Result<()> {
        if self.selected.as_deref() == Some(path) {
            return Ok(());
        }
        self.selected = None;
        timed("SELECT", MAILBOX_TIMEOUT, self.session.select(path)).await?;
        self.selected = Some(path.to_string());
        Ok(())
    }
}

/// IMAP email provider.
///
/// # Example
///
/// ```ignore
/// use inbox_assistant::providers::email::{EmailProvider, ImapConfig, ImapProvider};
///
/// let config = ImapConfig::tls("imap.example.com", "me@example.com", "secret");
/// let provider = ImapProvider::connect(config, ProviderKind::Imap).await?;
///
/// let emails = provider.get_emails("inbox", 50).await?;
/// ```
pub struct ImapProvider {
    /// Which configured name this provider was built for.
    kind: ProviderKind,
    /// Server configuration.
    config: ImapConfig,
    /// Live session.
    connection: Mutex<Connection>,
}

impl ImapProvider {
    /// Connects and logs in.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Connection`] if the server is unreachable and
    /// [`ProviderError::Authentication`] if the login is rejected.
    pub async fn connect(config: ImapConfig, kind: ProviderKind) -> Result<Self> {
        let stream = tokio::time::timeout(MAILBOX_TIMEOUT, Self::open_stream(&config))
            .await
            .map_err(|_| ProviderError::Timeout(MAILBOX_TIMEOUT))??;

        let client = async_imap::Client::new(stream);

        let mut session = tokio::time::timeout(
            MAILBOX_TIMEOUT,
            client.login(&config.username, &config.password),
        )
        .await
        .map_err(|_| ProviderError::Timeout(MAILBOX_TIMEOUT))?
        .map_err(|e| ProviderError::Authentication(format!("IMAP login failed: {}", e.0)))?;

        let uidplus = match timed("CAPABILITY", MAILBOX_TIMEOUT, session.capabilities()).await {
            Ok(caps) => caps.has_str("UIDPLUS"),
            Err(e) => {
                tracing::warn!(error = %e, "CAPABILITY failed, assuming no UIDPLUS");
                false
            }
        };

        tracing::info!(host = %config.host, port = config.port, tls = config.use_tls, uidplus, "Connected to IMAP server");

        Ok(Self {
            kind,
            config,
            connection: Mutex::new(Connection {
                session,
                selected: None,
                uidplus,
            }),
        })
    }

    /// Returns the server configuration.
    pub fn config(&self) -> &ImapConfig {
        &self.config
    }

    /// Opens the TCP connection and, if configured, the TLS layer.
    async fn open_stream(config: &ImapConfig) -> Result<ImapStream> {
        let tcp_stream = TcpStream::connect((config.host.as_str(), config.port))
            .await
            .map_err(|e| ProviderError::Connection(format!("TCP connect failed: {}", e)))?;

        if !config.use_tls {
            return Ok(Either::Right(tcp_stream).compat());
        }

        let tls_config = ClientConfig::builder()
            .with_root_certificates(tokio_rustls::rustls::RootCertStore::from_iter(
                webpki_roots::TLS_SERVER_ROOTS.iter().cloned(),
            ))
            .with_no_client_auth();

        let connector = TlsConnector::from(Arc::new(tls_config));
        let server_name = ServerName::try_from(config.host.clone())
            .map_err(|e| ProviderError::Connection(format!("invalid server name: {}", e)))?;

        let tls_stream = connector
            .connect(server_name, tcp_stream)
            .await
            .map_err(|e| ProviderError::Connection(format!("TLS handshake failed: {}", e)))?;

        Ok(Either::Left(tls_stream).compat())
    }

    /// Converts a friendly folder name to the server's mailbox path.
    fn folder_path(kind: ProviderKind, folder: &str) -> String {
        let gmail = kind == ProviderKind::Gmail;
        match (folder.to_uppercase().as_str(), gmail) {
            ("INBOX", _) => "INBOX".to_string(),
            ("ARCHIVE", true) => "[Gmail]/All Mail".to_string(),
            ("TRASH", true) => "[Gmail]/Trash".to_string(),
            ("SPAM" | "JUNK", true) => "[Gmail]/Spam".to_string(),
            ("SENT", true) => "[Gmail]/Sent Mail".to_string(),
            ("DRAFTS", true) => "[Gmail]/Drafts".to_string(),
            ("ARCHIVE", false) => "Archive".to_string(),
            ("TRASH", false) => "Trash".to_string(),
            ("SPAM" | "JUNK", false) => "Junk".to_string(),
            ("SENT", false) => "Sent".to_string(),
            ("DRAFTS", false) => "Drafts".to_string(),
            _ => folder.to_string(),
        }
    }

    /// Quotes a mailbox name for commands async-imap sends verbatim.
    fn quote_mailbox(name: &str) -> String {
        format!("\"{}\"", name.replace('\\', "\\\\").replace('"', "\\\""))
    }

    /// Splits a `FOLDER:UID` identifier.
    fn parse_id(id: &EmailId) -> Result<(&str, u32)> {
        id.as_str()
            .rsplit_once(':')
            .and_then(|(folder, uid)| Some((folder, uid.parse().ok()?)))
            .filter(|(folder, _)| !folder.is_empty())
            .ok_or_else(|| ProviderError::InvalidRequest(format!("invalid IMAP id {:?}", id.0)))
    }

    /// Parses a mail_parser Addr to our Sender type.
    fn parse_address(addr: &Addr) -> Sender {
        let address = addr.address().unwrap_or("").to_string();
        match addr.name() {
            Some(name) => Sender::with_name(address, name),
            None => Sender::new(address),
        }
    }

    /// Builds an [`Email`] from a raw RFC 5322 message.
    fn email_from_raw(
        raw: &[u8],
        uid: u32,
        path: &str,
        folder: &str,
        is_read: bool,
        internal_date: Option<DateTime<FixedOffset>>,
    ) -> Option<Email> {
        let message = MessageParser::default().parse(raw)?;

        let from = message
            .from()
            .and_then(|addr| addr.as_list())
            .and_then(|list| list.first())
            .map(Self::parse_address)
            .unwrap_or_else(|| Sender::new(String::new()));

        let received = message
            .date()
            .map(|d| d.to_rfc822())
            .or_else(|| internal_date.map(|d| d.to_rfc2822()))
            .unwrap_or_default();

        let preview = message
            .body_text(0)
            .map(|text| make_preview(&text))
            .unwrap_or_default();

        Some(Email {
            id: EmailId::from(format!("{}:{}", path, uid)),
            subject: message.subject().unwrap_or_default().to_string(),
            from,
            preview,
            received,
            is_read,
            folder: Some(folder.to_string()),
        })
    }

    /// Converts a fetch result to an [`Email`].
    fn parse_fetch(fetch: &Fetch, path: &str, folder: &str) -> Option<Email> {
        let uid = fetch.uid?;
        let is_read = fetch.flags().any(|flag| matches!(flag, Flag::Seen));
        Self::email_from_raw(fetch.body()?, uid, path, folder, is_read, fetch.internal_date())
    }

    /// Adds flags to one message.
    async fn store_flags(conn: &mut Connection, uid: u32, flags: &str) -> Result<()> {
        let session = &mut conn.session;
        timed("STORE", MAILBOX_TIMEOUT, async {
            session
                .uid_store(uid.to_string(), format!("+FLAGS ({})", flags))
                .await?
                .try_collect::<Vec<_>>()
                .await
        })
        .await?;
        Ok(())
    }

    /// Permanently removes `uid` once it is flagged `\Deleted`.
    ///
    /// Without UIDPLUS the only option is a plain EXPUNGE, which also removes
    /// any other message in the folder already flagged `\Deleted`.
    async fn expunge(conn: &mut Connection, uid: u32) -> Result<()> {
        let session = &mut conn.session;
        if conn.uidplus {
            timed("EXPUNGE", MAILBOX_TIMEOUT, async {
                session
                    .uid_expunge(uid.to_string())
                    .await?
                    .try_collect::<Vec<_>>()
                    .await
            })
            .await?;
        } else {
            tracing::debug!(uid, "Server lacks UIDPLUS, expunging whole folder");
            timed("EXPUNGE", MAILBOX_TIMEOUT, async {
                session.expunge().await?.try_collect::<Vec<_>>().await
            })
            .await?;
        }
        Ok(())
    }
}

/// Runs one IMAP command under a deadline and maps its failure.
async fn timed<T, F>(command: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, async_imap::error::Error>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(imap_error(command, e)),
        Err(_) => Err(ProviderError::Timeout(limit)),
    }
}

fn imap_error(command: &str, error: async_imap::error::Error) -> ProviderError {
    use async_imap::error::Error;

    match error {
        Error::No(msg) => ProviderError::Provider(format!("{} rejected: {}", command, msg)),
        Error::Bad(msg) => ProviderError::InvalidRequest(format!("{}: {}", command, msg)),
        Error::Io(e) => ProviderError::Connection(format!("{}: {}", command, e)),
        Error::ConnectionLost => ProviderError::Connection(format!("{}: connection lost", command)),
        other => ProviderError::Internal(format!("{} failed: {}", command, other)),
    }
}

#[async_trait]
impl EmailProvider for ImapProvider {
    fn provider_type(&self) -> ProviderKind {
        self.kind
    }

    async fn get_emails(&self, folder: &str, limit: usize) -> Result<Vec<Email>> {
        let path = Self::folder_path(self.kind, folder);
        let mut conn = self.connection.lock().await;

        conn.select(&path).await?;

        let uids = timed("SEARCH", MAILBOX_TIMEOUT, conn.session.uid_search("ALL")).await?;

        // Highest UIDs are the most recently delivered
        let mut uid_list: Vec<u32> = uids.into_iter().collect();
        uid_list.sort_unstable_by(|a, b| b.cmp(a));
        uid_list.truncate(limit);

        if uid_list.is_empty() {
            return Ok(vec![]);
        }

        let uid_seq = uid_list
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let session = &mut conn.session;
        let fetches: Vec<Fetch> = timed("FETCH", MAILBOX_TIMEOUT, async {
            session
                .uid_fetch(&uid_seq, "(UID FLAGS INTERNALDATE BODY.PEEK[])")
                .await?
                .try_collect()
                .await
        })
        .await?;

        let mut emails: Vec<(u32, Email)> = fetches
            .iter()
            .filter_map(|fetch| {
                let email = Self::parse_fetch(fetch, &path, folder);
                if email.is_none() {
                    tracing::warn!(uid = ?fetch.uid, folder = %path, "Skipping unparseable message");
                }
                Some((fetch.uid?, email?))
            })
            .collect();
        emails.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        tracing::debug!(folder = %path, count = emails.len(), "Fetched IMAP messages");
        Ok(emails.into_iter().map(|(_, email)| email).collect())
    }

    async fn move_email(&self, id: &EmailId, destination: &str) -> Result<()> {
        let (source, uid) = Self::parse_id(id)?;
        let destination = Self::folder_path(self.kind, destination);
        let mut conn = self.connection.lock().await;

        conn.select(source).await?;

        let uid_str = uid.to_string();
        let moved = timed("MOVE", MAILBOX_TIMEOUT, conn.session.uid_mv(&uid_str, &destination)).await;

        if let Err(e) = moved {
            tracing::debug!(error = %e, "UID MOVE unavailable, falling back to COPY");

            timed(
                "COPY",
                MAILBOX_TIMEOUT,
                conn.session
                    .uid_copy(&uid_str, Self::quote_mailbox(&destination)),
            )
            .await?;
            Self::store_flags(&mut conn, uid, "\\Deleted").await?;
            Self::expunge(&mut conn, uid).await?;
        }

        Ok(())
    }

    async fn mark_read(&self, id: &EmailId) -> Result<()> {
        let (folder, uid) = Self::parse_id(id)?;
        let mut conn = self.connection.lock().await;

        conn.select(folder).await?;
        Self::store_flags(&mut conn, uid, "\\Seen").await
    }

    async fn delete_email(&self, id: &EmailId) -> Result<()> {
        let (folder, uid) = Self::parse_id(id)?;
        let mut conn = self.connection.lock().await;

        conn.select(folder).await?;
        Self::store_flags(&mut conn, uid, "\\Deleted").await?;
        Self::expunge(&mut conn, uid).await
    }

    async fn test_connection(&self) -> bool {
        let mut conn = self.connection.lock().await;
        let session = &mut conn.session;

        let listed = timed("LIST", PROBE_TIMEOUT, async {
            session
                .list(Some(""), Some("*"))
                .await?
                .try_collect::<Vec<_>>()
                .await
        })
        .await
        .and_then(|names| {
            // A dropped connection ends the LIST stream early with no names
            if names.is_empty() {
                Err(ProviderError::Connection("server listed no mailboxes".to_string()))
            } else {
                Ok(names)
            }
        });

        match listed {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(error = %e, host = %self.config.host, "IMAP connection test failed");
                false
            }
        }
    }
}
