//! Transport sessions.
//!
//! A [`TransportSession`] owns at most one authenticated connection and
//! sends one message per call. [`SmtpSession`] is the SMTP implementation.
//!
//! # Cancel safety
//!
//! Dropping a `send` future part way (timeout or cancellation) leaves the
//! connection mid-transaction. [`SmtpSession`] notices this on the next call:
//! the poisoned connection is dropped without `QUIT` and the handshake is run
//! again with the stored credentials.

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use filedrop_smtp::connection::{connect, connect_tls};
use filedrop_smtp::{Address, Authenticated, Client};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, warn};

use crate::compose::Message;
use crate::error::SessionError;
use crate::report::FailureReason;

/// Hostname announced in EHLO.
const DEFAULT_CLIENT_HOSTNAME: &str = "localhost";

/// Reply code used when a message is refused for its size before sending.
const SIZE_EXCEEDED: u16 = 552;

/// Connection security mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Security {
    /// Plaintext connect, then STARTTLS.
    #[default]
    StartTls,
    /// Implicit TLS from the first byte.
    Tls,
    /// No encryption; local relays and tests only.
    None,
}

impl Security {
    /// Implicit TLS on port 465, STARTTLS elsewhere.
    #[must_use]
    pub const fn for_port(port: u16) -> Self {
        if port == 465 { Self::Tls } else { Self::StartTls }
    }

    /// Get display name for the security mode.
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::StartTls => "STARTTLS",
            Self::Tls => "SSL/TLS",
            Self::None => "None (insecure)",
        }
    }
}

impl fmt::Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Security {
    type Err = crate::config::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "starttls" => Ok(Self::StartTls),
            "tls" | "ssl" => Ok(Self::Tls),
            "none" | "plain" => Ok(Self::None),
            other => Err(crate::config::ConfigError::UnknownSecurity(other.to_string())),
        }
    }
}

/// Everything needed to open an authenticated session.
///
/// The secret is redacted in `Debug` output and never logged.
#[derive(Debug, Clone)]
pub struct TransportCredentials {
    /// Relay hostname.
    pub host: String,
    /// Relay port.
    pub port: u16,
    /// Connection security.
    pub security: Security,
    /// Login identity, also used as the envelope sender.
    pub identity: Address,
    secret: SecretString,
}

impl TransportCredentials {
    /// Creates credentials.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        security: Security,
        identity: Address,
        secret: SecretString,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            security,
            identity,
            secret,
        }
    }

    /// The password or app token.
    #[must_use]
    pub const fn secret(&self) -> &SecretString {
        &self.secret
    }
}

/// Observable lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection.
    Closed,
    /// Handshake in progress.
    Opening,
    /// Ready to send.
    Authenticated,
}

/// One authenticated connection to a mail relay.
///
/// A session is never used by two sends at once; `&mut self` enforces it.
pub trait TransportSession: Send {
    /// Current lifecycle state.
    fn state(&self) -> SessionState;

    /// Connects and authenticates.
    ///
    /// On failure the session is left [`SessionState::Closed`].
    fn open(
        &mut self,
        credentials: &TransportCredentials,
    ) -> impl Future<Output = Result<(), SessionError>> + Send;

    /// Sends one message to its single recipient.
    ///
    /// A refusal is returned as the message's [`FailureReason`]; the session
    /// stays usable for the next message.
    fn send(
        &mut self,
        message: &Message,
    ) -> impl Future<Output = Result<(), FailureReason>> + Send;

    /// Closes the connection. Idempotent and always safe; errors are logged.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

/// Creates fresh, unopened sessions.
pub trait SessionFactory: Send + Sync {
    /// Session type produced.
    type Session: TransportSession;

    /// Creates one session.
    fn create(&self) -> Self::Session;
}

impl<F, S> SessionFactory for F
where
    F: Fn() -> S + Send + Sync,
    S: TransportSession,
{
    type Session = S;

    fn create(&self) -> S {
        self()
    }
}

/// [`TransportSession`] over SMTP.
pub struct SmtpSession {
    client: Option<Client<Authenticated>>,
    credentials: Option<TransportCredentials>,
    state: SessionState,
    in_flight: bool,
    client_hostname: String,
}

impl fmt::Debug for SmtpSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpSession")
            .field("state", &self.state)
            .field("connected", &self.client.is_some())
            .field("in_flight", &self.in_flight)
            .field("client_hostname", &self.client_hostname)
            .finish_non_exhaustive()
    }
}

impl Default for SmtpSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SmtpSession {
    /// Creates a closed session announcing `localhost` in EHLO.
    #[must_use]
    pub fn new() -> Self {
        Self::with_hostname(DEFAULT_CLIENT_HOSTNAME)
    }

    /// Creates a closed session with a custom EHLO hostname.
    #[must_use]
    pub fn with_hostname(client_hostname: impl Into<String>) -> Self {
        Self {
            client: None,
            credentials: None,
            state: SessionState::Closed,
            in_flight: false,
            client_hostname: client_hostname.into(),
        }
    }

    async fn connect(&mut self, credentials: &TransportCredentials) -> Result<(), SessionError> {
        let attempt = OpenAttempt::start(&mut self.state);
        let client = handshake(credentials, &self.client_hostname).await?;
        self.client = Some(client);
        attempt.succeed();
        Ok(())
    }

    /// Drops the connection without `QUIT`.
    fn discard(&mut self) {
        self.client = None;
        self.in_flight = false;
    }
}

/// Holds the session in `Opening`; falls back to `Closed` when dropped
/// before [`OpenAttempt::succeed`], including when the caller's future is
/// cancelled mid-handshake.
struct OpenAttempt<'a> {
    state: &'a mut SessionState,
    pending: bool,
}

impl<'a> OpenAttempt<'a> {
    fn start(state: &'a mut SessionState) -> Self {
        *state = SessionState::Opening;
        Self {
            state,
            pending: true,
        }
    }

    fn succeed(mut self) {
        *self.state = SessionState::Authenticated;
        self.pending = false;
    }
}

impl Drop for OpenAttempt<'_> {
    fn drop(&mut self) {
        if self.pending {
            *self.state = SessionState::Closed;
        }
    }
}

impl TransportSession for SmtpSession {
    fn state(&self) -> SessionState {
        self.state
    }

    async fn open(&mut self, credentials: &TransportCredentials) -> Result<(), SessionError> {
        if self.client.is_some() {
            self.close().await;
        }
        self.credentials = None;
        let result = self.connect(credentials).await;
        match &result {
            Ok(()) => {
                self.credentials = Some(credentials.clone());
                info!(
                    host = %credentials.host,
                    port = credentials.port,
                    security = %credentials.security,
                    "session opened"
                );
            }
            Err(e) => {
                warn!(host = %credentials.host, error = %e, "session open failed");
            }
        }
        result
    }

    async fn send(&mut self, message: &Message) -> Result<(), FailureReason> {
        if self.in_flight {
            warn!("previous send was interrupted; reconnecting");
            self.discard();
        }

        if self.client.is_none() {
            let Some(credentials) = self.credentials.clone() else {
                return Err(FailureReason::Transport {
                    detail: SessionError::NotOpen.to_string(),
                });
            };
            self.connect(&credentials)
                .await
                .map_err(|e| FailureReason::Transport {
                    detail: format!("reconnect failed: {e}"),
                })?;
        }

        let payload = message.to_mime().map_err(|e| FailureReason::Encoding {
            detail: e.to_string(),
        })?;

        let Some(client) = self.client.as_mut() else {
            return Err(FailureReason::Transport {
                detail: SessionError::NotOpen.to_string(),
            });
        };

        self.in_flight = true;
        let result = client
            .send_mail(&message.from().address, message.to(), &payload)
            .await;
        self.in_flight = false;

        match result {
            Ok(()) => Ok(()),
            Err(e) => {
                if !client.is_usable() {
                    debug!("connection unusable; will reconnect on next send");
                    self.discard();
                }
                Err(failure_reason(e))
            }
        }
    }

    async fn close(&mut self) {
        self.credentials = None;
        self.state = SessionState::Closed;
        let poisoned = std::mem::take(&mut self.in_flight);
        let Some(client) = self.client.take() else {
            return;
        };

        if poisoned || !client.is_usable() {
            debug!("dropping connection without QUIT");
            return;
        }
        match client.quit().await {
            Ok(()) => debug!("session closed"),
            Err(e) => warn!(error = %e, "QUIT failed"),
        }
    }
}

async fn handshake(
    credentials: &TransportCredentials,
    client_hostname: &str,
) -> Result<Client<Authenticated>, SessionError> {
    let connection = |e: filedrop_smtp::Error| SessionError::Connection(e.to_string());
    let host = credentials.host.as_str();

    let stream = match credentials.security {
        Security::Tls => connect_tls(host, credentials.port).await,
        Security::StartTls | Security::None => connect(host, credentials.port).await,
    }
    .map_err(connection)?;

    let client = Client::from_stream(stream).await.map_err(connection)?;
    let client = client.ehlo(client_hostname).await.map_err(connection)?;
    let client = if credentials.security == Security::StartTls {
        client.starttls(host).await.map_err(connection)?
    } else {
        client
    };

    client
        .authenticate(
            credentials.identity.as_str(),
            credentials.secret.expose_secret(),
        )
        .await
        .map_err(|e| {
            if e.is_reply() {
                SessionError::Authentication(e.to_string())
            } else {
                SessionError::Connection(e.to_string())
            }
        })
}

fn failure_reason(error: filedrop_smtp::Error) -> FailureReason {
    match error {
        filedrop_smtp::Error::SmtpError { code, message } => {
            FailureReason::Rejected { code, message }
        }
        filedrop_smtp::Error::MessageTooLarge { size, limit } => FailureReason::Rejected {
            code: SIZE_EXCEEDED,
            message: format!("message is {size} bytes, server accepts {limit}"),
        },
        other => FailureReason::Transport {
            detail: other.to_string(),
        },
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    fn credentials() -> TransportCredentials {
        TransportCredentials::new(
            "smtp.example.com",
            587,
            Security::StartTls,
            Address::new("alice@example.com").unwrap(),
            SecretString::new("hunter2".to_string()),
        )
    }

    #[test]
    fn test_security_for_port() {
        assert_eq!(Security::for_port(465), Security::Tls);
        assert_eq!(Security::for_port(587), Security::StartTls);
        assert_eq!(Security::for_port(25), Security::StartTls);
    }

    #[test]
    fn test_security_from_str() {
        assert_eq!("TLS".parse::<Security>().unwrap(), Security::Tls);
        assert_eq!("starttls".parse::<Security>().unwrap(), Security::StartTls);
        assert_eq!("none".parse::<Security>().unwrap(), Security::None);
        assert!("bogus".parse::<Security>().is_err());
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let rendered = format!("{:?}", credentials());
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("alice@example.com"));
    }

    #[test]
    fn test_failure_reason_mapping() {
        assert_eq!(
            failure_reason(filedrop_smtp::Error::smtp_error(550, "no such user")),
            FailureReason::Rejected {
                code: 550,
                message: "no such user".into()
            }
        );
        assert!(matches!(
            failure_reason(filedrop_smtp::Error::MessageTooLarge { size: 10, limit: 5 }),
            FailureReason::Rejected { code: 552, .. }
        ));
        assert!(matches!(
            failure_reason(filedrop_smtp::Error::ConnectionClosed),
            FailureReason::Transport { .. }
        ));
    }

    #[tokio::test]
    async fn test_send_before_open_does_no_io() {
        let mut session = SmtpSession::new();
        let attachments: std::sync::Arc<[crate::Attachment]> =
            vec![crate::Attachment::from_bytes("a.txt", b"x".to_vec())].into();
        let sender = filedrop_smtp::Mailbox::new(Address::new("alice@example.com").unwrap());
        let message = crate::compose::compose(
            &sender,
            &Address::new("bob@example.org").unwrap(),
            None,
            None,
            &attachments,
        );

        let result = session.send(&message).await;
        assert!(matches!(
            result,
            Err(FailureReason::Transport { detail }) if detail.contains("not open")
        ));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut session = SmtpSession::new();
        session.close().await;
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_open_failure_leaves_session_closed() {
        // Bind then drop a listener so the port refuses connections.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut creds = credentials();
        creds.host = "127.0.0.1".into();
        creds.port = port;
        let mut session = SmtpSession::new();
        let err = session.open(&creds).await.unwrap_err();
        assert!(matches!(err, SessionError::Connection(_)));
        assert_eq!(session.state(), SessionState::Closed);
        session.close().await;
    }
}
