//! Type-state SMTP client.

use super::{ServerInfo, SmtpStream};
use crate::command::Command;
use crate::error::{Error, Result};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::types::{Address, AuthMechanism, Extension, Reply, ReplyCode};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::marker::PhantomData;
use tracing::{debug, warn};

/// Type-state marker: greeted, not yet authenticated.
#[derive(Debug)]
pub struct Connected;

/// Type-state marker: authenticated, ready for mail transactions.
#[derive(Debug)]
pub struct Authenticated;

/// SMTP client with type-state pattern.
#[derive(Debug)]
pub struct Client<State> {
    stream: SmtpStream,
    server_info: ServerInfo,
    client_hostname: String,
    usable: bool,
    _state: PhantomData<State>,
}

impl Client<Connected> {
    /// Creates a client from a stream and reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the greeting fails or the server refuses
    /// service.
    pub async fn from_stream(mut stream: SmtpStream) -> Result<Self> {
        let greeting = read_reply(&mut stream).await?;
        if greeting.code != ReplyCode::SERVICE_READY {
            return Err(greeting.into_error());
        }

        let hostname = greeting
            .lines
            .first()
            .and_then(|line| line.split_whitespace().next())
            .unwrap_or("unknown")
            .to_string();
        debug!(server = %hostname, "SMTP greeting received");

        Ok(Self {
            stream,
            server_info: ServerInfo {
                hostname,
                extensions: Vec::new(),
            },
            client_hostname: String::from("localhost"),
            usable: true,
            _state: PhantomData,
        })
    }

    /// Sends EHLO and records the server's extensions.
    ///
    /// # Errors
    ///
    /// Returns an error if the EHLO command fails.
    pub async fn ehlo(mut self, client_hostname: &str) -> Result<Self> {
        self.client_hostname = client_hostname.to_string();
        self.refresh_extensions().await?;
        Ok(self)
    }

    /// Upgrades the connection to TLS using STARTTLS, then repeats EHLO.
    ///
    /// # Errors
    ///
    /// Returns an error if STARTTLS is not advertised or the upgrade fails.
    pub async fn starttls(mut self, server_hostname: &str) -> Result<Self> {
        if !self.server_info.supports_starttls() {
            return Err(Error::NotSupported("STARTTLS".into()));
        }

        let reply = self.send_command(&Command::StartTls).await?;
        if !reply.is_success() {
            return Err(reply.into_error());
        }

        self.stream = self.stream.upgrade_to_tls(server_hostname).await?;
        // Capabilities learned in plaintext must be discarded (RFC 3207).
        self.refresh_extensions().await?;
        Ok(self)
    }

    /// Authenticates with whichever mechanism the server prefers.
    ///
    /// # Errors
    ///
    /// Returns an error if authentication fails.
    pub async fn authenticate(
        self,
        username: &str,
        password: &str,
    ) -> Result<Client<Authenticated>> {
        match self.server_info.preferred_auth() {
            AuthMechanism::Plain => self.auth_plain(username, password).await,
            AuthMechanism::Login => self.auth_login(username, password).await,
        }
    }

    /// Authenticates using the PLAIN mechanism.
    ///
    /// # Errors
    ///
    /// Returns an error if authentication fails.
    pub async fn auth_plain(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<Authenticated>> {
        let token = STANDARD.encode(format!("\0{username}\0{password}"));
        let cmd = Command::Auth {
            mechanism: AuthMechanism::Plain,
            initial_response: Some(token),
        };

        let reply = self.send_command(&cmd).await?;
        if !reply.is_success() {
            return Err(reply.into_error());
        }

        Ok(self.transition())
    }

    /// Authenticates using the legacy LOGIN mechanism.
    ///
    /// # Errors
    ///
    /// Returns an error if authentication fails.
    pub async fn auth_login(
        mut self,
        username: &str,
        password: &str,
    ) -> Result<Client<Authenticated>> {
        let cmd = Command::Auth {
            mechanism: AuthMechanism::Login,
            initial_response: None,
        };

        let mut reply = self.send_command(&cmd).await?;
        for secret in [username, password] {
            if reply.code != ReplyCode::AUTH_CONTINUE {
                return Err(reply.into_error());
            }
            let step = Command::AuthResponse(STANDARD.encode(secret));
            reply = self.send_command(&step).await?;
        }

        if !reply.is_success() {
            return Err(reply.into_error());
        }

        Ok(self.transition())
    }

    async fn refresh_extensions(&mut self) -> Result<()> {
        let cmd = Command::Ehlo {
            hostname: self.client_hostname.clone(),
        };
        let reply = self.send_command(&cmd).await?;
        if !reply.is_success() {
            return Err(reply.into_error());
        }

        // First line is the server's greeting text, not an extension.
        self.server_info.extensions = reply
            .lines
            .iter()
            .skip(1)
            .map(|line| Extension::parse(line))
            .collect();
        Ok(())
    }

    fn transition(self) -> Client<Authenticated> {
        Client {
            stream: self.stream,
            server_info: self.server_info,
            client_hostname: self.client_hostname,
            usable: self.usable,
            _state: PhantomData,
        }
    }
}

impl Client<Authenticated> {
    /// Runs one complete mail transaction: one sender, one recipient, one
    /// message.
    ///
    /// The message should be RFC 5322 formatted. Line endings are normalized
    /// to CRLF, lines starting with `.` are dot-stuffed and the terminating
    /// `.` line is appended.
    ///
    /// When the server refuses the sender, the recipient or the data, the
    /// transaction is reset with `RSET` and the refusal is returned as
    /// [`Error::SmtpError`]; the client stays usable for the next message.
    /// A 421 reply means the server is closing the channel: no reset is
    /// attempted and the client becomes unusable.
    ///
    /// # Errors
    ///
    /// Returns the server's refusal, a size violation, or an I/O/protocol
    /// error. After the latter, [`Client::is_usable`] reports `false`.
    pub async fn send_mail(
        &mut self,
        from: &Address,
        to: &Address,
        message: &[u8],
    ) -> Result<()> {
        let payload = encode_data(message);
        if let Some(limit) = self.server_info.max_message_size().filter(|l| *l > 0) {
            if payload.len() > limit {
                return Err(Error::MessageTooLarge {
                    size: payload.len(),
                    limit,
                });
            }
        }

        let size = self
            .server_info
            .max_message_size()
            .map(|_| payload.len());
        let mail_from = Command::MailFrom {
            from: from.clone(),
            size,
        };
        let reply = self.send_command(&mail_from).await?;
        if !reply.is_success() {
            return Err(self.abort_transaction(reply).await);
        }

        let rcpt_to = Command::RcptTo { to: to.clone() };
        let reply = self.send_command(&rcpt_to).await?;
        if !reply.is_success() {
            return Err(self.abort_transaction(reply).await);
        }

        let reply = self.send_command(&Command::Data).await?;
        if reply.code != ReplyCode::START_DATA {
            return Err(self.abort_transaction(reply).await);
        }

        self.write(&payload).await?;
        let reply = self.read().await?;
        if !reply.is_success() {
            // The final reply ends the transaction; no reset needed.
            return Err(reply.into_error());
        }

        debug!(recipient = %to, bytes = payload.len(), "message accepted");
        Ok(())
    }

    async fn abort_transaction(&mut self, refusal: Reply) -> Error {
        if !self.usable {
            return refusal.into_error();
        }
        match self.send_command(&Command::Rset).await {
            Ok(reply) if reply.is_success() => {}
            Ok(reply) => {
                warn!(code = %reply.code, "RSET refused; connection state unknown");
                self.usable = false;
            }
            Err(e) => {
                warn!(error = %e, "RSET failed");
                self.usable = false;
            }
        }
        refusal.into_error()
    }
}

// Common implementation for all states
impl<S> Client<S> {
    /// Returns the server information.
    #[must_use]
    pub const fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Returns false once the connection failed at the transport level, the
    /// server announced it is closing (421) or a transaction could not be
    /// reset.
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        self.usable
    }

    /// Sends QUIT and closes the connection (available in any state).
    ///
    /// # Errors
    ///
    /// Returns an error if the QUIT command fails.
    pub async fn quit(mut self) -> Result<()> {
        let reply = self.send_command(&Command::Quit).await?;
        if !reply.is_success() && reply.code != ReplyCode::CLOSING {
            return Err(reply.into_error());
        }
        Ok(())
    }

    async fn send_command(&mut self, cmd: &Command) -> Result<Reply> {
        debug!(command = ?cmd, "C:");
        self.write(&cmd.serialize()).await?;
        self.read().await
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let result = self.stream.write_all(data).await;
        if result.is_err() {
            self.usable = false;
        }
        result
    }

    async fn read(&mut self) -> Result<Reply> {
        let result = read_reply(&mut self.stream).await;
        match &result {
            Ok(reply) if reply.code.closes_connection() => {
                warn!(reply = %reply.text(), "server is closing the connection");
                self.usable = false;
            }
            Ok(reply) => debug!(code = %reply.code, "S:"),
            Err(_) => self.usable = false,
        }
        result
    }
}

async fn read_reply(stream: &mut SmtpStream) -> Result<Reply> {
    let mut lines = Vec::new();
    loop {
        let line = stream.read_line().await?;
        if line.is_empty() {
            continue;
        }

        let is_last = is_last_reply_line(&line);
        lines.push(line);

        if is_last {
            break;
        }
    }

    parse_reply(&lines)
}

/// Prepares message content for the DATA phase: CRLF line endings,
/// dot-stuffing, and the terminating `.` line.
fn encode_data(message: &[u8]) -> Vec<u8> {
    let body = message.strip_suffix(b"\n").unwrap_or(message);
    let mut out = Vec::with_capacity(message.len() + message.len() / 64 + 5);

    if !body.is_empty() {
        for line in body.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.first() == Some(&b'.') {
                out.push(b'.');
            }
            out.extend_from_slice(line);
            out.extend_from_slice(b"\r\n");
        }
    }

    out.extend_from_slice(b".\r\n");
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::similar_names)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn addr(s: &str) -> Address {
        Address::new(s).unwrap()
    }

    /// Greeting + EHLO + AUTH PLAIN for user "u" / password "p".
    fn handshake(builder: &mut Builder) -> &mut Builder {
        builder
            .read(b"220 mx.example.com ESMTP\r\n")
            .write(b"EHLO client.test\r\n")
            .read(b"250-mx.example.com\r\n250-SIZE 1000\r\n250 AUTH PLAIN LOGIN\r\n")
            .write(b"AUTH PLAIN AHUAcA==\r\n")
            .read(b"235 2.7.0 Accepted\r\n")
    }

    async fn authenticated(builder: &mut Builder) -> Client<Authenticated> {
        let stream = SmtpStream::from_io(builder.build());
        Client::from_stream(stream)
            .await
            .unwrap()
            .ehlo("client.test")
            .await
            .unwrap()
            .authenticate("u", "p")
            .await
            .unwrap()
    }

    #[test]
    fn encode_data_normalizes_and_stuffs() {
        assert_eq!(
            encode_data(b"Subject: x\n\n.hidden\r\nend\n"),
            b"Subject: x\r\n\r\n..hidden\r\nend\r\n.\r\n"
        );
        assert_eq!(encode_data(b""), b".\r\n");
    }

    #[tokio::test]
    async fn greeting_must_be_220() {
        let stream = SmtpStream::from_io(Builder::new().read(b"554 go away\r\n").build());
        let err = Client::from_stream(stream).await.unwrap_err();
        assert!(matches!(err, Error::SmtpError { code: 554, .. }));
    }

    #[tokio::test]
    async fn send_mail_happy_path() {
        let mut builder = Builder::new();
        handshake(&mut builder)
            .write(b"MAIL FROM:<a@x.com> SIZE=17\r\n")
            .read(b"250 OK\r\n")
            .write(b"RCPT TO:<b@y.com>\r\n")
            .read(b"250 OK\r\n")
            .write(b"DATA\r\n")
            .read(b"354 go ahead\r\n")
            .write(b"Subject: t\r\n\r\n.\r\n")
            .read(b"250 queued\r\n");
        let mut client = authenticated(&mut builder).await;
        assert_eq!(client.server_info().max_message_size(), Some(1000));

        client
            .send_mail(&addr("a@x.com"), &addr("b@y.com"), b"Subject: t\n\n")
            .await
            .unwrap();
        assert!(client.is_usable());
    }

    #[tokio::test]
    async fn rejected_recipient_resets_and_stays_usable() {
        let mut builder = Builder::new();
        handshake(&mut builder)
            .write(b"MAIL FROM:<a@x.com> SIZE=7\r\n")
            .read(b"250 OK\r\n")
            .write(b"RCPT TO:<nobody@y.com>\r\n")
            .read(b"550 5.1.1 no such user\r\n")
            .write(b"RSET\r\n")
            .read(b"250 flushed\r\n");
        let mut client = authenticated(&mut builder).await;

        let err = client
            .send_mail(&addr("a@x.com"), &addr("nobody@y.com"), b"hi\n")
            .await
            .unwrap_err();
        match err {
            Error::SmtpError { code, message } => {
                assert_eq!(code, 550);
                assert_eq!(message, "5.1.1 no such user");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(client.is_usable());
    }

    #[tokio::test]
    async fn closing_reply_skips_reset_and_marks_unusable() {
        let mut builder = Builder::new();
        handshake(&mut builder)
            .write(b"MAIL FROM:<a@x.com> SIZE=7\r\n")
            .read(b"250 OK\r\n")
            .write(b"RCPT TO:<b@y.com>\r\n")
            .read(b"250 OK\r\n")
            .write(b"DATA\r\n")
            .read(b"421 4.3.2 shutting down\r\n");
        let mut client = authenticated(&mut builder).await;

        let err = client
            .send_mail(&addr("a@x.com"), &addr("b@y.com"), b"hi\n")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SmtpError { code: 421, .. }));
        assert!(!client.is_usable());
    }

    #[tokio::test]
    async fn oversized_message_is_refused_locally() {
        let mut builder = Builder::new();
        handshake(&mut builder);
        let mut client = authenticated(&mut builder).await;

        let big = vec![b'a'; 2000];
        let err = client
            .send_mail(&addr("a@x.com"), &addr("b@y.com"), &big)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MessageTooLarge { limit: 1000, .. }));
    }

    #[tokio::test]
    async fn auth_login_flow() {
        let mock = Builder::new()
            .read(b"220 mx ESMTP\r\n")
            .write(b"EHLO localhost\r\n")
            .read(b"250-mx\r\n250 AUTH LOGIN\r\n")
            .write(b"AUTH LOGIN\r\n")
            .read(b"334 VXNlcm5hbWU6\r\n")
            .write(b"dQ==\r\n")
            .read(b"334 UGFzc3dvcmQ6\r\n")
            .write(b"cA==\r\n")
            .read(b"235 ok\r\n")
            .write(b"QUIT\r\n")
            .read(b"221 bye\r\n")
            .build();
        let client = Client::from_stream(SmtpStream::from_io(mock))
            .await
            .unwrap()
            .ehlo("localhost")
            .await
            .unwrap();
        let client = client.authenticate("u", "p").await.unwrap();
        client.quit().await.unwrap();
    }

    #[tokio::test]
    async fn bad_credentials_surface_reply_code() {
        let mock = Builder::new()
            .read(b"220 mx ESMTP\r\n")
            .write(b"EHLO localhost\r\n")
            .read(b"250 mx\r\n")
            .write(b"AUTH PLAIN AHUAcA==\r\n")
            .read(b"535 5.7.8 bad credentials\r\n")
            .build();
        let client = Client::from_stream(SmtpStream::from_io(mock))
            .await
            .unwrap()
            .ehlo("localhost")
            .await
            .unwrap();
        let err = client.auth_plain("u", "p").await.unwrap_err();
        assert!(matches!(err, Error::SmtpError { code: 535, .. }));
    }

    #[tokio::test]
    async fn starttls_requires_advertisement() {
        let mock = Builder::new()
            .read(b"220 mx ESMTP\r\n")
            .write(b"EHLO localhost\r\n")
            .read(b"250 mx\r\n")
            .build();
        let client = Client::from_stream(SmtpStream::from_io(mock))
            .await
            .unwrap()
            .ehlo("localhost")
            .await
            .unwrap();
        let err = client.starttls("mx.example.com").await.unwrap_err();
        assert!(matches!(err, Error::NotSupported(_)));
    }
}
