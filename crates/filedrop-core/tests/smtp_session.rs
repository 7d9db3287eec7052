//! End-to-end tests of `SmtpSession` against a scripted SMTP server on
//! localhost.

#![allow(clippy::unwrap_used)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use filedrop_core::{
    Address, DeliveryCoordinator, DeliveryError, DeliveryList, DeliveryOptions, DeliveryRequest,
    FailureReason, Mailbox, Message, SecretString, Security, SessionError, SessionState,
    SmtpSession, TransportCredentials, TransportSession, compose,
};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

#[derive(Clone)]
struct ServerScript {
    reject_rcpt: Vec<&'static str>,
    reject_auth: bool,
    /// Recipients whose DATA command gets 421 before the server hangs up.
    close_on_data: Vec<&'static str>,
    /// Recipients whose message is read but never answered.
    hang_on_data: Vec<&'static str>,
    /// Connections served one after the other.
    connections: usize,
}

impl Default for ServerScript {
    fn default() -> Self {
        Self {
            reject_rcpt: Vec::new(),
            reject_auth: false,
            close_on_data: Vec::new(),
            hang_on_data: Vec::new(),
            connections: 1,
        }
    }
}

/// Serves `script.connections` connections in turn and returns the lines
/// the client sent on each.
async fn spawn_server(script: ServerScript) -> (u16, JoinHandle<Vec<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let handle = tokio::spawn(async move {
        let mut transcripts = Vec::new();
        for _ in 0..script.connections {
            let (stream, _) = listener.accept().await.unwrap();
            transcripts.push(serve(stream, &script).await);
        }
        transcripts
    });

    (port, handle)
}

async fn serve(stream: TcpStream, script: &ServerScript) -> Vec<String> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut transcript = Vec::new();
    let mut recipient = String::new();

    writer.write_all(b"220 fake.test ESMTP ready\r\n").await.unwrap();

    while let Ok(Some(line)) = lines.next_line().await {
        transcript.push(line.clone());
        let upper = line.to_ascii_uppercase();

        let reply: &[u8] = if upper.starts_with("EHLO") {
            b"250-fake.test\r\n250-SIZE 10000000\r\n250 AUTH PLAIN LOGIN\r\n"
        } else if upper.starts_with("AUTH PLAIN") {
            if script.reject_auth {
                b"535 5.7.8 Authentication credentials invalid\r\n"
            } else {
                b"235 2.7.0 Authentication successful\r\n"
            }
        } else if upper.starts_with("MAIL FROM") || upper.starts_with("RSET") {
            b"250 OK\r\n"
        } else if upper.starts_with("RCPT TO") {
            recipient.clone_from(&line);
            if script.reject_rcpt.iter().any(|r| line.contains(r)) {
                b"550 5.1.1 No such user\r\n"
            } else {
                b"250 OK\r\n"
            }
        } else if upper == "DATA" {
            if script.close_on_data.iter().any(|r| recipient.contains(r)) {
                writer
                    .write_all(b"421 4.3.2 Service shutting down\r\n")
                    .await
                    .unwrap();
                break;
            }
            writer.write_all(b"354 End data with .\r\n").await.unwrap();
            while let Ok(Some(data)) = lines.next_line().await {
                if data == "." {
                    break;
                }
            }
            transcript.push("<data>".to_string());
            if script.hang_on_data.iter().any(|r| recipient.contains(r)) {
                continue;
            }
            b"250 2.0.0 Queued\r\n"
        } else if upper == "QUIT" {
            writer.write_all(b"221 Bye\r\n").await.unwrap();
            break;
        } else {
            b"502 Command not implemented\r\n"
        };
        writer.write_all(reply).await.unwrap();
    }
    transcript
}

fn credentials(port: u16) -> TransportCredentials {
    TransportCredentials::new(
        "127.0.0.1",
        port,
        Security::None,
        Address::new("alice@example.com").unwrap(),
        SecretString::new("pw".to_string()),
    )
}

fn data_file() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, b".leading dot\nsecond line\n").unwrap();
    (dir, path)
}

fn message(to: &str) -> Message {
    let attachments: Arc<[filedrop_core::Attachment]> =
        vec![filedrop_core::Attachment::from_bytes("a.txt", b"hello".to_vec())].into();
    let sender = Mailbox::with_name("Alice", Address::new("alice@example.com").unwrap());
    compose(&sender, &Address::new(to).unwrap(), None, None, &attachments)
}

fn successes(report: &filedrop_core::DeliveryReport) -> Vec<&str> {
    report.successes().iter().map(Address::as_str).collect()
}

fn count(transcript: &[String], prefix: &str) -> usize {
    transcript.iter().filter(|l| l.starts_with(prefix)).count()
}

#[tokio::test]
async fn session_lifecycle_against_server() {
    let (port, server) = spawn_server(ServerScript::default()).await;
    let mut session = SmtpSession::with_hostname("client.test");
    assert_eq!(session.state(), SessionState::Closed);

    session.open(&credentials(port)).await.unwrap();
    assert_eq!(session.state(), SessionState::Authenticated);

    session.send(&message("bob@example.org")).await.unwrap();

    session.close().await;
    session.close().await;
    assert_eq!(session.state(), SessionState::Closed);

    let transcript = server.await.unwrap().remove(0);
    assert_eq!(transcript[0], "EHLO client.test");
    // "\0alice@example.com\0pw"
    assert_eq!(transcript[1], "AUTH PLAIN AGFsaWNlQGV4YW1wbGUuY29tAHB3");
    assert!(transcript[2].starts_with("MAIL FROM:<alice@example.com>"));
    assert_eq!(transcript[3], "RCPT TO:<bob@example.org>");
    assert_eq!(transcript[4], "DATA");
    assert_eq!(transcript[5], "<data>");
    assert_eq!(transcript[6], "QUIT");
    assert_eq!(transcript.len(), 7);
}

#[tokio::test]
async fn rejected_recipient_end_to_end() {
    let (port, server) = spawn_server(ServerScript {
        reject_rcpt: vec!["r2@x.com"],
        ..ServerScript::default()
    })
    .await;
    let (_dir, file) = data_file();
    let coordinator = DeliveryCoordinator::new(SmtpSession::new);

    let report = coordinator
        .deliver(
            &DeliveryRequest::new([file]),
            &DeliveryList::Inline("r1@x.com\nr2@x.com\nr3@x.com\n".into()),
            &credentials(port),
        )
        .await
        .unwrap();

    assert_eq!(successes(&report), ["r1@x.com", "r3@x.com"]);
    assert_eq!(report.failures().len(), 1);
    assert_eq!(report.failures()[0].recipient.as_str(), "r2@x.com");
    assert!(matches!(
        &report.failures()[0].reason,
        FailureReason::Rejected { code: 550, message } if message.contains("No such user")
    ));
    assert_eq!(report.total_attempted(), 3);

    let transcript = server.await.unwrap().remove(0);
    // One session for the whole batch.
    assert_eq!(count(&transcript, "EHLO"), 1);
    assert_eq!(count(&transcript, "AUTH"), 1);
    assert_eq!(count(&transcript, "MAIL FROM"), 3);
    assert_eq!(count(&transcript, "RSET"), 1);
    assert_eq!(count(&transcript, "<data>"), 2);
    assert_eq!(transcript.last().map(String::as_str), Some("QUIT"));

    let rset = transcript.iter().position(|l| l == "RSET").unwrap();
    assert_eq!(transcript[rset - 1], "RCPT TO:<r2@x.com>");
}

#[tokio::test]
async fn bad_credentials_abort_the_run() {
    let (port, server) = spawn_server(ServerScript {
        reject_auth: true,
        ..ServerScript::default()
    })
    .await;
    let (_dir, file) = data_file();
    let coordinator = DeliveryCoordinator::new(SmtpSession::new);

    let err = coordinator
        .deliver(
            &DeliveryRequest::new([file]),
            &DeliveryList::Inline("r1@x.com\n".into()),
            &credentials(port),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DeliveryError::Aborted(SessionError::Authentication(_))
    ));

    drop(coordinator);
    let transcript = server.await.unwrap().remove(0);
    assert_eq!(count(&transcript, "MAIL FROM"), 0);
}

#[tokio::test]
async fn unreachable_server_is_a_connection_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let (_dir, file) = data_file();
    let coordinator = DeliveryCoordinator::new(SmtpSession::new);

    let err = coordinator
        .deliver(
            &DeliveryRequest::new([file]),
            &DeliveryList::Inline("r1@x.com\n".into()),
            &credentials(port),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DeliveryError::Aborted(SessionError::Connection(_))));
}

#[tokio::test]
async fn open_timeout_leaves_session_closed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    // Accepts, never greets, and waits for the client to hang up.
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut sink = Vec::new();
        let _ = stream.read_to_end(&mut sink).await;
    });

    let mut session = SmtpSession::new();
    let creds = credentials(port);
    let open = tokio::time::timeout(Duration::from_millis(200), session.open(&creds));
    assert!(open.await.is_err());
    assert_eq!(session.state(), SessionState::Closed);

    // The abandoned attempt leaves no credentials to reconnect with.
    let err = session.send(&message("bob@example.org")).await.unwrap_err();
    assert!(matches!(
        err,
        FailureReason::Transport { detail } if detail == SessionError::NotOpen.to_string()
    ));
    server.await.unwrap();
}

#[tokio::test]
async fn closing_reply_reconnects_for_the_next_recipient() {
    let (port, server) = spawn_server(ServerScript {
        close_on_data: vec!["r1@x.com"],
        connections: 2,
        ..ServerScript::default()
    })
    .await;
    let (_dir, file) = data_file();
    let coordinator = DeliveryCoordinator::new(SmtpSession::new);

    let report = coordinator
        .deliver(
            &DeliveryRequest::new([file]),
            &DeliveryList::Inline("r1@x.com\nr2@x.com\nr3@x.com\n".into()),
            &credentials(port),
        )
        .await
        .unwrap();

    assert_eq!(successes(&report), ["r2@x.com", "r3@x.com"]);
    assert_eq!(report.failures().len(), 1);
    assert_eq!(report.failures()[0].recipient.as_str(), "r1@x.com");
    assert!(matches!(
        report.failures()[0].reason,
        FailureReason::Rejected { code: 421, .. }
    ));

    let transcripts = server.await.unwrap();
    let (first, second) = (&transcripts[0], &transcripts[1]);
    assert_eq!(first.last().map(String::as_str), Some("DATA"));
    assert_eq!(count(first, "RSET"), 0);
    assert_eq!(count(second, "EHLO"), 1);
    assert_eq!(count(second, "AUTH"), 1);
    assert_eq!(count(second, "<data>"), 2);
    assert_eq!(second.last().map(String::as_str), Some("QUIT"));
}

#[tokio::test]
async fn timed_out_send_is_retried_on_a_fresh_connection() {
    let (port, server) = spawn_server(ServerScript {
        hang_on_data: vec!["hang@x.com"],
        connections: 2,
        ..ServerScript::default()
    })
    .await;
    let (_dir, file) = data_file();
    let options = DeliveryOptions::default().with_timeout(Duration::from_millis(500));
    let coordinator = DeliveryCoordinator::with_options(SmtpSession::new, options);

    let report = coordinator
        .deliver(
            &DeliveryRequest::new([file]),
            &DeliveryList::Inline("hang@x.com\nok@x.com\n".into()),
            &credentials(port),
        )
        .await
        .unwrap();

    assert_eq!(successes(&report), ["ok@x.com"]);
    assert_eq!(report.failures().len(), 1);
    assert_eq!(report.failures()[0].recipient.as_str(), "hang@x.com");
    assert!(matches!(report.failures()[0].reason, FailureReason::Timeout));

    let transcripts = server.await.unwrap();
    let (first, second) = (&transcripts[0], &transcripts[1]);
    // The interrupted connection is dropped, never reused or quit.
    assert_eq!(first.last().map(String::as_str), Some("<data>"));
    assert_eq!(count(first, "QUIT"), 0);
    assert_eq!(count(first, "RCPT TO"), 1);
    assert_eq!(second[0], "EHLO localhost");
    assert!(second[1].starts_with("AUTH PLAIN"));
    assert_eq!(second[3], "RCPT TO:<ok@x.com>");
    assert_eq!(second.last().map(String::as_str), Some("QUIT"));
}
