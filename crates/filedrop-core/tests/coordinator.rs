//! Integration tests for the delivery coordinator.
//!
//! A recording mock session stands in for SMTP so every transport call can
//! be checked: what was opened, sent and closed, and in which order.

#![allow(clippy::unwrap_used, clippy::similar_names)]

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use filedrop_core::{
    Address, DeliveryCoordinator, DeliveryError, DeliveryList, DeliveryOptions, DeliveryRequest,
    FailureReason, FileAccessError, Message, RecipientSource, SecretString, Security, SessionError,
    SessionState, TransportCredentials, TransportSession, ValidationError,
};
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Open(usize),
    Send(usize, String),
    Close(usize),
}

/// Behaviour shared by every session a factory creates.
#[derive(Default)]
struct Script {
    reject: Vec<&'static str>,
    hang: Vec<&'static str>,
    fail_open: bool,
    send_delay: Option<Duration>,
    created: AtomicUsize,
    events: Mutex<Vec<Event>>,
}

impl Script {
    fn record(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn count(&self, f: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| f(e)).count()
    }

    fn factory(self: &Arc<Self>) -> impl Fn() -> MockSession + Send + Sync + use<> {
        let script = Arc::clone(self);
        move || MockSession {
            id: script.created.fetch_add(1, Ordering::SeqCst),
            script: Arc::clone(&script),
            state: SessionState::Closed,
        }
    }
}

struct MockSession {
    id: usize,
    script: Arc<Script>,
    state: SessionState,
}

impl TransportSession for MockSession {
    fn state(&self) -> SessionState {
        self.state
    }

    async fn open(&mut self, _credentials: &TransportCredentials) -> Result<(), SessionError> {
        self.script.record(Event::Open(self.id));
        if self.script.fail_open {
            return Err(SessionError::Authentication("535 bad credentials".into()));
        }
        self.state = SessionState::Authenticated;
        Ok(())
    }

    async fn send(&mut self, message: &Message) -> Result<(), FailureReason> {
        assert_eq!(self.state, SessionState::Authenticated);
        let to = message.to().to_string();
        self.script.record(Event::Send(self.id, to.clone()));

        if let Some(delay) = self.script.send_delay {
            tokio::time::sleep(delay).await;
        }
        if self.script.hang.contains(&to.as_str()) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.script.reject.contains(&to.as_str()) {
            return Err(FailureReason::Rejected {
                code: 550,
                message: "mailbox unavailable".into(),
            });
        }
        message.to_mime().map_err(|e| FailureReason::Encoding {
            detail: e.to_string(),
        })?;
        Ok(())
    }

    async fn close(&mut self) {
        self.script.record(Event::Close(self.id));
        self.state = SessionState::Closed;
    }
}

/// Inline delivery list that counts how often it was read.
struct CountingSource {
    text: &'static str,
    reads: AtomicUsize,
}

impl CountingSource {
    fn new(text: &'static str) -> Self {
        Self {
            text,
            reads: AtomicUsize::new(0),
        }
    }
}

impl RecipientSource for CountingSource {
    async fn read(&self) -> io::Result<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.text.to_string())
    }
}

fn credentials() -> TransportCredentials {
    TransportCredentials::new(
        "mock.invalid",
        587,
        Security::StartTls,
        Address::new("sender@example.com").unwrap(),
        SecretString::new("pw".to_string()),
    )
}

fn data_file() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("data.csv");
    std::fs::write(&path, b"id,value\n1,42\n").unwrap();
    (dir, path)
}

fn addrs(list: &[Address]) -> Vec<&str> {
    list.iter().map(Address::as_str).collect()
}

const THREE: &str = "r1@x.com\nr2@x.com\nr3@x.com\n";

#[tokio::test]
async fn all_recipients_accepted() {
    let (_dir, file) = data_file();
    let script = Arc::new(Script::default());
    let coordinator = DeliveryCoordinator::new(script.factory());

    let report = coordinator
        .deliver(&DeliveryRequest::new([file]), &DeliveryList::Inline(THREE.into()), &credentials())
        .await
        .unwrap();

    assert_eq!(addrs(report.successes()), ["r1@x.com", "r2@x.com", "r3@x.com"]);
    assert!(report.failures().is_empty());
    assert_eq!(report.total_attempted(), 3);
    assert!(report.is_success());

    assert_eq!(
        script.events(),
        [
            Event::Open(0),
            Event::Send(0, "r1@x.com".into()),
            Event::Send(0, "r2@x.com".into()),
            Event::Send(0, "r3@x.com".into()),
            Event::Close(0),
        ]
    );
}

#[tokio::test]
async fn rejected_recipient_does_not_stop_batch() {
    let (_dir, file) = data_file();
    let script = Arc::new(Script {
        reject: vec!["r2@x.com"],
        ..Script::default()
    });
    let coordinator = DeliveryCoordinator::new(script.factory());

    let report = coordinator
        .deliver(&DeliveryRequest::new([file]), &DeliveryList::Inline(THREE.into()), &credentials())
        .await
        .unwrap();

    assert_eq!(addrs(report.successes()), ["r1@x.com", "r3@x.com"]);
    assert_eq!(report.failures().len(), 1);
    assert_eq!(report.failures()[0].recipient.as_str(), "r2@x.com");
    assert!(matches!(
        report.failures()[0].reason,
        FailureReason::Rejected { code: 550, .. }
    ));
    assert_eq!(report.total_attempted(), 3);
    assert!(!report.is_success());
    assert_eq!(script.count(|e| matches!(e, Event::Close(_))), 1);
}

#[tokio::test]
async fn delivery_list_is_cleaned_before_sending() {
    let (_dir, file) = data_file();
    let script = Arc::new(Script::default());
    let coordinator = DeliveryCoordinator::new(script.factory());
    let source = DeliveryList::Inline("a@x.com\n# comment\n\nb@x.com\nbadline\na@x.com\n".into());

    let report = coordinator
        .deliver(&DeliveryRequest::new([file]), &source, &credentials())
        .await
        .unwrap();

    assert_eq!(addrs(report.successes()), ["a@x.com", "b@x.com"]);
    assert_eq!(script.count(|e| matches!(e, Event::Send(..))), 2);
}

#[tokio::test]
async fn missing_file_fails_before_anything_else() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.pdf");
    let script = Arc::new(Script::default());
    let coordinator = DeliveryCoordinator::new(script.factory());
    let source = CountingSource::new(THREE);

    let err = coordinator
        .deliver(&DeliveryRequest::new([missing]), &source, &credentials())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DeliveryError::Validation(ValidationError::File(FileAccessError::NotFound(_)))
    ));
    assert_eq!(source.reads.load(Ordering::SeqCst), 0);
    assert_eq!(script.created.load(Ordering::SeqCst), 0);
    assert!(script.events().is_empty());
}

#[tokio::test]
async fn directory_is_rejected_as_file() {
    let dir = tempfile::tempdir().unwrap();
    let script = Arc::new(Script::default());
    let coordinator = DeliveryCoordinator::new(script.factory());

    let err = coordinator
        .deliver(
            &DeliveryRequest::new([dir.path()]),
            &CountingSource::new(THREE),
            &credentials(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DeliveryError::Validation(ValidationError::File(FileAccessError::NotAFile(_)))
    ));
    assert!(script.events().is_empty());
}

#[tokio::test]
async fn empty_delivery_list_performs_no_transport_operations() {
    let (_dir, file) = data_file();
    let script = Arc::new(Script::default());
    let coordinator = DeliveryCoordinator::new(script.factory());

    let err = coordinator
        .deliver(
            &DeliveryRequest::new([file]),
            &DeliveryList::Inline("# nobody\n\nnot-an-address\n".into()),
            &credentials(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DeliveryError::Validation(ValidationError::EmptyRecipients(_))
    ));
    assert_eq!(script.created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unreadable_delivery_list_is_a_validation_error() {
    let (_dir, file) = data_file();
    let script = Arc::new(Script::default());
    let coordinator = DeliveryCoordinator::new(script.factory());

    let err = coordinator
        .deliver(
            &DeliveryRequest::new([file]),
            &DeliveryList::File("/no/such/recipients.txt".into()),
            &credentials(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DeliveryError::Validation(ValidationError::RecipientSource(_))
    ));
    assert!(script.events().is_empty());
}

#[tokio::test]
async fn no_files_is_a_validation_error() {
    let script = Arc::new(Script::default());
    let coordinator = DeliveryCoordinator::new(script.factory());

    let err = coordinator
        .deliver(
            &DeliveryRequest::default(),
            &DeliveryList::Inline(THREE.into()),
            &credentials(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DeliveryError::Validation(ValidationError::NoFiles)));
}

#[tokio::test]
async fn open_failure_aborts_and_closes() {
    let (_dir, file) = data_file();
    let script = Arc::new(Script {
        fail_open: true,
        ..Script::default()
    });
    let coordinator = DeliveryCoordinator::new(script.factory());

    let err = coordinator
        .deliver(&DeliveryRequest::new([file]), &DeliveryList::Inline(THREE.into()), &credentials())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DeliveryError::Aborted(SessionError::Authentication(_))
    ));
    assert_eq!(script.count(|e| matches!(e, Event::Send(..))), 0);
    assert_eq!(script.count(|e| matches!(e, Event::Close(_))), 1);
}

#[tokio::test(start_paused = true)]
async fn timed_out_send_is_recorded_and_batch_continues() {
    let (_dir, file) = data_file();
    let script = Arc::new(Script {
        hang: vec!["r2@x.com"],
        ..Script::default()
    });
    let options = DeliveryOptions::default().with_timeout(Duration::from_secs(5));
    let coordinator = DeliveryCoordinator::with_options(script.factory(), options);

    let report = coordinator
        .deliver(&DeliveryRequest::new([file]), &DeliveryList::Inline(THREE.into()), &credentials())
        .await
        .unwrap();

    assert_eq!(addrs(report.successes()), ["r1@x.com", "r3@x.com"]);
    assert_eq!(report.failures()[0].reason, FailureReason::Timeout);
    assert_eq!(report.total_attempted(), 3);
    assert_eq!(script.count(|e| matches!(e, Event::Close(_))), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_returns_partial_report_and_closes() {
    let (_dir, file) = data_file();
    let script = Arc::new(Script {
        send_delay: Some(Duration::from_secs(1)),
        ..Script::default()
    });
    let coordinator = DeliveryCoordinator::new(script.factory());
    let source = DeliveryList::Inline("r1@x.com\nr2@x.com\nr3@x.com\nr4@x.com\n".into());

    let err = coordinator
        .deliver_until(
            &DeliveryRequest::new([file]),
            &source,
            &credentials(),
            tokio::time::sleep(Duration::from_millis(1500)),
        )
        .await
        .unwrap_err();

    let DeliveryError::Cancelled(report) = err else {
        panic!("expected cancellation, got {err:?}");
    };
    assert_eq!(addrs(report.successes()), ["r1@x.com"]);
    assert_eq!(report.total_attempted(), 1);
    assert_eq!(script.count(|e| matches!(e, Event::Close(_))), 1);
    assert_eq!(script.events().last(), Some(&Event::Close(0)));
}

#[tokio::test]
async fn workers_use_disjoint_partitions_and_keep_order() {
    let (_dir, file) = data_file();
    let script = Arc::new(Script {
        reject: vec!["r4@x.com"],
        ..Script::default()
    });
    let options = DeliveryOptions::default().with_workers(2);
    let coordinator = DeliveryCoordinator::with_options(script.factory(), options);
    let source = DeliveryList::Inline("r1@x.com\nr2@x.com\nr3@x.com\nr4@x.com\nr5@x.com\n".into());

    let report = coordinator
        .deliver(&DeliveryRequest::new([file]), &source, &credentials())
        .await
        .unwrap();

    assert_eq!(
        addrs(report.successes()),
        ["r1@x.com", "r2@x.com", "r3@x.com", "r5@x.com"]
    );
    assert_eq!(report.failures()[0].recipient.as_str(), "r4@x.com");
    assert_eq!(report.total_attempted(), 5);

    let sends_by = |id: usize| -> Vec<String> {
        script
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Send(s, to) if s == id => Some(to),
                _ => None,
            })
            .collect()
    };
    assert_eq!(sends_by(0), ["r1@x.com", "r2@x.com", "r3@x.com"]);
    assert_eq!(sends_by(1), ["r4@x.com", "r5@x.com"]);
    assert_eq!(script.count(|e| matches!(e, Event::Open(_))), 2);
    assert_eq!(script.count(|e| matches!(e, Event::Close(_))), 2);
}

#[tokio::test]
async fn more_workers_than_recipients() {
    let (_dir, file) = data_file();
    let script = Arc::new(Script::default());
    let options = DeliveryOptions::default().with_workers(8);
    let coordinator = DeliveryCoordinator::with_options(script.factory(), options);

    let report = coordinator
        .deliver(
            &DeliveryRequest::new([file]),
            &DeliveryList::Inline("only@x.com".into()),
            &credentials(),
        )
        .await
        .unwrap();

    assert_eq!(report.total_attempted(), 1);
    assert_eq!(script.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn sender_name_and_templates_reach_the_message() {
    let (_dir, file) = data_file();

    struct Capture(Arc<Mutex<Vec<String>>>);

    impl TransportSession for Capture {
        fn state(&self) -> SessionState {
            SessionState::Authenticated
        }

        async fn open(&mut self, _: &TransportCredentials) -> Result<(), SessionError> {
            Ok(())
        }

        async fn send(&mut self, message: &Message) -> Result<(), FailureReason> {
            let wire = String::from_utf8(message.to_mime().unwrap()).unwrap();
            self.0.lock().unwrap().push(wire);
            Ok(())
        }

        async fn close(&mut self) {}
    }

    let captured = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&captured);
    let coordinator = DeliveryCoordinator::new(move || Capture(Arc::clone(&sink)));
    let request = DeliveryRequest::new([file])
        .subject("Monthly numbers")
        .body("Numbers attached.\n-- {sender_name}")
        .sender_name("Finance Team");

    coordinator
        .deliver(&request, &DeliveryList::Inline("a@x.com\nb@x.com".into()), &credentials())
        .await
        .unwrap();

    let messages = captured.lock().unwrap();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].contains("From: Finance Team <sender@example.com>\r\n"));
    assert!(messages[0].contains("To: a@x.com\r\n"));
    assert!(messages[1].contains("To: b@x.com\r\n"));
    assert!(messages[0].contains("Subject: Monthly numbers\r\n"));
    assert!(messages[0].contains("-- Finance Team"));
    assert!(messages[0].contains("filename=\"data.csv\""));
}
