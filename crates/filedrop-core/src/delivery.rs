//! Delivery coordination.
//!
//! [`DeliveryCoordinator::deliver`] runs the whole batch:
//!
//! 1. every file is validated; nothing else happens if one is unusable
//! 2. the delivery list is read and loaded
//! 3. attachments are built once and shared by all messages
//! 4. one session per lane is opened; any failure aborts the run
//! 5. each lane sends to its recipients in order, recording every outcome
//! 6. all sessions are closed, whatever happened
//!
//! With more than one worker the recipients are split into contiguous,
//! disjoint chunks, one session per chunk. Outcomes are concatenated in
//! chunk order, so the report order matches the delivery list.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use filedrop_smtp::{Address, Mailbox};
use futures::future::join_all;
use tracing::{info, warn};

use crate::attachment::{self, Attachment};
use crate::compose::compose;
use crate::error::{DeliveryError, Result, SessionError, ValidationError};
use crate::recipients::{self, RecipientSource};
use crate::report::{DeliveryOutcome, DeliveryReport, FailureReason};
use crate::transport::{SessionFactory, TransportCredentials, TransportSession};

/// Default bound on opening a session and on each send.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// What to deliver.
#[derive(Debug, Clone, Default)]
pub struct DeliveryRequest {
    /// Files attached to every message.
    pub files: Vec<PathBuf>,
    /// Subject override.
    pub subject: Option<String>,
    /// Body template override; `{sender_name}` is substituted.
    pub body: Option<String>,
    /// Display name for the `From:` header.
    pub sender_name: Option<String>,
}

impl DeliveryRequest {
    /// Creates a request for the given files with default texts.
    #[must_use]
    pub fn new(files: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            files: files.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Sets the subject.
    #[must_use]
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Sets the body template.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Sets the sender display name.
    #[must_use]
    pub fn sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }
}

/// Tuning knobs for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryOptions {
    /// Bound on each open, send and close.
    pub timeout: Duration,
    /// Number of concurrent sessions.
    pub workers: usize,
}

impl Default for DeliveryOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            workers: 1,
        }
    }
}

impl DeliveryOptions {
    /// Sets the per-operation timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the worker count (values below 1 mean 1).
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

/// Shared, read-only inputs of every lane.
struct LaneContext<'a> {
    sender: &'a Mailbox,
    subject: Option<&'a str>,
    body: Option<&'a str>,
    attachments: &'a Arc<[Attachment]>,
    timeout: Duration,
}

/// Runs delivery batches using sessions from a [`SessionFactory`].
#[derive(Debug)]
pub struct DeliveryCoordinator<F> {
    factory: F,
    options: DeliveryOptions,
}

impl<F: SessionFactory> DeliveryCoordinator<F> {
    /// Creates a coordinator with default options.
    #[must_use]
    pub fn new(factory: F) -> Self {
        Self::with_options(factory, DeliveryOptions::default())
    }

    /// Creates a coordinator with explicit options.
    #[must_use]
    pub const fn with_options(factory: F, options: DeliveryOptions) -> Self {
        Self { factory, options }
    }

    /// Options in effect.
    #[must_use]
    pub const fn options(&self) -> &DeliveryOptions {
        &self.options
    }

    /// Delivers the files to every recipient of `source`.
    ///
    /// # Errors
    ///
    /// [`DeliveryError::Validation`] before anything is sent,
    /// [`DeliveryError::Aborted`] when a session cannot be opened.
    /// Per-recipient failures are reported, not returned.
    pub async fn deliver<R: RecipientSource>(
        &self,
        request: &DeliveryRequest,
        source: &R,
        credentials: &TransportCredentials,
    ) -> Result<DeliveryReport> {
        self.deliver_until(request, source, credentials, std::future::pending())
            .await
    }

    /// Like [`deliver`](Self::deliver), stopping early when `cancel`
    /// completes.
    ///
    /// # Errors
    ///
    /// As [`deliver`](Self::deliver), plus [`DeliveryError::Cancelled`]
    /// carrying the outcomes recorded before cancellation. Sessions are
    /// closed before it is returned.
    pub async fn deliver_until<R, C>(
        &self,
        request: &DeliveryRequest,
        source: &R,
        credentials: &TransportCredentials,
        cancel: C,
    ) -> Result<DeliveryReport>
    where
        R: RecipientSource,
        C: Future<Output = ()> + Send,
    {
        if request.files.is_empty() {
            return Err(ValidationError::NoFiles.into());
        }
        for path in &request.files {
            attachment::validate(path)
                .await
                .map_err(ValidationError::from)?;
        }

        let text = source
            .read()
            .await
            .map_err(ValidationError::RecipientSource)?;
        let recipients = recipients::load_str(&text)
            .map_err(ValidationError::from)?
            .into_addresses();

        let mut built = Vec::with_capacity(request.files.len());
        for path in &request.files {
            built.push(attachment::build(path).await.map_err(ValidationError::from)?);
        }
        let attachments: Arc<[Attachment]> = built.into();

        let sender = match request.sender_name.as_deref() {
            Some(name) => Mailbox::with_name(name, credentials.identity.clone()),
            None => Mailbox::new(credentials.identity.clone()),
        };

        let lanes = self.options.workers.clamp(1, recipients.len());
        let chunk_size = recipients.len().div_ceil(lanes);
        let chunks: Vec<&[Address]> = recipients.chunks(chunk_size).collect();
        info!(
            recipients = recipients.len(),
            files = attachments.len(),
            sessions = chunks.len(),
            "starting delivery"
        );

        let mut sessions: Vec<F::Session> = chunks.iter().map(|_| self.factory.create()).collect();
        tokio::pin!(cancel);

        let opened = tokio::select! {
            biased;
            () = &mut cancel => None,
            result = self.open_all(&mut sessions, credentials) => Some(result),
        };
        match opened {
            None => {
                self.close_all(&mut sessions).await;
                warn!("delivery cancelled before sending");
                return Err(DeliveryError::Cancelled(DeliveryReport::default()));
            }
            Some(Err(e)) => {
                self.close_all(&mut sessions).await;
                return Err(DeliveryError::Aborted(e));
            }
            Some(Ok(())) => {}
        }

        let context = LaneContext {
            sender: &sender,
            subject: request.subject.as_deref(),
            body: request.body.as_deref(),
            attachments: &attachments,
            timeout: self.options.timeout,
        };
        let mut outcomes: Vec<Vec<DeliveryOutcome>> = chunks.iter().map(|_| Vec::new()).collect();

        let cancelled = {
            let lanes = sessions
                .iter_mut()
                .zip(outcomes.iter_mut())
                .zip(chunks.iter())
                .map(|((session, out), chunk)| run_lane(session, chunk, &context, out));
            tokio::select! {
                biased;
                () = &mut cancel => true,
                _ = join_all(lanes) => false,
            }
        };

        self.close_all(&mut sessions).await;
        let report = DeliveryReport::from_outcomes(outcomes.into_iter().flatten());

        if cancelled {
            warn!(
                attempted = report.total_attempted(),
                of = recipients.len(),
                "delivery cancelled"
            );
            return Err(DeliveryError::Cancelled(report));
        }

        info!(
            succeeded = report.successes().len(),
            failed = report.failures().len(),
            "delivery finished"
        );
        Ok(report)
    }

    async fn open_all(
        &self,
        sessions: &mut [F::Session],
        credentials: &TransportCredentials,
    ) -> std::result::Result<(), SessionError> {
        let timeout = self.options.timeout;
        let results = join_all(sessions.iter_mut().map(|session| async move {
            match tokio::time::timeout(timeout, session.open(credentials)).await {
                Ok(result) => result,
                Err(_) => Err(SessionError::Timeout(timeout)),
            }
        }))
        .await;
        results.into_iter().collect()
    }

    async fn close_all(&self, sessions: &mut [F::Session]) {
        let timeout = self.options.timeout;
        join_all(sessions.iter_mut().map(|session| async move {
            if tokio::time::timeout(timeout, session.close()).await.is_err() {
                warn!("closing session timed out");
            }
        }))
        .await;
    }
}

async fn run_lane<S: TransportSession>(
    session: &mut S,
    recipients: &[Address],
    context: &LaneContext<'_>,
    outcomes: &mut Vec<DeliveryOutcome>,
) {
    for recipient in recipients {
        let message = compose(
            context.sender,
            recipient,
            context.subject,
            context.body,
            context.attachments,
        );

        let result = match tokio::time::timeout(context.timeout, session.send(&message)).await {
            Ok(result) => result,
            Err(_) => Err(FailureReason::Timeout),
        };

        let outcome = match result {
            Ok(()) => {
                info!(recipient = %recipient, "delivered");
                DeliveryOutcome::Success {
                    recipient: recipient.clone(),
                }
            }
            Err(reason) => {
                warn!(recipient = %recipient, %reason, "delivery failed");
                DeliveryOutcome::Failure {
                    recipient: recipient.clone(),
                    reason,
                }
            }
        };
        outcomes.push(outcome);
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

    #[test]
    fn test_options_defaults() {
        let options = DeliveryOptions::default();
        assert_eq!(options.timeout, Duration::from_secs(30));
        assert_eq!(options.workers, 1);

        let options = options.with_workers(4).with_timeout(Duration::from_secs(5));
        assert_eq!(options.workers, 4);
        assert_eq!(options.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_request_builder() {
        let request = DeliveryRequest::new(["a.txt", "b.txt"])
            .subject("Monthly")
            .body("Hi")
            .sender_name("Alice");
        assert_eq!(request.files, [PathBuf::from("a.txt"), PathBuf::from("b.txt")]);
        assert_eq!(request.subject.as_deref(), Some("Monthly"));
        assert_eq!(request.body.as_deref(), Some("Hi"));
        assert_eq!(request.sender_name.as_deref(), Some("Alice"));
    }
}
