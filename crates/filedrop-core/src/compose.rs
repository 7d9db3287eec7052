//! Per-recipient message composition.

use std::sync::Arc;

use filedrop_mime::{ContentType, Part};
use filedrop_smtp::{Address, Mailbox};

use crate::attachment::Attachment;

/// Token in a body template replaced by the sender's display name.
pub const SENDER_NAME_TOKEN: &str = "{sender_name}";

/// A message for exactly one recipient.
///
/// Attachments are shared with every other message of the run.
#[derive(Debug, Clone)]
pub struct Message {
    from: Mailbox,
    to: Address,
    subject: String,
    body: String,
    attachments: Arc<[Attachment]>,
}

impl Message {
    /// Sender mailbox.
    #[must_use]
    pub const fn from(&self) -> &Mailbox {
        &self.from
    }

    /// Envelope and header recipient.
    #[must_use]
    pub const fn to(&self) -> &Address {
        &self.to
    }

    /// Subject, single line.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Body text with the template already rendered.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Attachments in order.
    #[must_use]
    pub fn attachments(&self) -> &[Attachment] {
        &self.attachments
    }

    /// Renders the message as a `multipart/mixed` RFC 5322 document.
    ///
    /// # Errors
    ///
    /// Returns an error if a header value cannot be represented.
    pub fn to_mime(&self) -> filedrop_mime::Result<Vec<u8>> {
        let content_type = ContentType::application_octet_stream();
        let mut builder = filedrop_mime::Message::builder()
            .from(self.from.name.as_deref(), self.from.address.as_str())
            .to(self.to.as_str())
            .subject(&self.subject)
            .text_body(&self.body);
        for attachment in self.attachments.iter() {
            builder = builder.part(Part::attachment_encoded(
                attachment.filename(),
                &content_type,
                Arc::clone(attachment.encoded()),
            )?);
        }
        Ok(builder.build()?.to_bytes())
    }
}

/// Builds the message for one recipient.
///
/// `subject` and `body_template` fall back to [`default_subject`] and
/// [`default_body`]. Only `{sender_name}` is substituted in the body; other
/// brace tokens are kept verbatim.
#[must_use]
pub fn compose(
    sender: &Mailbox,
    recipient: &Address,
    subject: Option<&str>,
    body_template: Option<&str>,
    attachments: &Arc<[Attachment]>,
) -> Message {
    let subject = subject.map_or_else(|| default_subject(attachments), single_line);
    let template = body_template.map_or_else(|| default_body(attachments), str::to_string);

    Message {
        from: sender.clone(),
        to: recipient.clone(),
        subject,
        body: render_body(&template, sender),
        attachments: Arc::clone(attachments),
    }
}

/// `File Delivery: <names>` with the file names comma-joined.
#[must_use]
pub fn default_subject(attachments: &[Attachment]) -> String {
    format!("File Delivery: {}", file_list(attachments, ", "))
}

/// Default body template, signed with `{sender_name}`.
#[must_use]
pub fn default_body(attachments: &[Attachment]) -> String {
    let noun = if attachments.len() == 1 { "file" } else { "files" };
    format!(
        "Hello,\n\nPlease find the attached {noun}: {}\n\n\
         This {noun} was sent automatically by the File Delivery Service.\n\n\
         Best regards,\n{SENDER_NAME_TOKEN}\n",
        file_list(attachments, ", ")
    )
}

/// Replaces `{sender_name}` with the display name, or the sender address
/// when no name is set.
#[must_use]
pub fn render_body(template: &str, sender: &Mailbox) -> String {
    template.replace(SENDER_NAME_TOKEN, sender.display_name())
}

fn file_list(attachments: &[Attachment], separator: &str) -> String {
    attachments
        .iter()
        .map(Attachment::filename)
        .collect::<Vec<_>>()
        .join(separator)
}

fn single_line(subject: &str) -> String {
    subject
        .split(['\r', '\n'])
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
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

    fn sender(name: Option<&str>) -> Mailbox {
        let address = Address::new("alice@example.com").unwrap();
        name.map_or_else(
            || Mailbox::new(address.clone()),
            |n| Mailbox::with_name(n, address.clone()),
        )
    }

    fn files(names: &[&str]) -> Arc<[Attachment]> {
        names
            .iter()
            .map(|n| Attachment::from_bytes(*n, n.as_bytes().to_vec()))
            .collect()
    }

    fn bob() -> Address {
        Address::new("bob@example.org").unwrap()
    }

    #[test]
    fn test_defaults_single_file() {
        let message = compose(&sender(Some("Alice")), &bob(), None, None, &files(&["a.pdf"]));
        assert_eq!(message.subject(), "File Delivery: a.pdf");
        assert!(message.body().contains("Please find the attached file: a.pdf"));
        assert!(message.body().ends_with("Best regards,\nAlice\n"));
        assert_eq!(message.to(), &bob());
    }

    #[test]
    fn test_defaults_several_files() {
        let message = compose(&sender(None), &bob(), None, None, &files(&["a.pdf", "b.csv"]));
        assert_eq!(message.subject(), "File Delivery: a.pdf, b.csv");
        assert!(message.body().contains("attached files: a.pdf, b.csv"));
        // No display name: the address signs the message.
        assert!(message.body().ends_with("alice@example.com\n"));
    }

    #[test]
    fn test_only_sender_name_token_substituted() {
        let message = compose(
            &sender(Some("Alice")),
            &bob(),
            Some("Report"),
            Some("Hi {name}, from {sender_name} {sender_name}"),
            &files(&["a.pdf"]),
        );
        assert_eq!(message.body(), "Hi {name}, from Alice Alice");
    }

    #[test]
    fn test_subject_line_breaks_folded() {
        let message = compose(
            &sender(None),
            &bob(),
            Some("Monthly\r\nReport\nBcc: x@y.z"),
            None,
            &files(&["a.pdf"]),
        );
        assert_eq!(message.subject(), "Monthly Report Bcc: x@y.z");
    }

    #[test]
    fn test_attachments_shared_not_copied() {
        let attachments = files(&["a.pdf"]);
        let m1 = compose(&sender(None), &bob(), None, None, &attachments);
        let m2 = compose(&sender(None), &bob(), None, None, &attachments);
        assert!(Arc::ptr_eq(m1.attachments()[0].encoded(), m2.attachments()[0].encoded()));
    }

    #[test]
    fn test_to_mime_renders_multipart() {
        let message = compose(
            &sender(Some("Alice")),
            &bob(),
            None,
            None,
            &files(&["a.txt", "b.txt"]),
        );
        let wire = String::from_utf8(message.to_mime().unwrap()).unwrap();
        assert!(wire.starts_with("From: Alice <alice@example.com>\r\nTo: bob@example.org\r\n"));
        assert!(wire.contains("Subject: File Delivery: a.txt, b.txt\r\n"));
        assert!(wire.contains("MIME-Version: 1.0\r\n"));
        assert!(wire.contains("Content-Type: multipart/mixed; boundary="));
        assert!(wire.contains("Content-Disposition: attachment; filename=\"a.txt\"\r\n"));
        assert!(wire.contains("Content-Disposition: attachment; filename=\"b.txt\"\r\n"));
        // base64 of "a.txt"
        assert!(wire.contains("YS50eHQ=\r\n"));
        assert_eq!(wire.matches("Content-Transfer-Encoding: base64").count(), 2);
    }

    #[test]
    fn test_each_render_uses_fresh_boundary() {
        let message = compose(&sender(None), &bob(), None, None, &files(&["a.txt"]));
        let first = String::from_utf8(message.to_mime().unwrap()).unwrap();
        let second = String::from_utf8(message.to_mime().unwrap()).unwrap();
        assert_ne!(first, second);
    }
}
