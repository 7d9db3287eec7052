//! MIME message generation.

use crate::content_type::{ContentType, needs_quoting};
use crate::encoding::{
    encode_base64_wrapped, encode_quoted_printable, encode_rfc2047, encode_rfc2231, quote,
};
use crate::error::{Error, Result};
use crate::header::Headers;
use chrono::{DateTime, FixedOffset, Local};
use std::fmt;
use std::sync::Arc;

/// Transfer encoding types used when generating parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// 7-bit ASCII.
    SevenBit,
    /// Base64 encoding.
    Base64,
    /// Quoted-Printable encoding.
    QuotedPrintable,
}

impl fmt::Display for TransferEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SevenBit => write!(f, "7bit"),
            Self::Base64 => write!(f, "base64"),
            Self::QuotedPrintable => write!(f, "quoted-printable"),
        }
    }
}

/// One body part of a multipart message.
///
/// The body is stored already transfer-encoded. It is reference counted so a
/// large attachment encoded once can be placed in many messages.
#[derive(Debug, Clone)]
pub struct Part {
    /// Part headers.
    pub headers: Headers,
    body: Arc<str>,
}

impl Part {
    /// Creates a `text/plain; charset=utf-8` part, quoted-printable encoded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHeader`] if a part header is rejected.
    pub fn text(text: &str) -> Result<Self> {
        let mut headers = Headers::new();
        headers.add("Content-Type", ContentType::text_plain().to_string())?;
        headers.add(
            "Content-Transfer-Encoding",
            TransferEncoding::QuotedPrintable.to_string(),
        )?;
        Ok(Self {
            headers,
            body: Arc::from(encode_quoted_printable(text)),
        })
    }

    /// Creates an attachment part by base64-encoding `data`.
    ///
    /// # Errors
    ///
    /// Same as [`Part::attachment_encoded`].
    pub fn attachment(filename: &str, content_type: &ContentType, data: &[u8]) -> Result<Self> {
        Self::attachment_encoded(filename, content_type, Arc::from(encode_base64_wrapped(data)))
    }

    /// Creates an attachment part from content already produced by
    /// [`encode_base64_wrapped`](crate::encoding::encode_base64_wrapped).
    ///
    /// Filenames with control or non-ASCII characters are written with
    /// RFC 2231 parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHeader`] if a part header is rejected.
    pub fn attachment_encoded(
        filename: &str,
        content_type: &ContentType,
        encoded: Arc<str>,
    ) -> Result<Self> {
        let (param, value) = filename_parameter(filename);
        let content_type = content_type.clone().with_parameter("name", filename);
        let mut headers = Headers::new();
        headers.add("Content-Type", render_content_type(&content_type))?;
        headers.add(
            "Content-Transfer-Encoding",
            TransferEncoding::Base64.to_string(),
        )?;
        headers.add("Content-Disposition", format!("attachment; {param}={value}"))?;
        Ok(Self {
            headers,
            body: encoded,
        })
    }

    /// Encoded body text.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    fn write_to(&self, out: &mut String) {
        out.push_str(&self.headers.to_string());
        out.push_str("\r\n");
        out.push_str(&self.body);
        if !self.body.ends_with("\r\n") {
            out.push_str("\r\n");
        }
    }
}

/// A complete multipart/mixed message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Top-level headers, including `Content-Type` with the boundary.
    pub headers: Headers,
    /// Body parts in order.
    pub parts: Vec<Part>,
    boundary: String,
}

impl Message {
    /// Starts building a message.
    #[must_use]
    pub fn builder() -> MessageBuilder {
        MessageBuilder::default()
    }

    /// Boundary separating the parts.
    #[must_use]
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Gets the Subject header as rendered.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.headers.get("subject")
    }

    /// Gets the Message-ID header.
    #[must_use]
    pub fn message_id(&self) -> Option<&str> {
        self.headers.get("message-id")
    }

    /// Renders the message to wire bytes with CRLF line endings.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let boundary = &self.boundary;
        let mut out = self.headers.to_string();
        out.push_str("\r\nThis is a multi-part message in MIME format.\r\n");
        for part in &self.parts {
            out.push_str("\r\n--");
            out.push_str(boundary);
            out.push_str("\r\n");
            part.write_to(&mut out);
        }
        out.push_str("\r\n--");
        out.push_str(boundary);
        out.push_str("--\r\n");
        f.write_str(&out)
    }
}

/// Builder for [`Message`].
#[derive(Debug, Default)]
pub struct MessageBuilder {
    from: Option<String>,
    from_domain: Option<String>,
    to: Option<String>,
    subject: Option<String>,
    date: Option<DateTime<FixedOffset>>,
    message_id: Option<String>,
    boundary: Option<String>,
    parts: Vec<PendingPart>,
}

#[derive(Debug)]
enum PendingPart {
    Text(String),
    Ready(Part),
}

impl MessageBuilder {
    /// Sets the sender. `name` is optional and encoded when needed.
    #[must_use]
    pub fn from(mut self, name: Option<&str>, address: &str) -> Self {
        self.from_domain = address.rsplit_once('@').map(|(_, d)| d.to_string());
        self.from = Some(format_mailbox(name, address));
        self
    }

    /// Sets the single recipient.
    #[must_use]
    pub fn to(mut self, address: &str) -> Self {
        self.to = Some(format_mailbox(None, address));
        self
    }

    /// Sets the subject; non-ASCII text is RFC 2047 encoded.
    #[must_use]
    pub fn subject(mut self, subject: &str) -> Self {
        self.subject = Some(encode_rfc2047(subject));
        self
    }

    /// Overrides the Date header (defaults to now).
    #[must_use]
    pub fn date(mut self, date: DateTime<FixedOffset>) -> Self {
        self.date = Some(date);
        self
    }

    /// Overrides the Message-ID (without angle brackets).
    #[must_use]
    pub fn message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    /// Overrides the multipart boundary (defaults to a fresh random one).
    #[must_use]
    pub fn boundary(mut self, boundary: impl Into<String>) -> Self {
        self.boundary = Some(boundary.into());
        self
    }

    /// Appends a text/plain body part.
    #[must_use]
    pub fn text_body(mut self, text: &str) -> Self {
        self.parts.push(PendingPart::Text(text.to_string()));
        self
    }

    /// Appends a prepared part.
    #[must_use]
    pub fn part(mut self, part: Part) -> Self {
        self.parts.push(PendingPart::Ready(part));
        self
    }

    /// Builds the message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingHeader`] when sender or recipient is unset,
    /// [`Error::Empty`] when no parts were added, and
    /// [`Error::InvalidHeader`] when a header value would break the message.
    pub fn build(self) -> Result<Message> {
        let from = self.from.ok_or_else(|| Error::MissingHeader("From".into()))?;
        let to = self.to.ok_or_else(|| Error::MissingHeader("To".into()))?;
        if self.parts.is_empty() {
            return Err(Error::Empty);
        }
        let parts = self
            .parts
            .into_iter()
            .map(|part| match part {
                PendingPart::Text(text) => Part::text(&text),
                PendingPart::Ready(part) => Ok(part),
            })
            .collect::<Result<Vec<_>>>()?;

        let date = self.date.unwrap_or_else(|| Local::now().fixed_offset());
        let message_id = self.message_id.unwrap_or_else(|| {
            let domain = self.from_domain.as_deref().unwrap_or("localhost");
            format!("{}@{domain}", uuid::Uuid::new_v4().simple())
        });
        // "=_" never occurs in base64 or quoted-printable output.
        let boundary = self
            .boundary
            .unwrap_or_else(|| format!("=_filedrop_{}", uuid::Uuid::new_v4().simple()));

        let mut headers = Headers::new();
        headers.add("From", from)?;
        headers.add("To", to)?;
        headers.add("Subject", self.subject.unwrap_or_default())?;
        headers.add("Date", date.to_rfc2822())?;
        headers.add("Message-ID", format!("<{message_id}>"))?;
        headers.add("MIME-Version", "1.0")?;
        headers.add(
            "Content-Type",
            ContentType::multipart_mixed(boundary.clone()).to_string(),
        )?;

        Ok(Message {
            headers,
            parts,
            boundary,
        })
    }
}

/// Formats a mailbox as `Name <address>` or a bare address.
#[must_use]
pub fn format_mailbox(name: Option<&str>, address: &str) -> String {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        None => address.to_string(),
        Some(name) if !name.is_ascii() || name.chars().any(|c| c.is_ascii_control()) => {
            format!("{} <{address}>", encode_rfc2047(name))
        }
        Some(name) if name.contains(|c: char| "()<>[]:;@\\,.\"".contains(c)) => {
            format!("{} <{address}>", quote(name))
        }
        Some(name) => format!("{name} <{address}>"),
    }
}

// Content-Type with the `name` parameter rendered the same way as the
// disposition filename.
fn render_content_type(ct: &ContentType) -> String {
    let mut out = format!("{}/{}", ct.main_type, ct.sub_type);
    for (key, value) in &ct.parameters {
        if key.eq_ignore_ascii_case("name") {
            let (param, value) = filename_parameter(value);
            let param = if param.ends_with('*') { "name*" } else { "name" };
            out.push_str(&format!("; {param}={value}"));
        } else if needs_quoting(value) {
            out.push_str(&format!("; {key}={}", quote(value)));
        } else {
            out.push_str(&format!("; {key}={value}"));
        }
    }
    out
}

fn filename_parameter(filename: &str) -> (&'static str, String) {
    if filename.is_ascii() && !filename.chars().any(|c| c.is_ascii_control()) {
        ("filename", quote(filename))
    } else {
        ("filename*", encode_rfc2231(filename))
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
    use chrono::TimeZone;

    fn fixed_date() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 1, 12, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_transfer_encoding_display() {
        assert_eq!(TransferEncoding::Base64.to_string(), "base64");
        assert_eq!(
            TransferEncoding::QuotedPrintable.to_string(),
            "quoted-printable"
        );
    }

    #[test]
    fn test_attachment_part_headers() {
        let part = Part::attachment(
            "report.pdf",
            &ContentType::application_octet_stream(),
            b"%PDF",
        )
        .unwrap();
        assert_eq!(
            part.headers.get("Content-Type"),
            Some("application/octet-stream; name=\"report.pdf\"")
        );
        assert_eq!(part.headers.get("Content-Transfer-Encoding"), Some("base64"));
        assert_eq!(
            part.headers.get("Content-Disposition"),
            Some("attachment; filename=\"report.pdf\"")
        );
        assert_eq!(part.body(), "JVBERg==\r\n");
    }

    #[test]
    fn test_attachment_non_ascii_filename() {
        let octet = ContentType::application_octet_stream();
        let part = Part::attachment("résumé.pdf", &octet, b"x").unwrap();
        assert_eq!(
            part.headers.get("Content-Disposition"),
            Some("attachment; filename*=utf-8''r%C3%A9sum%C3%A9.pdf")
        );
        assert!(part.headers.get("Content-Type").unwrap().contains("name*="));
    }

    #[test]
    fn test_attachment_filename_with_line_break_keeps_every_header() {
        let octet = ContentType::application_octet_stream();
        let part = Part::attachment("evil\r\nBcc: x@y.z.txt", &octet, b"x").unwrap();
        assert_eq!(part.headers.len(), 3);
        let disposition = part.headers.get("Content-Disposition").unwrap();
        assert!(disposition.starts_with("attachment; filename*=utf-8''evil%0D%0ABcc"));
        assert!(part.headers.iter().all(|(_, v)| !v.contains('\r') && !v.contains('\n')));
    }

    #[test]
    fn test_text_part_headers() {
        let part = Part::text("héllo").unwrap();
        assert_eq!(part.headers.get("Content-Type"), Some("text/plain; charset=utf-8"));
        assert_eq!(
            part.headers.get("Content-Transfer-Encoding"),
            Some("quoted-printable")
        );
    }

    #[test]
    fn test_shared_attachment_body() {
        let encoded: Arc<str> = Arc::from(encode_base64_wrapped(b"data"));
        let octet = ContentType::application_octet_stream();
        let a = Part::attachment_encoded("a.bin", &octet, encoded.clone()).unwrap();
        let b = Part::attachment_encoded("a.bin", &octet, encoded.clone()).unwrap();
        assert!(std::ptr::eq(a.body(), b.body()));
    }

    #[test]
    fn test_format_mailbox() {
        assert_eq!(format_mailbox(None, "a@b.c"), "a@b.c");
        assert_eq!(format_mailbox(Some("  "), "a@b.c"), "a@b.c");
        assert_eq!(format_mailbox(Some("Alice"), "a@b.c"), "Alice <a@b.c>");
        assert_eq!(
            format_mailbox(Some("Smith, J."), "a@b.c"),
            "\"Smith, J.\" <a@b.c>"
        );
        assert_eq!(
            format_mailbox(Some("Zoë"), "a@b.c"),
            "=?utf-8?B?Wm/Dqw==?= <a@b.c>"
        );
    }

    #[test]
    fn test_build_requires_fields() {
        assert!(matches!(
            Message::builder().to("a@b.c").text_body("x").build(),
            Err(Error::MissingHeader(_))
        ));
        assert!(matches!(
            Message::builder().from(None, "a@b.c").text_body("x").build(),
            Err(Error::MissingHeader(_))
        ));
        assert!(matches!(
            Message::builder().from(None, "a@b.c").to("d@e.f").build(),
            Err(Error::Empty)
        ));
    }

    #[test]
    fn test_render_full_message() {
        let message = Message::builder()
            .from(Some("Alice"), "alice@example.com")
            .to("bob@example.org")
            .subject("File Delivery: a.txt")
            .date(fixed_date())
            .message_id("id1@example.com")
            .boundary("BOUNDARY")
            .text_body("Hello\nBob")
            .part(
                Part::attachment("a.txt", &ContentType::application_octet_stream(), b"hi")
                    .unwrap(),
            )
            .build()
            .unwrap();

        let expected = concat!(
            "From: Alice <alice@example.com>\r\n",
            "To: bob@example.org\r\n",
            "Subject: File Delivery: a.txt\r\n",
            "Date: Fri, 1 Mar 2024 12:00:00 +0000\r\n",
            "Message-ID: <id1@example.com>\r\n",
            "MIME-Version: 1.0\r\n",
            "Content-Type: multipart/mixed; boundary=BOUNDARY\r\n",
            "\r\n",
            "This is a multi-part message in MIME format.\r\n",
            "\r\n",
            "--BOUNDARY\r\n",
            "Content-Type: text/plain; charset=utf-8\r\n",
            "Content-Transfer-Encoding: quoted-printable\r\n",
            "\r\n",
            "Hello\r\n",
            "Bob\r\n",
            "\r\n",
            "--BOUNDARY\r\n",
            "Content-Type: application/octet-stream; name=\"a.txt\"\r\n",
            "Content-Transfer-Encoding: base64\r\n",
            "Content-Disposition: attachment; filename=\"a.txt\"\r\n",
            "\r\n",
            "aGk=\r\n",
            "\r\n",
            "--BOUNDARY--\r\n",
        );
        assert_eq!(message.to_string(), expected);
    }

    #[test]
    fn test_default_boundary_and_message_id() {
        let build = || {
            Message::builder()
                .from(None, "alice@example.com")
                .to("bob@example.org")
                .text_body("x")
                .build()
                .unwrap()
        };
        let (a, b) = (build(), build());
        assert_ne!(a.boundary(), b.boundary());
        assert!(a.boundary().starts_with("=_filedrop_"));
        assert!(a.message_id().unwrap().ends_with("@example.com>"));
        assert_ne!(a.message_id(), b.message_id());
        assert!(
            a.headers
                .get("Content-Type")
                .unwrap()
                .contains(&format!("boundary=\"{}\"", a.boundary()))
        );
    }

    #[test]
    fn test_non_ascii_subject_encoded() {
        let message = Message::builder()
            .from(None, "a@b.c")
            .to("d@e.f")
            .subject("Héllo")
            .text_body("x")
            .build()
            .unwrap();
        assert_eq!(message.subject(), Some("=?utf-8?B?SMOpbGxv?="));
        assert!(message.to_bytes().is_ascii());
    }
}
