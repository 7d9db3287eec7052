//! # filedrop-mime
//!
//! MIME message generation for file delivery.
//!
//! ## Features
//!
//! - **Multipart/mixed**: a quoted-printable text part followed by base64 attachments
//! - **Shared attachments**: encode a file once, reuse the encoded body in every message
//! - **Header encoding**: RFC 2047 for subjects and display names, RFC 2231 for filenames
//! - **Header safety**: values that would inject extra header lines are rejected
//!
//! ## Quick Start
//!
//! ```
//! use filedrop_mime::{ContentType, Message, Part};
//!
//! let message = Message::builder()
//!     .from(Some("Alice"), "alice@example.com")
//!     .to("bob@example.org")
//!     .subject("File Delivery: notes.txt")
//!     .text_body("Please find the attached file.")
//!     .part(Part::attachment(
//!         "notes.txt",
//!         &ContentType::application_octet_stream(),
//!         b"hello",
//!     )?)
//!     .build()?;
//!
//! let wire = message.to_bytes();
//! assert!(wire.starts_with(b"From: Alice <alice@example.com>\r\n"));
//! # Ok::<(), filedrop_mime::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod content_type;
mod error;
mod header;
mod message;

pub mod encoding;

pub use content_type::ContentType;
pub use error::{Error, Result};
pub use header::Headers;
pub use message::{Message, MessageBuilder, Part, TransferEncoding, format_mailbox};
