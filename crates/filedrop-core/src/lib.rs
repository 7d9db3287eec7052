//! # filedrop-core
//!
//! Bulk file delivery over one authenticated SMTP session.
//!
//! This crate provides:
//! - **Delivery lists** - loading, validating and deduplicating recipients
//! - **Attachments** - read and encoded once, shared by every message
//! - **Composition** - one fresh message per recipient with a body template
//! - **Transport sessions** - a cancel-safe SMTP session reused for the batch
//! - **Coordination** - fail-fast validation, per-recipient outcomes,
//!   timeouts, cancellation and optional parallel sessions
//! - **Configuration** - JSON sender settings and provider presets
//!
//! ## Example
//!
//! ```no_run
//! use filedrop_core::{
//!     DeliveryCoordinator, DeliveryList, DeliveryRequest, Settings, SmtpSession,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load(None)?;
//! let credentials = settings.credentials(None)?;
//!
//! let request = DeliveryRequest::new(["report.pdf"]).subject("Monthly report");
//! let source = DeliveryList::File("recipients.txt".into());
//!
//! let coordinator = DeliveryCoordinator::new(SmtpSession::new);
//! let report = coordinator.deliver(&request, &source, &credentials).await?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod attachment;
pub mod compose;
pub mod config;
pub mod delivery;
mod error;
pub mod recipients;
pub mod report;
pub mod transport;

pub use attachment::{Attachment, FileAccessError};
pub use compose::{Message, compose};
pub use config::{ConfigError, Provider, Settings};
pub use delivery::{DeliveryCoordinator, DeliveryOptions, DeliveryRequest};
pub use error::{DeliveryError, Result, SessionError, ValidationError};
pub use recipients::{DeliveryList, EmptySourceError, RecipientList, RecipientSource};
pub use report::{DeliveryOutcome, DeliveryReport, FailureReason, RecipientFailure};
pub use transport::{
    Security, SessionFactory, SessionState, SmtpSession, TransportCredentials, TransportSession,
};

pub use filedrop_smtp::{Address, Mailbox};
pub use secrecy::{ExposeSecret, SecretString};
