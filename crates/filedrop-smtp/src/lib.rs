//! # filedrop-smtp
//!
//! A small SMTP submission client (RFC 5321) used by `filedrop` to push many
//! messages through one authenticated connection.
//!
//! ## Features
//!
//! - **Type-state handshake**: greeting, EHLO, STARTTLS and AUTH are only
//!   callable in the states where they make sense
//! - **Reusable transactions**: [`Client::<Authenticated>::send_mail`] runs one
//!   `MAIL`/`RCPT`/`DATA` exchange and resets the server with `RSET` when a
//!   recipient is refused, so the connection keeps serving the next message
//! - **TLS support**: implicit TLS (port 465) and STARTTLS (port 587)
//! - **Authentication**: PLAIN and LOGIN
//!
//! ## Quick Start
//!
//! ```ignore
//! use filedrop_smtp::{Address, Client};
//! use filedrop_smtp::connection::connect;
//!
//! #[tokio::main]
//! async fn main() -> filedrop_smtp::Result<()> {
//!     let stream = connect("smtp.example.com", 587).await?;
//!     let client = Client::from_stream(stream).await?;
//!     let client = client.ehlo("client.example.com").await?;
//!     let client = client.starttls("smtp.example.com").await?;
//!     let mut client = client.auth_plain("user@example.com", "password").await?;
//!
//!     let from = Address::new("user@example.com")?;
//!     let to = Address::new("friend@example.com")?;
//!     client
//!         .send_mail(&from, &to, b"Subject: Hi\r\n\r\nHello!\r\n")
//!         .await?;
//!
//!     client.quit().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Connection States
//!
//! ```text
//! ┌──────────────┐  auth_plain() / auth_login()  ┌───────────────┐
//! │  Connected   │ ────────────────────────────→ │ Authenticated │ ──┐
//! └──────────────┘                               └───────────────┘   │ send_mail()
//!                                                        ↑───────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
pub mod types;

pub use connection::{Authenticated, Client, Connected, ServerInfo, SmtpStream};
pub use error::{Error, Result};
pub use types::{Address, AuthMechanism, Extension, Mailbox, Reply, ReplyCode};
