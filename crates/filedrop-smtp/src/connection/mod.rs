//! SMTP connection management with type-state pattern.

mod client;
mod stream;

pub use client::{Authenticated, Client, Connected};
pub use stream::{Io, SmtpStream, connect, connect_tls};

use crate::types::{AuthMechanism, Extension};

/// Server capabilities from the greeting and EHLO response.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// Server hostname from greeting.
    pub hostname: String,
    /// Advertised extensions, in EHLO order.
    pub extensions: Vec<Extension>,
}

impl ServerInfo {
    /// Checks if the server supports an extension.
    #[must_use]
    pub fn supports(&self, ext: &Extension) -> bool {
        self.extensions.contains(ext)
    }

    /// Checks if STARTTLS is supported.
    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.supports(&Extension::StartTls)
    }

    /// Returns the maximum message size, if advertised.
    #[must_use]
    pub fn max_message_size(&self) -> Option<usize> {
        self.extensions.iter().find_map(|ext| match ext {
            Extension::Size(size) => *size,
            _ => None,
        })
    }

    /// Returns supported authentication mechanisms.
    #[must_use]
    pub fn auth_mechanisms(&self) -> &[AuthMechanism] {
        self.extensions
            .iter()
            .find_map(|ext| match ext {
                Extension::Auth(mechanisms) => Some(mechanisms.as_slice()),
                _ => None,
            })
            .unwrap_or_default()
    }

    /// Picks the mechanism to authenticate with: PLAIN unless the server only
    /// offers LOGIN.
    #[must_use]
    pub fn preferred_auth(&self) -> AuthMechanism {
        let mechanisms = self.auth_mechanisms();
        if !mechanisms.contains(&AuthMechanism::Plain) && mechanisms.contains(&AuthMechanism::Login)
        {
            AuthMechanism::Login
        } else {
            AuthMechanism::Plain
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(lines: &[&str]) -> ServerInfo {
        ServerInfo {
            hostname: "mx.example.com".to_string(),
            extensions: lines.iter().map(|l| Extension::parse(l)).collect(),
        }
    }

    #[test]
    fn reads_size_and_starttls() {
        let info = info(&["SIZE 1000", "STARTTLS", "AUTH PLAIN LOGIN"]);
        assert!(info.supports_starttls());
        assert_eq!(info.max_message_size(), Some(1000));
        assert_eq!(info.auth_mechanisms().len(), 2);
    }

    #[test]
    fn prefers_plain() {
        assert_eq!(
            info(&["AUTH LOGIN PLAIN"]).preferred_auth(),
            AuthMechanism::Plain
        );
        assert_eq!(info(&["AUTH LOGIN"]).preferred_auth(), AuthMechanism::Login);
        assert_eq!(info(&[]).preferred_auth(), AuthMechanism::Plain);
    }
}
