//! Sender configuration.
//!
//! Settings are read from a JSON file with exactly these keys:
//!
//! ```json
//! {
//!   "smtp_server": "smtp.gmail.com",
//!   "smtp_port": 587,
//!   "sender_email": "me@example.com",
//!   "sender_password": "app-password",
//!   "sender_name": "Me"
//! }
//! ```
//!
//! Lookup order: an explicit path, then `./filedrop.json`, then
//! `<config dir>/filedrop/config.json`.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use filedrop_smtp::{Address, Mailbox};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::transport::{Security, TransportCredentials};

/// Default relay when no configuration exists.
pub const DEFAULT_SMTP_SERVER: &str = "smtp.gmail.com";

/// Submission port.
pub const DEFAULT_SMTP_PORT: u16 = 587;

/// File name looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "filedrop.json";

const PLACEHOLDER_EMAIL: &str = "your_email@gmail.com";
const PLACEHOLDER_PASSWORD: &str = "your_app_password";

/// Configuration problems.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Cannot read {}: {source}", path.display())]
    Io {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON or has unknown keys.
    #[error("Invalid configuration in {}: {source}", path.display())]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },

    /// A required value is empty.
    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    /// A value still holds the sample placeholder.
    #[error("Setting {0} still has its placeholder value")]
    Placeholder(&'static str),

    /// The port is zero.
    #[error("smtp_port must be 1-65535")]
    InvalidPort,

    /// `sender_email` is not a valid address.
    #[error("Invalid sender address: {0}")]
    InvalidSender(String),

    /// Unknown provider preset name.
    #[error("Unknown provider: {0} (expected gmail, outlook or yahoo)")]
    UnknownProvider(String),

    /// Unknown security mode name.
    #[error("Unknown security mode: {0} (expected starttls, tls or none)")]
    UnknownSecurity(String),
}

/// Well-known relay presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    /// Google Mail.
    Gmail,
    /// Outlook / Office 365.
    Outlook,
    /// Yahoo Mail.
    Yahoo,
}

impl Provider {
    /// Relay hostname.
    #[must_use]
    pub const fn host(self) -> &'static str {
        match self {
            Self::Gmail => "smtp.gmail.com",
            Self::Outlook => "smtp-mail.outlook.com",
            Self::Yahoo => "smtp.mail.yahoo.com",
        }
    }

    /// Relay port (submission with STARTTLS for all presets).
    #[must_use]
    pub const fn port(self) -> u16 {
        DEFAULT_SMTP_PORT
    }
}

impl FromStr for Provider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gmail" => Ok(Self::Gmail),
            "outlook" | "hotmail" | "office365" => Ok(Self::Outlook),
            "yahoo" => Ok(Self::Yahoo),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

/// Sender settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Relay hostname.
    #[serde(default = "default_server")]
    pub smtp_server: String,
    /// Relay port.
    #[serde(default = "default_port")]
    pub smtp_port: u16,
    /// Sender address and login identity.
    #[serde(default)]
    pub sender_email: String,
    /// Password or app token.
    #[serde(default)]
    pub sender_password: Option<SecretString>,
    /// Optional display name.
    #[serde(default)]
    pub sender_name: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            smtp_server: default_server(),
            smtp_port: DEFAULT_SMTP_PORT,
            sender_email: String::new(),
            sender_password: None,
            sender_name: None,
        }
    }
}

fn default_server() -> String {
    DEFAULT_SMTP_SERVER.to_string()
}

const fn default_port() -> u16 {
    DEFAULT_SMTP_PORT
}

impl Settings {
    /// Parses settings from JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed JSON or unknown keys.
    pub fn from_json(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Reads settings from a file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] or [`ConfigError::Parse`].
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded configuration");
        Self::from_json(&text, path)
    }

    /// Loads from `explicit` when given, else from the first existing
    /// default location, else returns defaults with a warning.
    ///
    /// # Errors
    ///
    /// An explicit path must exist; any file found must parse.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }
        match search_paths().into_iter().find(|p| p.is_file()) {
            Some(path) => Self::load_from(&path),
            None => {
                warn!("no configuration file found; using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Replaces server and port with a provider preset.
    pub fn apply_provider(&mut self, provider: Provider) {
        self.smtp_server = provider.host().to_string();
        self.smtp_port = provider.port();
    }

    /// Checks that the settings can be used to send.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.smtp_server.trim().is_empty() {
            return Err(ConfigError::Missing("smtp_server"));
        }
        if self.smtp_port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        let email = self.sender_email.trim();
        if email.is_empty() {
            return Err(ConfigError::Missing("sender_email"));
        }
        if email == PLACEHOLDER_EMAIL {
            return Err(ConfigError::Placeholder("sender_email"));
        }
        Address::new(email).map_err(|e| ConfigError::InvalidSender(e.to_string()))?;

        let password = self
            .sender_password
            .as_ref()
            .map(|p| p.expose_secret().as_str())
            .unwrap_or_default();
        if password.is_empty() {
            return Err(ConfigError::Missing("sender_password"));
        }
        if password == PLACEHOLDER_PASSWORD {
            return Err(ConfigError::Placeholder("sender_password"));
        }
        Ok(())
    }

    /// Sender mailbox for the `From:` header.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSender`] for a bad address.
    pub fn sender(&self) -> Result<Mailbox, ConfigError> {
        let address = Address::new(self.sender_email.trim())
            .map_err(|e| ConfigError::InvalidSender(e.to_string()))?;
        Ok(match self.sender_name.as_deref() {
            Some(name) => Mailbox::with_name(name, address),
            None => Mailbox::new(address),
        })
    }

    /// Validates and converts to transport credentials.
    ///
    /// `security` defaults to [`Security::for_port`].
    ///
    /// # Errors
    ///
    /// Same as [`Settings::validate`].
    pub fn credentials(
        &self,
        security: Option<Security>,
    ) -> Result<TransportCredentials, ConfigError> {
        self.validate()?;
        let identity = self.sender()?.address;
        let secret = self
            .sender_password
            .clone()
            .ok_or(ConfigError::Missing("sender_password"))?;
        Ok(TransportCredentials::new(
            self.smtp_server.trim(),
            self.smtp_port,
            security.unwrap_or_else(|| Security::for_port(self.smtp_port)),
            identity,
            secret,
        ))
    }
}

/// Default configuration locations in lookup order.
#[must_use]
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("filedrop").join("config.json"));
    }
    paths
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

    fn parse(json: &str) -> Result<Settings, ConfigError> {
        Settings::from_json(json, Path::new("test.json"))
    }

    fn valid() -> Settings {
        parse(
            r#"{
                "smtp_server": "smtp.example.com",
                "smtp_port": 465,
                "sender_email": "alice@example.com",
                "sender_password": "s3cret",
                "sender_name": "Alice"
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_full() {
        let settings = valid();
        assert_eq!(settings.smtp_server, "smtp.example.com");
        assert_eq!(settings.smtp_port, 465);
        assert_eq!(settings.sender_name.as_deref(), Some("Alice"));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_parse_defaults() {
        let settings = parse(r#"{"sender_email": "a@b.c"}"#).unwrap();
        assert_eq!(settings.smtp_server, "smtp.gmail.com");
        assert_eq!(settings.smtp_port, 587);
        assert!(settings.sender_password.is_none());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        assert!(matches!(
            parse(r#"{"smtp_host": "x"}"#),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_validation_errors() {
        let mut s = valid();
        s.sender_email = "your_email@gmail.com".into();
        assert!(matches!(s.validate(), Err(ConfigError::Placeholder("sender_email"))));

        let mut s = valid();
        s.sender_password = Some(SecretString::new("your_app_password".into()));
        assert!(matches!(s.validate(), Err(ConfigError::Placeholder("sender_password"))));

        let mut s = valid();
        s.sender_password = None;
        assert!(matches!(s.validate(), Err(ConfigError::Missing("sender_password"))));

        let mut s = valid();
        s.smtp_port = 0;
        assert!(matches!(s.validate(), Err(ConfigError::InvalidPort)));

        let mut s = valid();
        s.sender_email = "not an address".into();
        assert!(matches!(s.validate(), Err(ConfigError::InvalidSender(_))));

        assert!(matches!(
            Settings::default().validate(),
            Err(ConfigError::Missing("sender_email"))
        ));
    }

    #[test]
    fn test_credentials_security_from_port() {
        let creds = valid().credentials(None).unwrap();
        assert_eq!(creds.security, Security::Tls);
        assert_eq!(creds.identity.as_str(), "alice@example.com");
        assert_eq!(creds.secret().expose_secret(), "s3cret");

        let mut s = valid();
        s.smtp_port = 587;
        assert_eq!(s.credentials(None).unwrap().security, Security::StartTls);
        assert_eq!(
            s.credentials(Some(Security::None)).unwrap().security,
            Security::None
        );
    }

    #[test]
    fn test_debug_does_not_leak_password() {
        assert!(!format!("{:?}", valid()).contains("s3cret"));
    }

    #[test]
    fn test_providers() {
        let mut s = valid();
        s.apply_provider("Outlook".parse().unwrap());
        assert_eq!(s.smtp_server, "smtp-mail.outlook.com");
        assert_eq!(s.smtp_port, 587);
        assert_eq!(Provider::Yahoo.host(), "smtp.mail.yahoo.com");
        assert!(matches!(
            "aol".parse::<Provider>(),
            Err(ConfigError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_sender_mailbox() {
        let sender = valid().sender().unwrap();
        assert_eq!(sender.display_name(), "Alice");

        let mut s = valid();
        s.sender_name = Some("   ".into());
        assert_eq!(s.sender().unwrap().display_name(), "alice@example.com");
    }

    #[test]
    fn test_load_explicit_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"sender_email": "a@b.c", "smtp_port": 2525}"#).unwrap();
        assert_eq!(Settings::load(Some(&path)).unwrap().smtp_port, 2525);

        let missing = dir.path().join("nope.json");
        assert!(matches!(
            Settings::load(Some(&missing)),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_search_paths_start_local() {
        assert_eq!(search_paths()[0], PathBuf::from("filedrop.json"));
    }
}
