//! Command-line parsing.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use filedrop_core::{Provider, SecretString, Security};

/// Parse failures; all of them end with the usage text.
#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    /// A flag was given without its value.
    #[error("{0} requires a value")]
    MissingValue(String),

    /// A flag nobody knows.
    #[error("unknown option: {0}")]
    UnknownOption(String),

    /// A bare argument.
    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),

    /// A value that does not parse.
    #[error("invalid value for {flag}: {reason}")]
    InvalidValue {
        /// Flag name.
        flag: &'static str,
        /// What is wrong.
        reason: String,
    },

    /// A mandatory flag is absent.
    #[error("missing required option {0}")]
    Missing(&'static str),
}

/// What the user asked for.
#[derive(Debug)]
pub enum Command {
    /// Print usage and exit.
    Help,
    /// Run a delivery.
    Deliver(Box<Args>),
}

/// Options of a delivery run.
#[derive(Debug, Default)]
pub struct Args {
    pub files: Vec<PathBuf>,
    pub delivery_list: PathBuf,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub config: Option<PathBuf>,
    pub provider: Option<Provider>,
    pub sender_email: Option<String>,
    pub sender_password: Option<SecretString>,
    pub sender_name: Option<String>,
    pub security: Option<Security>,
    pub timeout: Option<Duration>,
    pub workers: Option<usize>,
    pub json: bool,
    pub log_file: Option<PathBuf>,
}

pub fn print_usage() {
    eprintln!("Usage: filedrop --file <PATH>... --delivery-list <PATH> [OPTIONS]");
    eprintln!();
    eprintln!("Sends the files to every address in the delivery list, one message");
    eprintln!("per recipient, over a single authenticated SMTP session.");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -f, --file <PATH>           File to attach (repeatable)");
    eprintln!("  -d, --delivery-list <PATH>  Recipients, one address per line");
    eprintln!("  -s, --subject <TEXT>        Subject line");
    eprintln!("  -b, --body <TEXT>           Body template; {{sender_name}} is replaced");
    eprintln!("  -c, --config <PATH>         Configuration file (JSON)");
    eprintln!("      --provider <NAME>       gmail, outlook or yahoo");
    eprintln!("      --sender-email <ADDR>   Override sender_email");
    eprintln!("      --sender-password <PW>  Override sender_password");
    eprintln!("      --sender-name <NAME>    Override sender_name");
    eprintln!("      --security <MODE>       starttls, tls or none (default from port)");
    eprintln!("      --timeout <SECS>        Per-operation timeout (default 30)");
    eprintln!("      --workers <N>           Parallel sessions (default 1)");
    eprintln!("      --json                  Print the report as JSON");
    eprintln!("      --log-file <PATH>       Also write logs to a file");
    eprintln!("  -h, --help                  Show this help message");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  RUST_LOG  Log filter (default filedrop=info,filedrop_core=info)");
}

/// Parses the arguments after the program name.
pub fn parse<I>(args: I) -> Result<Command, UsageError>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut parsed = Args::default();
    let mut delivery_list = None;

    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => {
                (flag.to_string(), Some(value.to_string()))
            }
            _ => (arg, None),
        };
        let mut value = |name: &str| -> Result<String, UsageError> {
            inline
                .clone()
                .or_else(|| args.next())
                .ok_or_else(|| UsageError::MissingValue(name.to_string()))
        };

        match flag.as_str() {
            "--help" | "-h" => return Ok(Command::Help),
            "--file" | "-f" => parsed.files.push(value(&flag)?.into()),
            "--delivery-list" | "-d" => delivery_list = Some(PathBuf::from(value(&flag)?)),
            "--subject" | "-s" => parsed.subject = Some(value(&flag)?),
            "--body" | "-b" => parsed.body = Some(value(&flag)?),
            "--config" | "-c" => parsed.config = Some(value(&flag)?.into()),
            "--provider" => parsed.provider = Some(parse_value(&value(&flag)?, "--provider")?),
            "--sender-email" => parsed.sender_email = Some(value(&flag)?),
            "--sender-password" => {
                parsed.sender_password = Some(SecretString::new(value(&flag)?));
            }
            "--sender-name" => parsed.sender_name = Some(value(&flag)?),
            "--security" => parsed.security = Some(parse_value(&value(&flag)?, "--security")?),
            "--timeout" => {
                let secs = parse_positive(&value(&flag)?, "--timeout")?;
                parsed.timeout = Some(Duration::from_secs(secs));
            }
            "--workers" => {
                let workers: usize = parse_value(&value(&flag)?, "--workers")?;
                if workers == 0 {
                    return Err(UsageError::InvalidValue {
                        flag: "--workers",
                        reason: "must be at least 1".to_string(),
                    });
                }
                parsed.workers = Some(workers);
            }
            "--json" => parsed.json = true,
            "--log-file" => parsed.log_file = Some(value(&flag)?.into()),
            other if other.starts_with('-') && other.len() > 1 => {
                return Err(UsageError::UnknownOption(other.to_string()));
            }
            other => return Err(UsageError::UnexpectedArgument(other.to_string())),
        }
    }

    if parsed.files.is_empty() {
        return Err(UsageError::Missing("--file"));
    }
    parsed.delivery_list = delivery_list.ok_or(UsageError::Missing("--delivery-list"))?;
    Ok(Command::Deliver(Box::new(parsed)))
}

fn parse_value<T>(text: &str, flag: &'static str) -> Result<T, UsageError>
where
    T: FromStr,
    T::Err: Display,
{
    text.trim().parse().map_err(|e: T::Err| UsageError::InvalidValue {
        flag,
        reason: e.to_string(),
    })
}

fn parse_positive(text: &str, flag: &'static str) -> Result<u64, UsageError> {
    match parse_value(text, flag)? {
        0 => Err(UsageError::InvalidValue {
            flag,
            reason: "must be at least 1".to_string(),
        }),
        n => Ok(n),
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
    use filedrop_core::ExposeSecret;

    fn run(args: &[&str]) -> Result<Command, UsageError> {
        parse(args.iter().map(ToString::to_string))
    }

    fn deliver(args: &[&str]) -> Args {
        match run(args).unwrap() {
            Command::Deliver(args) => *args,
            Command::Help => panic!("expected a delivery"),
        }
    }

    #[test]
    fn test_minimal_run() {
        let args = deliver(&["-f", "report.pdf", "-d", "list.txt"]);
        assert_eq!(args.files, [PathBuf::from("report.pdf")]);
        assert_eq!(args.delivery_list, PathBuf::from("list.txt"));
        assert!(args.subject.is_none());
        assert!(args.security.is_none());
        assert!(!args.json);
    }

    #[test]
    fn test_repeated_files_keep_order() {
        let args = deliver(&[
            "--file", "a.txt", "--file=b.txt", "-f", "c.txt", "--delivery-list", "l",
        ]);
        assert_eq!(
            args.files,
            [PathBuf::from("a.txt"), PathBuf::from("b.txt"), PathBuf::from("c.txt")]
        );
    }

    #[test]
    fn test_all_options() {
        let args = deliver(&[
            "-f", "a", "-d", "l", "-s", "Hello", "-b", "Body {sender_name}", "-c", "cfg.json",
            "--provider", "outlook", "--sender-email", "me@x.com", "--sender-password", "pw",
            "--sender-name", "Me", "--security", "tls", "--timeout", "5", "--workers", "3",
            "--json", "--log-file", "run.log",
        ]);
        assert_eq!(args.subject.as_deref(), Some("Hello"));
        assert_eq!(args.body.as_deref(), Some("Body {sender_name}"));
        assert_eq!(args.config, Some(PathBuf::from("cfg.json")));
        assert_eq!(args.provider, Some(Provider::Outlook));
        assert_eq!(args.sender_email.as_deref(), Some("me@x.com"));
        assert_eq!(args.sender_password.as_ref().unwrap().expose_secret(), "pw");
        assert_eq!(args.sender_name.as_deref(), Some("Me"));
        assert_eq!(args.security, Some(Security::Tls));
        assert_eq!(args.timeout, Some(Duration::from_secs(5)));
        assert_eq!(args.workers, Some(3));
        assert!(args.json);
        assert_eq!(args.log_file, Some(PathBuf::from("run.log")));
    }

    #[test]
    fn test_help() {
        assert!(matches!(run(&["--bogus", "-h"]), Err(UsageError::UnknownOption(_))));
        assert!(matches!(run(&["-h"]), Ok(Command::Help)));
        assert!(matches!(run(&["-f", "a", "--help"]), Ok(Command::Help)));
    }

    #[test]
    fn test_required_options() {
        assert!(matches!(run(&[]), Err(UsageError::Missing("--file"))));
        assert!(matches!(run(&["-f", "a"]), Err(UsageError::Missing("--delivery-list"))));
    }

    #[test]
    fn test_missing_value() {
        assert!(matches!(run(&["-f"]), Err(UsageError::MissingValue(flag)) if flag == "-f"));
    }

    #[test]
    fn test_rejects_bad_values() {
        for args in [
            &["-f", "a", "-d", "l", "--workers", "0"][..],
            &["-f", "a", "-d", "l", "--timeout", "soon"],
            &["-f", "a", "-d", "l", "--security", "ssl3"],
            &["-f", "a", "-d", "l", "--provider", "aol"],
        ] {
            assert!(
                matches!(run(args), Err(UsageError::InvalidValue { .. })),
                "{args:?}"
            );
        }
    }

    #[test]
    fn test_rejects_positional() {
        assert!(matches!(
            run(&["-f", "a", "-d", "l", "extra"]),
            Err(UsageError::UnexpectedArgument(arg)) if arg == "extra"
        ));
    }

    #[test]
    fn test_debug_hides_password() {
        let args = deliver(&["-f", "a", "-d", "l", "--sender-password", "hunter2"]);
        assert!(!format!("{args:?}").contains("hunter2"));
    }
}
