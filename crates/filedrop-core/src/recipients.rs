//! Delivery list loading.
//!
//! A delivery list is plain text with one address per line. Blank lines and
//! lines starting with `#` are ignored; invalid lines are skipped with a
//! warning; duplicates keep their first position.

use std::collections::HashSet;
use std::future::Future;
use std::io;
use std::path::PathBuf;

use filedrop_smtp::Address;
use tracing::{debug, warn};

/// The delivery list contained no usable address.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("No valid recipient addresses found ({skipped} invalid line(s) skipped)")]
pub struct EmptySourceError {
    /// Number of lines rejected as invalid.
    pub skipped: usize,
}

/// A line that was not accepted as an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    /// 1-based line number.
    pub line: usize,
    /// Trimmed line content.
    pub content: String,
    /// Why the line was rejected.
    pub reason: String,
}

/// Validated, deduplicated recipients in first-occurrence order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientList {
    addresses: Vec<Address>,
    skipped: Vec<SkippedLine>,
}

impl RecipientList {
    /// Recipients in delivery order.
    #[must_use]
    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    /// Lines rejected as invalid addresses.
    #[must_use]
    pub fn skipped(&self) -> &[SkippedLine] {
        &self.skipped
    }

    /// Number of recipients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Always false for a loaded list; kept for API symmetry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Consumes the list, returning the addresses.
    #[must_use]
    pub fn into_addresses(self) -> Vec<Address> {
        self.addresses
    }
}

/// Parses delivery list lines.
///
/// # Errors
///
/// Returns [`EmptySourceError`] when no line holds a valid address.
pub fn load<'a, I>(lines: I) -> Result<RecipientList, EmptySourceError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = HashSet::new();
    let mut addresses = Vec::new();
    let mut skipped = Vec::new();

    for (index, raw) in lines.into_iter().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match Address::new(line) {
            Ok(address) => {
                if seen.insert(address.clone()) {
                    addresses.push(address);
                } else {
                    debug!(line = index + 1, address = %address, "duplicate recipient ignored");
                }
            }
            Err(e) => {
                warn!(line = index + 1, content = line, "skipping invalid recipient: {e}");
                skipped.push(SkippedLine {
                    line: index + 1,
                    content: line.to_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    if addresses.is_empty() {
        return Err(EmptySourceError {
            skipped: skipped.len(),
        });
    }

    Ok(RecipientList { addresses, skipped })
}

/// Parses a delivery list held in one string.
///
/// # Errors
///
/// Same as [`load`].
pub fn load_str(text: &str) -> Result<RecipientList, EmptySourceError> {
    load(text.lines())
}

/// Where the delivery list text comes from.
///
/// The coordinator reads the source only after every file has been
/// validated.
pub trait RecipientSource: Send + Sync {
    /// Reads the whole delivery list.
    fn read(&self) -> impl Future<Output = io::Result<String>> + Send;
}

/// Delivery list given as a file path or inline text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryList {
    /// Text file with one address per line.
    File(PathBuf),
    /// Addresses supplied directly.
    Inline(String),
}

impl RecipientSource for DeliveryList {
    async fn read(&self) -> io::Result<String> {
        match self {
            Self::File(path) => tokio::fs::read_to_string(path).await,
            Self::Inline(text) => Ok(text.clone()),
        }
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
    use proptest::prelude::*;
    use std::io::Write;

    fn strs(list: &RecipientList) -> Vec<&str> {
        list.addresses().iter().map(Address::as_str).collect()
    }

    #[test]
    fn test_comments_blanks_duplicates_and_invalid() {
        let list = load_str("a@x.com\n# comment\n\nb@x.com\nbadline\na@x.com\n").unwrap();
        assert_eq!(strs(&list), ["a@x.com", "b@x.com"]);
        assert_eq!(list.skipped().len(), 1);
        assert_eq!(list.skipped()[0].line, 5);
        assert_eq!(list.skipped()[0].content, "badline");
    }

    #[test]
    fn test_lines_are_trimmed() {
        let list = load(["  a@x.com\t", "\r", "  # indented comment", "b@x.com\r"]).unwrap();
        assert_eq!(strs(&list), ["a@x.com", "b@x.com"]);
        assert!(list.skipped().is_empty());
    }

    #[test]
    fn test_empty_source() {
        assert_eq!(load_str(""), Err(EmptySourceError { skipped: 0 }));
        assert_eq!(
            load_str("# only comments\n\nnot-an-address\n"),
            Err(EmptySourceError { skipped: 1 })
        );
    }

    #[test]
    fn test_rejects_envelope_breaking_addresses() {
        let list = load_str("ok@x.com\na b@x.com\n<a@x.com>\na@@x.com\n@x.com\n").unwrap();
        assert_eq!(strs(&list), ["ok@x.com"]);
        assert_eq!(list.skipped().len(), 4);
    }

    #[tokio::test]
    async fn test_delivery_list_sources() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "a@x.com").unwrap();
        let from_file = DeliveryList::File(file.path().to_path_buf()).read().await.unwrap();
        assert_eq!(from_file, "a@x.com\n");

        let inline = DeliveryList::Inline("b@x.com".into()).read().await.unwrap();
        assert_eq!(inline, "b@x.com");

        let missing = DeliveryList::File("/definitely/not/here.txt".into()).read().await;
        assert_eq!(missing.unwrap_err().kind(), io::ErrorKind::NotFound);
    }

    proptest! {
        #[test]
        fn loaded_count_matches_distinct_valid(
            entries in proptest::collection::vec(
                prop_oneof![
                    "[a-e]{1,3}@[a-c]{1,2}\\.com",
                    Just("# comment".to_string()),
                    Just(String::new()),
                    "[a-z ]{1,6}",
                ],
                0..40,
            )
        ) {
            let mut expected: Vec<String> = Vec::new();
            for e in &entries {
                let t = e.trim();
                let keep = !t.is_empty() && !t.starts_with('#') && Address::new(t).is_ok();
                if keep && !expected.iter().any(|x| x == t) {
                    expected.push(t.to_string());
                }
            }

            match load(entries.iter().map(String::as_str)) {
                Ok(list) => {
                    let got: Vec<String> =
                        list.addresses().iter().map(ToString::to_string).collect();
                    prop_assert_eq!(got, expected);
                }
                Err(_) => prop_assert!(expected.is_empty()),
            }
        }
    }
}
