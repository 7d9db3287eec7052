//! MIME encoding utilities.
//!
//! Supports Base64 (RFC 2045), Quoted-Printable (RFC 2045), RFC 2047 encoded
//! words for headers and RFC 2231 parameter values.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::fmt::Write as _;

/// Maximum encoded line length, excluding CRLF (RFC 2045 §6.7, §6.8).
pub const MAX_LINE_LENGTH: usize = 76;

/// Raw bytes per RFC 2047 encoded word, keeping each word under 75 chars.
const ENCODED_WORD_CHUNK: usize = 45;

/// Encodes data as Base64 on a single line.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Encodes data as Base64 wrapped into 76-character CRLF-terminated lines,
/// ready to be placed in a message body.
#[must_use]
pub fn encode_base64_wrapped(data: &[u8]) -> String {
    let flat = STANDARD.encode(data);
    let mut out = String::with_capacity(flat.len() + flat.len() / MAX_LINE_LENGTH * 2 + 2);
    // Base64 output is ASCII, so byte chunks are char boundaries.
    for chunk in flat.as_bytes().chunks(MAX_LINE_LENGTH) {
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push_str("\r\n");
    }
    out
}

/// Encodes text using Quoted-Printable.
///
/// Line breaks in the input (LF or CRLF) become hard CRLF breaks; long lines
/// get `=` soft breaks; trailing whitespace is escaped.
#[must_use]
pub fn encode_quoted_printable(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 8);

    for (index, line) in text.split('\n').enumerate() {
        if index > 0 {
            out.push_str("\r\n");
        }
        let line = line.strip_suffix('\r').unwrap_or(line).as_bytes();
        let mut column = 0;

        for (i, &byte) in line.iter().enumerate() {
            let is_last = i + 1 == line.len();
            let mut token = String::with_capacity(3);
            match byte {
                b' ' | b'\t' if !is_last => token.push(byte as char),
                b'!'..=b'<' | b'>'..=b'~' => token.push(byte as char),
                _ => {
                    let _ = write!(token, "={byte:02X}");
                }
            }

            // Keep room for the trailing '=' of a soft break.
            if column + token.len() > MAX_LINE_LENGTH - 1 {
                out.push_str("=\r\n");
                column = 0;
            }
            out.push_str(&token);
            column += token.len();
        }
    }

    out
}

/// Encodes a header value with RFC 2047 encoded words when it is not plain
/// ASCII.
///
/// Long values are split into several encoded words joined by folding
/// whitespace (`CRLF SP`), each word holding whole UTF-8 characters.
#[must_use]
pub fn encode_rfc2047(text: &str) -> String {
    if !needs_encoding(text) {
        return text.to_string();
    }

    let mut words = Vec::new();
    let mut chunk = String::new();
    for ch in text.chars() {
        if chunk.len() + ch.len_utf8() > ENCODED_WORD_CHUNK {
            words.push(encoded_word(&chunk));
            chunk.clear();
        }
        chunk.push(ch);
    }
    if !chunk.is_empty() {
        words.push(encoded_word(&chunk));
    }

    words.join("\r\n ")
}

/// Encodes a parameter value per RFC 2231 (`utf-8''percent%20encoded`).
#[must_use]
pub fn encode_rfc2231(value: &str) -> String {
    let mut out = String::from("utf-8''");
    for byte in value.bytes() {
        let unreserved = byte.is_ascii_alphanumeric()
            || matches!(
                byte,
                b'!' | b'#' | b'$' | b'&' | b'+' | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~'
            );
        if unreserved {
            out.push(byte as char);
        } else {
            let _ = write!(out, "%{byte:02X}");
        }
    }
    out
}

/// Quotes a value for use inside a header parameter or display name.
#[must_use]
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        if matches!(ch, '"' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
    out
}

fn needs_encoding(text: &str) -> bool {
    text.contains("=?") || text.chars().any(|c| !c.is_ascii() || c.is_ascii_control())
}

fn encoded_word(chunk: &str) -> String {
    format!("=?utf-8?B?{}?=", STANDARD.encode(chunk.as_bytes()))
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

    #[test]
    fn test_base64_encode() {
        assert_eq!(encode_base64(b"Hello, World!"), "SGVsbG8sIFdvcmxkIQ==");
    }

    #[test]
    fn test_base64_wrapped_line_lengths() {
        let data = vec![0xABu8; 200];
        let encoded = encode_base64_wrapped(&data);
        let lines: Vec<&str> = encoded.split("\r\n").collect();
        // 200 bytes -> 268 chars -> 76 + 76 + 76 + 40, then the empty tail
        assert_eq!(lines.len(), 5);
        assert!(lines[..3].iter().all(|l| l.len() == 76));
        assert_eq!(lines[3].len(), 40);
        assert_eq!(lines[4], "");
    }

    #[test]
    fn test_base64_wrapped_empty() {
        assert_eq!(encode_base64_wrapped(b""), "");
    }

    #[test]
    fn test_quoted_printable_plain_ascii_untouched() {
        assert_eq!(encode_quoted_printable("Hello, World!"), "Hello, World!");
    }

    #[test]
    fn test_quoted_printable_keeps_line_breaks() {
        assert_eq!(
            encode_quoted_printable("Dear Recipient,\n\nThanks\r\n"),
            "Dear Recipient,\r\n\r\nThanks\r\n"
        );
    }

    #[test]
    fn test_quoted_printable_escapes() {
        assert_eq!(encode_quoted_printable("a=b"), "a=3Db");
        assert_eq!(encode_quoted_printable("Héllo"), "H=C3=A9llo");
        assert_eq!(encode_quoted_printable("trailing "), "trailing=20");
    }

    #[test]
    fn test_quoted_printable_soft_breaks() {
        let encoded = encode_quoted_printable(&"x".repeat(200));
        assert!(encoded.contains("=\r\n"));
        assert!(encoded.split("\r\n").all(|l| l.len() <= MAX_LINE_LENGTH));
    }

    #[test]
    fn test_rfc2047_ascii_passthrough() {
        assert_eq!(encode_rfc2047("File Delivery: report.pdf"), "File Delivery: report.pdf");
    }

    #[test]
    fn test_rfc2047_encodes_non_ascii() {
        assert_eq!(encode_rfc2047("Héllo"), "=?utf-8?B?SMOpbGxv?=");
    }

    #[test]
    fn test_rfc2047_splits_long_values() {
        let encoded = encode_rfc2047(&"é".repeat(60));
        let words: Vec<&str> = encoded.split("\r\n ").collect();
        assert!(words.len() > 1);
        assert!(words.iter().all(|w| w.len() <= 75));
    }

    #[test]
    fn test_rfc2231() {
        assert_eq!(encode_rfc2231("résumé.pdf"), "utf-8''r%C3%A9sum%C3%A9.pdf");
        assert_eq!(encode_rfc2231("a b"), "utf-8''a%20b");
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote(r#"say "hi"\"#), r#""say \"hi\"\\""#);
    }

    proptest! {
        #[test]
        fn qp_lines_never_exceed_limit(text in "\\PC{0,400}") {
            let encoded = encode_quoted_printable(&text);
            for line in encoded.split("\r\n") {
                prop_assert!(line.len() <= MAX_LINE_LENGTH);
            }
        }

        #[test]
        fn wrapped_base64_is_ascii_and_bounded(
            data in proptest::collection::vec(any::<u8>(), 0..1000)
        ) {
            let encoded = encode_base64_wrapped(&data);
            prop_assert!(encoded.is_ascii());
            for line in encoded.split("\r\n") {
                prop_assert!(line.len() <= MAX_LINE_LENGTH);
            }
        }
    }
}
