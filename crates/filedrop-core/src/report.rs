//! Delivery outcomes and the aggregated report.

use std::fmt;

use filedrop_smtp::Address;
use serde::Serialize;

/// Why one recipient did not receive the message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The server refused the sender, recipient or data.
    Rejected {
        /// SMTP reply code.
        code: u16,
        /// Server reply text.
        message: String,
    },
    /// The send did not finish within the configured timeout.
    Timeout,
    /// The message could not be rendered.
    Encoding {
        /// Rendering error.
        detail: String,
    },
    /// I/O or protocol failure on the session.
    Transport {
        /// Transport error.
        detail: String,
    },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected { code, message } => write!(f, "rejected ({code}): {message}"),
            Self::Timeout => write!(f, "timed out"),
            Self::Encoding { detail } => write!(f, "could not build message: {detail}"),
            Self::Transport { detail } => write!(f, "transport error: {detail}"),
        }
    }
}

/// Result of one send attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The server accepted the message.
    Success {
        /// Recipient address.
        recipient: Address,
    },
    /// The message was not delivered.
    Failure {
        /// Recipient address.
        recipient: Address,
        /// What went wrong.
        reason: FailureReason,
    },
}

impl DeliveryOutcome {
    /// Recipient this outcome belongs to.
    #[must_use]
    pub const fn recipient(&self) -> &Address {
        match self {
            Self::Success { recipient } | Self::Failure { recipient, .. } => recipient,
        }
    }

    /// True for [`DeliveryOutcome::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// One failed recipient in a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipientFailure {
    /// Recipient address.
    pub recipient: Address,
    /// What went wrong.
    pub reason: FailureReason,
}

/// Summary of a delivery run.
///
/// `successes.len() + failures.len() == total_attempted` always holds; the
/// report is only built from a complete sequence of outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    successes: Vec<Address>,
    failures: Vec<RecipientFailure>,
    total_attempted: usize,
}

impl DeliveryReport {
    /// Builds a report from outcomes in delivery order.
    #[must_use]
    pub fn from_outcomes(outcomes: impl IntoIterator<Item = DeliveryOutcome>) -> Self {
        let mut report = Self::default();
        for outcome in outcomes {
            report.total_attempted += 1;
            match outcome {
                DeliveryOutcome::Success { recipient } => report.successes.push(recipient),
                DeliveryOutcome::Failure { recipient, reason } => {
                    report.failures.push(RecipientFailure { recipient, reason });
                }
            }
        }
        report
    }

    /// Recipients that accepted the message, in delivery order.
    #[must_use]
    pub fn successes(&self) -> &[Address] {
        &self.successes
    }

    /// Recipients that did not, in delivery order.
    #[must_use]
    pub fn failures(&self) -> &[RecipientFailure] {
        &self.failures
    }

    /// Number of send attempts.
    #[must_use]
    pub const fn total_attempted(&self) -> usize {
        self.total_attempted
    }

    /// True when every attempted recipient succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for DeliveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Delivery completed: {}/{} successful",
            self.successes.len(),
            self.total_attempted
        )?;
        for failure in &self.failures {
            write!(f, "\n  failed: {} ({})", failure.recipient, failure.reason)?;
        }
        Ok(())
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

    fn addr(s: &str) -> Address {
        Address::new(s).unwrap()
    }

    fn sample() -> DeliveryReport {
        DeliveryReport::from_outcomes([
            DeliveryOutcome::Success {
                recipient: addr("r1@x.com"),
            },
            DeliveryOutcome::Failure {
                recipient: addr("r2@x.com"),
                reason: FailureReason::Rejected {
                    code: 550,
                    message: "no such user".into(),
                },
            },
            DeliveryOutcome::Success {
                recipient: addr("r3@x.com"),
            },
        ])
    }

    #[test]
    fn test_counts_add_up() {
        let report = sample();
        assert_eq!(report.total_attempted(), 3);
        assert_eq!(report.successes(), [addr("r1@x.com"), addr("r3@x.com")]);
        assert_eq!(report.failures().len(), 1);
        assert_eq!(report.failures()[0].recipient, addr("r2@x.com"));
        assert!(!report.is_success());
    }

    #[test]
    fn test_empty_report() {
        let report = DeliveryReport::from_outcomes([]);
        assert_eq!(report, DeliveryReport::default());
        assert!(report.is_success());
    }

    #[test]
    fn test_display_summary() {
        assert_eq!(
            sample().to_string(),
            "Delivery completed: 2/3 successful\n  failed: r2@x.com (rejected (550): no such user)"
        );
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["total_attempted"], 3);
        assert_eq!(json["successes"][1], "r3@x.com");
        assert_eq!(json["failures"][0]["recipient"], "r2@x.com");
        assert_eq!(json["failures"][0]["reason"]["kind"], "rejected");
        assert_eq!(json["failures"][0]["reason"]["code"], 550);
    }

    #[test]
    fn test_outcome_accessors() {
        let outcome = DeliveryOutcome::Failure {
            recipient: addr("a@b.c"),
            reason: FailureReason::Timeout,
        };
        assert_eq!(outcome.recipient().as_str(), "a@b.c");
        assert!(!outcome.is_success());
    }
}
