//! Best-effort classification of raw ledger failures.
//!
//! Rules are evaluated in precedence order:
//!
//! 1. duplicate-submission indicators (transaction code, endorsement detail)
//! 2. business patterns, in registration order
//! 3. the timeout flag
//! 4. otherwise `TransientInfrastructure`
//!
//! The same business failure may be phrased differently by different ledger
//! implementations, so the fallback is the retriable kind rather than a stop.

use regex_lite::Regex;

use txrelay_core::{ClassifiedError, ErrorKind};
use txrelay_ledger::LedgerFailure;

/// How a rule recognizes a failure.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// Exact match on the ledger's transaction status code.
    TransactionCode(String),
    /// Prefix of any endorsement detail message.
    DetailPrefix(String),
    /// Regex over the top-level message and every detail message.
    Pattern(Regex),
}

#[derive(Debug, Clone)]
pub struct ClassificationRule {
    pub kind: ErrorKind,
    pub matcher: Matcher,
}

impl ClassificationRule {
    pub fn new(kind: ErrorKind, matcher: Matcher) -> Self {
        Self { kind, matcher }
    }

    /// The text that matched, if any.
    fn find<'a>(&self, failure: &'a LedgerFailure) -> Option<&'a str> {
        match &self.matcher {
            Matcher::TransactionCode(code) => failure
                .transaction_code
                .as_deref()
                .filter(|c| *c == code.as_str()),
            Matcher::DetailPrefix(prefix) => failure
                .details
                .iter()
                .map(|d| d.message.as_str())
                .find(|m| m.starts_with(prefix.as_str())),
            Matcher::Pattern(re) => failure
                .messages()
                .find_map(|m| re.find(m).map(|found| found.as_str())),
        }
    }
}

// Asset ids may contain any non-space characters (`asset-1`, `my.asset`, UUIDs).
const ALREADY_EXISTS: &str = r"(?:[tT]he )?[aA]sset \S+ already exists";
const DOES_NOT_EXIST: &str = r"(?:[tT]he )?[aA]sset \S+ does not exist";
const TRANSACTION_NOT_FOUND: &str = concat!(
    r"Failed to get transaction with id [^,]*, error ",
    r"(?:(?:Entry not found)|(?:no such transaction ID \[[^\]]*\])) in index",
);

/// Maps a [`LedgerFailure`] to exactly one [`ErrorKind`]. Pure; never fails.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    duplicate_rules: Vec<ClassificationRule>,
    business_rules: Vec<ClassificationRule>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorClassifier {
    /// Classifier with the built-in asset ledger rules.
    pub fn new() -> Self {
        let builtin = |pattern: &str| Regex::new(pattern).expect("builtin pattern compiles");

        Self {
            duplicate_rules: vec![
                ClassificationRule::new(
                    ErrorKind::DuplicateTransaction,
                    Matcher::TransactionCode("DUPLICATE_TXID".to_string()),
                ),
                ClassificationRule::new(
                    ErrorKind::DuplicateTransaction,
                    Matcher::DetailPrefix("duplicate transaction found".to_string()),
                ),
            ],
            business_rules: vec![
                ClassificationRule::new(
                    ErrorKind::AlreadyExists,
                    Matcher::Pattern(builtin(ALREADY_EXISTS)),
                ),
                ClassificationRule::new(
                    ErrorKind::NotFound,
                    Matcher::Pattern(builtin(DOES_NOT_EXIST)),
                ),
                ClassificationRule::new(
                    ErrorKind::TransactionNotFound,
                    Matcher::Pattern(builtin(TRANSACTION_NOT_FOUND)),
                ),
            ],
        }
    }

    /// Classifier with no rules: everything is timeout or transient.
    pub fn empty() -> Self {
        Self {
            duplicate_rules: Vec::new(),
            business_rules: Vec::new(),
        }
    }

    /// Append a business pattern, checked after the existing ones.
    pub fn with_pattern(
        mut self,
        kind: ErrorKind,
        pattern: &str,
    ) -> Result<Self, regex_lite::Error> {
        self.business_rules
            .push(ClassificationRule::new(kind, Matcher::Pattern(Regex::new(pattern)?)));
        Ok(self)
    }

    /// Append a transaction status code that signals a duplicate submission.
    pub fn with_duplicate_code(mut self, code: impl Into<String>) -> Self {
        self.duplicate_rules.push(ClassificationRule::new(
            ErrorKind::DuplicateTransaction,
            Matcher::TransactionCode(code.into()),
        ));
        self
    }

    pub fn classify(&self, failure: &LedgerFailure) -> ErrorKind {
        self.classify_error(failure).kind
    }

    /// Classify and keep a caller-facing message.
    ///
    /// Business kinds carry the matched ledger text verbatim; everything else
    /// carries the full failure description.
    pub fn classify_error(&self, failure: &LedgerFailure) -> ClassifiedError {
        for rule in self.duplicate_rules.iter() {
            if rule.find(failure).is_some() {
                return ClassifiedError::new(rule.kind, describe(failure));
            }
        }

        for rule in self.business_rules.iter() {
            if let Some(text) = rule.find(failure) {
                return ClassifiedError::new(rule.kind, text);
            }
        }

        if failure.timed_out {
            return ClassifiedError::new(ErrorKind::Timeout, describe(failure));
        }

        ClassifiedError::new(ErrorKind::TransientInfrastructure, describe(failure))
    }
}

fn describe(failure: &LedgerFailure) -> String {
    let mut out = failure.message.clone();
    for detail in &failure.details {
        out.push_str(&format!("; {} ({}): {}", detail.address, detail.msp_id, detail.message));
    }
    if let Some(code) = &failure.transaction_code {
        out.push_str(&format!(" [code {code}]"));
    }
    out
}
