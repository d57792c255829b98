use thiserror::Error;

use crate::types::Role;
use crate::validation::CandidateAttempt;

/// Errors surfaced by the selector engine
#[derive(Debug, Error)]
pub enum SelectorError {
    /// The persistence backend failed (exit code 6)
    #[error("Storage error: {0}")]
    Storage(String),

    /// A validation was recorded against a record or candidate that does not exist (exit code 2)
    #[error("No selector record for {domain}/{role} (candidate index {index:?})")]
    NotFound {
        domain: String,
        role: Role,
        index: Option<usize>,
    },

    /// A record violated the store invariants and was rejected (exit code 1)
    #[error("Invalid selector record: {0}")]
    InvalidRecord(String),

    /// Vision-based discovery could not produce a single validated candidate (exit code 3)
    #[error(
        "Discovery exhausted after {attempts} attempt(s): {} candidate(s) rejected{}",
        .rejected.len(),
        vision_suffix(.last_vision_error)
    )]
    DiscoveryExhausted {
        attempts: u32,
        rejected: Vec<CandidateAttempt>,
        last_vision_error: Option<String>,
    },

    /// Top-level resolution failure handed back to automation callers (exit code 3)
    #[error("Could not resolve {role} on {domain} after trying {} candidate(s): {cause}", .attempts.len())]
    ResolutionFailed {
        domain: String,
        role: Role,
        attempts: Vec<CandidateAttempt>,
        #[source]
        cause: Box<SelectorError>,
    },

    /// The caller canceled the operation or its deadline passed (exit code 5)
    #[error("Resolution canceled")]
    Canceled,

    /// The vision client failed outside of the discovery retry loop (exit code 3)
    #[error("Vision client error: {0}")]
    Vision(#[from] VisionError),

    /// The live page could not be queried (exit code 4)
    #[error("Browser error: {0}")]
    Browser(#[from] PageError),

    /// Configuration could not be loaded or is out of range (exit code 1)
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SelectorError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            SelectorError::NotFound { .. } => 2,
            SelectorError::DiscoveryExhausted { .. }
            | SelectorError::ResolutionFailed { .. }
            | SelectorError::Vision(_) => 3,
            SelectorError::Browser(_) => 4,
            SelectorError::Canceled => 5,
            SelectorError::Storage(_) => 6,
            SelectorError::InvalidRecord(_) | SelectorError::Config(_) => 1,
        }
    }

    /// True when the caller gave up, as opposed to the element being genuinely unresolvable
    pub fn is_canceled(&self) -> bool {
        matches!(self, SelectorError::Canceled)
    }

    /// Whether retrying the whole `resolve` call later (e.g. after a reload) could help
    pub fn is_retryable(&self) -> bool {
        match self {
            SelectorError::ResolutionFailed { cause, .. } => cause.is_retryable(),
            SelectorError::DiscoveryExhausted { .. }
            | SelectorError::Vision(_)
            | SelectorError::Browser(_) => true,
            _ => false,
        }
    }
}

fn vision_suffix(error: &Option<String>) -> String {
    match error {
        Some(e) => format!(", last vision error: {e}"),
        None => String::new(),
    }
}

impl From<std::io::Error> for SelectorError {
    fn from(err: std::io::Error) -> Self {
        SelectorError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for SelectorError {
    fn from(err: serde_json::Error) -> Self {
        SelectorError::Storage(format!("serialization failed: {err}"))
    }
}

/// Errors returned by a [`VisionClient`](crate::vision::VisionClient)
#[derive(Debug, Clone, Error)]
pub enum VisionError {
    #[error("vision call timed out after {0}ms")]
    Timeout(u64),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("could not parse element descriptors: {0}")]
    Parse(String),
}

/// Errors returned by a [`BrowserPage`](crate::page::BrowserPage)
#[derive(Debug, Clone, Error)]
pub enum PageError {
    /// The expression is not valid for its strategy (bad CSS, bad XPath)
    #[error("invalid selector expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    /// An element handle from an earlier query is no longer usable
    #[error("stale element reference: {0}")]
    StaleElement(String),

    #[error("page query failed: {0}")]
    Query(String),

    #[error("page capture failed: {0}")]
    Capture(String),

    /// No WebDriver session could be established or it was lost
    #[error("WebDriver session error: {0}")]
    Session(String),
}

#[cfg(test)]
#[path = "errors_test.rs"]
mod errors_test;
