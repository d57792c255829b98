//! Validation engine
//!
//! Checks whether a candidate still resolves to exactly one usable element on
//! a live page. The engine reports an outcome and never touches the store;
//! the resolver decides how the outcome is credited.

use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::config::{EngineConfig, NotInteractablePolicy};
use crate::errors::{PageError, SelectorError};
use crate::page::BrowserPage;
use crate::types::{AttemptCredit, Role, SelectorCandidate, Strategy};

/// Classification of one validation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    /// Exactly one visible (and, where the role needs it, interactable) element
    Valid,
    /// Zero elements after the bounded wait
    NotFound,
    /// More than one element; unstable regardless of history
    Ambiguous { matches: usize },
    /// Found, but hidden or disabled
    NotInteractable,
}

impl ValidationOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationOutcome::Valid)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ValidationOutcome::Valid => "valid",
            ValidationOutcome::NotFound => "not found",
            ValidationOutcome::Ambiguous { .. } => "ambiguous",
            ValidationOutcome::NotInteractable => "not interactable",
        }
    }

    /// How this outcome is charged against the candidate under `policy`
    pub fn credit(&self, policy: NotInteractablePolicy) -> AttemptCredit {
        match (self, policy) {
            (ValidationOutcome::Valid, _) => AttemptCredit::Success,
            (ValidationOutcome::NotInteractable, NotInteractablePolicy::HalfWeight) => {
                AttemptCredit::HalfFailure
            }
            _ => AttemptCredit::Failure,
        }
    }
}

/// Result of validating one candidate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub outcome: ValidationOutcome,
    /// Matches seen on the final poll
    pub matches: usize,
    #[serde(with = "millis")]
    pub elapsed: Duration,
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}

/// One entry in a resolution's attempt trail
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateAttempt {
    pub expression: String,
    pub strategy: Strategy,
    pub outcome: ValidationOutcome,
}

impl CandidateAttempt {
    pub fn new(candidate: &SelectorCandidate, outcome: ValidationOutcome) -> Self {
        Self {
            expression: candidate.expression.clone(),
            strategy: candidate.strategy,
            outcome,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationEngine {
    timeout: Duration,
    poll: Duration,
    policy: NotInteractablePolicy,
}

impl ValidationEngine {
    pub fn new(timeout: Duration, poll: Duration, policy: NotInteractablePolicy) -> Self {
        Self {
            timeout,
            poll,
            policy,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.validation_timeout(),
            config.validation_poll(),
            config.not_interactable,
        )
    }

    pub fn policy(&self) -> NotInteractablePolicy {
        self.policy
    }

    /// Validate `candidate` against the live page for `role`
    ///
    /// Polls until an element shows up or the timeout passes. Multiple
    /// matches end the wait immediately. A single element that stays
    /// hidden or disabled until the deadline is `NotInteractable`.
    /// Expressions the page rejects as malformed count as `NotFound`; any
    /// other page failure is returned as `Browser`.
    pub async fn validate(
        &self,
        page: &dyn BrowserPage,
        candidate: &SelectorCandidate,
        role: &Role,
    ) -> Result<ValidationResult, SelectorError> {
        let started = Instant::now();
        let deadline = started + self.timeout;

        loop {
            let (outcome, matches) = match self.check_once(page, candidate, role).await {
                Ok(observed) => observed,
                Err(PageError::InvalidExpression { expression, reason }) => {
                    debug!("Expression '{}' rejected by page: {}", expression, reason);
                    (ValidationOutcome::NotFound, 0)
                }
                // the element re-rendered between query and inspection
                Err(PageError::StaleElement(_)) => (ValidationOutcome::NotFound, 0),
                Err(e) => return Err(e.into()),
            };

            let settled = match outcome {
                ValidationOutcome::Valid | ValidationOutcome::Ambiguous { .. } => true,
                ValidationOutcome::NotFound | ValidationOutcome::NotInteractable => {
                    Instant::now() >= deadline
                }
            };
            if settled {
                debug!(
                    "Validated '{}' ({}): {} after {:?}",
                    candidate.expression,
                    candidate.strategy,
                    outcome.label(),
                    started.elapsed()
                );
                return Ok(ValidationResult {
                    outcome,
                    matches,
                    elapsed: started.elapsed(),
                });
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep(self.poll.min(remaining)).await;
        }
    }

    async fn check_once(
        &self,
        page: &dyn BrowserPage,
        candidate: &SelectorCandidate,
        role: &Role,
    ) -> Result<(ValidationOutcome, usize), PageError> {
        let elements = page
            .query_selector(&candidate.expression, candidate.strategy)
            .await?;

        let element = match elements.as_slice() {
            [] => return Ok((ValidationOutcome::NotFound, 0)),
            [single] => single,
            many => {
                return Ok((ValidationOutcome::Ambiguous { matches: many.len() }, many.len()));
            }
        };

        if !page.is_visible(element).await? {
            return Ok((ValidationOutcome::NotInteractable, 1));
        }
        if role.requires_interaction() && !page.is_interactable(element).await? {
            return Ok((ValidationOutcome::NotInteractable, 1));
        }
        Ok((ValidationOutcome::Valid, 1))
    }
}

#[cfg(test)]
#[path = "validation_test.rs"]
mod validation_test;
