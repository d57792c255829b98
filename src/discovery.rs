//! Discovery orchestrator
//!
//! Asks the vision client for the element behind a role, synthesizes
//! selectors from each hint and keeps only those that validate against the
//! live page right away. Vision failures and empty answers use up one of a
//! bounded number of attempts; later attempts tell the model what was
//! already rejected.

use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::errors::{SelectorError, VisionError};
use crate::page::BrowserPage;
use crate::scorer;
use crate::synthesis::synthesize;
use crate::types::{Role, SelectorCandidate, Strategy, normalize_domain};
use crate::validation::{CandidateAttempt, ValidationEngine};
use crate::vision::{VisionClient, role_prompt};

#[derive(Debug, Clone)]
pub struct DiscoveryOrchestrator {
    validator: ValidationEngine,
    attempts: u32,
    vision_timeout: Duration,
    max_candidates: usize,
}

impl DiscoveryOrchestrator {
    pub fn new(
        validator: ValidationEngine,
        attempts: u32,
        vision_timeout: Duration,
        max_candidates: usize,
    ) -> Self {
        Self {
            validator,
            attempts: attempts.max(1),
            vision_timeout,
            max_candidates: max_candidates.max(1),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            ValidationEngine::from_config(config),
            config.discovery_attempts,
            config.vision_timeout(),
            config.max_candidates,
        )
    }

    /// Discover validated candidates for (domain, role)
    ///
    /// Returns at least one candidate, ranked, each credited with the one
    /// validation it just passed. Fails with `DiscoveryExhausted` once every
    /// attempt is used up, `Canceled` if `cancel` fires, and `Browser` if
    /// the page cannot be captured or queried.
    pub async fn discover(
        &self,
        page: &dyn BrowserPage,
        domain: &str,
        role: &Role,
        vision: &dyn VisionClient,
        cancel: &CancellationToken,
    ) -> Result<Vec<SelectorCandidate>, SelectorError> {
        let domain = normalize_domain(domain);
        let mut rejected: Vec<CandidateAttempt> = Vec::new();
        let mut tried: HashSet<(Strategy, String)> = HashSet::new();
        let mut last_vision_error: Option<String> = None;

        for attempt in 1..=self.attempts {
            if cancel.is_cancelled() {
                return Err(SelectorError::Canceled);
            }

            let screenshot = page.screenshot().await?;
            let dom = page.dom_snapshot().await?;
            let rejected_expressions: Vec<String> =
                rejected.iter().map(|a| a.expression.clone()).collect();
            let prompt = role_prompt(role, &domain, attempt, &rejected_expressions);

            debug!(
                "Discovery attempt {}/{} for {}/{}",
                attempt, self.attempts, domain, role
            );
            let located = tokio::select! {
                _ = cancel.cancelled() => return Err(SelectorError::Canceled),
                located = tokio::time::timeout(
                    self.vision_timeout,
                    vision.locate(&prompt, &screenshot, &dom),
                ) => located,
            };

            let descriptors = match located {
                Ok(Ok(descriptors)) => descriptors,
                Ok(Err(e)) => {
                    warn!("Vision attempt {} for {}/{} failed: {}", attempt, domain, role, e);
                    last_vision_error = Some(e.to_string());
                    continue;
                }
                Err(_) => {
                    let e = VisionError::Timeout(self.vision_timeout.as_millis() as u64);
                    warn!("Vision attempt {} for {}/{} failed: {}", attempt, domain, role, e);
                    last_vision_error = Some(e.to_string());
                    continue;
                }
            };

            if descriptors.is_empty() {
                debug!("Vision attempt {} returned no elements", attempt);
                continue;
            }

            let mut survivors = Vec::new();
            for descriptor in &descriptors {
                for candidate in synthesize(descriptor) {
                    if !tried.insert((candidate.strategy, candidate.expression.clone())) {
                        continue;
                    }
                    let result = self.validator.validate(page, &candidate, role).await?;
                    if result.outcome.is_valid() {
                        survivors.push(candidate.verified());
                    } else {
                        debug!(
                            "Discarding '{}': {}",
                            candidate.expression,
                            result.outcome.label()
                        );
                        rejected.push(CandidateAttempt::new(&candidate, result.outcome));
                    }
                }
            }

            if !survivors.is_empty() {
                let mut ranked = scorer::rank_candidates(&survivors);
                ranked.truncate(self.max_candidates);
                info!(
                    "Discovered {} candidate(s) for {}/{} on attempt {}",
                    ranked.len(),
                    domain,
                    role,
                    attempt
                );
                return Ok(ranked);
            }
        }

        warn!(
            "Discovery exhausted for {}/{}: {} candidate(s) rejected",
            domain,
            role,
            rejected.len()
        );
        Err(SelectorError::DiscoveryExhausted {
            attempts: self.attempts,
            rejected,
            last_vision_error,
        })
    }
}
