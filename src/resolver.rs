//! Resolution façade
//!
//! The one call automation code makes to turn (domain, role) into a selector
//! that works on the page in front of it right now:
//!
//! ```text
//! CacheHit  -> Validating  -> Resolved | Invalidating -> Discovering
//! CacheMiss -> Discovering -> Resolved | Failed
//! ```
//!
//! Cached candidates are tried one at a time in ranked order, and every
//! attempt is recorded so the ranking corrects itself over time. When all of
//! them fail, discovery runs and its result replaces the record. A record
//! replaced by another writer mid-validation is re-read (a few times at
//! most); nothing else is retried.

use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, NotInteractablePolicy};
use crate::discovery::DiscoveryOrchestrator;
use crate::errors::SelectorError;
use crate::page::BrowserPage;
use crate::scorer;
use crate::store::{ExpiredKeys, SelectorStore};
use crate::types::{RecordKey, Role, SelectorCandidate, SelectorRecord};
use crate::validation::{CandidateAttempt, ValidationEngine};
use crate::vision::VisionClient;

/// States a resolution passes through; only used for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveState {
    CacheHit,
    CacheMiss,
    Validating,
    Invalidating,
    Discovering,
    Resolved,
    Failed,
}

/// Where a resolved candidate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Cache,
    Discovery,
}

/// A successfully resolved selector
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub candidate: SelectorCandidate,
    pub source: ResolutionSource,
    /// Cached candidates tried before this one was settled on, in order
    pub attempts: Vec<CandidateAttempt>,
}

/// Times the cache is re-read when its record changes under a resolution
const CACHE_PASSES: usize = 3;

enum CachePass {
    Hit(SelectorCandidate),
    /// Every candidate failed validation
    Exhausted,
    /// The record was replaced or removed while its candidates were being validated
    Changed,
}

pub struct SelectorResolver {
    store: Arc<SelectorStore>,
    validator: ValidationEngine,
    discovery: DiscoveryOrchestrator,
    hysteresis: f64,
    policy: NotInteractablePolicy,
}

impl SelectorResolver {
    pub fn new(store: Arc<SelectorStore>, config: &EngineConfig) -> Self {
        Self {
            store,
            validator: ValidationEngine::from_config(config),
            discovery: DiscoveryOrchestrator::from_config(config),
            hysteresis: config.hysteresis,
            policy: config.not_interactable,
        }
    }

    pub fn store(&self) -> &Arc<SelectorStore> {
        &self.store
    }

    /// Resolve `role` on `domain` against the live page
    ///
    /// `cancel` aborts promptly wherever the call is suspended and yields
    /// `Canceled`. A role that cannot be found even after discovery yields
    /// `ResolutionFailed` carrying the trail of cached candidates tried.
    pub async fn resolve(
        &self,
        page: &dyn BrowserPage,
        domain: &str,
        role: &Role,
        vision: &dyn VisionClient,
        cancel: &CancellationToken,
    ) -> Result<Resolution, SelectorError> {
        let key = RecordKey::new(domain, role);
        if cancel.is_cancelled() {
            return Err(SelectorError::Canceled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Resolution of {} canceled", key);
                Err(SelectorError::Canceled)
            }
            result = self.run(page, &key, vision, cancel) => result,
        }
    }

    async fn run(
        &self,
        page: &dyn BrowserPage,
        key: &RecordKey,
        vision: &dyn VisionClient,
        cancel: &CancellationToken,
    ) -> Result<Resolution, SelectorError> {
        let mut attempts = Vec::new();

        for pass in 0..CACHE_PASSES {
            let Some(record) = self.store.get(&key.domain, &key.role) else {
                if pass == 0 {
                    transition(key, ResolveState::CacheMiss);
                    info!("No cached selectors for {}", key);
                }
                break;
            };

            transition(key, ResolveState::CacheHit);
            match self.try_cached(page, key, &record, &mut attempts).await? {
                CachePass::Hit(candidate) => {
                    transition(key, ResolveState::Resolved);
                    info!("Resolved {} from cache: '{}'", key, candidate.expression);
                    return Ok(Resolution {
                        candidate,
                        source: ResolutionSource::Cache,
                        attempts,
                    });
                }
                CachePass::Exhausted => {
                    transition(key, ResolveState::Invalidating);
                    warn!(
                        "All {} cached candidate(s) for {} failed validation",
                        attempts.len(),
                        key
                    );
                    break;
                }
                CachePass::Changed => {
                    debug!("Record {} changed during validation, re-reading", key);
                }
            }
        }

        transition(key, ResolveState::Discovering);
        let discovered = self
            .discovery
            .discover(page, &key.domain, &key.role, vision, cancel)
            .await;

        match discovered {
            Ok(candidates) => {
                let record = SelectorRecord::new(&key.domain, &key.role, candidates);
                let candidate = record.candidates[0].clone();
                self.store.put(record).await?;
                transition(key, ResolveState::Resolved);
                info!("Resolved {} by discovery: '{}'", key, candidate.expression);
                Ok(Resolution {
                    candidate,
                    source: ResolutionSource::Discovery,
                    attempts,
                })
            }
            Err(cause @ (SelectorError::DiscoveryExhausted { .. } | SelectorError::Vision(_))) => {
                transition(key, ResolveState::Failed);
                warn!("Could not resolve {}: {}", key, cause);
                Err(SelectorError::ResolutionFailed {
                    domain: key.domain.clone(),
                    role: key.role.clone(),
                    attempts,
                    cause: Box::new(cause),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Try cached candidates in ranked order
    async fn try_cached(
        &self,
        page: &dyn BrowserPage,
        key: &RecordKey,
        record: &SelectorRecord,
        attempts: &mut Vec<CandidateAttempt>,
    ) -> Result<CachePass, SelectorError> {
        for index in scorer::ranked_indices(record) {
            let candidate = &record.candidates[index];
            transition(key, ResolveState::Validating);
            let result = self.validator.validate(page, candidate, &key.role).await?;
            attempts.push(CandidateAttempt::new(candidate, result.outcome));

            let credit = result.outcome.credit(self.policy);
            let updated = match self
                .store
                .record_attempt(
                    &key.domain,
                    &key.role,
                    index,
                    Some((candidate.strategy, candidate.expression.as_str())),
                    credit,
                )
                .await
            {
                Ok(updated) => updated,
                // invalidated or replaced by someone else mid-resolution
                Err(SelectorError::NotFound { .. }) => return Ok(CachePass::Changed),
                Err(e) => return Err(e),
            };

            if result.outcome.is_valid() {
                self.store
                    .apply_ranking(&key.domain, &key.role, self.hysteresis)
                    .await?;
                let candidate = updated
                    .candidates
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| candidate.clone());
                return Ok(CachePass::Hit(candidate));
            }
        }
        Ok(CachePass::Exhausted)
    }

    /// Delete the cached record for (domain, role); idempotent
    pub async fn invalidate(&self, domain: &str, role: &Role) -> Result<(), SelectorError> {
        self.store.invalidate(domain, role).await
    }

    /// Keys not validated within `ttl`, for an external re-discovery scheduler
    pub fn list_expired(&self, ttl: chrono::Duration) -> ExpiredKeys {
        self.store.list_expired(ttl)
    }
}

fn transition(key: &RecordKey, state: ResolveState) {
    debug!("{} -> {:?}", key, state);
}
