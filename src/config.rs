//! Engine configuration

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::errors::SelectorError;

/// How a found-but-hidden or disabled element is charged against a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum NotInteractablePolicy {
    /// Same as absence
    #[default]
    FullFailure,
    /// Counts as half an attempt in the running average
    HalfWeight,
}

/// Tunables for the selector engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Records not validated within this many days are reported by `list_expired`
    pub ttl_days: u32,
    /// How long validation waits for an element to appear
    pub validation_timeout_ms: u64,
    /// Poll interval while waiting
    pub validation_poll_ms: u64,
    /// Per-attempt timeout for the vision client
    pub vision_timeout_ms: u64,
    /// Vision calls (initial prompt plus refinements) before discovery gives up
    pub discovery_attempts: u32,
    /// Most candidates kept per record after discovery
    pub max_candidates: usize,
    /// Score margin a challenger needs over the first stored candidate to reorder the record
    pub hysteresis: f64,
    /// Consecutive failures after which a record is reported as failing
    pub failure_threshold: u32,
    pub not_interactable: NotInteractablePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ttl_days: 7,
            validation_timeout_ms: 2_000,
            validation_poll_ms: 100,
            vision_timeout_ms: 10_000,
            discovery_attempts: 3,
            max_candidates: 5,
            hysteresis: 0.1,
            failure_threshold: 3,
            not_interactable: NotInteractablePolicy::FullFailure,
        }
    }
}

impl EngineConfig {
    /// Default location: `~/.webselect/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".webselect").join("config.json"))
    }

    /// Load from a JSON file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, SelectorError> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .map_err(|e| SelectorError::Config(format!("{}: {}", path.display(), e)))?;
        let config: EngineConfig = serde_json::from_str(&raw)
            .map_err(|e| SelectorError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;

        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SelectorError> {
        if self.discovery_attempts == 0 {
            return Err(SelectorError::Config(
                "discovery_attempts must be at least 1".to_string(),
            ));
        }
        if self.validation_timeout_ms == 0 || self.vision_timeout_ms == 0 {
            return Err(SelectorError::Config("timeouts must be non-zero".to_string()));
        }
        if self.validation_poll_ms == 0 {
            return Err(SelectorError::Config(
                "validation_poll_ms must be non-zero".to_string(),
            ));
        }
        if self.max_candidates == 0 {
            return Err(SelectorError::Config(
                "max_candidates must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.hysteresis) {
            return Err(SelectorError::Config(format!(
                "hysteresis must be within [0, 1], got {}",
                self.hysteresis
            )));
        }
        Ok(())
    }

    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.ttl_days as i64)
    }

    pub fn validation_timeout(&self) -> Duration {
        Duration::from_millis(self.validation_timeout_ms)
    }

    pub fn validation_poll(&self) -> Duration {
        Duration::from_millis(self.validation_poll_ms)
    }

    pub fn vision_timeout(&self) -> Duration {
        Duration::from_millis(self.vision_timeout_ms)
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
