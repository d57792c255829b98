//! # webselect
#![allow(clippy::uninlined_format_args)]
//!
//! Self-healing selector cache for browser automation.
//!
//! Automation code asks for a UI element by its *role* ("the chat input on
//! chat.example.com") instead of hard-coding a CSS selector. The engine keeps
//! several candidate selectors per (domain, role), ranks them by a stability
//! score built from their structure and track record, and validates them
//! against the live page. When every cached candidate fails, a vision model
//! is asked to find the element again; its answers are only kept after they
//! validate on the page.
//!
//! ## Library Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use webselect::{
//!     EngineConfig, JsonDirBackend, OpenAiVisionClient, Role, SelectorResolver, SelectorStore,
//!     SessionOptions, WebDriverPage,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = EngineConfig::default();
//! let backend = JsonDirBackend::open("/tmp/selectors").await?;
//! let store = Arc::new(SelectorStore::open(Arc::new(backend)).await?);
//! let resolver = SelectorResolver::new(store.clone(), &config);
//!
//! let page = WebDriverPage::connect(&SessionOptions::default()).await?;
//! page.goto("https://chat.example.com").await?;
//! let vision = OpenAiVisionClient::new(webselect::vision::DEFAULT_API_URL, "gpt-4o")
//!     .with_api_key(std::env::var("OPENAI_API_KEY")?);
//!
//! let resolution = resolver
//!     .resolve(&page, "chat.example.com", &Role::ChatInput, &vision, &CancellationToken::new())
//!     .await?;
//! println!("{}", resolution.candidate.expression);
//!
//! store.flush().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! # Resolve a role end to end (needs geckodriver and a vision endpoint)
//! webselect resolve "https://chat.example.com" chat_input
//!
//! # Inspect and manage the cache
//! webselect list --format simple
//! webselect show chat.example.com submit_button
//! webselect seed chat.example.com submit_button '[data-testid="send-button"]' \
//!     --strategy attribute-match --class data-attribute-based
//! webselect invalidate chat.example.com submit_button
//! webselect expired --ttl-days 7
//! webselect failing --threshold 3
//! ```

/// Storage backends behind the selector store
pub mod backend;

/// Engine configuration
pub mod config;

/// Vision-driven candidate discovery
pub mod discovery;

/// Error types and exit codes
pub mod errors;

/// Live page contract
pub mod page;

/// Resolution façade
pub mod resolver;

/// Stability scoring and ranking
pub mod scorer;

/// Selector record store
pub mod store;

/// Periodic TTL sweep
pub mod sweep;

/// Selector synthesis from element hints
pub mod synthesis;

/// Core data model
pub mod types;

/// Candidate validation against a live page
pub mod validation;

/// Vision model client
pub mod vision;

/// WebDriver-backed page
pub mod webdriver;

pub use backend::{JsonDirBackend, MemoryBackend, StorageBackend};
pub use config::{EngineConfig, NotInteractablePolicy};
pub use discovery::DiscoveryOrchestrator;
pub use errors::{PageError, SelectorError, VisionError};
pub use page::{BrowserPage, ElementRef};
pub use resolver::{Resolution, ResolutionSource, SelectorResolver};
pub use store::{ExpiredKeys, SelectorStore};
pub use sweep::Sweeper;
pub use types::{
    BoundingBox, ElementDescriptor, OutputFormat, RecordKey, Role, SelectorCandidate,
    SelectorRecord, Strategy, StructuralClass, normalize_domain,
};
pub use validation::{CandidateAttempt, ValidationEngine, ValidationOutcome, ValidationResult};
pub use vision::{OpenAiVisionClient, VisionClient};
pub use webdriver::{BrowserType, SessionOptions, WebDriverPage};
