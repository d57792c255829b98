//! Live page contract consumed by validation and discovery
//!
//! The engine only observes a page: it never navigates, clicks or types.
//! Implementations must tolerate repeated queries; element handles are only
//! guaranteed valid until the next `query_selector` call.

use async_trait::async_trait;

use crate::errors::PageError;
use crate::types::Strategy;

/// Opaque handle to an element returned by [`BrowserPage::query_selector`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(pub String);

impl ElementRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// All elements matching `expression` under `strategy`; empty when nothing matches
    async fn query_selector(
        &self,
        expression: &str,
        strategy: Strategy,
    ) -> Result<Vec<ElementRef>, PageError>;

    async fn is_visible(&self, element: &ElementRef) -> Result<bool, PageError>;

    /// Enabled and able to receive input
    async fn is_interactable(&self, element: &ElementRef) -> Result<bool, PageError>;

    /// PNG screenshot of the viewport
    async fn screenshot(&self) -> Result<Vec<u8>, PageError>;

    /// Serialized DOM of the current document
    async fn dom_snapshot(&self) -> Result<String, PageError>;
}
