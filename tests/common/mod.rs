//! Shared fakes for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use webselect::{
    BrowserPage, ElementDescriptor, ElementRef, EngineConfig, PageError, RecordKey,
    SelectorRecord, StorageBackend, Strategy, VisionClient, VisionError,
};

const SEP: char = '\u{1f}';

/// An element the fake page can return
#[derive(Debug, Clone, Copy)]
pub struct FakeElement {
    pub visible: bool,
    pub enabled: bool,
}

impl FakeElement {
    pub fn ok() -> Self {
        Self {
            visible: true,
            enabled: true,
        }
    }

    pub fn disabled() -> Self {
        Self {
            visible: true,
            enabled: false,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    elements: Vec<FakeElement>,
    /// Queries of this expression that come back empty before it appears
    appears_after: usize,
}

/// In-memory page keyed by selector expression; strategy is ignored
#[derive(Default)]
pub struct FakePage {
    entries: Mutex<HashMap<String, Entry>>,
    queries: Mutex<Vec<String>>,
    captures: AtomicUsize,
}

impl FakePage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, expression: &str, element: FakeElement) -> Self {
        self.set(expression, vec![element]);
        self
    }

    pub fn with_many(self, expression: &str, count: usize) -> Self {
        self.set(expression, vec![FakeElement::ok(); count]);
        self
    }

    pub fn appearing_after(self, expression: &str, queries: usize) -> Self {
        self.entries.lock().unwrap().insert(
            expression.to_string(),
            Entry {
                elements: vec![FakeElement::ok()],
                appears_after: queries,
            },
        );
        self
    }

    /// Replace what `expression` matches; an empty vec removes it (a redesign)
    pub fn set(&self, expression: &str, elements: Vec<FakeElement>) {
        let mut entries = self.entries.lock().unwrap();
        if elements.is_empty() {
            entries.remove(expression);
        } else {
            entries.insert(
                expression.to_string(),
                Entry {
                    elements,
                    appears_after: 0,
                },
            );
        }
    }

    pub fn query_count(&self, expression: &str) -> usize {
        self.queries
            .lock()
            .unwrap()
            .iter()
            .filter(|q| q.as_str() == expression)
            .count()
    }

    /// Distinct expressions in the order they were first queried
    pub fn queried(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for q in self.queries.lock().unwrap().iter() {
            if !seen.contains(q) {
                seen.push(q.clone());
            }
        }
        seen
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    fn lookup(&self, element: &ElementRef) -> Result<FakeElement, PageError> {
        let (expression, index) = element
            .id()
            .rsplit_once(SEP)
            .ok_or_else(|| PageError::StaleElement(element.id().to_string()))?;
        let index: usize = index
            .parse()
            .map_err(|_| PageError::StaleElement(element.id().to_string()))?;
        self.entries
            .lock()
            .unwrap()
            .get(expression)
            .and_then(|entry| entry.elements.get(index).copied())
            .ok_or_else(|| PageError::StaleElement(element.id().to_string()))
    }
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn query_selector(
        &self,
        expression: &str,
        _strategy: Strategy,
    ) -> Result<Vec<ElementRef>, PageError> {
        let seen = {
            let mut queries = self.queries.lock().unwrap();
            let seen = queries.iter().filter(|q| q.as_str() == expression).count();
            queries.push(expression.to_string());
            seen
        };
        let entries = self.entries.lock().unwrap();
        Ok(match entries.get(expression) {
            Some(entry) if seen >= entry.appears_after => (0..entry.elements.len())
                .map(|i| ElementRef::new(format!("{expression}{SEP}{i}")))
                .collect(),
            _ => Vec::new(),
        })
    }

    async fn is_visible(&self, element: &ElementRef) -> Result<bool, PageError> {
        Ok(self.lookup(element)?.visible)
    }

    async fn is_interactable(&self, element: &ElementRef) -> Result<bool, PageError> {
        Ok(self.lookup(element)?.enabled)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, PageError> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        Ok(b"\x89PNG fake".to_vec())
    }

    async fn dom_snapshot(&self) -> Result<String, PageError> {
        Ok("<html><body></body></html>".to_string())
    }
}

/// One scripted vision reply
pub enum Reply {
    Elements(Vec<ElementDescriptor>),
    Fail(VisionError),
    /// Never answers; only a timeout or cancellation ends the call
    Hang,
}

/// Vision client that replays a fixed script, then returns nothing
#[derive(Default)]
pub struct ScriptedVision {
    replies: Mutex<VecDeque<Reply>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedVision {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl VisionClient for ScriptedVision {
    async fn locate(
        &self,
        prompt: &str,
        _screenshot: &[u8],
        _dom: &str,
    ) -> Result<Vec<ElementDescriptor>, VisionError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Elements(elements)) => Ok(elements),
            Some(Reply::Fail(e)) => Err(e),
            Some(Reply::Hang) => {
                tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
                Ok(Vec::new())
            }
            None => Ok(Vec::new()),
        }
    }
}

/// Backend that records every write, for asserting persistence order
#[derive(Default)]
pub struct RecordingBackend {
    pub saves: Mutex<Vec<SelectorRecord>>,
    pub removes: Mutex<Vec<RecordKey>>,
}

#[async_trait]
impl StorageBackend for RecordingBackend {
    async fn load_all(&self) -> Result<Vec<SelectorRecord>, webselect::SelectorError> {
        Ok(Vec::new())
    }

    async fn save(&self, record: &SelectorRecord) -> Result<(), webselect::SelectorError> {
        self.saves.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn remove(&self, key: &RecordKey) -> Result<(), webselect::SelectorError> {
        self.removes.lock().unwrap().push(key.clone());
        Ok(())
    }
}

/// Descriptor for a button identified by a test id
pub fn test_id_button(test_id: &str) -> ElementDescriptor {
    let mut descriptor = ElementDescriptor {
        tag: Some("button".to_string()),
        ..ElementDescriptor::default()
    };
    descriptor
        .data_attributes
        .insert("data-testid".to_string(), test_id.to_string());
    descriptor
}

/// Short timeouts so paused-clock tests stay fast to read
pub fn test_config() -> EngineConfig {
    EngineConfig {
        validation_timeout_ms: 500,
        validation_poll_ms: 50,
        vision_timeout_ms: 1_000,
        ..EngineConfig::default()
    }
}
