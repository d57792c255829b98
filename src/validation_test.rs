// Unit tests for validation module

use super::*;
use crate::page::ElementRef;
use crate::types::StructuralClass;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Clone, Copy)]
struct ElementState {
    visible: bool,
    enabled: bool,
}

const OK: ElementState = ElementState {
    visible: true,
    enabled: true,
};

/// Page whose elements are fixed per expression, optionally appearing late
#[derive(Default)]
struct StaticPage {
    elements: HashMap<String, Vec<ElementState>>,
    /// expression -> number of queries that return nothing first
    late: HashMap<String, usize>,
    queries: AtomicUsize,
    seen: Mutex<HashMap<String, usize>>,
}

impl StaticPage {
    fn with(mut self, expression: &str, states: Vec<ElementState>) -> Self {
        self.elements.insert(expression.to_string(), states);
        self
    }

    fn late(mut self, expression: &str, polls: usize) -> Self {
        self.late.insert(expression.to_string(), polls);
        self
    }

    fn state(&self, element: &ElementRef) -> ElementState {
        let (expression, index) = element
            .id()
            .rsplit_once('#')
            .map(|(e, i)| (e.to_string(), i.parse::<usize>().unwrap()))
            .unwrap();
        self.elements[&expression][index]
    }
}

#[async_trait]
impl BrowserPage for StaticPage {
    async fn query_selector(
        &self,
        expression: &str,
        _strategy: Strategy,
    ) -> Result<Vec<ElementRef>, PageError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if expression.starts_with("!!") {
            return Err(PageError::InvalidExpression {
                expression: expression.to_string(),
                reason: "unparseable".to_string(),
            });
        }
        if expression == "boom" {
            return Err(PageError::Query("session gone".to_string()));
        }

        let seen = {
            let mut seen = self.seen.lock().unwrap();
            let count = seen.entry(expression.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        if seen <= self.late.get(expression).copied().unwrap_or(0) {
            return Ok(Vec::new());
        }

        Ok(self
            .elements
            .get(expression)
            .map(|states| {
                (0..states.len())
                    .map(|i| ElementRef::new(format!("{expression}#{i}")))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn is_visible(&self, element: &ElementRef) -> Result<bool, PageError> {
        Ok(self.state(element).visible)
    }

    async fn is_interactable(&self, element: &ElementRef) -> Result<bool, PageError> {
        Ok(self.state(element).enabled)
    }

    async fn screenshot(&self) -> Result<Vec<u8>, PageError> {
        Ok(Vec::new())
    }

    async fn dom_snapshot(&self) -> Result<String, PageError> {
        Ok(String::new())
    }
}

fn engine() -> ValidationEngine {
    ValidationEngine::new(
        Duration::from_secs(2),
        Duration::from_millis(100),
        NotInteractablePolicy::FullFailure,
    )
}

fn css(expression: &str) -> SelectorCandidate {
    SelectorCandidate::new(Strategy::Css, expression, StructuralClass::IdBased)
}

#[tokio::test(start_paused = true)]
async fn test_single_visible_element_is_valid() {
    let page = StaticPage::default().with("#prompt", vec![OK]);
    let result = engine()
        .validate(&page, &css("#prompt"), &Role::ChatInput)
        .await
        .unwrap();
    assert_eq!(result.outcome, ValidationOutcome::Valid);
    assert_eq!(result.matches, 1);
    assert_eq!(page.queries.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_element_waits_for_timeout() {
    let page = StaticPage::default();
    let result = engine()
        .validate(&page, &css("#gone"), &Role::ChatInput)
        .await
        .unwrap();
    assert_eq!(result.outcome, ValidationOutcome::NotFound);
    assert!(result.elapsed >= Duration::from_secs(2));
    // polled roughly every 100ms
    assert!(page.queries.load(Ordering::SeqCst) >= 20);
}

#[tokio::test(start_paused = true)]
async fn test_slow_element_is_found_within_timeout() {
    let page = StaticPage::default().with("#late", vec![OK]).late("#late", 5);
    let result = engine()
        .validate(&page, &css("#late"), &Role::ChatInput)
        .await
        .unwrap();
    assert_eq!(result.outcome, ValidationOutcome::Valid);
    assert_eq!(page.queries.load(Ordering::SeqCst), 6);
}

#[tokio::test(start_paused = true)]
async fn test_multiple_matches_are_ambiguous_immediately() {
    let page = StaticPage::default().with("button", vec![OK, OK, OK]);
    let result = engine()
        .validate(&page, &css("button"), &Role::SubmitButton)
        .await
        .unwrap();
    assert_eq!(result.outcome, ValidationOutcome::Ambiguous { matches: 3 });
    assert_eq!(page.queries.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_hidden_or_disabled_is_not_interactable() {
    let hidden = ElementState {
        visible: false,
        enabled: true,
    };
    let disabled = ElementState {
        visible: true,
        enabled: false,
    };
    let page = StaticPage::default()
        .with("#hidden", vec![hidden])
        .with("#disabled", vec![disabled]);

    let result = engine()
        .validate(&page, &css("#hidden"), &Role::ChatInput)
        .await
        .unwrap();
    assert_eq!(result.outcome, ValidationOutcome::NotInteractable);

    let result = engine()
        .validate(&page, &css("#disabled"), &Role::SubmitButton)
        .await
        .unwrap();
    assert_eq!(result.outcome, ValidationOutcome::NotInteractable);

    // display-only roles don't need to be enabled
    let result = engine()
        .validate(&page, &css("#disabled"), &Role::ResponseArea)
        .await
        .unwrap();
    assert_eq!(result.outcome, ValidationOutcome::Valid);
}

#[tokio::test(start_paused = true)]
async fn test_malformed_expression_is_not_found() {
    let page = StaticPage::default();
    let result = engine()
        .validate(&page, &css("!!div["), &Role::ChatInput)
        .await
        .unwrap();
    assert_eq!(result.outcome, ValidationOutcome::NotFound);
}

#[tokio::test(start_paused = true)]
async fn test_page_failure_is_browser_error() {
    let page = StaticPage::default();
    let err = engine()
        .validate(&page, &css("boom"), &Role::ChatInput)
        .await
        .unwrap_err();
    assert!(matches!(err, SelectorError::Browser(PageError::Query(_))));
    assert_eq!(err.exit_code(), 4);
}

#[test]
fn test_credit_follows_policy() {
    use NotInteractablePolicy::*;

    assert_eq!(ValidationOutcome::Valid.credit(FullFailure), AttemptCredit::Success);
    assert_eq!(ValidationOutcome::NotFound.credit(HalfWeight), AttemptCredit::Failure);
    assert_eq!(
        ValidationOutcome::Ambiguous { matches: 2 }.credit(HalfWeight),
        AttemptCredit::Failure
    );
    assert_eq!(
        ValidationOutcome::NotInteractable.credit(FullFailure),
        AttemptCredit::Failure
    );
    assert_eq!(
        ValidationOutcome::NotInteractable.credit(HalfWeight),
        AttemptCredit::HalfFailure
    );
}

#[test]
fn test_attempt_serializes_for_error_reports() {
    let attempt = CandidateAttempt::new(&css("#a"), ValidationOutcome::Ambiguous { matches: 2 });
    let json = serde_json::to_value(&attempt).unwrap();
    assert_eq!(
        json,
        serde_json::json!({
            "expression": "#a",
            "strategy": "css",
            "outcome": {"ambiguous": {"matches": 2}}
        })
    );
}
