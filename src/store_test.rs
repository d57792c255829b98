// Unit tests for store module

use super::*;
use crate::types::{SelectorCandidate, Strategy, StructuralClass};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::time::Duration;

const DOMAIN: &str = "chat.example.com";

fn candidate(expression: &str, class: StructuralClass) -> SelectorCandidate {
    SelectorCandidate::new(Strategy::Css, expression, class).verified()
}

fn two_candidate_record() -> SelectorRecord {
    SelectorRecord::new(
        DOMAIN,
        &Role::ChatInput,
        vec![
            candidate("#prompt", StructuralClass::IdBased),
            candidate("textarea", StructuralClass::PositionalOrBasicTag),
        ],
    )
}

#[tokio::test]
async fn test_get_missing_returns_none() {
    let store = SelectorStore::in_memory();
    assert!(store.get(DOMAIN, &Role::ChatInput).is_none());
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_put_then_get_normalizes_domain() {
    let store = SelectorStore::in_memory();
    store.put(two_candidate_record()).await.unwrap();

    let found = store
        .get("https://Chat.Example.com/c/42", &Role::ChatInput)
        .unwrap();
    assert_eq!(found, two_candidate_record_with_times(&found));
    assert_eq!(store.len(), 1);
}

// timestamps come from Utc::now(), so compare everything else
fn two_candidate_record_with_times(stored: &SelectorRecord) -> SelectorRecord {
    let mut expected = two_candidate_record();
    expected.discovered_at = stored.discovered_at;
    expected.last_validated_at = stored.last_validated_at;
    expected
}

#[tokio::test]
async fn test_put_rejects_invalid_records() {
    let store = SelectorStore::in_memory();

    let empty = SelectorRecord::new(DOMAIN, &Role::ChatInput, Vec::new());
    let err = store.put(empty).await.unwrap_err();
    assert!(matches!(err, SelectorError::InvalidRecord(_)));

    let mut bad_counts = two_candidate_record();
    bad_counts.candidates[0].success_count = 5;
    let err = store.put(bad_counts).await.unwrap_err();
    assert!(matches!(err, SelectorError::InvalidRecord(_)));

    assert!(store.is_empty());
}

#[tokio::test]
async fn test_record_validation_updates_candidate_and_record() {
    let store = SelectorStore::in_memory();
    store.put(two_candidate_record()).await.unwrap();

    store.record_validation(DOMAIN, &Role::ChatInput, 0, false).await.unwrap();
    store.record_validation(DOMAIN, &Role::ChatInput, 0, false).await.unwrap();
    let record = store.get(DOMAIN, &Role::ChatInput).unwrap();
    assert_eq!(record.candidates[0].attempt_count, 3);
    assert_eq!(record.candidates[0].success_count, 1);
    assert_eq!(record.validation_count, 2);
    assert_eq!(record.failure_count, 2);
    assert_eq!(record.consecutive_failures, 2);

    let before = record.last_validated_at;
    let record = store
        .record_validation(DOMAIN, &Role::ChatInput, 1, true)
        .await
        .unwrap();
    assert_eq!(record.candidates[1].attempt_count, 2);
    assert_eq!(record.candidates[1].success_count, 2);
    assert_eq!(record.validation_count, 3);
    assert_eq!(record.failure_count, 2);
    assert_eq!(record.consecutive_failures, 0);
    assert!(record.last_validated_at >= before);
}

#[tokio::test]
async fn test_record_validation_unknown_key_or_index() {
    let store = SelectorStore::in_memory();

    let err = store
        .record_validation(DOMAIN, &Role::ChatInput, 0, true)
        .await
        .unwrap_err();
    assert!(matches!(err, SelectorError::NotFound { index: None, .. }));

    store.put(two_candidate_record()).await.unwrap();
    let err = store
        .record_validation(DOMAIN, &Role::ChatInput, 2, true)
        .await
        .unwrap_err();
    assert!(matches!(err, SelectorError::NotFound { index: Some(2), .. }));
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn test_half_failure_credit_discounts_attempt() {
    let store = SelectorStore::in_memory();
    store.put(two_candidate_record()).await.unwrap();

    let record = store
        .record_attempt(DOMAIN, &Role::ChatInput, 0, None, AttemptCredit::HalfFailure)
        .await
        .unwrap();
    let c = &record.candidates[0];
    assert_eq!(c.attempt_count, 2);
    assert_eq!(c.discounted_attempts, 0.5);
    assert_eq!(record.failure_count, 1);
    assert_eq!(record.consecutive_failures, 1);
}

#[tokio::test]
async fn test_invalidate_is_idempotent() {
    let store = SelectorStore::in_memory();
    store.put(two_candidate_record()).await.unwrap();

    store.invalidate(DOMAIN, &Role::ChatInput).await.unwrap();
    assert!(store.get(DOMAIN, &Role::ChatInput).is_none());
    store.invalidate(DOMAIN, &Role::ChatInput).await.unwrap();
    assert!(store.get(DOMAIN, &Role::ChatInput).is_none());
}

#[tokio::test]
async fn test_list_expired_is_restartable() {
    let store = SelectorStore::in_memory();

    let mut stale = two_candidate_record();
    stale.last_validated_at = Utc::now() - chrono::Duration::days(10);
    store.put(stale).await.unwrap();

    let mut fresh = two_candidate_record();
    fresh.role = Role::SubmitButton;
    store.put(fresh).await.unwrap();

    let mut expired = store.list_expired(chrono::Duration::days(7));
    let again = expired.clone();

    let first: Vec<RecordKey> = expired.by_ref().collect();
    assert_eq!(first, vec![RecordKey::new(DOMAIN, &Role::ChatInput)]);
    assert_eq!(expired.next(), None);

    expired.restart();
    assert_eq!(expired.collect::<Vec<_>>(), first);
    assert_eq!(again.collect::<Vec<_>>(), first);
}

#[tokio::test]
async fn test_list_failing_uses_consecutive_failures() {
    let store = SelectorStore::in_memory();
    store.put(two_candidate_record()).await.unwrap();

    for _ in 0..3 {
        store.record_validation(DOMAIN, &Role::ChatInput, 0, false).await.unwrap();
    }
    assert_eq!(
        store.list_failing(3),
        vec![RecordKey::new(DOMAIN, &Role::ChatInput)]
    );

    store.record_validation(DOMAIN, &Role::ChatInput, 1, true).await.unwrap();
    assert!(store.list_failing(3).is_empty());
}

#[tokio::test]
async fn test_apply_ranking_respects_hysteresis() {
    let store = SelectorStore::in_memory();
    let mut record = two_candidate_record();
    // incumbent 0.95 * 1/4 = 0.2375, challenger 0.35 * 1/1: margin 0.1125
    record.candidates[0].attempt_count = 4;
    store.put(record).await.unwrap();

    let order = |store: &SelectorStore| -> Vec<String> {
        store
            .get(DOMAIN, &Role::ChatInput)
            .unwrap()
            .candidates
            .into_iter()
            .map(|c| c.expression)
            .collect()
    };

    assert!(!store.apply_ranking(DOMAIN, &Role::ChatInput, 0.2).await.unwrap());
    assert_eq!(order(&store), vec!["#prompt", "textarea"]);

    assert!(store.apply_ranking(DOMAIN, &Role::ChatInput, 0.1).await.unwrap());
    assert_eq!(order(&store), vec!["textarea", "#prompt"]);

    // counters travel with their candidate
    let record = store.get(DOMAIN, &Role::ChatInput).unwrap();
    assert_eq!(record.candidates[1].attempt_count, 4);
}

#[tokio::test]
async fn test_open_loads_backend_records() {
    let backend = Arc::new(MemoryBackend::with_records(vec![two_candidate_record()]));
    let store = SelectorStore::open(backend).await.unwrap();
    assert!(store.get(DOMAIN, &Role::ChatInput).is_some());
    assert_eq!(store.list().len(), 1);
    store.flush().await.unwrap();
}

#[tokio::test]
async fn test_record_attempt_skips_replaced_candidate() {
    let store = SelectorStore::in_memory();
    store.put(two_candidate_record()).await.unwrap();

    // someone replaced the record after the caller read "#prompt" at index 0
    store
        .put(SelectorRecord::new(
            DOMAIN,
            &Role::ChatInput,
            vec![candidate("#composer", StructuralClass::IdBased)],
        ))
        .await
        .unwrap();

    let err = store
        .record_attempt(
            DOMAIN,
            &Role::ChatInput,
            0,
            Some((Strategy::Css, "#prompt")),
            AttemptCredit::Failure,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SelectorError::NotFound { index: Some(0), .. }));

    let record = store.get(DOMAIN, &Role::ChatInput).unwrap();
    assert_eq!(record.candidates[0].attempt_count, 1);
    assert_eq!(record.validation_count, 0);
    assert_eq!(record.failure_count, 0);

    let record = store
        .record_attempt(
            DOMAIN,
            &Role::ChatInput,
            0,
            Some((Strategy::Css, "#composer")),
            AttemptCredit::Success,
        )
        .await
        .unwrap();
    assert_eq!(record.candidates[0].attempt_count, 2);
}

#[tokio::test]
async fn test_put_canonicalizes_custom_role() {
    let store = SelectorStore::in_memory();
    let mut record = two_candidate_record();
    record.role = Role::Custom(" Chat-Input ".to_string());
    store.put(record).await.unwrap();

    let stored = store.get(DOMAIN, &Role::ChatInput).unwrap();
    assert_eq!(stored.role, Role::ChatInput);
    assert_eq!(store.list_failing(0), vec![RecordKey::new(DOMAIN, &Role::ChatInput)]);
}

#[tokio::test]
async fn test_invalidate_drops_key_lock() {
    let store = SelectorStore::in_memory();
    store.put(two_candidate_record()).await.unwrap();
    assert_eq!(store.shared.key_locks.len(), 1);

    store.invalidate(DOMAIN, &Role::ChatInput).await.unwrap();
    assert!(store.shared.key_locks.is_empty());

    // invalidating an unknown key leaves nothing behind either
    store.invalidate("other.example.com", &Role::LoginButton).await.unwrap();
    assert!(store.shared.key_locks.is_empty());
}

/// Backend whose saves take a while, so callers can give up mid-write
struct SlowBackend {
    inner: MemoryBackend,
    delay: Duration,
}

#[async_trait]
impl StorageBackend for SlowBackend {
    async fn load_all(&self) -> Result<Vec<SelectorRecord>, SelectorError> {
        self.inner.load_all().await
    }

    async fn save(&self, record: &SelectorRecord) -> Result<(), SelectorError> {
        tokio::time::sleep(self.delay).await;
        self.inner.save(record).await
    }

    async fn remove(&self, key: &RecordKey) -> Result<(), SelectorError> {
        self.inner.remove(key).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_put_still_reaches_memory() {
    let backend = Arc::new(SlowBackend {
        inner: MemoryBackend::new(),
        delay: Duration::from_millis(100),
    });
    let store = SelectorStore::open(backend.clone()).await.unwrap();

    let abandoned =
        tokio::time::timeout(Duration::from_millis(10), store.put(two_candidate_record())).await;
    assert!(abandoned.is_err());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(backend.inner.len(), 1);
    assert!(store.get(DOMAIN, &Role::ChatInput).is_some());
}
