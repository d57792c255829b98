//! Selector record store
//!
//! Process-wide cache of [`SelectorRecord`]s in front of a [`StorageBackend`].
//! Callers never see a lock or a live record: reads hand out clones and every
//! mutation is a read-copy-modify-write performed under a per-key async
//! mutex, so same-key writes are serialized while different keys proceed in
//! parallel.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{MemoryBackend, StorageBackend};
use crate::errors::SelectorError;
use crate::scorer;
use crate::types::{AttemptCredit, RecordKey, Role, SelectorRecord, Strategy};

pub struct SelectorStore {
    shared: Arc<Shared>,
}

struct Shared {
    records: DashMap<RecordKey, SelectorRecord>,
    /// Per-key locks serializing writes (never held across a DashMap guard)
    key_locks: DashMap<RecordKey, Arc<Mutex<()>>>,
    backend: Arc<dyn StorageBackend>,
}

impl Shared {
    fn lock_for(&self, key: &RecordKey) -> Arc<Mutex<()>> {
        self.key_locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn snapshot(&self, key: &RecordKey) -> Option<SelectorRecord> {
        self.records.get(key).map(|entry| entry.value().clone())
    }
}

/// What a read-modify-write does to its key
enum Write {
    Keep,
    Save(SelectorRecord),
    Remove,
}

impl SelectorStore {
    /// Open a store, loading every record the backend already holds
    pub async fn open(backend: Arc<dyn StorageBackend>) -> Result<Self, SelectorError> {
        let records = DashMap::new();
        for mut record in backend.load_all().await? {
            if let Err(reason) = record.check() {
                warn!("Ignoring persisted record that fails validation: {}", reason);
                continue;
            }
            record.role = record.role.canonical();
            records.insert(record.key(), record);
        }
        info!("Selector store opened with {} record(s)", records.len());

        Ok(Self::with_records(records, backend))
    }

    /// Empty store over a [`MemoryBackend`]
    pub fn in_memory() -> Self {
        Self::with_records(DashMap::new(), Arc::new(MemoryBackend::new()))
    }

    fn with_records(
        records: DashMap<RecordKey, SelectorRecord>,
        backend: Arc<dyn StorageBackend>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                records,
                key_locks: DashMap::new(),
                backend,
            }),
        }
    }

    /// Run a read-modify-write on one key under its lock
    ///
    /// The write runs on its own task, so a caller dropped mid-write (a
    /// canceled `resolve`) cannot leave the backend ahead of memory.
    async fn write<T, F>(&self, key: RecordKey, modify: F) -> Result<T, SelectorError>
    where
        T: Send + 'static,
        F: FnOnce(&RecordKey, Option<SelectorRecord>) -> Result<(Write, T), SelectorError>
            + Send
            + 'static,
    {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let lock = shared.lock_for(&key);
            let _guard = lock.lock().await;

            let (write, out) = modify(&key, shared.snapshot(&key))?;
            match write {
                Write::Keep => {}
                Write::Save(record) => {
                    shared.backend.save(&record).await?;
                    shared.records.insert(key, record);
                }
                Write::Remove => {
                    shared.backend.remove(&key).await?;
                    if shared.records.remove(&key).is_some() {
                        info!("Invalidated {}", key);
                    }
                    // the map and `lock` are the only holders unless someone is waiting
                    shared
                        .key_locks
                        .remove_if(&key, |_, held| Arc::strong_count(held) <= 2);
                }
            }
            Ok::<T, SelectorError>(out)
        })
        .await
        .map_err(|e| SelectorError::Storage(format!("store write task failed: {e}")))?
    }

    /// Copy of the record for (domain, role), if any
    pub fn get(&self, domain: &str, role: &Role) -> Option<SelectorRecord> {
        self.shared.snapshot(&RecordKey::new(domain, role))
    }

    /// Insert or replace a record
    pub async fn put(&self, record: SelectorRecord) -> Result<(), SelectorError> {
        let mut record = record;
        record.domain = crate::types::normalize_domain(&record.domain);
        record.role = record.role.canonical();
        record.check().map_err(SelectorError::InvalidRecord)?;

        self.write(record.key(), move |key, _| {
            debug!("Storing {} with {} candidate(s)", key, record.candidates.len());
            Ok((Write::Save(record), ()))
        })
        .await
    }

    /// Count one validation attempt, full-failure semantics
    pub async fn record_validation(
        &self,
        domain: &str,
        role: &Role,
        candidate_index: usize,
        success: bool,
    ) -> Result<SelectorRecord, SelectorError> {
        let credit = if success {
            AttemptCredit::Success
        } else {
            AttemptCredit::Failure
        };
        self.record_attempt(domain, role, candidate_index, None, credit)
            .await
    }

    /// Count one validation attempt against a candidate and its record
    ///
    /// `expected` names the candidate (strategy and expression) the caller
    /// validated. If the record was replaced or reordered since the caller
    /// read it and a different candidate now sits at `candidate_index`, the
    /// attempt is not recorded and `NotFound` is returned, as it is when the
    /// record or the index does not exist. Returns the updated record.
    pub async fn record_attempt(
        &self,
        domain: &str,
        role: &Role,
        candidate_index: usize,
        expected: Option<(Strategy, &str)>,
        credit: AttemptCredit,
    ) -> Result<SelectorRecord, SelectorError> {
        let expected = expected.map(|(strategy, expression)| (strategy, expression.to_string()));

        self.write(RecordKey::new(domain, role), move |key, current| {
            let not_found = |index| SelectorError::NotFound {
                domain: key.domain.clone(),
                role: key.role.clone(),
                index,
            };
            let mut record = current.ok_or_else(|| not_found(None))?;

            let candidate = record
                .candidates
                .get_mut(candidate_index)
                .ok_or_else(|| not_found(Some(candidate_index)))?;
            if let Some((strategy, expression)) = &expected {
                if candidate.strategy != *strategy || candidate.expression != *expression {
                    debug!(
                        "Candidate {} of {} is now '{}', not '{}'",
                        candidate_index, key, candidate.expression, expression
                    );
                    return Err(not_found(Some(candidate_index)));
                }
            }
            candidate.apply(credit);

            record.validation_count += 1;
            if credit.is_success() {
                record.last_validated_at = Utc::now();
                record.consecutive_failures = 0;
            } else {
                record.failure_count += 1;
                record.consecutive_failures = record.consecutive_failures.saturating_add(1);
            }

            Ok((Write::Save(record.clone()), record))
        })
        .await
    }

    /// Delete the record; deleting a missing record is not an error
    pub async fn invalidate(&self, domain: &str, role: &Role) -> Result<(), SelectorError> {
        self.write(RecordKey::new(domain, role), |_, _| Ok((Write::Remove, ())))
            .await
    }

    /// Keys whose `last_validated_at` is older than `ttl`
    ///
    /// The returned iterator works over a snapshot taken now and filters
    /// lazily. Clone it (or call [`ExpiredKeys::restart`]) to walk it again.
    pub fn list_expired(&self, ttl: chrono::Duration) -> ExpiredKeys {
        let mut entries: Vec<(RecordKey, DateTime<Utc>)> = self
            .shared
            .records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().last_validated_at))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        ExpiredKeys {
            entries: Arc::new(entries),
            cutoff: Utc::now() - ttl,
            position: 0,
        }
    }

    /// Keys with at least `threshold` failures since their last success
    pub fn list_failing(&self, threshold: u32) -> Vec<RecordKey> {
        let mut keys: Vec<RecordKey> = self
            .shared
            .records
            .iter()
            .filter(|entry| entry.value().consecutive_failures >= threshold)
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Copies of every record, ordered by key
    pub fn list(&self) -> Vec<SelectorRecord> {
        let mut records: Vec<SelectorRecord> =
            self.shared.records.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by_key(|record| record.key());
        records
    }

    pub fn len(&self) -> usize {
        self.shared.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.records.is_empty()
    }

    /// Rewrite the stored candidate order if a challenger clears the hysteresis margin
    ///
    /// Returns whether the order changed. A missing record is left alone.
    pub async fn apply_ranking(
        &self,
        domain: &str,
        role: &Role,
        hysteresis: f64,
    ) -> Result<bool, SelectorError> {
        self.write(RecordKey::new(domain, role), move |key, current| {
            let Some(mut record) = current else {
                return Ok((Write::Keep, false));
            };
            let Some(order) = scorer::reorder_for(&record, hysteresis) else {
                return Ok((Write::Keep, false));
            };

            record.candidates = order
                .into_iter()
                .map(|i| record.candidates[i].clone())
                .collect();
            debug!(
                "Reordered {}: '{}' is now preferred",
                key, record.candidates[0].expression
            );
            Ok((Write::Save(record), true))
        })
        .await
    }

    /// Sync the backend; call once at shutdown
    pub async fn flush(&self) -> Result<(), SelectorError> {
        self.shared.backend.flush().await
    }
}

/// Lazy, finite, restartable sequence of expired keys
#[derive(Debug, Clone)]
pub struct ExpiredKeys {
    entries: Arc<Vec<(RecordKey, DateTime<Utc>)>>,
    cutoff: DateTime<Utc>,
    position: usize,
}

impl ExpiredKeys {
    /// Rewind to the first key
    pub fn restart(&mut self) {
        self.position = 0;
    }
}

impl Iterator for ExpiredKeys {
    type Item = RecordKey;

    fn next(&mut self) -> Option<RecordKey> {
        while let Some((key, last_validated_at)) = self.entries.get(self.position) {
            self.position += 1;
            if *last_validated_at < self.cutoff {
                return Some(key.clone());
            }
        }
        None
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;
