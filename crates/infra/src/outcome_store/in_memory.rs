//! In-memory outcome store for tests and local runs.
//!
//! Mirrors the Postgres queries, including cooldown and ordering rules, over
//! two maps guarded by `RwLock`s.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use adlaunch_core::{LaunchKey, LaunchRecord, ProcessedOutcome, WebhookStatus};

use super::r#trait::{NewLaunchQuery, OutcomeStore, RetryQuery, StoreError};

/// In-memory launch + outcome store.
///
/// Intended for tests/dev. Query semantics match the Postgres store, including
/// ordering and cutoff boundaries. Can be switched to "unavailable" to simulate
/// an outage.
#[derive(Debug, Default)]
pub struct InMemoryOutcomeStore {
    launches: RwLock<HashMap<LaunchKey, LaunchRecord>>,
    outcomes: RwLock<HashMap<LaunchKey, ProcessedOutcome>>,
    unavailable: AtomicBool,
    upsert_calls: AtomicUsize,
    schema_ready: AtomicBool,
}

impl InMemoryOutcomeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a source launch, as the upstream producer would.
    pub fn insert_launch(&self, record: LaunchRecord) {
        if let Ok(mut launches) = self.launches.write() {
            launches.insert(record.launch_key.clone(), record);
        }
    }

    pub fn launch(&self, key: &LaunchKey) -> Option<LaunchRecord> {
        self.launches.read().ok()?.get(key).cloned()
    }

    pub fn outcome(&self, key: &LaunchKey) -> Option<ProcessedOutcome> {
        self.outcomes.read().ok()?.get(key).cloned()
    }

    pub fn outcome_count(&self) -> usize {
        self.outcomes.read().map(|o| o.len()).unwrap_or(0)
    }

    /// Number of `upsert_outcomes` calls that reached the store.
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }

    pub fn schema_ready(&self) -> bool {
        self.schema_ready.load(Ordering::SeqCst)
    }

    /// Make every subsequent operation fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }
}

fn poisoned(operation: &'static str) -> StoreError {
    StoreError::Query {
        operation,
        message: "lock poisoned".to_string(),
    }
}

#[async_trait]
impl OutcomeStore for InMemoryOutcomeStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.check_available()?;
        self.schema_ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn select_new(&self, query: &NewLaunchQuery) -> Result<Vec<LaunchRecord>, StoreError> {
        self.check_available()?;
        let launches = self.launches.read().map_err(|_| poisoned("select_new"))?;
        let outcomes = self.outcomes.read().map_err(|_| poisoned("select_new"))?;

        let created_after = query.created_after();
        let failed_before = query.failed_before();

        let mut due: Vec<LaunchRecord> = launches
            .values()
            .filter(|l| match created_after {
                // Mirrors SQL: NULL created_at never passes a window filter.
                Some(after) => l.created_at.is_some_and(|c| c > after),
                None => true,
            })
            .filter(|l| match outcomes.get(&l.launch_key) {
                None => true,
                Some(o) if o.webhook_status == WebhookStatus::Failed => {
                    failed_before.is_none_or(|before| o.processed_at <= before)
                }
                Some(_) => false,
            })
            .cloned()
            .collect();

        // Newest first; NULL created_at sorts first under DESC in Postgres.
        due.sort_by(|a, b| match (a.created_at, b.created_at) {
            (Some(x), Some(y)) => y.cmp(&x),
            (None, Some(_)) => core::cmp::Ordering::Less,
            (Some(_), None) => core::cmp::Ordering::Greater,
            (None, None) => a.launch_key.cmp(&b.launch_key),
        });
        due.truncate(query.limit);
        Ok(due)
    }

    async fn select_retries(
        &self,
        query: &RetryQuery,
    ) -> Result<Vec<ProcessedOutcome>, StoreError> {
        self.check_available()?;
        let before = query.failed_before();
        let outcomes = self
            .outcomes
            .read()
            .map_err(|_| poisoned("select_retries"))?;

        let mut due: Vec<ProcessedOutcome> = outcomes
            .values()
            .filter(|o| o.webhook_status == WebhookStatus::Failed && o.processed_at <= before)
            .cloned()
            .collect();

        due.sort_by(|a, b| {
            a.processed_at
                .cmp(&b.processed_at)
                .then_with(|| a.launch_key.cmp(&b.launch_key))
        });
        due.truncate(query.limit);
        Ok(due)
    }

    async fn upsert_outcomes(&self, outcomes: &[ProcessedOutcome]) -> Result<usize, StoreError> {
        self.check_available()?;
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let mut rows = self
            .outcomes
            .write()
            .map_err(|_| poisoned("upsert_outcomes"))?;
        for o in outcomes {
            rows.insert(o.launch_key.clone(), o.clone());
        }
        Ok(outcomes.len())
    }

    async fn delete_launches(&self, keys: &[LaunchKey]) -> Result<u64, StoreError> {
        self.check_available()?;
        let mut launches = self
            .launches
            .write()
            .map_err(|_| poisoned("delete_launches"))?;
        let removed = keys.iter().filter(|k| launches.remove(*k).is_some()).count();
        Ok(removed as u64)
    }
}
