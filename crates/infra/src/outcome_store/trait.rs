use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use adlaunch_core::{EnrichedLaunch, LaunchKey, LaunchRecord, ProcessedOutcome, WebhookStatus};

use crate::config::FailedEligibility;

/// Parameters of the "new / never attempted" query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLaunchQuery {
    /// Reference instant for every time comparison in the query.
    pub as_of: DateTime<Utc>,
    pub limit: usize,
    pub cooldown: Duration,
    pub failed_eligibility: FailedEligibility,
    /// Launches created at or before `as_of - window` are ignored.
    pub recent_window: Option<Duration>,
}

impl NewLaunchQuery {
    /// Lower bound on `created_at`, when a recency window is configured.
    pub fn created_after(&self) -> Option<DateTime<Utc>> {
        self.recent_window.map(|w| cutoff(self.as_of, w))
    }

    /// Latest `processed_at` at which a failed outcome counts as eligible.
    ///
    /// `None` means any failed outcome is eligible.
    pub fn failed_before(&self) -> Option<DateTime<Utc>> {
        match self.failed_eligibility {
            FailedEligibility::AfterCooldown => Some(cutoff(self.as_of, self.cooldown)),
            FailedEligibility::Immediate => None,
        }
    }
}

/// Parameters of the "stale failed" query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryQuery {
    pub as_of: DateTime<Utc>,
    pub limit: usize,
    pub cooldown: Duration,
}

impl RetryQuery {
    pub fn failed_before(&self) -> DateTime<Utc> {
        cutoff(self.as_of, self.cooldown)
    }
}

/// `at - window`, saturating at the earliest representable instant.
pub(crate) fn cutoff(at: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    at.checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Outcome store operation error.
///
/// Always infrastructure-level (connectivity, SQL, row decoding). Callers log
/// and degrade; none of these are fatal except during schema initialisation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed in {operation}: {message}")]
    Connect {
        operation: &'static str,
        message: String,
    },

    #[error("query failed in {operation}: {message}")]
    Query {
        operation: &'static str,
        message: String,
    },

    #[error("failed to decode row in {operation}: {message}")]
    Decode {
        operation: &'static str,
        message: String,
    },

    #[error("invalid store configuration: {0}")]
    Config(String),

    #[error("store unavailable")]
    Unavailable,
}

/// Persistence for launches (read side) and their delivery outcomes.
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    /// Create the outcome table and its `processed_at` index if absent.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// Launches without an outcome, or with an eligible failed outcome.
    /// Newest first.
    async fn select_new(&self, query: &NewLaunchQuery) -> Result<Vec<LaunchRecord>, StoreError>;

    /// Failed outcomes older than the cooldown. Oldest failure first.
    async fn select_retries(&self, query: &RetryQuery)
    -> Result<Vec<ProcessedOutcome>, StoreError>;

    /// Insert-or-replace each outcome keyed on `launch_key`. Returns rows written.
    async fn upsert_outcomes(&self, outcomes: &[ProcessedOutcome]) -> Result<usize, StoreError>;

    /// Remove source launches (only used when source records are not retained).
    async fn delete_launches(&self, keys: &[LaunchKey]) -> Result<u64, StoreError>;

    /// Record one status for every attempted launch at the same instant.
    async fn record_attempts(
        &self,
        attempted: &[EnrichedLaunch],
        status: WebhookStatus,
        at: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        if attempted.is_empty() {
            return Ok(0);
        }
        let outcomes: Vec<ProcessedOutcome> = attempted
            .iter()
            .map(|l| ProcessedOutcome::record(l, status, at))
            .collect();
        self.upsert_outcomes(&outcomes).await
    }
}

#[async_trait]
impl<S> OutcomeStore for Arc<S>
where
    S: OutcomeStore + ?Sized,
{
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        (**self).ensure_schema().await
    }

    async fn select_new(&self, query: &NewLaunchQuery) -> Result<Vec<LaunchRecord>, StoreError> {
        (**self).select_new(query).await
    }

    async fn select_retries(
        &self,
        query: &RetryQuery,
    ) -> Result<Vec<ProcessedOutcome>, StoreError> {
        (**self).select_retries(query).await
    }

    async fn upsert_outcomes(&self, outcomes: &[ProcessedOutcome]) -> Result<usize, StoreError> {
        (**self).upsert_outcomes(outcomes).await
    }

    async fn delete_launches(&self, keys: &[LaunchKey]) -> Result<u64, StoreError> {
        (**self).delete_launches(keys).await
    }
}
