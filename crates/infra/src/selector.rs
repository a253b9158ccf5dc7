//! Work selection: which launches are due in the current cycle.
//!
//! Two sub-queries make up the due set:
//! - **new**: launches without an outcome (or with an eligible failed outcome),
//!   newest first, optionally limited to a recency window;
//! - **retries**: failed outcomes whose cooldown has elapsed, oldest failure first.
//!
//! Cooldown is evaluated against persisted `processed_at` timestamps only, so a
//! restart neither resets nor shortens it. With the retry phase disabled the
//! due set is the new query alone.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::error;

use adlaunch_core::{LaunchKey, LaunchRecord};

use crate::config::{FailedEligibility, NotifierConfig, to_chrono};
use crate::outcome_store::{NewLaunchQuery, OutcomeStore, RetryQuery};

/// Launches due in one cycle, split by how they were selected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DueWork {
    pub retries: Vec<LaunchRecord>,
    pub fresh: Vec<LaunchRecord>,
}

impl DueWork {
    pub fn is_empty(&self) -> bool {
        self.retries.is_empty() && self.fresh.is_empty()
    }
}

/// Computes the due set from the outcome store.
pub struct WorkSelector<S> {
    store: Arc<S>,
    batch_size: usize,
    cooldown: Duration,
    recent_window: Option<Duration>,
    failed_eligibility: FailedEligibility,
    retries_enabled: bool,
}

impl<S: OutcomeStore> WorkSelector<S> {
    pub fn new(config: &NotifierConfig, store: Arc<S>) -> Self {
        Self {
            store,
            batch_size: config.batch_size,
            cooldown: config.cooldown(),
            recent_window: config.recent_window.map(to_chrono),
            failed_eligibility: config.failed_eligibility,
            retries_enabled: config.retry_phase_enabled,
        }
    }

    /// New or eligible-failed launches. Empty (and logged) if the store fails.
    pub async fn select_new(&self, now: DateTime<Utc>) -> Vec<LaunchRecord> {
        let query = NewLaunchQuery {
            as_of: now,
            limit: self.batch_size,
            cooldown: self.cooldown,
            failed_eligibility: self.failed_eligibility,
            recent_window: self.recent_window,
        };
        match self.store.select_new(&query).await {
            Ok(records) => records,
            Err(e) => {
                error!(operation = "select_new", error = %e, "failed to get launches to process");
                Vec::new()
            }
        }
    }

    /// Failed launches past their cooldown. Empty (and logged) if the store fails.
    pub async fn select_retries(&self, now: DateTime<Utc>) -> Vec<LaunchRecord> {
        let query = RetryQuery {
            as_of: now,
            limit: self.batch_size,
            cooldown: self.cooldown,
        };
        match self.store.select_retries(&query).await {
            Ok(outcomes) => outcomes.iter().map(|o| o.to_launch()).collect(),
            Err(e) => {
                error!(
                    operation = "select_retries",
                    error = %e,
                    "failed to get failed launches to retry"
                );
                Vec::new()
            }
        }
    }

    /// The full due set at `now`. A key selected as a retry is not repeated in
    /// `fresh`.
    pub async fn due_set(&self, now: DateTime<Utc>) -> DueWork {
        let retries = if self.retries_enabled {
            self.select_retries(now).await
        } else {
            Vec::new()
        };
        let retry_keys: HashSet<&LaunchKey> = retries.iter().map(|r| &r.launch_key).collect();
        let fresh: Vec<LaunchRecord> = self
            .select_new(now)
            .await
            .into_iter()
            .filter(|r| !retry_keys.contains(&r.launch_key))
            .collect();
        DueWork { retries, fresh }
    }
}
