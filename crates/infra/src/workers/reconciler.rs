//! The reconciliation loop.
//!
//! One cycle computes the due set once, then runs `retry phase (optional) ->
//! main phase` over its two halves. Each phase resolves names one by one,
//! delivers the resolved launches as a single batch and records the batch
//! outcome. Phases are isolated: a failure or panic inside one is logged in
//! its [`PhaseReport`] and the cycle carries on.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use adlaunch_core::{CycleId, EnrichedLaunch, LaunchKey, LaunchRecord, WebhookStatus};

use crate::config::NotifierConfig;
use crate::external::{NameResolver, Resolution, WebhookSink};
use crate::outcome_store::{OutcomeStore, StoreError};
use crate::selector::{DueWork, WorkSelector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Retry,
    Main,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Retry => "retry",
            Phase::Main => "main",
        }
    }

    fn is_retry(&self) -> bool {
        matches!(self, Phase::Retry)
    }
}

/// Counters for one phase of one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    /// Launches returned by selection.
    pub selected: usize,
    /// Launches left out of the batch (no `ad_id`, or name not resolved).
    pub skipped: usize,
    /// Launches delivered in a successful batch.
    pub delivered: usize,
    /// Launches in a batch the webhook rejected.
    pub failed: usize,
    /// Outcome rows written.
    pub recorded: usize,
    /// Source rows removed (only when source records are not retained).
    pub deleted: u64,
    /// Store failure or panic that cut the phase short.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PhaseReport {
    fn aborted(reason: String) -> Self {
        Self {
            error: Some(reason),
            ..Self::default()
        }
    }
}

/// Result of one cycle, logged as a single structured line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub cycle_id: CycleId,
    pub started_at: DateTime<Utc>,
    /// `None` when the retry phase is disabled.
    pub retry: Option<PhaseReport>,
    pub main: PhaseReport,
}

/// Drives the notifier: select, resolve, deliver, record, sleep, repeat.
pub struct Reconciler<S, R, W> {
    store: Arc<S>,
    selector: WorkSelector<S>,
    resolver: R,
    sink: W,
    poll_interval: Duration,
    retry_phase_enabled: bool,
    retain_source_records: bool,
}

impl<S, R, W> Reconciler<S, R, W>
where
    S: OutcomeStore,
    R: NameResolver,
    W: WebhookSink,
{
    pub fn new(config: &NotifierConfig, store: Arc<S>, resolver: R, sink: W) -> Self {
        Self {
            selector: WorkSelector::new(config, store.clone()),
            store,
            resolver,
            sink,
            poll_interval: config.poll_interval,
            retry_phase_enabled: config.retry_phase_enabled,
            retain_source_records: config.retain_source_records,
        }
    }

    /// Create the outcome table if needed. Callers treat failure as fatal.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        self.store.ensure_schema().await?;
        info!(operation = "ensure_schema", "outcome table ready");
        Ok(())
    }

    /// Run cycles until `shutdown` resolves.
    ///
    /// The interval is measured from the end of one cycle to the start of the
    /// next. Shutdown interrupts both the sleep and an in-flight cycle; anything
    /// delivered but not yet recorded is delivered again after restart.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        info!(
            interval_secs = self.poll_interval.as_secs(),
            retry_phase = self.retry_phase_enabled,
            "reconciliation loop started"
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = self.run_cycle() => {}
            }
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("reconciliation loop stopped");
    }

    /// One cycle at the current wall-clock time.
    pub async fn run_cycle(&self) -> CycleReport {
        self.run_cycle_at(Utc::now()).await
    }

    /// One cycle as of `now`. Every outcome written in this cycle carries `now`
    /// as its `processed_at`.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> CycleReport {
        let cycle_id = CycleId::new();
        debug!(cycle_id = %cycle_id, "cycle started");

        let due = match AssertUnwindSafe(self.selector.due_set(now)).catch_unwind().await {
            Ok(due) => due,
            Err(panic) => {
                error!(
                    operation = "select_due",
                    cycle_id = %cycle_id,
                    error = %panic_message(panic.as_ref()),
                    "selection panicked; nothing due this cycle"
                );
                DueWork::default()
            }
        };
        if due.is_empty() {
            debug!(cycle_id = %cycle_id, "nothing due");
        }
        let DueWork { retries, fresh } = due;

        let retry = if self.retry_phase_enabled {
            let work = self.process(Phase::Retry, cycle_id, retries, now);
            Some(self.isolated(Phase::Retry, cycle_id, work).await)
        } else {
            None
        };

        let work = self.process(Phase::Main, cycle_id, fresh, now);
        let main = self.isolated(Phase::Main, cycle_id, work).await;

        let report = CycleReport {
            cycle_id,
            started_at: now,
            retry,
            main,
        };
        log_report(&report);
        report
    }

    /// Runs a phase, turning a panic into an aborted report.
    async fn isolated<F>(&self, phase: Phase, cycle_id: CycleId, work: F) -> PhaseReport
    where
        F: Future<Output = PhaseReport>,
    {
        match AssertUnwindSafe(work).catch_unwind().await {
            Ok(report) => report,
            Err(panic) => {
                let reason = panic_message(panic.as_ref());
                error!(
                    operation = "run_phase",
                    cycle_id = %cycle_id,
                    phase = phase.as_str(),
                    error = %reason,
                    "phase panicked; continuing"
                );
                PhaseReport::aborted(format!("panicked: {reason}"))
            }
        }
    }

    async fn process(
        &self,
        phase: Phase,
        cycle_id: CycleId,
        records: Vec<LaunchRecord>,
        now: DateTime<Utc>,
    ) -> PhaseReport {
        let mut report = PhaseReport {
            selected: records.len(),
            ..PhaseReport::default()
        };
        if records.is_empty() {
            debug!(cycle_id = %cycle_id, phase = phase.as_str(), "nothing due");
            return report;
        }

        info!(
            cycle_id = %cycle_id,
            phase = phase.as_str(),
            count = records.len(),
            "processing launches"
        );

        let batch = self.enrich(phase, cycle_id, records).await;
        report.skipped = report.selected - batch.len();
        if batch.is_empty() {
            warn!(
                cycle_id = %cycle_id,
                phase = phase.as_str(),
                "no launch could be enriched; nothing to deliver"
            );
            return report;
        }

        let delivery = self.sink.deliver(batch, phase.is_retry(), now).await;
        let status = WebhookStatus::from_delivered(delivery.delivered);
        if delivery.delivered {
            report.delivered = delivery.attempted.len();
        } else {
            report.failed = delivery.attempted.len();
            warn!(
                operation = "deliver",
                cycle_id = %cycle_id,
                phase = phase.as_str(),
                count = delivery.attempted.len(),
                error = ?delivery.error,
                "batch marked failed"
            );
        }

        match self
            .store
            .record_attempts(&delivery.attempted, status, now)
            .await
        {
            Ok(written) => report.recorded = written,
            Err(e) => {
                error!(
                    operation = "upsert_outcomes",
                    cycle_id = %cycle_id,
                    phase = phase.as_str(),
                    status = status.as_str(),
                    launch_keys = ?keys_of(&delivery.attempted),
                    error = %e,
                    "failed to record outcomes"
                );
                report.error = Some(e.to_string());
                return report;
            }
        }

        if !self.retain_source_records {
            let keys: Vec<LaunchKey> = delivery
                .attempted
                .iter()
                .map(|l| l.launch_key().clone())
                .collect();
            match self.store.delete_launches(&keys).await {
                Ok(n) => report.deleted = n,
                Err(e) => {
                    error!(
                        operation = "delete_launches",
                        cycle_id = %cycle_id,
                        phase = phase.as_str(),
                        error = %e,
                        "failed to delete processed launches"
                    );
                    report.error = Some(e.to_string());
                }
            }
        }

        report
    }

    /// Resolve names one launch at a time. Unresolved launches are dropped from
    /// the batch and keep whatever outcome they had.
    async fn enrich(
        &self,
        phase: Phase,
        cycle_id: CycleId,
        records: Vec<LaunchRecord>,
    ) -> Vec<EnrichedLaunch> {
        let mut batch = Vec::with_capacity(records.len());
        for record in records {
            let Some(ad_id) = record.resolvable_ad_id().map(str::to_owned) else {
                warn!(
                    operation = "resolve_name",
                    cycle_id = %cycle_id,
                    phase = phase.as_str(),
                    launch_key = %record.launch_key,
                    "launch has no ad_id; skipping"
                );
                continue;
            };

            match self.resolver.resolve(&ad_id).await {
                Resolution::Named(name) => {
                    debug!(
                        launch_key = %record.launch_key,
                        ad_id = %ad_id,
                        ad_name = %name,
                        "name resolved"
                    );
                    batch.push(EnrichedLaunch::new(record, name));
                }
                Resolution::NotFound => {
                    warn!(
                        operation = "resolve_name",
                        cycle_id = %cycle_id,
                        phase = phase.as_str(),
                        launch_key = %record.launch_key,
                        ad_id = %ad_id,
                        "ad not found; skipping"
                    );
                }
                Resolution::Transient(e) => {
                    warn!(
                        operation = "resolve_name",
                        cycle_id = %cycle_id,
                        phase = phase.as_str(),
                        launch_key = %record.launch_key,
                        ad_id = %ad_id,
                        error = %e,
                        "name lookup failed; skipping"
                    );
                }
            }
        }
        batch
    }
}

fn keys_of(launches: &[EnrichedLaunch]) -> Vec<&str> {
    launches.iter().map(|l| l.launch_key().as_str()).collect()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn log_report(report: &CycleReport) {
    let retry = report.retry.clone().unwrap_or_default();
    info!(
        cycle_id = %report.cycle_id,
        retry_enabled = report.retry.is_some(),
        retry_selected = retry.selected,
        retry_delivered = retry.delivered,
        retry_failed = retry.failed,
        main_selected = report.main.selected,
        main_skipped = report.main.skipped,
        main_delivered = report.main.delivered,
        main_failed = report.main.failed,
        recorded = retry.recorded + report.main.recorded,
        deleted = retry.deleted + report.main.deleted,
        "cycle complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FailedEligibility;
    use crate::external::{DeliveryError, ResolveError, WebhookPayload};
    use crate::outcome_store::InMemoryOutcomeStore;
    use adlaunch_core::AdName;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn t(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap() + ChronoDuration::minutes(min)
    }

    fn key(s: &str) -> LaunchKey {
        LaunchKey::new(s).unwrap()
    }

    fn config() -> NotifierConfig {
        NotifierConfig::new("postgres://x", "https://hook.example.com", "token")
    }

    fn seed(store: &InMemoryOutcomeStore, k: &str, ad_id: &str) {
        store.insert_launch(
            LaunchRecord::new(key(k))
                .with_ad_id(ad_id)
                .with_adset_id("as-1")
                .with_campaign_id("c-1")
                .with_created_at(t(-1)),
        );
    }

    /// Resolves from a fixed table; unknown ids are transient failures.
    #[derive(Clone, Default)]
    struct FakeResolver {
        names: Arc<Mutex<HashMap<String, Resolution>>>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl FakeResolver {
        fn with(self, ad_id: &str, resolution: Resolution) -> Self {
            self.names
                .lock()
                .unwrap()
                .insert(ad_id.to_string(), resolution);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NameResolver for FakeResolver {
        async fn resolve(&self, ad_id: &str) -> Resolution {
            self.calls.lock().unwrap().push(ad_id.to_string());
            self.names
                .lock()
                .unwrap()
                .get(ad_id)
                .cloned()
                .unwrap_or(Resolution::Transient(ResolveError::Transport(
                    "connection refused".to_string(),
                )))
        }
    }

    struct PanickingResolver;

    #[async_trait]
    impl NameResolver for PanickingResolver {
        async fn resolve(&self, _ad_id: &str) -> Resolution {
            panic!("resolver exploded")
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink {
        payloads: Arc<Mutex<Vec<WebhookPayload>>>,
        failing: Arc<AtomicBool>,
    }

    impl RecordingSink {
        fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        fn payloads(&self) -> Vec<WebhookPayload> {
            self.payloads.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WebhookSink for RecordingSink {
        async fn send(&self, payload: &WebhookPayload) -> Result<(), DeliveryError> {
            self.payloads.lock().unwrap().push(payload.clone());
            if self.failing.load(Ordering::SeqCst) {
                Err(DeliveryError::Status {
                    status: 500,
                    body: "boom".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn named(s: &str) -> Resolution {
        Resolution::Named(AdName::new(s))
    }

    #[tokio::test]
    async fn resolved_and_delivered_launch_is_recorded_as_success() {
        let store = Arc::new(InMemoryOutcomeStore::new());
        seed(&store, "a", "ad-1");
        let resolver = FakeResolver::default().with("ad-1", named("X"));
        let sink = RecordingSink::default();
        let reconciler = Reconciler::new(&config(), store.clone(), resolver, sink.clone());

        let report = reconciler.run_cycle_at(t(0)).await;

        assert_eq!(report.main.selected, 1);
        assert_eq!(report.main.delivered, 1);
        assert_eq!(report.main.recorded, 1);

        let outcome = store.outcome(&key("a")).unwrap();
        assert_eq!(outcome.webhook_status, WebhookStatus::Success);
        assert_eq!(outcome.ad_name.as_deref(), Some("X"));
        assert_eq!(outcome.processed_at, t(0));

        let payloads = sink.payloads();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].count, 1);
        assert_eq!(payloads[0].retry, None);
        assert_eq!(payloads[0].ads[0].ad_name, "X");

        // Delivered launches are not sent again.
        let again = reconciler.run_cycle_at(t(60)).await;
        assert_eq!(again.main.selected, 0);
        assert_eq!(sink.payloads().len(), 1);
    }

    #[tokio::test]
    async fn payload_uses_clean_name_and_outcome_keeps_full_name() {
        let store = Arc::new(InMemoryOutcomeStore::new());
        seed(&store, "a", "ad-1");
        let full = "3815_0_Rosa Glanz // Video // Mehr dazu // LP260";
        let resolver = FakeResolver::default().with("ad-1", named(full));
        let sink = RecordingSink::default();
        let reconciler = Reconciler::new(&config(), store.clone(), resolver, sink.clone());

        reconciler.run_cycle_at(t(0)).await;

        assert_eq!(sink.payloads()[0].ads[0].ad_name, "3815_0_Rosa Glanz");
        assert_eq!(store.outcome(&key("a")).unwrap().ad_name.as_deref(), Some(full));
    }

    #[tokio::test]
    async fn failed_delivery_is_retried_only_after_cooldown() {
        let store = Arc::new(InMemoryOutcomeStore::new());
        seed(&store, "a", "ad-1");
        let resolver = FakeResolver::default().with("ad-1", named("X"));
        let sink = RecordingSink::default();
        sink.set_failing(true);
        let reconciler = Reconciler::new(&config(), store.clone(), resolver, sink.clone());

        let first = reconciler.run_cycle_at(t(0)).await;
        assert_eq!(first.main.failed, 1);
        assert_eq!(
            store.outcome(&key("a")).unwrap().webhook_status,
            WebhookStatus::Failed
        );

        // Within the five minute cooldown nothing is selected.
        let early = reconciler.run_cycle_at(t(4)).await;
        assert_eq!(early.retry.as_ref().unwrap().selected, 0);
        assert_eq!(early.main.selected, 0);
        assert_eq!(sink.payloads().len(), 1);

        sink.set_failing(false);
        let late = reconciler.run_cycle_at(t(5)).await;
        let retry = late.retry.unwrap();
        assert_eq!(retry.selected, 1);
        assert_eq!(retry.delivered, 1);
        assert_eq!(late.main.selected, 0);

        let payloads = sink.payloads();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[1].retry, Some(true));
        assert_eq!(
            store.outcome(&key("a")).unwrap().webhook_status,
            WebhookStatus::Success
        );
    }

    #[tokio::test]
    async fn immediate_eligibility_does_not_send_a_retry_twice_in_one_cycle() {
        let store = Arc::new(InMemoryOutcomeStore::new());
        seed(&store, "a", "ad-1");
        let resolver = FakeResolver::default().with("ad-1", named("X"));
        let sink = RecordingSink::default();
        sink.set_failing(true);
        let config = config().with_failed_eligibility(FailedEligibility::Immediate);
        let reconciler = Reconciler::new(&config, store.clone(), resolver, sink.clone());

        reconciler.run_cycle_at(t(0)).await;
        let report = reconciler.run_cycle_at(t(10)).await;

        assert_eq!(report.retry.unwrap().selected, 1);
        assert_eq!(report.main.selected, 0);
        assert_eq!(sink.payloads().len(), 2);
    }

    #[tokio::test]
    async fn unresolved_launch_is_neither_delivered_nor_recorded() {
        let store = Arc::new(InMemoryOutcomeStore::new());
        seed(&store, "a", "ad-1");
        let resolver = FakeResolver::default();
        let sink = RecordingSink::default();
        let reconciler =
            Reconciler::new(&config(), store.clone(), resolver.clone(), sink.clone());

        let report = reconciler.run_cycle_at(t(0)).await;

        assert_eq!(report.main.selected, 1);
        assert_eq!(report.main.skipped, 1);
        assert!(sink.payloads().is_empty());
        assert_eq!(store.upsert_calls(), 0);
        assert!(store.outcome(&key("a")).is_none());

        // Still eligible on the very next cycle, without cooldown.
        reconciler.run_cycle_at(t(1)).await;
        assert_eq!(resolver.calls(), vec!["ad-1".to_string(), "ad-1".to_string()]);
    }

    #[tokio::test]
    async fn partial_resolution_delivers_only_resolved_launches() {
        let store = Arc::new(InMemoryOutcomeStore::new());
        seed(&store, "a", "ad-1");
        seed(&store, "b", "ad-2");
        seed(&store, "c", "ad-3");
        store.insert_launch(LaunchRecord::new(key("no-ad")).with_created_at(t(-1)));
        let resolver = FakeResolver::default()
            .with("ad-1", named("One"))
            .with("ad-2", Resolution::NotFound);
        let sink = RecordingSink::default();
        let reconciler =
            Reconciler::new(&config(), store.clone(), resolver.clone(), sink.clone());

        let report = reconciler.run_cycle_at(t(0)).await;

        assert_eq!(report.main.selected, 4);
        assert_eq!(report.main.skipped, 3);
        assert_eq!(report.main.delivered, 1);
        assert_eq!(resolver.calls().len(), 3, "launch without ad_id is never looked up");
        assert!(store.outcome(&key("a")).is_some());
        assert!(store.outcome(&key("b")).is_none());
        assert!(store.outcome(&key("c")).is_none());
        assert!(store.outcome(&key("no-ad")).is_none());
    }

    #[tokio::test]
    async fn empty_due_set_makes_no_calls() {
        let store = Arc::new(InMemoryOutcomeStore::new());
        let resolver = FakeResolver::default();
        let sink = RecordingSink::default();
        let reconciler =
            Reconciler::new(&config(), store.clone(), resolver.clone(), sink.clone());

        let report = reconciler.run_cycle_at(t(0)).await;

        assert_eq!(report.main, PhaseReport::default());
        assert_eq!(report.retry, Some(PhaseReport::default()));
        assert!(resolver.calls().is_empty());
        assert!(sink.payloads().is_empty());
        assert_eq!(store.upsert_calls(), 0);
    }

    #[tokio::test]
    async fn disabled_retry_phase_reports_none() {
        let store = Arc::new(InMemoryOutcomeStore::new());
        let reconciler = Reconciler::new(
            &config().with_retry_phase(false),
            store,
            FakeResolver::default(),
            RecordingSink::default(),
        );

        assert!(reconciler.run_cycle_at(t(0)).await.retry.is_none());
    }

    #[tokio::test]
    async fn disabled_retry_phase_redelivers_failures_through_main() {
        let store = Arc::new(InMemoryOutcomeStore::new());
        seed(&store, "a", "ad-1");
        let resolver = FakeResolver::default().with("ad-1", named("X"));
        let sink = RecordingSink::default();
        sink.set_failing(true);
        let config = config().with_retry_phase(false);
        let reconciler = Reconciler::new(&config, store.clone(), resolver, sink.clone());

        reconciler.run_cycle_at(t(0)).await;
        sink.set_failing(false);
        let report = reconciler.run_cycle_at(t(5)).await;

        assert!(report.retry.is_none());
        assert_eq!(report.main.selected, 1);
        assert_eq!(report.main.delivered, 1);
        let payloads = sink.payloads();
        assert_eq!(payloads.len(), 2);
        assert!(payloads[1].retry.is_none());
    }

    #[tokio::test]
    async fn non_retained_launches_are_deleted_but_failures_still_retry() {
        let store = Arc::new(InMemoryOutcomeStore::new());
        seed(&store, "ok", "ad-ok");
        seed(&store, "bad", "ad-bad");
        let resolver = FakeResolver::default()
            .with("ad-ok", named("Ok"))
            .with("ad-bad", named("Bad"));
        let sink = RecordingSink::default();
        let config = config().with_retain_source_records(false);
        let reconciler = Reconciler::new(&config, store.clone(), resolver, sink.clone());

        sink.set_failing(true);
        let first = reconciler.run_cycle_at(t(0)).await;
        assert_eq!(first.main.deleted, 2);
        assert!(store.launch(&key("ok")).is_none());
        assert!(store.launch(&key("bad")).is_none());

        sink.set_failing(false);
        let retry = reconciler.run_cycle_at(t(5)).await.retry.unwrap();
        assert_eq!(retry.selected, 2);
        assert_eq!(retry.delivered, 2);
        assert_eq!(
            store.outcome(&key("bad")).unwrap().webhook_status,
            WebhookStatus::Success
        );
    }

    #[tokio::test]
    async fn store_outage_does_not_abort_the_cycle() {
        let store = Arc::new(InMemoryOutcomeStore::new());
        seed(&store, "a", "ad-1");
        store.set_unavailable(true);
        let resolver = FakeResolver::default().with("ad-1", named("X"));
        let sink = RecordingSink::default();
        let reconciler = Reconciler::new(&config(), store.clone(), resolver, sink.clone());

        let report = reconciler.run_cycle_at(t(0)).await;
        assert_eq!(report.main.selected, 0);
        assert!(sink.payloads().is_empty());

        store.set_unavailable(false);
        let report = reconciler.run_cycle_at(t(1)).await;
        assert_eq!(report.main.delivered, 1);
    }

    #[tokio::test]
    async fn panicking_phase_is_contained() {
        let store = Arc::new(InMemoryOutcomeStore::new());
        seed(&store, "a", "ad-1");
        let reconciler = Reconciler::new(
            &config(),
            store.clone(),
            PanickingResolver,
            RecordingSink::default(),
        );

        let report = reconciler.run_cycle_at(t(0)).await;

        let error = report.main.error.unwrap();
        assert!(error.contains("resolver exploded"), "{error}");
        assert!(store.outcome(&key("a")).is_none());
    }

    #[tokio::test]
    async fn ensure_schema_goes_through_the_store() {
        let store = Arc::new(InMemoryOutcomeStore::new());
        let reconciler = Reconciler::new(
            &config(),
            store.clone(),
            FakeResolver::default(),
            RecordingSink::default(),
        );

        reconciler.ensure_schema().await.unwrap();
        assert!(store.schema_ready());

        store.set_unavailable(true);
        assert!(reconciler.ensure_schema().await.is_err());
    }

    #[tokio::test]
    async fn run_until_stops_promptly_on_shutdown() {
        let store = Arc::new(InMemoryOutcomeStore::new());
        seed(&store, "a", "ad-1");
        let resolver = FakeResolver::default().with("ad-1", named("X"));
        let sink = RecordingSink::default();
        let config = config().with_poll_interval(Duration::from_secs(3600));
        let reconciler = Reconciler::new(&config, store.clone(), resolver, sink.clone());

        let shutdown = tokio::time::sleep(Duration::from_millis(100));
        tokio::time::timeout(Duration::from_secs(5), reconciler.run_until(shutdown))
            .await
            .expect("loop should stop well before the poll interval");

        assert_eq!(sink.payloads().len(), 1);
        assert!(store.outcome(&key("a")).is_some());
    }
}
