//! Infrastructure layer: config, outcome store, external services, workers.

pub mod config;
pub mod external;
pub mod outcome_store;
pub mod selector;
pub mod workers;

pub use config::{ConfigError, FailedEligibility, NotifierConfig, TableName};
pub use external::{
    DeliveryError, DeliveryReport, GraphNameResolver, HttpWebhookSink, NameResolver, Resolution,
    ResolveError, WebhookPayload, WebhookSink,
};
pub use outcome_store::{
    InMemoryOutcomeStore, NewLaunchQuery, OutcomeStore, PostgresOutcomeStore, RetryQuery,
    StoreError,
};
pub use selector::{DueWork, WorkSelector};
pub use workers::{CycleReport, Phase, PhaseReport, Reconciler};
