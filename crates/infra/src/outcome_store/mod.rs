//! Outcome store boundary.
//!
//! Persists one delivery outcome per launch and answers the two time-windowed
//! queries the work selector needs. Writes are upserts keyed on `launch_key`, so
//! recording the same attempt twice converges to one row.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryOutcomeStore;
pub use postgres::PostgresOutcomeStore;
pub use r#trait::{NewLaunchQuery, OutcomeStore, RetryQuery, StoreError};
