//! `adlaunch-core`: domain building blocks for the launch notifier.
//!
//! This crate contains **pure domain** types (no I/O, no infrastructure concerns):
//! launches as read from the source table, their enriched form, and the persisted
//! delivery outcome.

pub mod error;
pub mod id;
pub mod launch;
pub mod name;
pub mod outcome;

pub use error::DomainError;
pub use id::{CycleId, LaunchKey};
pub use launch::{AdDescriptor, EnrichedLaunch, LaunchRecord};
pub use name::{AdName, NAME_DELIMITER};
pub use outcome::{ProcessedOutcome, WebhookStatus};
