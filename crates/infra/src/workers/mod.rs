//! Background workers.

pub mod reconciler;

pub use reconciler::{CycleReport, Phase, PhaseReport, Reconciler};
