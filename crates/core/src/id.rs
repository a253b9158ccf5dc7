//! Strongly-typed identifiers.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Stable unique identifier of a launch (primary key in both tables).
///
/// Keys are produced upstream and treated as opaque text; the only rule enforced
/// here is that a key is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LaunchKey(String);

impl LaunchKey {
    /// Build a key, rejecting empty or whitespace-only input.
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::invalid_id("LaunchKey: empty"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl core::fmt::Display for LaunchKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LaunchKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for LaunchKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of one reconciliation cycle, attached to every log line of the cycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CycleId(Uuid);

impl CycleId {
    /// Uses UUIDv7 so cycle ids sort by start time in log tooling.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for CycleId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for CycleId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}
