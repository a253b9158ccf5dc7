//! Ad display names as returned by the ads platform.

use serde::{Deserialize, Serialize};

/// Separator after which a platform name carries creative metadata
/// (format, call to action, landing page) that downstream matching ignores.
pub const NAME_DELIMITER: &str = " //";

/// Display name of an ad, in the untruncated form the platform returned.
///
/// The full form is what gets persisted; [`AdName::clean`] is what gets sent
/// downstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdName(String);

impl AdName {
    pub fn new(full: impl Into<String>) -> Self {
        Self(full.into())
    }

    /// The name exactly as resolved.
    pub fn full(&self) -> &str {
        &self.0
    }

    /// The portion before the first [`NAME_DELIMITER`], trimmed.
    ///
    /// Names without the delimiter are returned unchanged (not trimmed).
    pub fn clean(&self) -> &str {
        match self.0.find(NAME_DELIMITER) {
            Some(idx) => self.0[..idx].trim(),
            None => &self.0,
        }
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl core::fmt::Display for AdName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for AdName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for AdName {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}
