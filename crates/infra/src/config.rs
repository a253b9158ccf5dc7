//! Notifier configuration.
//!
//! Built once at startup (from flags/environment in the binary) and passed by
//! reference into every component constructor. Nothing reads the environment
//! after this point.

use core::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Graph API root used when no override is configured.
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.facebook.com/v21.0";
pub const DEFAULT_SOURCE_TABLE: &str = "launches_v2";
pub const DEFAULT_PROCESSED_TABLE: &str = "launches_v2_processed";
/// Largest accepted `BATCH_SIZE`; one batch is one webhook payload.
pub const MAX_BATCH_SIZE: usize = 10_000;

/// Configuration error (fatal at startup).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{0} not set")]
    Missing(&'static str),

    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl ConfigError {
    pub fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// When a `failed` outcome becomes eligible again in the new-launch query.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum FailedEligibility {
    /// Only once the retry cooldown has elapsed since the failed attempt.
    #[default]
    AfterCooldown,
    /// On the very next cycle, regardless of cooldown.
    Immediate,
}

impl FromStr for FailedEligibility {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "after-cooldown" | "after_cooldown" | "cooldown" => Ok(Self::AfterCooldown),
            "immediate" => Ok(Self::Immediate),
            other => Err(ConfigError::invalid(
                "FAILED_ELIGIBILITY",
                format!("'{other}' (expected 'after-cooldown' or 'immediate')"),
            )),
        }
    }
}

/// A table name that is safe to interpolate into SQL.
///
/// Accepts `name` or `schema.name`, each part matching `[A-Za-z_][A-Za-z0-9_]*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableName(String);

impl TableName {
    pub fn parse(key: &'static str, raw: &str) -> Result<Self, ConfigError> {
        let raw = raw.trim();
        let parts: Vec<&str> = raw.split('.').collect();
        if parts.is_empty() || parts.len() > 2 || !parts.iter().all(|p| is_identifier(p)) {
            return Err(ConfigError::invalid(key, format!("'{raw}' is not a plain table name")));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for TableName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Effective notifier configuration.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub database_url: String,
    pub webhook_url: String,
    pub meta_access_token: String,
    pub graph_base_url: String,

    /// Pause between the end of one cycle and the start of the next.
    pub poll_interval: Duration,
    /// Upper bound on records per phase.
    pub batch_size: usize,
    /// Minimum age of a failed outcome before it is retried.
    pub retry_cooldown: Duration,
    /// When set, only launches created within this window count as new.
    pub recent_window: Option<Duration>,

    pub failed_eligibility: FailedEligibility,
    pub retry_phase_enabled: bool,
    /// `false` deletes source records once their outcome is recorded.
    pub retain_source_records: bool,

    pub source_table: TableName,
    pub processed_table: TableName,
}

impl NotifierConfig {
    /// Configuration with the three mandatory values and defaults for the rest.
    pub fn new(
        database_url: impl Into<String>,
        webhook_url: impl Into<String>,
        meta_access_token: impl Into<String>,
    ) -> Self {
        Self {
            database_url: database_url.into(),
            webhook_url: webhook_url.into(),
            meta_access_token: meta_access_token.into(),
            graph_base_url: DEFAULT_GRAPH_BASE_URL.to_string(),
            poll_interval: Duration::from_secs(60),
            batch_size: 100,
            retry_cooldown: Duration::from_secs(5 * 60),
            recent_window: None,
            failed_eligibility: FailedEligibility::default(),
            retry_phase_enabled: true,
            retain_source_records: true,
            source_table: TableName(DEFAULT_SOURCE_TABLE.to_string()),
            processed_table: TableName(DEFAULT_PROCESSED_TABLE.to_string()),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_retry_cooldown(mut self, cooldown: Duration) -> Self {
        self.retry_cooldown = cooldown;
        self
    }

    pub fn with_recent_window(mut self, window: Option<Duration>) -> Self {
        self.recent_window = window;
        self
    }

    pub fn with_failed_eligibility(mut self, eligibility: FailedEligibility) -> Self {
        self.failed_eligibility = eligibility;
        self
    }

    pub fn with_retry_phase(mut self, enabled: bool) -> Self {
        self.retry_phase_enabled = enabled;
        self
    }

    pub fn with_retain_source_records(mut self, retain: bool) -> Self {
        self.retain_source_records = retain;
        self
    }

    pub fn with_graph_base_url(mut self, url: impl Into<String>) -> Self {
        self.graph_base_url = url.into();
        self
    }

    pub fn with_tables(mut self, source: TableName, processed: TableName) -> Self {
        self.source_table = source;
        self.processed_table = processed;
        self
    }

    /// Check the invariants the rest of the process relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }
        if self.webhook_url.trim().is_empty() {
            return Err(ConfigError::Missing("MAKE_WEBHOOK_URL"));
        }
        if self.meta_access_token.trim().is_empty() {
            return Err(ConfigError::Missing("META_ACCESS_TOKEN"));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("BATCH_SIZE", "must be at least 1"));
        }
        if self.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::invalid(
                "BATCH_SIZE",
                format!("must be at most {MAX_BATCH_SIZE}"),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::invalid(
                "POLL_INTERVAL_SECONDS",
                "must be at least 1",
            ));
        }
        if matches!(self.recent_window, Some(w) if w.is_zero()) {
            return Err(ConfigError::invalid(
                "RECENT_WINDOW_MINUTES",
                "must be at least 1 when set",
            ));
        }
        if self.source_table == self.processed_table {
            return Err(ConfigError::invalid(
                "PROCESSED_TABLE",
                "must differ from SOURCE_TABLE",
            ));
        }
        reqwest::Url::parse(&self.webhook_url)
            .map_err(|e| ConfigError::invalid("MAKE_WEBHOOK_URL", e.to_string()))?;
        reqwest::Url::parse(&self.graph_base_url)
            .map_err(|e| ConfigError::invalid("META_GRAPH_BASE_URL", e.to_string()))?;
        Ok(())
    }

    /// Cooldown as a timestamp offset.
    pub fn cooldown(&self) -> chrono::Duration {
        to_chrono(self.retry_cooldown)
    }

    pub fn recent_window_offset(&self) -> Option<chrono::Duration> {
        self.recent_window.map(to_chrono)
    }

    /// Token with everything but the last 12 characters masked, for startup logs.
    pub fn redacted_token(&self) -> String {
        let chars: Vec<char> = self.meta_access_token.chars().collect();
        let tail: String = chars[chars.len().saturating_sub(12)..].iter().collect();
        format!("{}{}", "*".repeat(20), tail)
    }

    /// First 50 characters of the webhook URL, for startup logs.
    pub fn webhook_url_preview(&self) -> String {
        let preview: String = self.webhook_url.chars().take(50).collect();
        if preview.len() < self.webhook_url.len() {
            format!("{preview}...")
        } else {
            preview
        }
    }
}

pub(crate) fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::MAX)
}
