//! Command-line flags with environment fallbacks.

use std::time::Duration;

use clap::{ArgAction, Parser};
use clap::builder::BoolishValueParser;

use adlaunch_infra::config::{DEFAULT_GRAPH_BASE_URL, DEFAULT_PROCESSED_TABLE, DEFAULT_SOURCE_TABLE};
use adlaunch_infra::{ConfigError, FailedEligibility, NotifierConfig, TableName};
use adlaunch_observability::LogFormat;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "adlaunch-notifier",
    version,
    about = "Delivers newly created ad launches to a webhook, with names from the ads platform"
)]
pub struct Cli {
    /// Postgres connection string.
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    /// Webhook receiving launch batches.
    #[arg(long, env = "MAKE_WEBHOOK_URL", hide_env_values = true)]
    pub webhook_url: Option<String>,

    /// Ads platform access token.
    #[arg(long, env = "META_ACCESS_TOKEN", hide_env_values = true)]
    pub meta_access_token: Option<String>,

    #[arg(long, env = "POLL_INTERVAL_SECONDS", default_value_t = 60)]
    pub poll_interval_seconds: u64,

    /// Maximum launches per phase.
    #[arg(long, env = "BATCH_SIZE", default_value_t = 100)]
    pub batch_size: usize,

    /// Cooldown before a failed launch is retried.
    #[arg(long, env = "RETRY_FAILED_AFTER_MINUTES", default_value_t = 5)]
    pub retry_failed_after_minutes: u64,

    /// Only launches created within this many minutes count as new. Empty means no limit.
    #[arg(long, env = "RECENT_WINDOW_MINUTES")]
    pub recent_window_minutes: Option<String>,

    /// Keep source rows after their outcome is recorded.
    #[arg(
        long,
        env = "RETAIN_SOURCE_RECORDS",
        default_value = "true",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub retain_source_records: bool,

    #[arg(
        long,
        env = "RETRY_PHASE_ENABLED",
        default_value = "true",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new()
    )]
    pub retry_phase_enabled: bool,

    /// `after-cooldown` or `immediate`.
    #[arg(long, env = "FAILED_ELIGIBILITY", default_value = "after-cooldown")]
    pub failed_eligibility: FailedEligibility,

    #[arg(long, env = "META_GRAPH_BASE_URL", default_value = DEFAULT_GRAPH_BASE_URL)]
    pub graph_base_url: String,

    #[arg(long, env = "SOURCE_TABLE", default_value = DEFAULT_SOURCE_TABLE)]
    pub source_table: String,

    #[arg(long, env = "PROCESSED_TABLE", default_value = DEFAULT_PROCESSED_TABLE)]
    pub processed_table: String,

    /// `json` or `text`.
    #[arg(long, env = "LOG_FORMAT", default_value = "json")]
    pub log_format: LogFormat,
}

impl Cli {
    /// Build and validate the effective configuration.
    pub fn into_config(self) -> Result<NotifierConfig, ConfigError> {
        let recent_window = parse_recent_window(self.recent_window_minutes.as_deref())?;
        let source = TableName::parse("SOURCE_TABLE", &self.source_table)?;
        let processed = TableName::parse("PROCESSED_TABLE", &self.processed_table)?;

        let config = NotifierConfig::new(
            self.database_url.unwrap_or_default(),
            self.webhook_url.unwrap_or_default(),
            self.meta_access_token.unwrap_or_default(),
        )
        .with_graph_base_url(self.graph_base_url)
        .with_poll_interval(Duration::from_secs(self.poll_interval_seconds))
        .with_batch_size(self.batch_size)
        .with_retry_cooldown(minutes(self.retry_failed_after_minutes))
        .with_recent_window(recent_window)
        .with_failed_eligibility(self.failed_eligibility)
        .with_retry_phase(self.retry_phase_enabled)
        .with_retain_source_records(self.retain_source_records)
        .with_tables(source, processed);

        config.validate()?;
        Ok(config)
    }
}

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m.saturating_mul(60))
}

fn parse_recent_window(raw: Option<&str>) -> Result<Option<Duration>, ConfigError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => v
            .parse::<u64>()
            .map(|m| Some(minutes(m)))
            .map_err(|e| ConfigError::invalid("RECENT_WINDOW_MINUTES", e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 7] = [
        "adlaunch-notifier",
        "--database-url",
        "postgres://user:pw@db/ads",
        "--webhook-url",
        "https://hook.example.com/abc",
        "--meta-access-token",
        "EAAB-token-value-1234567890",
    ];

    fn parse(extra: &[&str]) -> Cli {
        let args: Vec<&str> = REQUIRED.iter().copied().chain(extra.iter().copied()).collect();
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "--poll-interval-seconds",
            "15",
            "--batch-size",
            "25",
            "--retry-failed-after-minutes",
            "10",
            "--recent-window-minutes",
            "30",
            "--retain-source-records",
            "false",
            "--retry-phase-enabled",
            "no",
            "--failed-eligibility",
            "immediate",
            "--source-table",
            "ads.launches",
            "--processed-table",
            "ads.launches_done",
        ])
        .into_config()
        .unwrap();

        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.retry_cooldown, Duration::from_secs(600));
        assert_eq!(config.recent_window, Some(Duration::from_secs(1800)));
        assert!(!config.retain_source_records);
        assert!(!config.retry_phase_enabled);
        assert_eq!(config.failed_eligibility, FailedEligibility::Immediate);
        assert_eq!(config.source_table.as_str(), "ads.launches");
        assert_eq!(config.processed_table.as_str(), "ads.launches_done");
    }

    #[test]
    fn empty_recent_window_means_unset() {
        let config = parse(&["--recent-window-minutes", ""]).into_config().unwrap();
        assert_eq!(config.recent_window, None);
    }

    #[test]
    fn non_numeric_recent_window_is_rejected() {
        let err = parse(&["--recent-window-minutes", "soon"])
            .into_config()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "RECENT_WINDOW_MINUTES",
                ..
            }
        ));
    }

    #[test]
    fn zero_batch_size_is_a_config_error() {
        let err = parse(&["--batch-size", "0"]).into_config().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "BATCH_SIZE", .. }));
    }

    #[test]
    fn unsafe_table_name_is_rejected() {
        let err = parse(&["--source-table", "launches; drop table x"])
            .into_config()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "SOURCE_TABLE", .. }));
    }

    #[test]
    fn unknown_eligibility_fails_parsing() {
        let args: Vec<&str> = REQUIRED
            .iter()
            .copied()
            .chain(["--failed-eligibility", "sometimes"])
            .collect();
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn log_format_accepts_text() {
        assert_eq!(parse(&["--log-format", "text"]).log_format, LogFormat::Text);
    }
}
