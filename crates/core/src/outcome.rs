//! Persisted delivery outcomes.

use core::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::LaunchKey;
use crate::launch::{EnrichedLaunch, LaunchRecord};

/// Result of the last webhook attempt for a launch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookStatus {
    Success,
    Failed,
}

impl WebhookStatus {
    pub fn from_delivered(delivered: bool) -> Self {
        if delivered { Self::Success } else { Self::Failed }
    }

    /// Column value in the outcome table.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl core::fmt::Display for WebhookStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WebhookStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

/// Current delivery state of one launch. Exactly one per `launch_key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedOutcome {
    pub launch_key: LaunchKey,
    pub processed_at: DateTime<Utc>,
    pub campaign_id: Option<String>,
    pub adset_id: Option<String>,
    pub creative_id: Option<String>,
    pub ad_id: Option<String>,
    /// Full (uncleaned) name.
    pub ad_name: Option<String>,
    pub webhook_status: WebhookStatus,
}

impl ProcessedOutcome {
    /// Outcome row for an attempted launch.
    pub fn record(launch: &EnrichedLaunch, status: WebhookStatus, at: DateTime<Utc>) -> Self {
        let r = &launch.record;
        Self {
            launch_key: r.launch_key.clone(),
            processed_at: at,
            campaign_id: r.campaign_id.clone(),
            adset_id: r.adset_id.clone(),
            creative_id: r.creative_id.clone(),
            ad_id: r.ad_id.clone(),
            ad_name: Some(launch.ad_name.full().to_string()),
            webhook_status: status,
        }
    }

    /// A failed outcome is due for retry once `cooldown` has fully elapsed.
    pub fn is_retry_due(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        self.webhook_status == WebhookStatus::Failed
            && now
                .checked_sub_signed(cooldown)
                .is_some_and(|cutoff| self.processed_at <= cutoff)
    }

    /// Rebuild the launch this outcome was recorded for (retry path).
    pub fn to_launch(&self) -> LaunchRecord {
        LaunchRecord {
            launch_key: self.launch_key.clone(),
            campaign_id: self.campaign_id.clone(),
            adset_id: self.adset_id.clone(),
            creative_id: self.creative_id.clone(),
            ad_id: self.ad_id.clone(),
            created_at: None,
        }
    }
}
