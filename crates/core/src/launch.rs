//! Launch records and their enriched, deliverable form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::LaunchKey;
use crate::name::AdName;

/// One ad creative pending notification, as read from the source table.
///
/// Platform identifiers are optional: the upstream producer may create a launch
/// before every id is known. `created_at` is absent when the record was
/// reconstructed from an outcome row (retry path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchRecord {
    pub launch_key: LaunchKey,
    pub campaign_id: Option<String>,
    pub adset_id: Option<String>,
    pub creative_id: Option<String>,
    pub ad_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl LaunchRecord {
    pub fn new(launch_key: LaunchKey) -> Self {
        Self {
            launch_key,
            campaign_id: None,
            adset_id: None,
            creative_id: None,
            ad_id: None,
            created_at: None,
        }
    }

    pub fn with_ad_id(mut self, ad_id: impl Into<String>) -> Self {
        self.ad_id = Some(ad_id.into());
        self
    }

    pub fn with_adset_id(mut self, adset_id: impl Into<String>) -> Self {
        self.adset_id = Some(adset_id.into());
        self
    }

    pub fn with_campaign_id(mut self, campaign_id: impl Into<String>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self
    }

    pub fn with_creative_id(mut self, creative_id: impl Into<String>) -> Self {
        self.creative_id = Some(creative_id.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// The ad id to resolve a name for, ignoring blank values.
    pub fn resolvable_ad_id(&self) -> Option<&str> {
        self.ad_id.as_deref().filter(|id| !id.trim().is_empty())
    }
}

/// A launch whose display name has been resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichedLaunch {
    pub record: LaunchRecord,
    pub ad_name: AdName,
}

impl EnrichedLaunch {
    pub fn new(record: LaunchRecord, ad_name: AdName) -> Self {
        Self { record, ad_name }
    }

    pub fn launch_key(&self) -> &LaunchKey {
        &self.record.launch_key
    }

    /// Wire form sent downstream (clean name, no launch key).
    pub fn descriptor(&self) -> AdDescriptor {
        AdDescriptor {
            ad_name: self.ad_name.clean().to_string(),
            ad_id: self.record.ad_id.clone(),
            adset_id: self.record.adset_id.clone(),
            campaign_id: self.record.campaign_id.clone(),
        }
    }
}

/// One entry of the `ads` array in a webhook batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdDescriptor {
    pub ad_name: String,
    pub ad_id: Option<String>,
    pub adset_id: Option<String>,
    pub campaign_id: Option<String>,
}
