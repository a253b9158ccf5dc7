//! Batch delivery to the notification webhook.
//!
//! One POST per batch. The sink acknowledges atomically, so the whole batch is
//! either delivered or failed; there is no per-record result.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use adlaunch_core::{AdDescriptor, EnrichedLaunch};

use super::truncate_body;
use crate::config::NotifierConfig;

pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// JSON document posted to the webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub timestamp: DateTime<Utc>,
    pub count: usize,
    pub ads: Vec<AdDescriptor>,
    /// Present (and `true`) only for retry batches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<bool>,
}

impl WebhookPayload {
    pub fn for_batch(batch: &[EnrichedLaunch], retry: bool, timestamp: DateTime<Utc>) -> Self {
        let ads: Vec<AdDescriptor> = batch.iter().map(EnrichedLaunch::descriptor).collect();
        Self {
            timestamp,
            count: ads.len(),
            ads,
            retry: retry.then_some(true),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    #[error("webhook returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("webhook transport error: {0}")]
    Transport(String),

    #[error("invalid webhook configuration: {0}")]
    Config(String),
}

/// Result of delivering one batch.
///
/// `attempted` lists every launch that was part of the payload, delivered or not;
/// all of them get the same outcome recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: bool,
    pub attempted: Vec<EnrichedLaunch>,
    pub error: Option<DeliveryError>,
}

/// Transport seam for the webhook.
#[async_trait]
pub trait WebhookSink: Send + Sync {
    async fn send(&self, payload: &WebhookPayload) -> Result<(), DeliveryError>;

    /// Package `batch` into one payload and send it.
    ///
    /// Empty batches are not sent and report nothing attempted.
    async fn deliver(
        &self,
        batch: Vec<EnrichedLaunch>,
        retry: bool,
        timestamp: DateTime<Utc>,
    ) -> DeliveryReport {
        if batch.is_empty() {
            return DeliveryReport {
                delivered: false,
                attempted: Vec::new(),
                error: None,
            };
        }

        let payload = WebhookPayload::for_batch(&batch, retry, timestamp);
        match self.send(&payload).await {
            Ok(()) => DeliveryReport {
                delivered: true,
                attempted: batch,
                error: None,
            },
            Err(e) => DeliveryReport {
                delivered: false,
                attempted: batch,
                error: Some(e),
            },
        }
    }
}

/// HTTP webhook sink.
#[derive(Debug, Clone)]
pub struct HttpWebhookSink {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl HttpWebhookSink {
    pub fn new(config: &NotifierConfig) -> Result<Self, DeliveryError> {
        Self::with_url(&config.webhook_url)
    }

    pub fn with_url(url: &str) -> Result<Self, DeliveryError> {
        let url = reqwest::Url::parse(url).map_err(|e| DeliveryError::Config(e.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .map_err(|e| DeliveryError::Config(e.to_string()))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl WebhookSink for HttpWebhookSink {
    async fn send(&self, payload: &WebhookPayload) -> Result<(), DeliveryError> {
        let retry = payload.retry.unwrap_or(false);
        info!(operation = "deliver", count = payload.count, retry, "sending batch to webhook");

        // `.json()` sets `Content-Type: application/json`.
        let response = match self.client.post(self.url.clone()).json(payload).send().await {
            Ok(r) => r,
            Err(e) => {
                let e = e.without_url();
                error!(
                    operation = "deliver",
                    count = payload.count,
                    retry,
                    error = %e,
                    "webhook request failed"
                );
                return Err(DeliveryError::Transport(e.to_string()));
            }
        };

        let status = response.status();
        if status.is_success() {
            info!(
                operation = "deliver",
                status = status.as_u16(),
                count = payload.count,
                "webhook accepted batch"
            );
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let body = truncate_body(&body, 200);
        error!(
            operation = "deliver",
            status = status.as_u16(),
            count = payload.count,
            retry,
            body = %body,
            "webhook rejected batch"
        );
        Err(DeliveryError::Status {
            status: status.as_u16(),
            body,
        })
    }
}
