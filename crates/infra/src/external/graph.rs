//! Ad name lookup against the ads platform's object endpoint.
//!
//! `GET {base}/{ad_id}?fields=name&access_token={token}` → `{"name": "..."}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use adlaunch_core::AdName;

use super::truncate_body;
use crate::config::NotifierConfig;

pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Why a name could not be resolved this cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no access token configured")]
    MissingCredential,

    #[error("lookup returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("lookup transport error: {0}")]
    Transport(String),

    #[error("lookup response was not valid JSON: {0}")]
    Decode(String),

    #[error("invalid lookup configuration: {0}")]
    Config(String),
}

/// Outcome of one name lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Named(AdName),
    /// The platform does not know this ad (404).
    NotFound,
    /// Anything that may succeed next cycle.
    Transient(ResolveError),
}

/// Resolves an ad id to its current display name.
#[async_trait]
pub trait NameResolver: Send + Sync {
    async fn resolve(&self, ad_id: &str) -> Resolution;
}

#[derive(Debug, Deserialize)]
struct GraphObject {
    #[serde(default)]
    name: Option<String>,
}

/// HTTP name resolver for the ads platform Graph API.
#[derive(Debug, Clone)]
pub struct GraphNameResolver {
    client: reqwest::Client,
    base_url: Url,
    access_token: Option<String>,
}

impl GraphNameResolver {
    pub fn new(config: &NotifierConfig) -> Result<Self, ResolveError> {
        let token = Some(config.meta_access_token.clone()).filter(|t| !t.trim().is_empty());
        Self::with_base_url(&config.graph_base_url, token)
    }

    pub fn with_base_url(
        base_url: &str,
        access_token: Option<String>,
    ) -> Result<Self, ResolveError> {
        let base_url = Url::parse(base_url).map_err(|e| ResolveError::Config(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(ResolveError::Config(format!("{base_url} cannot be a base URL")));
        }
        let client = reqwest::Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .map_err(|e| ResolveError::Config(e.to_string()))?;
        Ok(Self {
            client,
            base_url,
            access_token,
        })
    }

    fn object_url(&self, ad_id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(ad_id);
        }
        url
    }
}

#[async_trait]
impl NameResolver for GraphNameResolver {
    async fn resolve(&self, ad_id: &str) -> Resolution {
        let Some(token) = self.access_token.as_deref() else {
            warn!(operation = "resolve_name", ad_id, "no access token, cannot fetch ad name");
            return Resolution::Transient(ResolveError::MissingCredential);
        };

        let response = match self
            .client
            .get(self.object_url(ad_id))
            .query(&[("fields", "name"), ("access_token", token)])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                // reqwest errors may echo the URL, which carries the token.
                let e = e.without_url();
                warn!(operation = "resolve_name", ad_id, error = %e, "ad name lookup failed");
                return Resolution::Transient(ResolveError::Transport(e.to_string()));
            }
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            warn!(operation = "resolve_name", ad_id, "ad not found on platform");
            return Resolution::NotFound;
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = truncate_body(&body, 200);
            warn!(
                operation = "resolve_name",
                ad_id,
                status = status.as_u16(),
                body = %body,
                "ad name lookup rejected"
            );
            return Resolution::Transient(ResolveError::Status {
                status: status.as_u16(),
                body,
            });
        }

        match response.json::<GraphObject>().await {
            Ok(obj) => {
                let name = obj.name.unwrap_or_default();
                debug!(operation = "resolve_name", ad_id, ad_name = %name, "fetched ad name");
                Resolution::Named(AdName::new(name))
            }
            Err(e) => {
                let e = e.without_url();
                warn!(operation = "resolve_name", ad_id, error = %e, "ad name response unreadable");
                Resolution::Transient(ResolveError::Decode(e.to_string()))
            }
        }
    }
}
