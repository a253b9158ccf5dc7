//! External service clients: the ads platform (name lookup) and the webhook
//! sink (batch delivery).

pub mod graph;
pub mod webhook;

pub use graph::{GraphNameResolver, NameResolver, Resolution, ResolveError};
pub use webhook::{DeliveryError, DeliveryReport, HttpWebhookSink, WebhookPayload, WebhookSink};

/// First `max` characters of a response body, for log lines.
pub(crate) fn truncate_body(body: &str, max: usize) -> String {
    body.chars().take(max).collect()
}
