//! Alert sinks
//!
//! The relay sink publishes to an ntfy-compatible HTTP endpoint. Delivery is
//! best-effort: every failure is folded into a [`DispatchOutcome`] and never
//! surfaces as an error to the caller.

use futures_util::future::BoxFuture;
use std::time::Duration;

use super::types::{Alert, DispatchOutcome};
use crate::error::{RelayError, Result};

/// Request timeout for relay delivery
const RELAY_TIMEOUT: Duration = Duration::from_secs(10);

/// Destination for alerts
pub trait AlertSink: Send + Sync {
    fn send<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, DispatchOutcome>;
}

/// Publishes alerts to `{server}/{topic}` on an ntfy-compatible relay
pub struct RelaySink {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl RelaySink {
    pub fn new(server: &str, topic: &str, token: Option<String>) -> Result<Self> {
        if topic.trim().is_empty() {
            return Err(RelayError::Config("Alert topic must not be empty".to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(RELAY_TIMEOUT)
            .build()
            .map_err(|e| RelayError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}/{}", server.trim_end_matches('/'), topic.trim()),
            token,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn publish(&self, alert: &Alert) -> DispatchOutcome {
        let mut request = self
            .client
            .post(&self.url)
            .header("Title", alert.title.as_str())
            .body(alert.body.clone());

        if let Some(priority) = alert.priority {
            request = request.header("Priority", priority.as_header());
        }
        if let Some(ref tag) = alert.tag {
            request = request.header("Tags", tag.as_str());
        }
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => DispatchOutcome::sent(),
            Ok(response) => DispatchOutcome::failed(format!("HTTP {}", response.status().as_u16())),
            Err(e) => DispatchOutcome::failed(e.to_string()),
        }
    }
}

impl AlertSink for RelaySink {
    fn send<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, DispatchOutcome> {
        Box::pin(self.publish(alert))
    }
}

/// Sink used when no relay is configured; every alert is logged and dropped
#[derive(Debug, Default)]
pub struct NullSink;

impl AlertSink for NullSink {
    fn send<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, DispatchOutcome> {
        Box::pin(async move {
            log::debug!("No alert relay configured, dropping '{}'", alert.title);
            DispatchOutcome::failed("no relay configured")
        })
    }
}
