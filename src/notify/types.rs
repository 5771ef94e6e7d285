//! Types for alert dispatch

use serde::{Deserialize, Serialize};

/// Reason reported when dispatch is skipped because alerts are turned off
pub const DISABLED_REASON: &str = "disabled";

/// Delivery priority understood by the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    Min,
    Low,
    #[default]
    Default,
    High,
    Urgent,
}

impl AlertPriority {
    /// Header value for ntfy-compatible relays
    pub fn as_header(&self) -> &'static str {
        match self {
            AlertPriority::Min => "min",
            AlertPriority::Low => "low",
            AlertPriority::Default => "default",
            AlertPriority::High => "high",
            AlertPriority::Urgent => "urgent",
        }
    }
}

/// A single alert destined for the external relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<AlertPriority>,
    /// Relay tag, e.g. an emoji short code for ntfy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl Alert {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
            priority: None,
            tag: None,
        }
    }

    pub fn with_priority(mut self, priority: AlertPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// Result of one dispatch attempt: `{sent: true}` or `{sent: false, reason}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub sent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DispatchOutcome {
    pub fn sent() -> Self {
        Self {
            sent: true,
            reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            sent: false,
            reason: Some(reason.into()),
        }
    }

    pub fn disabled() -> Self {
        Self::failed(DISABLED_REASON)
    }

    pub fn is_disabled(&self) -> bool {
        !self.sent && self.reason.as_deref() == Some(DISABLED_REASON)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_builder() {
        let alert = Alert::new("Waiting for input", "Overwrite? (Y/n)")
            .with_priority(AlertPriority::High)
            .with_tag("bell");

        assert_eq!(alert.title, "Waiting for input");
        assert_eq!(alert.body, "Overwrite? (Y/n)");
        assert_eq!(alert.priority, Some(AlertPriority::High));
        assert_eq!(alert.tag.as_deref(), Some("bell"));
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_string(&DispatchOutcome::sent()).unwrap();
        assert_eq!(json, r#"{"sent":true}"#);

        let json = serde_json::to_string(&DispatchOutcome::failed("HTTP 502")).unwrap();
        assert_eq!(json, r#"{"sent":false,"reason":"HTTP 502"}"#);
    }

    #[test]
    fn test_disabled_outcome() {
        assert!(DispatchOutcome::disabled().is_disabled());
        assert!(!DispatchOutcome::failed("timeout").is_disabled());
        assert!(!DispatchOutcome::sent().is_disabled());
    }

    #[test]
    fn test_priority_headers() {
        assert_eq!(AlertPriority::default().as_header(), "default");
        assert_eq!(AlertPriority::Urgent.as_header(), "urgent");
    }
}
