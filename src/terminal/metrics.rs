//! Usage/cost metrics extracted from the supervised process's output.
//!
//! A [`MetricsSnapshot`] is a sparse set of string-valued fields. The
//! [`MetricsAccumulator`] merges per-chunk extractions into one persistent
//! snapshot, field by field, with later values overwriting earlier ones.

use serde::{Deserialize, Serialize};

use super::classifier::extract_metrics;

/// Maximum size of the raw text tail kept across chunks (8KB)
const TAIL_CAPACITY: usize = 8 * 1024;

/// Names of the metric fields the classifier knows how to extract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricField {
    SessionCost,
    TotalCost,
    TotalTokens,
    InputTokens,
    OutputTokens,
    CacheRead,
    CacheWrite,
    /// Context usage phrased as "used N%"
    ContextUsed,
    /// Context usage phrased as "N% used", "N% remaining" or "N% of context"
    ContextUsedAlt,
}

impl MetricField {
    pub const ALL: [MetricField; 9] = [
        MetricField::SessionCost,
        MetricField::TotalCost,
        MetricField::TotalTokens,
        MetricField::InputTokens,
        MetricField::OutputTokens,
        MetricField::CacheRead,
        MetricField::CacheWrite,
        MetricField::ContextUsed,
        MetricField::ContextUsedAlt,
    ];

    /// Wire name of the field
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricField::SessionCost => "sessionCost",
            MetricField::TotalCost => "totalCost",
            MetricField::TotalTokens => "totalTokens",
            MetricField::InputTokens => "inputTokens",
            MetricField::OutputTokens => "outputTokens",
            MetricField::CacheRead => "cacheRead",
            MetricField::CacheWrite => "cacheWrite",
            MetricField::ContextUsed => "contextUsed",
            MetricField::ContextUsedAlt => "contextUsedAlt",
        }
    }
}

/// Last known value of each metric field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_cost: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_cost: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_write: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_used: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_used_alt: Option<String>,
}

impl MetricsSnapshot {
    fn slot(&self, field: MetricField) -> &Option<String> {
        match field {
            MetricField::SessionCost => &self.session_cost,
            MetricField::TotalCost => &self.total_cost,
            MetricField::TotalTokens => &self.total_tokens,
            MetricField::InputTokens => &self.input_tokens,
            MetricField::OutputTokens => &self.output_tokens,
            MetricField::CacheRead => &self.cache_read,
            MetricField::CacheWrite => &self.cache_write,
            MetricField::ContextUsed => &self.context_used,
            MetricField::ContextUsedAlt => &self.context_used_alt,
        }
    }

    fn slot_mut(&mut self, field: MetricField) -> &mut Option<String> {
        match field {
            MetricField::SessionCost => &mut self.session_cost,
            MetricField::TotalCost => &mut self.total_cost,
            MetricField::TotalTokens => &mut self.total_tokens,
            MetricField::InputTokens => &mut self.input_tokens,
            MetricField::OutputTokens => &mut self.output_tokens,
            MetricField::CacheRead => &mut self.cache_read,
            MetricField::CacheWrite => &mut self.cache_write,
            MetricField::ContextUsed => &mut self.context_used,
            MetricField::ContextUsedAlt => &mut self.context_used_alt,
        }
    }

    pub fn get(&self, field: MetricField) -> Option<&str> {
        self.slot(field).as_deref()
    }

    pub fn set(&mut self, field: MetricField, value: impl Into<String>) {
        *self.slot_mut(field) = Some(value.into());
    }

    pub fn is_empty(&self) -> bool {
        MetricField::ALL.iter().all(|f| self.slot(*f).is_none())
    }

    /// Fields that currently hold a value, in declaration order
    pub fn fields(&self) -> impl Iterator<Item = (MetricField, &str)> + '_ {
        MetricField::ALL
            .iter()
            .filter_map(move |f| self.get(*f).map(|v| (*f, v)))
    }

    /// Overwrite every field present in `other`; fields absent there are untouched
    pub fn merge(&mut self, other: &MetricsSnapshot) {
        for (field, value) in other.fields() {
            self.set(field, value);
        }
    }

    /// Best available context usage percentage, preferring the "used N%" form
    pub fn context_usage(&self) -> Option<&str> {
        self.context_used
            .as_deref()
            .or(self.context_used_alt.as_deref())
    }
}

/// Incremental metrics state for one process generation
#[derive(Debug, Default)]
pub struct MetricsAccumulator {
    /// Recent raw text for inspection; extraction only looks at the current chunk
    tail: String,
    snapshot: MetricsSnapshot,
}

impl MetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk of output.
    ///
    /// Returns the full merged snapshot when the chunk contained at least one
    /// metric, `None` otherwise.
    pub fn append(&mut self, chunk: &str) -> Option<MetricsSnapshot> {
        self.push_tail(chunk);

        let extracted = extract_metrics(chunk)?;
        self.snapshot.merge(&extracted);
        log::debug!(
            "Metrics updated: {}",
            extracted
                .fields()
                .map(|(f, v)| format!("{}={}", f.as_str(), v))
                .collect::<Vec<_>>()
                .join(", ")
        );
        Some(self.snapshot.clone())
    }

    /// Persistent snapshot, or `None` when no field has been observed yet
    pub fn get_last(&self) -> Option<&MetricsSnapshot> {
        if self.snapshot.is_empty() {
            None
        } else {
            Some(&self.snapshot)
        }
    }

    /// Raw text tail currently retained
    pub fn tail(&self) -> &str {
        &self.tail
    }

    /// Drop both the tail and every observed field
    pub fn reset(&mut self) {
        self.tail.clear();
        self.snapshot = MetricsSnapshot::default();
    }

    fn push_tail(&mut self, chunk: &str) {
        self.tail.push_str(chunk);
        if self.tail.len() > TAIL_CAPACITY {
            let mut cut = self.tail.len() - TAIL_CAPACITY;
            while !self.tail.is_char_boundary(cut) {
                cut += 1;
            }
            self.tail.drain(..cut);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_without_metrics_is_noop() {
        let mut acc = MetricsAccumulator::new();
        assert!(acc.append("Hello world").is_none());
        assert!(acc.get_last().is_none());
    }

    #[test]
    fn test_append_returns_full_merged_snapshot() {
        let mut acc = MetricsAccumulator::new();

        let first = acc.append("Session cost: $0.10\nInput tokens: 1k").unwrap();
        assert_eq!(first.session_cost.as_deref(), Some("0.10"));
        assert_eq!(first.input_tokens.as_deref(), Some("1k"));

        // B overwrites session cost, leaves input tokens untouched
        let merged = acc.append("Session cost: $0.25\nOutput tokens: 300").unwrap();
        assert_eq!(merged.session_cost.as_deref(), Some("0.25"));
        assert_eq!(merged.input_tokens.as_deref(), Some("1k"));
        assert_eq!(merged.output_tokens.as_deref(), Some("300"));
        assert_eq!(acc.get_last(), Some(&merged));
    }

    #[test]
    fn test_reappend_is_idempotent() {
        let mut acc = MetricsAccumulator::new();
        let chunk = "Total cost: $2.50\nTotal tokens: 12k";
        let once = acc.append(chunk).unwrap();
        let twice = acc.append(chunk).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut acc = MetricsAccumulator::new();
        acc.append("Total cost: $2.50");
        assert!(acc.get_last().is_some());
        assert!(!acc.tail().is_empty());

        acc.reset();
        assert!(acc.get_last().is_none());
        assert!(acc.tail().is_empty());
    }

    #[test]
    fn test_extraction_is_per_chunk() {
        let mut acc = MetricsAccumulator::new();
        assert!(acc.append("Total co").is_none());
        assert!(acc.append("st: $9.99").is_none());
        assert!(acc.get_last().is_none());
        assert_eq!(acc.tail(), "Total cost: $9.99");
    }

    #[test]
    fn test_tail_is_capped() {
        let mut acc = MetricsAccumulator::new();
        let line = "─".repeat(1000);
        for _ in 0..20 {
            acc.append(&line);
        }
        assert!(acc.tail().len() <= TAIL_CAPACITY);
        assert!(acc.tail().ends_with('─'));
    }

    #[test]
    fn test_snapshot_merge_and_fields() {
        let mut a = MetricsSnapshot::default();
        a.set(MetricField::TotalCost, "1.00");
        a.set(MetricField::ContextUsed, "10");

        let mut b = MetricsSnapshot::default();
        b.set(MetricField::TotalCost, "2.00");

        a.merge(&b);
        let fields: Vec<_> = a.fields().collect();
        assert_eq!(
            fields,
            vec![
                (MetricField::TotalCost, "2.00"),
                (MetricField::ContextUsed, "10")
            ]
        );
    }

    #[test]
    fn test_context_usage_prefers_used_form() {
        let mut snapshot = MetricsSnapshot::default();
        snapshot.set(MetricField::ContextUsedAlt, "42");
        assert_eq!(snapshot.context_usage(), Some("42"));
        snapshot.set(MetricField::ContextUsed, "63.7");
        assert_eq!(snapshot.context_usage(), Some("63.7"));
    }

    #[test]
    fn test_snapshot_serialization() {
        let mut snapshot = MetricsSnapshot::default();
        snapshot.set(MetricField::TotalCost, "2.50");
        let json = serde_json::to_string(&snapshot).unwrap();
        assert_eq!(json, r#"{"totalCost":"2.50"}"#);

        let back: MetricsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_field_names_match_serde() {
        for field in MetricField::ALL {
            let json = serde_json::to_string(&field).unwrap();
            assert_eq!(json, format!("\"{}\"", field.as_str()));
        }
    }
}
