// Heuristic classification of supervised-process output
//
// Every predicate runs over the ANSI-stripped, trimmed text of a chunk. Rules
// are kept as ordered, named tables so each pattern can be tested on its own.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use super::ansi::strip_ansi;
use super::metrics::{MetricField, MetricsSnapshot};

/// Number of trailing lines inspected for interactive prompts.
/// Prompt-like text further up in the scrollback is ignored.
pub const PROMPT_TAIL_LINES: usize = 3;

/// Semantic signal derived from a chunk of output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    /// The process is blocked on an interactive confirmation
    PromptWaiting,
    /// The process finished a generation and printed its cost summary
    GenerationComplete,
}

/// Which part of the cleaned chunk a rule inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleScope {
    /// Each of the last [`PROMPT_TAIL_LINES`] lines, independently
    Tail,
    /// The whole cleaned chunk
    Whole,
}

/// A named pattern that maps matching text to a [`Signal`]
pub struct SignalRule {
    pub name: &'static str,
    pub signal: Signal,
    pub scope: RuleScope,
    regex: Regex,
}

impl SignalRule {
    fn new(name: &'static str, signal: Signal, scope: RuleScope, pattern: &str) -> Self {
        Self {
            name,
            signal,
            scope,
            regex: Regex::new(pattern).expect("Invalid signal rule pattern"),
        }
    }

    /// Check the rule against already-cleaned text
    pub fn matches(&self, cleaned: &str) -> bool {
        match self.scope {
            RuleScope::Whole => self.regex.is_match(cleaned),
            RuleScope::Tail => cleaned
                .lines()
                .rev()
                .take(PROMPT_TAIL_LINES)
                .any(|line| self.regex.is_match(line)),
        }
    }
}

/// A named pattern whose first capture group is the value of a metric field
pub struct MetricRule {
    pub name: &'static str,
    pub field: MetricField,
    regex: Regex,
}

impl MetricRule {
    fn new(name: &'static str, field: MetricField, pattern: &str) -> Self {
        Self {
            name,
            field,
            regex: Regex::new(pattern).expect("Invalid metric rule pattern"),
        }
    }

    /// Value of the last occurrence of this pattern in the cleaned text
    pub fn capture(&self, cleaned: &str) -> Option<String> {
        self.regex
            .captures_iter(cleaned)
            .last()
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}

// Pointer glyphs used by interactive menus to mark the selected option
const POINTER_GLYPHS: &str = "❯›▸▶►➤→";

// Numeric value, optionally with thousands separators, decimals and a k suffix
const TOKEN_COUNT: &str = r"(\d[\d,]*(?:\.\d+)?k?)";
const AMOUNT: &str = r"\$?\s*(\d[\d,]*(?:\.\d+)?)";
const PERCENT: &str = r"(\d+(?:\.\d+)?)%";

static SIGNAL_RULES: LazyLock<Vec<SignalRule>> = LazyLock::new(|| {
    vec![
        SignalRule::new(
            "yes_no_suffix",
            Signal::PromptWaiting,
            RuleScope::Tail,
            r"(?i)(?:\(y/n\)|\[y/n\]|\(yes/no\))\s*$",
        ),
        SignalRule::new(
            "menu_selector",
            Signal::PromptWaiting,
            RuleScope::Tail,
            &format!(r"^\s*[{POINTER_GLYPHS}]\s*\d+\."),
        ),
        SignalRule::new(
            "dont_ask_again_option",
            Signal::PromptWaiting,
            RuleScope::Tail,
            &format!(
                r"(?i)^\s*(?:[{POINTER_GLYPHS}]\s*)?\d+\.\s+yes,\s+and\s+don['’]?t\s+ask\s+again\s+for\b"
            ),
        ),
        SignalRule::new(
            "cost_summary",
            Signal::GenerationComplete,
            RuleScope::Whole,
            r"(?i)\b(?:total|session)\s+cost:",
        ),
    ]
});

static METRIC_RULES: LazyLock<Vec<MetricRule>> = LazyLock::new(|| {
    vec![
        MetricRule::new(
            "session_cost",
            MetricField::SessionCost,
            &format!(r"(?i)session\s+cost:\s*{AMOUNT}"),
        ),
        MetricRule::new(
            "total_cost",
            MetricField::TotalCost,
            &format!(r"(?i)total\s+cost:\s*{AMOUNT}"),
        ),
        MetricRule::new(
            "total_tokens",
            MetricField::TotalTokens,
            &format!(r"(?i)total\s+tokens?:\s*{TOKEN_COUNT}"),
        ),
        MetricRule::new(
            "input_tokens_labeled",
            MetricField::InputTokens,
            &format!(r"(?i)\binput(?:\s+tokens?)?:\s*{TOKEN_COUNT}"),
        ),
        MetricRule::new(
            "input_tokens_suffixed",
            MetricField::InputTokens,
            &format!(r"(?i){TOKEN_COUNT}\s+input\b"),
        ),
        MetricRule::new(
            "output_tokens_labeled",
            MetricField::OutputTokens,
            &format!(r"(?i)\boutput(?:\s+tokens?)?:\s*{TOKEN_COUNT}"),
        ),
        MetricRule::new(
            "output_tokens_suffixed",
            MetricField::OutputTokens,
            &format!(r"(?i){TOKEN_COUNT}\s+output\b"),
        ),
        MetricRule::new(
            "cache_read_labeled",
            MetricField::CacheRead,
            &format!(r"(?i)cache\s+read(?:\s+tokens?)?:\s*{TOKEN_COUNT}"),
        ),
        MetricRule::new(
            "cache_read_suffixed",
            MetricField::CacheRead,
            &format!(r"(?i){TOKEN_COUNT}\s+cache\s+read\b"),
        ),
        MetricRule::new(
            "cache_write_labeled",
            MetricField::CacheWrite,
            &format!(r"(?i)cache\s+(?:write|creation)(?:\s+tokens?)?:\s*{TOKEN_COUNT}"),
        ),
        MetricRule::new(
            "cache_write_suffixed",
            MetricField::CacheWrite,
            &format!(r"(?i){TOKEN_COUNT}\s+cache\s+(?:write|creation)\b"),
        ),
        MetricRule::new(
            "context_used_prefix",
            MetricField::ContextUsed,
            &format!(r"(?i)\bused\s+{PERCENT}"),
        ),
        MetricRule::new(
            "context_used_suffix",
            MetricField::ContextUsedAlt,
            &format!(r"(?i){PERCENT}\s*(?:used|remaining|of\s+context)\b"),
        ),
    ]
});

/// Ordered prompt/completion rules
pub fn signal_rules() -> &'static [SignalRule] {
    &SIGNAL_RULES
}

/// Ordered metric extraction rules
pub fn metric_rules() -> &'static [MetricRule] {
    &METRIC_RULES
}

/// Plain-text view of a chunk: ANSI stripped and trimmed
pub fn clean(chunk: &str) -> String {
    strip_ansi(chunk).trim().to_string()
}

/// First rule (in table order) matching the cleaned text
pub fn first_match(cleaned: &str) -> Option<&'static SignalRule> {
    signal_rules().iter().find(|rule| rule.matches(cleaned))
}

fn has_signal(chunk: &str, signal: Signal) -> bool {
    let cleaned = clean(chunk);
    signal_rules()
        .iter()
        .filter(|rule| rule.signal == signal)
        .any(|rule| rule.matches(&cleaned))
}

/// True when one of the last few lines is an interactive confirmation
pub fn is_prompt_waiting(chunk: &str) -> bool {
    has_signal(chunk, Signal::PromptWaiting)
}

/// True when the chunk carries a cost summary marker
pub fn is_generation_complete(chunk: &str) -> bool {
    has_signal(chunk, Signal::GenerationComplete)
}

/// Extract every metric field present in the chunk.
///
/// When several rules target the same field, the first rule in table order
/// that matches wins for this chunk. Returns `None` if nothing matched.
pub fn extract_metrics(chunk: &str) -> Option<MetricsSnapshot> {
    let cleaned = clean(chunk);
    if cleaned.is_empty() {
        return None;
    }

    let mut snapshot = MetricsSnapshot::default();
    for rule in metric_rules() {
        if snapshot.get(rule.field).is_some() {
            continue;
        }
        if let Some(value) = rule.capture(&cleaned) {
            log::trace!("Metric rule '{}' matched: {}", rule.name, value);
            snapshot.set(rule.field, value);
        }
    }

    if snapshot.is_empty() {
        None
    } else {
        Some(snapshot)
    }
}
