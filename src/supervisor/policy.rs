//! Attention policy: turns classifier signals into "waiting for input"
//! transitions and alert text.

use crate::terminal::classifier::{clean, first_match, Signal};
use crate::utils::truncate_chars;

/// Cleaned chunks this short are cursor or redraw noise and are not classified
pub const NOISE_MAX_CHARS: usize = 5;

/// Cleaned chunks longer than this with no signal mean the process resumed work
pub const RESUME_MIN_CHARS: usize = 30;

/// Longest alert body sent to the relay
const ALERT_BODY_MAX_CHARS: usize = 200;

pub const PROMPT_TITLE: &str = "Waiting for input";
pub const COMPLETE_TITLE: &str = "Generation complete";

/// Outcome of evaluating one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attention {
    /// Set the waiting flag and schedule an alert
    Needed {
        signal: Signal,
        title: String,
        body: String,
    },
    /// Clear the waiting flag and cancel any pending alert
    Resumed,
    /// Leave everything as it is
    Unchanged,
}

pub fn evaluate(chunk: &str) -> Attention {
    let cleaned = clean(chunk);
    let len = cleaned.chars().count();
    if len <= NOISE_MAX_CHARS {
        return Attention::Unchanged;
    }

    if let Some(rule) = first_match(&cleaned) {
        log::debug!("Attention rule '{}' matched", rule.name);
        let title = match rule.signal {
            Signal::PromptWaiting => PROMPT_TITLE,
            Signal::GenerationComplete => COMPLETE_TITLE,
        };
        return Attention::Needed {
            signal: rule.signal,
            title: title.to_string(),
            body: alert_body(&cleaned, rule.signal),
        };
    }

    if len > RESUME_MIN_CHARS {
        Attention::Resumed
    } else {
        Attention::Unchanged
    }
}

// Prompts use the last line (the question itself); completions use the cost line.
fn alert_body(cleaned: &str, signal: Signal) -> String {
    let mut lines = cleaned.lines().map(str::trim).filter(|l| !l.is_empty());
    let line = match signal {
        Signal::PromptWaiting => lines.next_back(),
        Signal::GenerationComplete => lines
            .clone()
            .find(|l| l.to_ascii_lowercase().contains("cost:"))
            .or_else(|| lines.next_back()),
    };
    truncate_chars(line.unwrap_or_default(), ALERT_BODY_MAX_CHARS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_needs_attention() {
        match evaluate("Overwrite file? (Y/n) ") {
            Attention::Needed {
                signal,
                title,
                body,
            } => {
                assert_eq!(signal, Signal::PromptWaiting);
                assert_eq!(title, PROMPT_TITLE);
                assert_eq!(body, "Overwrite file? (Y/n)");
            }
            other => panic!("expected attention, got {:?}", other),
        }
    }

    #[test]
    fn test_completion_uses_cost_line() {
        let chunk = "Done.\n\x1b[2mTotal cost: $2.50\x1b[0m\nTotal duration: 1m 3s";
        match evaluate(chunk) {
            Attention::Needed { signal, title, body } => {
                assert_eq!(signal, Signal::GenerationComplete);
                assert_eq!(title, COMPLETE_TITLE);
                assert_eq!(body, "Total cost: $2.50");
            }
            other => panic!("expected attention, got {:?}", other),
        }
    }

    #[test]
    fn test_noise_is_ignored() {
        assert_eq!(evaluate("\x1b[2K\x1b[1G> "), Attention::Unchanged);
        assert_eq!(evaluate("y\n"), Attention::Unchanged);
        assert_eq!(evaluate(""), Attention::Unchanged);
    }

    #[test]
    fn test_long_plain_text_resumes() {
        assert_eq!(
            evaluate("Reading src/main.rs and updating the configuration loader"),
            Attention::Resumed
        );
    }

    #[test]
    fn test_medium_plain_text_is_unchanged() {
        // Between the noise and resume thresholds
        assert_eq!(evaluate("Processing files..."), Attention::Unchanged);
    }

    #[test]
    fn test_long_body_is_truncated() {
        let question = format!("{} (y/N)", "x".repeat(400));
        match evaluate(&question) {
            Attention::Needed { body, .. } => {
                assert_eq!(body.chars().count(), ALERT_BODY_MAX_CHARS);
                assert!(body.ends_with('…'));
            }
            other => panic!("expected attention, got {:?}", other),
        }
    }
}
