//! Terminal output processing: ANSI filtering, heuristic classification,
//! usage metrics and the replay scrollback.

pub mod ansi;
pub mod classifier;
pub mod decode;
pub mod metrics;
pub mod replay;

pub use ansi::strip_ansi;
pub use classifier::{
    clean, extract_metrics, is_generation_complete, is_prompt_waiting, Signal,
};
pub use decode::Utf8Decoder;
pub use metrics::{MetricField, MetricsAccumulator, MetricsSnapshot};
pub use replay::{ReplayBuffer, DEFAULT_REPLAY_LIMIT};
