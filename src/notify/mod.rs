//! Attention alerts: debounced scheduling and relay delivery

pub mod scheduler;
pub mod sink;
pub mod types;

pub use scheduler::{NotificationScheduler, DEFAULT_DEBOUNCE};
pub use sink::{AlertSink, NullSink, RelaySink};
pub use types::{Alert, AlertPriority, DispatchOutcome};
