//! Debounced, cancelable alert scheduling
//!
//! The scheduler is a two-state machine: **idle** (no timer) or **pending**
//! (exactly one armed timer). Scheduling while pending replaces the pending
//! alert and restarts the debounce interval, so only the latest alert of a
//! burst is ever dispatched. Dispatch runs on its own tokio task and never
//! blocks the caller.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::sink::AlertSink;
use super::types::{Alert, DispatchOutcome};
use crate::utils::lock_mutex_recover;

/// Default debounce interval (3 seconds)
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(3);

/// Alert waiting for its debounce interval to elapse
struct PendingNotification {
    id: u64,
    alert: Alert,
    deadline: Instant,
    timer: JoinHandle<()>,
}

struct SchedulerInner {
    enabled: bool,
    destroyed: bool,
    next_id: u64,
    pending: Option<PendingNotification>,
    last_outcome: Option<DispatchOutcome>,
}

/// Debounced dispatcher with a single pending slot.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct NotificationScheduler {
    sink: Arc<dyn AlertSink>,
    debounce: Duration,
    inner: Arc<Mutex<SchedulerInner>>,
}

impl NotificationScheduler {
    pub fn new(sink: Arc<dyn AlertSink>, debounce: Duration) -> Self {
        Self {
            sink,
            debounce,
            inner: Arc::new(Mutex::new(SchedulerInner {
                enabled: true,
                destroyed: false,
                next_id: 0,
                pending: None,
                last_outcome: None,
            })),
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Arm (or re-arm) the debounce timer with a new alert.
    ///
    /// No-op while disabled or after [`destroy`](Self::destroy).
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self, title: impl Into<String>, body: impl Into<String>) {
        let alert = Alert::new(title, body);
        let mut inner = lock_mutex_recover(&self.inner);

        if inner.destroyed {
            log::debug!("Scheduler destroyed, ignoring alert '{}'", alert.title);
            return;
        }
        if !inner.enabled {
            log::debug!("Alerts disabled, ignoring alert '{}'", alert.title);
            return;
        }

        if let Some(previous) = inner.pending.take() {
            previous.timer.abort();
            log::trace!("Debounce reset: replacing '{}'", previous.alert.title);
        }

        inner.next_id += 1;
        let id = inner.next_id;
        let deadline = Instant::now() + self.debounce;
        // The timer task takes the same lock before touching `pending`, so it
        // cannot observe the slot until this insertion is done.
        let timer = tokio::spawn(fire_after(
            self.inner.clone(),
            self.sink.clone(),
            id,
            deadline,
        ));

        log::debug!(
            "Alert '{}' scheduled in {}ms",
            alert.title,
            self.debounce.as_millis()
        );
        inner.pending = Some(PendingNotification {
            id,
            alert,
            deadline,
            timer,
        });
    }

    /// Disarm the pending timer, if any. Safe to call at any time.
    pub fn cancel(&self) {
        let mut inner = lock_mutex_recover(&self.inner);
        if let Some(pending) = inner.pending.take() {
            pending.timer.abort();
            log::debug!("Pending alert '{}' cancelled", pending.alert.title);
        }
    }

    /// Bypass the debounce and dispatch right away.
    pub async fn send_immediate(&self, alert: Alert) -> DispatchOutcome {
        if !self.is_enabled() {
            log::debug!("Alerts disabled, skipping immediate alert '{}'", alert.title);
            return DispatchOutcome::disabled();
        }

        let outcome = self.sink.send(&alert).await;
        log_outcome(&alert, &outcome);
        lock_mutex_recover(&self.inner).last_outcome = Some(outcome.clone());
        outcome
    }

    pub fn is_pending(&self) -> bool {
        lock_mutex_recover(&self.inner).pending.is_some()
    }

    /// Deadline of the armed timer
    pub fn pending_deadline(&self) -> Option<Instant> {
        lock_mutex_recover(&self.inner)
            .pending
            .as_ref()
            .map(|p| p.deadline)
    }

    /// Alert that will be dispatched when the armed timer fires
    pub fn pending_alert(&self) -> Option<Alert> {
        lock_mutex_recover(&self.inner)
            .pending
            .as_ref()
            .map(|p| p.alert.clone())
    }

    /// Outcome of the most recent dispatch attempt
    pub fn last_outcome(&self) -> Option<DispatchOutcome> {
        lock_mutex_recover(&self.inner).last_outcome.clone()
    }

    /// Toggle dispatch. An already-armed timer keeps running, but its
    /// dispatch is skipped if the scheduler is disabled when it fires.
    pub fn set_enabled(&self, enabled: bool) {
        lock_mutex_recover(&self.inner).enabled = enabled;
        log::info!("Alerts {}", if enabled { "enabled" } else { "disabled" });
    }

    pub fn is_enabled(&self) -> bool {
        lock_mutex_recover(&self.inner).enabled
    }

    /// Cancel any pending alert and refuse all future scheduling
    pub fn destroy(&self) {
        self.cancel();
        lock_mutex_recover(&self.inner).destroyed = true;
    }

    pub fn is_destroyed(&self) -> bool {
        lock_mutex_recover(&self.inner).destroyed
    }
}

/// Timer body: wait for the deadline, claim the slot, dispatch.
async fn fire_after(
    inner: Arc<Mutex<SchedulerInner>>,
    sink: Arc<dyn AlertSink>,
    id: u64,
    deadline: Instant,
) {
    tokio::time::sleep_until(deadline).await;

    let (alert, enabled) = {
        let mut guard = lock_mutex_recover(&inner);
        match guard.pending.take() {
            Some(pending) if pending.id == id => (pending.alert, guard.enabled),
            other => {
                // Superseded after the abort raced with the wakeup
                guard.pending = other;
                return;
            }
        }
    };

    let outcome = if enabled {
        let outcome = sink.send(&alert).await;
        log_outcome(&alert, &outcome);
        outcome
    } else {
        log::debug!("Alerts disabled, dropping fired alert '{}'", alert.title);
        DispatchOutcome::disabled()
    };

    lock_mutex_recover(&inner).last_outcome = Some(outcome);
}

fn log_outcome(alert: &Alert, outcome: &DispatchOutcome) {
    if outcome.sent {
        log::info!("Alert sent: {}", alert.title);
    } else {
        log::warn!(
            "Alert '{}' not delivered: {}",
            alert.title,
            outcome.reason.as_deref().unwrap_or("unknown")
        );
    }
}
