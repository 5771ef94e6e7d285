// Graceful shutdown handling for signal trapping

use anyhow::Result;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::supervisor::ProcessSupervisor;

/// Interval at which waiters re-check the shutdown flag
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Grace period for blocking tasks once the main future has returned
pub const RUNTIME_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Shared shutdown state across the application
#[derive(Clone)]
pub struct ShutdownState {
    /// Flag indicating shutdown has been requested
    shutdown_requested: Arc<AtomicBool>,
    /// Flag indicating cleanup has completed
    cleanup_complete: Arc<AtomicBool>,
}

impl ShutdownState {
    /// Create a new shutdown state
    pub fn new() -> Self {
        Self {
            shutdown_requested: Arc::new(AtomicBool::new(false)),
            cleanup_complete: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request a shutdown
    pub fn request_shutdown(&self) {
        let already = self.shutdown_requested.swap(true, Ordering::SeqCst);
        if !already {
            log::info!("Shutdown requested");
        }
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been requested
    pub async fn wait(&self) {
        while !self.is_shutdown_requested() {
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
    }

    /// Mark cleanup as complete
    pub fn mark_cleanup_complete(&self) {
        self.cleanup_complete.store(true, Ordering::SeqCst);
        log::info!("Cleanup complete");
    }

    /// Check if cleanup is complete
    pub fn is_cleanup_complete(&self) -> bool {
        self.cleanup_complete.load(Ordering::SeqCst)
    }

    /// Reset shutdown state (for testing)
    pub fn reset(&self) {
        self.shutdown_requested.store(false, Ordering::SeqCst);
        self.cleanup_complete.store(false, Ordering::SeqCst);
    }
}

impl Default for ShutdownState {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of graceful shutdown cleanup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownResult {
    /// Whether the supervisor reached `Stopped` before the deadline
    pub process_stopped: bool,
    /// Number of observers that were still attached
    pub observers_detached: usize,
    pub timed_out: bool,
}

impl ShutdownResult {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if shutdown finished within the deadline
    pub fn is_clean(&self) -> bool {
        !self.timed_out
    }
}

/// Graceful shutdown handler
pub struct ShutdownHandler {
    state: ShutdownState,
}

impl ShutdownHandler {
    /// Create a new shutdown handler
    pub fn new() -> Self {
        Self {
            state: ShutdownState::new(),
        }
    }

    /// Create with existing state
    pub fn with_state(state: ShutdownState) -> Self {
        Self { state }
    }

    /// Get the shutdown state
    pub fn state(&self) -> &ShutdownState {
        &self.state
    }

    /// Stop the supervisor and detach every observer.
    ///
    /// The supervisor gets `deadline` to kill and reap its process; observers
    /// are detached either way.
    pub async fn shutdown(
        &self,
        supervisor: &ProcessSupervisor,
        deadline: Duration,
    ) -> ShutdownResult {
        self.state.request_shutdown();
        log::info!("Starting graceful shutdown...");

        let mut result = ShutdownResult::new();

        supervisor.stop();
        match tokio::time::timeout(deadline, supervisor.wait_stopped()).await {
            Ok(()) => result.process_stopped = true,
            Err(_) => {
                log::warn!(
                    "Supervisor did not stop within {}ms",
                    deadline.as_millis()
                );
                result.timed_out = true;
            }
        }

        result.observers_detached = supervisor.hub().detach_all();

        log::info!(
            "Shutdown complete: process stopped: {}, {} observers detached",
            result.process_stopped,
            result.observers_detached
        );

        self.state.mark_cleanup_complete();
        result
    }
}

impl Default for ShutdownHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// Drive `fut` to completion, then tear the runtime down without waiting
/// longer than `teardown` for blocking tasks that are still parked in I/O.
pub fn run_to_completion<F: Future>(
    rt: tokio::runtime::Runtime,
    fut: F,
    teardown: Duration,
) -> F::Output {
    let output = rt.block_on(fut);
    rt.shutdown_timeout(teardown);
    output
}

/// Register signal handlers for graceful shutdown
/// This sets up handlers for SIGINT (Ctrl+C), SIGTERM, and SIGHUP
#[cfg(unix)]
pub fn register_signal_handlers(state: ShutdownState) -> Result<()> {
    use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;
    use std::thread;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])
        .map_err(|e| anyhow::anyhow!("Failed to register signal handlers: {}", e))?;

    thread::spawn(move || {
        for signal in signals.forever() {
            match signal {
                SIGINT => log::info!("Received SIGINT (Ctrl+C)"),
                SIGTERM => log::info!("Received SIGTERM"),
                SIGHUP => log::info!("Received SIGHUP"),
                _ => continue,
            }
            state.request_shutdown();
        }
    });

    log::info!("Signal handlers registered (SIGINT, SIGTERM, SIGHUP)");
    Ok(())
}

/// Register signal handlers for Windows
#[cfg(windows)]
pub fn register_signal_handlers(state: ShutdownState) -> Result<()> {
    ctrlc::set_handler(move || {
        log::info!("Received Ctrl+C");
        state.request_shutdown();
    })
    .map_err(|e| anyhow::anyhow!("Failed to register Ctrl+C handler: {}", e))?;

    log::info!("Signal handler registered (Ctrl+C)");
    Ok(())
}
