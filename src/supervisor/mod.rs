//! Supervised process lifecycle
//!
//! `Starting -> Running -> Exited -> Restarting -> Running -> ... -> Stopped`
//!
//! The supervisor owns the replay buffer, the metrics accumulator and the
//! waiting-for-input flag of the current process generation. Output chunks
//! are processed one at a time in arrival order by the run loop; the stream
//! state lock is held across "append + broadcast" so a concurrent attach
//! never sees a chunk twice or misses one. Lock order is stream state, then
//! observers.

pub mod policy;
pub mod process;

pub use process::{
    CommandSpec, ExitInfo, ProcessCommand, ProcessControl, ProcessSpawner, PtySpawner,
    SpawnedProcess, TerminalSize,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::error::{RelayError, Result};
use crate::hub::{ObserverConnection, ObserverEvent, ObserverHub};
use crate::notify::{Alert, AlertPriority, NotificationScheduler};
use crate::terminal::{
    MetricsAccumulator, MetricsSnapshot, ReplayBuffer, Utf8Decoder, DEFAULT_REPLAY_LIMIT,
};
use crate::utils::lock_mutex_recover;
use policy::Attention;

/// Delay between an exit and the next spawn (1 second)
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(1);

/// Grace period for trailing output after the exit notification
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// How long to wait for a killed process to be reaped
const KILL_WAIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle state of the supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SupervisorState {
    Starting,
    Running,
    Exited,
    Restarting,
    /// Terminal: shutdown was requested or spawning failed
    Stopped,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Maximum replay buffer size in bytes
    pub replay_limit: usize,
    pub restart_delay: Duration,
    /// Geometry for the first spawn; later spawns reuse the last resize
    pub initial_size: TerminalSize,
    pub read_only: bool,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            replay_limit: DEFAULT_REPLAY_LIMIT,
            restart_delay: DEFAULT_RESTART_DELAY,
            initial_size: TerminalSize::default(),
            read_only: false,
        }
    }
}

/// Per-generation stream state
struct StreamState {
    replay: ReplayBuffer,
    metrics: MetricsAccumulator,
    decoder: Utf8Decoder,
    waiting_for_input: bool,
}

#[derive(Default)]
struct ProcessInfo {
    generation: u64,
    pid: Option<u32>,
    alive: bool,
    started_at: Option<DateTime<Utc>>,
    last_exit: Option<ExitInfo>,
}

/// Point-in-time view for the administrative surface
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupervisorStatus {
    pub state: SupervisorState,
    pub generation: u64,
    pub pid: Option<u32>,
    pub alive: bool,
    pub observers: usize,
    pub read_only: bool,
    pub waiting_for_input: bool,
    pub metrics: Option<MetricsSnapshot>,
    pub notification_pending: bool,
    pub alerts_enabled: bool,
    pub replay_bytes: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub last_exit: Option<ExitInfo>,
}

pub struct ProcessSupervisor {
    config: SupervisorConfig,
    spawner: Arc<dyn ProcessSpawner>,
    scheduler: NotificationScheduler,
    hub: ObserverHub,
    stream: Mutex<StreamState>,
    process: Mutex<ProcessInfo>,
    size: Mutex<TerminalSize>,
    commands: Mutex<Option<mpsc::UnboundedReceiver<ProcessCommand>>>,
    state: watch::Sender<SupervisorState>,
    stop: watch::Sender<bool>,
}

impl ProcessSupervisor {
    pub fn new(
        config: SupervisorConfig,
        spawner: Arc<dyn ProcessSpawner>,
        scheduler: NotificationScheduler,
    ) -> Arc<Self> {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SupervisorState::Starting);
        let (stop, _) = watch::channel(false);

        Arc::new(Self {
            hub: ObserverHub::new(config.read_only, commands_tx),
            stream: Mutex::new(StreamState {
                replay: ReplayBuffer::new(config.replay_limit),
                metrics: MetricsAccumulator::new(),
                decoder: Utf8Decoder::new(),
                waiting_for_input: false,
            }),
            process: Mutex::new(ProcessInfo::default()),
            size: Mutex::new(config.initial_size),
            commands: Mutex::new(Some(commands_rx)),
            config,
            spawner,
            scheduler,
            state,
            stop,
        })
    }

    /// Drive the process until shutdown.
    ///
    /// Returns `Err` only when a spawn fails; every exit is followed by a
    /// restart unless [`stop`](Self::stop) was called first.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut commands = lock_mutex_recover(&self.commands)
            .take()
            .ok_or_else(|| RelayError::Supervisor("Supervisor is already running".to_string()))?;
        let mut stop_rx = self.stop.subscribe();

        let result = self.supervise(&mut commands, &mut stop_rx).await;

        {
            let mut process = lock_mutex_recover(&self.process);
            process.alive = false;
            process.pid = None;
        }
        self.scheduler.destroy();
        self.set_state(SupervisorState::Stopped);
        log::info!("Supervisor stopped");
        result
    }

    async fn supervise(
        &self,
        commands: &mut mpsc::UnboundedReceiver<ProcessCommand>,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        loop {
            if *stop_rx.borrow() {
                return Ok(());
            }

            self.set_state(SupervisorState::Starting);
            let size = *lock_mutex_recover(&self.size);
            let process = match self.spawner.spawn(size) {
                Ok(process) => process,
                Err(e) => {
                    log::error!("{}", e);
                    return Err(e);
                }
            };

            let pid = process.control.pid();
            let generation = self.mark_started(pid);
            self.set_state(SupervisorState::Running);
            log::info!("Process generation {} running (pid {:?})", generation, pid);
            self.hub
                .broadcast(ObserverEvent::ProcessStarted { generation, pid });

            let exit = self.drive(process, commands, stop_rx).await;

            self.mark_exited(&exit);
            self.set_state(SupervisorState::Exited);
            log::info!(
                "Process generation {} exited with {}",
                generation,
                exit.describe()
            );
            self.hub.broadcast(ObserverEvent::exited(generation, &exit));

            if *stop_rx.borrow() {
                return Ok(());
            }

            if !exit.is_success() {
                self.alert_exit(generation, &exit);
            }

            self.set_state(SupervisorState::Restarting);
            self.reset_generation();
            log::info!(
                "Restarting in {}ms",
                self.config.restart_delay.as_millis()
            );

            let delay = tokio::time::sleep(self.config.restart_delay);
            tokio::pin!(delay);
            loop {
                tokio::select! {
                    biased;
                    _ = stop_requested(stop_rx) => return Ok(()),
                    _ = &mut delay => break,
                    Some(command) = commands.recv() => self.defer_command(command),
                }
            }
        }
    }

    /// Pump one live process until it exits or a stop is requested
    async fn drive(
        &self,
        process: SpawnedProcess,
        commands: &mut mpsc::UnboundedReceiver<ProcessCommand>,
        stop_rx: &mut watch::Receiver<bool>,
    ) -> ExitInfo {
        let SpawnedProcess {
            mut output,
            mut exit,
            control,
        } = process;
        let mut output_open = true;

        loop {
            tokio::select! {
                biased;
                _ = stop_requested(stop_rx) => {
                    log::info!("Terminating supervised process");
                    if let Err(e) = control.kill() {
                        log::warn!("{}", e);
                    }
                    return match tokio::time::timeout(KILL_WAIT_TIMEOUT, &mut exit).await {
                        Ok(Ok(info)) => info,
                        _ => ExitInfo::with_signal("SIGKILL"),
                    };
                }
                chunk = output.recv(), if output_open => match chunk {
                    Some(bytes) => self.process_chunk(&bytes),
                    None => output_open = false,
                },
                status = &mut exit => {
                    let info = status.unwrap_or_default();
                    if output_open {
                        self.drain_output(&mut output).await;
                    }
                    return info;
                }
                Some(command) = commands.recv() => self.apply_command(control.as_ref(), command),
            }
        }
    }

    async fn drain_output(&self, output: &mut mpsc::UnboundedReceiver<Vec<u8>>) {
        let drain = async {
            while let Some(bytes) = output.recv().await {
                self.process_chunk(&bytes);
            }
        };
        if tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, drain).await.is_err() {
            log::debug!("Output still open after exit, continuing");
        }
    }

    /// Run one chunk through replay, metrics, attention policy and fan-out
    fn process_chunk(&self, bytes: &[u8]) {
        let mut stream = lock_mutex_recover(&self.stream);
        let text = stream.decoder.decode(bytes);

        stream.replay.append(bytes);
        let metrics_updated = stream.metrics.append(&text).is_some();

        let was_waiting = stream.waiting_for_input;
        match policy::evaluate(&text) {
            Attention::Needed { title, body, .. } => {
                stream.waiting_for_input = true;
                self.scheduler.schedule(title, body);
            }
            Attention::Resumed => {
                stream.waiting_for_input = false;
                self.scheduler.cancel();
            }
            Attention::Unchanged => {}
        }

        self.hub.broadcast(ObserverEvent::output(bytes));
        if metrics_updated || stream.waiting_for_input != was_waiting {
            self.hub.broadcast(ObserverEvent::status(
                stream.metrics.get_last(),
                stream.waiting_for_input,
            ));
        }
    }

    fn apply_command(&self, control: &dyn ProcessControl, command: ProcessCommand) {
        match command {
            ProcessCommand::Input(data) => {
                if let Err(e) = control.write(&data) {
                    log::warn!("{}", e);
                }
            }
            ProcessCommand::Resize(size) => {
                *lock_mutex_recover(&self.size) = size;
                match control.resize(size) {
                    Ok(()) => log::debug!("Resized PTY to {}x{}", size.cols, size.rows),
                    Err(e) => log::warn!("{}", e),
                }
            }
        }
    }

    // No live process: keep the geometry for the next spawn, drop stale input.
    fn defer_command(&self, command: ProcessCommand) {
        match command {
            ProcessCommand::Input(data) => {
                log::debug!("Dropping {} input bytes, no live process", data.len());
            }
            ProcessCommand::Resize(size) => {
                *lock_mutex_recover(&self.size) = size;
            }
        }
    }

    fn mark_started(&self, pid: Option<u32>) -> u64 {
        let mut process = lock_mutex_recover(&self.process);
        process.generation += 1;
        process.pid = pid;
        process.alive = true;
        process.started_at = Some(Utc::now());
        process.generation
    }

    fn mark_exited(&self, exit: &ExitInfo) {
        let mut process = lock_mutex_recover(&self.process);
        process.alive = false;
        process.last_exit = Some(exit.clone());
    }

    /// Scrollback, metrics and pending alerts belong to one generation
    fn reset_generation(&self) {
        let mut stream = lock_mutex_recover(&self.stream);
        stream.replay.clear();
        stream.metrics.reset();
        stream.decoder.reset();
        stream.waiting_for_input = false;
        self.scheduler.cancel();
    }

    fn alert_exit(&self, generation: u64, exit: &ExitInfo) {
        let alert = Alert::new(
            "Process exited",
            format!(
                "Generation {} exited with {}, restarting",
                generation,
                exit.describe()
            ),
        )
        .with_priority(AlertPriority::High)
        .with_tag("warning");

        let scheduler = self.scheduler.clone();
        tokio::spawn(async move {
            scheduler.send_immediate(alert).await;
        });
    }

    fn set_state(&self, state: SupervisorState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            log::debug!("Supervisor state: {:?} -> {:?}", previous, state);
        }
    }

    /// Attach a new observer, sending it the replay and last metrics
    pub fn attach(&self) -> (Arc<ObserverConnection>, mpsc::UnboundedReceiver<ObserverEvent>) {
        let (connection, events) = ObserverConnection::new();
        let stream = lock_mutex_recover(&self.stream);
        self.hub.attach(
            connection.clone(),
            stream.replay.contents(),
            stream.metrics.get_last(),
            stream.waiting_for_input,
        );
        (connection, events)
    }

    pub fn detach(&self, id: Uuid) -> bool {
        self.hub.detach(id)
    }

    pub fn route_input(&self, id: Uuid, data: Vec<u8>) -> bool {
        self.hub.route_input(id, data)
    }

    pub fn resize(&self, cols: i64, rows: i64) -> bool {
        self.hub.route_resize(cols, rows)
    }

    /// Re-send the current metrics snapshot to one observer
    pub fn request_status(&self, id: Uuid) -> bool {
        let stream = lock_mutex_recover(&self.stream);
        self.hub.send_to(
            id,
            ObserverEvent::status(stream.metrics.get_last(), stream.waiting_for_input),
        )
    }

    /// Request shutdown: no further restarts, pending alert cancelled, live
    /// process killed. Safe to call any number of times, from any state.
    pub fn stop(&self) {
        let already_stopping = self.stop.send_replace(true);
        if !already_stopping {
            log::info!("Supervisor shutdown requested");
        }
        self.scheduler.cancel();
    }

    pub fn is_stop_requested(&self) -> bool {
        *self.stop.borrow()
    }

    /// Wait until the run loop has reached `Stopped`
    pub async fn wait_stopped(&self) {
        let mut state = self.state.subscribe();
        let _ = state
            .wait_for(|state| *state == SupervisorState::Stopped)
            .await;
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    pub fn generation(&self) -> u64 {
        lock_mutex_recover(&self.process).generation
    }

    pub fn replay_contents(&self) -> Vec<u8> {
        lock_mutex_recover(&self.stream).replay.contents().to_vec()
    }

    pub fn last_metrics(&self) -> Option<MetricsSnapshot> {
        lock_mutex_recover(&self.stream).metrics.get_last().cloned()
    }

    pub fn is_waiting_for_input(&self) -> bool {
        lock_mutex_recover(&self.stream).waiting_for_input
    }

    pub fn hub(&self) -> &ObserverHub {
        &self.hub
    }

    pub fn scheduler(&self) -> &NotificationScheduler {
        &self.scheduler
    }

    pub fn status(&self) -> SupervisorStatus {
        let (waiting_for_input, metrics, replay_bytes) = {
            let stream = lock_mutex_recover(&self.stream);
            (
                stream.waiting_for_input,
                stream.metrics.get_last().cloned(),
                stream.replay.len(),
            )
        };
        let process = lock_mutex_recover(&self.process);

        SupervisorStatus {
            state: self.state(),
            generation: process.generation,
            pid: process.pid,
            alive: process.alive,
            observers: self.hub.observer_count(),
            read_only: self.hub.is_read_only(),
            waiting_for_input,
            metrics,
            notification_pending: self.scheduler.is_pending(),
            alerts_enabled: self.scheduler.is_enabled(),
            replay_bytes,
            started_at: process.started_at,
            last_exit: process.last_exit.clone(),
        }
    }
}

/// Resolves once a stop has been requested
async fn stop_requested(stop_rx: &mut watch::Receiver<bool>) {
    let _ = stop_rx.wait_for(|stopped| *stopped).await;
}
