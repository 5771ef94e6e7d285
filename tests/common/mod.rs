// Shared test doubles for integration tests
#![allow(dead_code)]

use futures_util::future::BoxFuture;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use pty_relay_lib::hub::ObserverEvent;
use pty_relay_lib::notify::{Alert, AlertSink, DispatchOutcome};
use pty_relay_lib::supervisor::{
    ExitInfo, ProcessControl, ProcessSpawner, SpawnedProcess, TerminalSize,
};
use pty_relay_lib::Result;

#[derive(Default)]
struct ScriptState {
    output: Option<mpsc::UnboundedSender<Vec<u8>>>,
    exit: Option<oneshot::Sender<ExitInfo>>,
    written: Vec<u8>,
    resizes: Vec<TerminalSize>,
}

/// Test-side handle to one spawned process
#[derive(Clone)]
pub struct ScriptedProcess {
    state: Arc<Mutex<ScriptState>>,
    pub pid: u32,
}

impl ScriptedProcess {
    pub fn emit(&self, data: &str) {
        if let Some(ref tx) = self.state.lock().unwrap().output {
            let _ = tx.send(data.as_bytes().to_vec());
        }
    }

    pub fn exit(&self, info: ExitInfo) {
        let mut state = self.state.lock().unwrap();
        state.output = None;
        if let Some(tx) = state.exit.take() {
            let _ = tx.send(info);
        }
    }

    pub fn written(&self) -> Vec<u8> {
        self.state.lock().unwrap().written.clone()
    }

    pub fn resizes(&self) -> Vec<TerminalSize> {
        self.state.lock().unwrap().resizes.clone()
    }

    /// Wait until the supervisor has written `expected` to this process
    pub async fn wait_written(&self, expected: &[u8]) {
        for _ in 0..100 {
            if self.written() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!(
            "process never received {:?}, got {:?}",
            String::from_utf8_lossy(expected),
            String::from_utf8_lossy(&self.written())
        );
    }
}

struct ScriptedControl {
    state: Arc<Mutex<ScriptState>>,
    pid: u32,
}

impl ProcessControl for ScriptedControl {
    fn write(&self, data: &[u8]) -> Result<()> {
        self.state.lock().unwrap().written.extend_from_slice(data);
        Ok(())
    }

    fn resize(&self, size: TerminalSize) -> Result<()> {
        self.state.lock().unwrap().resizes.push(size);
        Ok(())
    }

    fn kill(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.output = None;
        if let Some(tx) = state.exit.take() {
            let _ = tx.send(ExitInfo::with_signal("SIGKILL"));
        }
        Ok(())
    }

    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }
}

/// Spawner that hands each new process to the test
pub struct ScriptedSpawner {
    spawned: mpsc::UnboundedSender<ScriptedProcess>,
    next_pid: AtomicU32,
}

impl ScriptedSpawner {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ScriptedProcess>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let spawner = Arc::new(Self {
            spawned: tx,
            next_pid: AtomicU32::new(4000),
        });
        (spawner, rx)
    }
}

impl ProcessSpawner for ScriptedSpawner {
    fn spawn(&self, _size: TerminalSize) -> Result<SpawnedProcess> {
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let state = Arc::new(Mutex::new(ScriptState {
            output: Some(output_tx),
            exit: Some(exit_tx),
            ..Default::default()
        }));
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);

        let _ = self.spawned.send(ScriptedProcess {
            state: state.clone(),
            pid,
        });

        Ok(SpawnedProcess {
            output: output_rx,
            exit: exit_rx,
            control: Box::new(ScriptedControl { state, pid }),
        })
    }
}

/// Sink that keeps every alert it is given
#[derive(Default)]
pub struct RecordingSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingSink {
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap().clone()
    }
}

impl AlertSink for RecordingSink {
    fn send<'a>(&'a self, alert: &'a Alert) -> BoxFuture<'a, DispatchOutcome> {
        self.alerts.lock().unwrap().push(alert.clone());
        Box::pin(async { DispatchOutcome::sent() })
    }
}

pub async fn next_process(
    processes: &mut mpsc::UnboundedReceiver<ScriptedProcess>,
) -> ScriptedProcess {
    tokio::time::timeout(Duration::from_secs(5), processes.recv())
        .await
        .expect("no process spawned")
        .expect("spawner dropped")
}

/// Receive events until one matches
pub async fn expect_event<F>(
    events: &mut mpsc::UnboundedReceiver<ObserverEvent>,
    matches: F,
) -> ObserverEvent
where
    F: Fn(&ObserverEvent) -> bool,
{
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for observer event")
            .expect("observer channel closed");
        if matches(&event) {
            return event;
        }
    }
}
