//! Observer fan-out
//!
//! Each attached observer gets an unbounded channel of [`ObserverEvent`]s.
//! Delivery is best-effort: a closed channel marks that observer dead and it
//! is pruned, without affecting delivery to the others. Input from observers
//! is forwarded to the live process through a single ordered command channel,
//! unless the hub is read-only.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::supervisor::process::{ExitInfo, ProcessCommand, TerminalSize};
use crate::terminal::MetricsSnapshot;
use crate::utils::lock_mutex_recover;

/// Reason sent with `inputRejected` in read-only mode
pub const READ_ONLY_REASON: &str = "read-only mode";

/// Serialize raw bytes as a base64 string
mod base64_bytes {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// Messages sent from the relay to observers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ObserverEvent {
    /// Live output chunk
    Output {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    /// Catch-up payload sent once on attach
    Replay {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    #[serde(rename_all = "camelCase")]
    Status {
        metrics: Option<MetricsSnapshot>,
        waiting_for_input: bool,
    },
    #[serde(rename_all = "camelCase")]
    ProcessStarted { generation: u64, pid: Option<u32> },
    #[serde(rename_all = "camelCase")]
    ProcessExited {
        generation: u64,
        code: Option<u32>,
        signal: Option<String>,
    },
    InputRejected { reason: String },
}

impl ObserverEvent {
    pub fn output(data: &[u8]) -> Self {
        Self::Output {
            data: data.to_vec(),
        }
    }

    pub fn status(metrics: Option<&MetricsSnapshot>, waiting_for_input: bool) -> Self {
        Self::Status {
            metrics: metrics.cloned(),
            waiting_for_input,
        }
    }

    pub fn exited(generation: u64, exit: &ExitInfo) -> Self {
        Self::ProcessExited {
            generation,
            code: exit.code,
            signal: exit.signal.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Messages sent from observers to the relay
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    Input { data: String },
    /// Signed so that negative geometry parses and is then rejected
    Resize { cols: i64, rows: i64 },
    RequestStatus,
}

/// One attached observer
#[derive(Debug)]
pub struct ObserverConnection {
    id: Uuid,
    tx: mpsc::UnboundedSender<ObserverEvent>,
    alive: AtomicBool,
    attached_at: DateTime<Utc>,
}

impl ObserverConnection {
    /// Create a connection and the receiving end its transport drains
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ObserverEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Self {
            id: Uuid::new_v4(),
            tx,
            alive: AtomicBool::new(true),
            attached_at: Utc::now(),
        });
        (connection, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn attached_at(&self) -> DateTime<Utc> {
        self.attached_at
    }

    /// Queue an event; a closed transport flips the liveness flag
    pub fn send(&self, event: ObserverEvent) -> bool {
        if self.tx.send(event).is_err() {
            self.alive.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }
}

/// Registry of attached observers
pub struct ObserverHub {
    observers: Mutex<HashMap<Uuid, Arc<ObserverConnection>>>,
    commands: mpsc::UnboundedSender<ProcessCommand>,
    read_only: bool,
}

impl ObserverHub {
    pub fn new(read_only: bool, commands: mpsc::UnboundedSender<ProcessCommand>) -> Self {
        Self {
            observers: Mutex::new(HashMap::new()),
            commands,
            read_only,
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Register an observer and send it the catch-up state.
    ///
    /// The caller must hold the stream state for the duration of the call so
    /// that no chunk is broadcast between the catch-up and the registration.
    pub fn attach(
        &self,
        connection: Arc<ObserverConnection>,
        replay: &[u8],
        metrics: Option<&MetricsSnapshot>,
        waiting_for_input: bool,
    ) {
        if !replay.is_empty() {
            connection.send(ObserverEvent::Replay {
                data: replay.to_vec(),
            });
        }
        if metrics.is_some() || waiting_for_input {
            connection.send(ObserverEvent::status(metrics, waiting_for_input));
        }

        let id = connection.id();
        let count = {
            let mut observers = lock_mutex_recover(&self.observers);
            observers.insert(id, connection);
            observers.len()
        };
        log::info!(
            "Observer {} attached ({} bytes replayed, {} attached)",
            id,
            replay.len(),
            count
        );
    }

    pub fn detach(&self, id: Uuid) -> bool {
        let removed = lock_mutex_recover(&self.observers).remove(&id).is_some();
        if removed {
            log::info!("Observer {} detached", id);
        }
        removed
    }

    /// Drop every observer; their event channels close once the last
    /// reference to each connection is gone.
    pub fn detach_all(&self) -> usize {
        let drained: Vec<_> = lock_mutex_recover(&self.observers).drain().collect();
        if !drained.is_empty() {
            log::info!("Detached {} observers", drained.len());
        }
        drained.len()
    }

    /// Deliver an event to every observer. Dead observers are pruned.
    pub fn broadcast(&self, event: ObserverEvent) {
        let mut observers = lock_mutex_recover(&self.observers);
        let mut dead = Vec::new();

        for (id, connection) in observers.iter() {
            if !connection.send(event.clone()) {
                dead.push(*id);
            }
        }

        for id in dead {
            observers.remove(&id);
            log::warn!("Observer {} unreachable, dropped", id);
        }
    }

    /// Send an event to one observer
    pub fn send_to(&self, id: Uuid, event: ObserverEvent) -> bool {
        let connection = lock_mutex_recover(&self.observers).get(&id).cloned();
        match connection {
            Some(connection) => connection.send(event),
            None => false,
        }
    }

    /// Forward observer input to the process, or reject it in read-only mode
    pub fn route_input(&self, id: Uuid, data: Vec<u8>) -> bool {
        if self.read_only {
            log::debug!("Rejected {} input bytes from {} (read-only)", data.len(), id);
            self.send_to(
                id,
                ObserverEvent::InputRejected {
                    reason: READ_ONLY_REASON.to_string(),
                },
            );
            return false;
        }

        if data.is_empty() {
            return false;
        }
        self.commands.send(ProcessCommand::Input(data)).is_ok()
    }

    /// Forward a resize request; invalid geometry is ignored
    pub fn route_resize(&self, cols: i64, rows: i64) -> bool {
        if self.read_only {
            return false;
        }
        match TerminalSize::from_request(cols, rows) {
            Some(size) => self.commands.send(ProcessCommand::Resize(size)).is_ok(),
            None => {
                log::debug!("Ignoring invalid resize {}x{}", cols, rows);
                false
            }
        }
    }

    pub fn observer_count(&self) -> usize {
        lock_mutex_recover(&self.observers).len()
    }

    pub fn observer_ids(&self) -> Vec<Uuid> {
        lock_mutex_recover(&self.observers).keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::MetricField;

    fn hub(read_only: bool) -> (ObserverHub, mpsc::UnboundedReceiver<ProcessCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ObserverHub::new(read_only, tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ObserverEvent>) -> Vec<ObserverEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_attach_sends_single_replay_then_status() {
        let (hub, _commands) = hub(false);
        let mut metrics = MetricsSnapshot::default();
        metrics.set(MetricField::TotalCost, "2.50");

        let (conn, mut rx) = ObserverConnection::new();
        hub.attach(conn, b"line 1\nline 2\n", Some(&metrics), false);

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                ObserverEvent::Replay {
                    data: b"line 1\nline 2\n".to_vec()
                },
                ObserverEvent::status(Some(&metrics), false),
            ]
        );
        assert_eq!(hub.observer_count(), 1);
    }

    #[test]
    fn test_attach_with_empty_state_sends_nothing() {
        let (hub, _commands) = hub(false);
        let (conn, mut rx) = ObserverConnection::new();
        hub.attach(conn, b"", None, false);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_broadcast_survives_dead_observer() {
        let (hub, _commands) = hub(false);
        let (alive, mut alive_rx) = ObserverConnection::new();
        let (dead, dead_rx) = ObserverConnection::new();
        let dead_handle = dead.clone();
        hub.attach(alive, b"", None, false);
        hub.attach(dead, b"", None, false);
        drop(dead_rx);

        hub.broadcast(ObserverEvent::output(b"one"));
        hub.broadcast(ObserverEvent::output(b"two"));

        assert_eq!(
            drain(&mut alive_rx),
            vec![ObserverEvent::output(b"one"), ObserverEvent::output(b"two")]
        );
        assert!(!dead_handle.is_alive());
        assert_eq!(hub.observer_count(), 1);
    }

    #[test]
    fn test_detach() {
        let (hub, _commands) = hub(false);
        let (conn, mut rx) = ObserverConnection::new();
        let id = conn.id();
        hub.attach(conn, b"", None, false);

        assert!(hub.detach(id));
        assert!(!hub.detach(id));
        hub.broadcast(ObserverEvent::output(b"late"));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_detach_all_closes_channels() {
        let (hub, _commands) = hub(false);
        let (first, mut first_rx) = ObserverConnection::new();
        let (second, mut second_rx) = ObserverConnection::new();
        hub.attach(first, b"", None, false);
        hub.attach(second, b"", None, false);

        assert_eq!(hub.detach_all(), 2);
        assert_eq!(hub.observer_count(), 0);
        assert!(matches!(
            first_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert!(matches!(
            second_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_route_input_preserves_order() {
        let (hub, mut commands) = hub(false);
        let (conn, _rx) = ObserverConnection::new();
        let id = conn.id();
        hub.attach(conn, b"", None, false);

        assert!(hub.route_input(id, b"y".to_vec()));
        assert!(hub.route_input(id, b"\n".to_vec()));
        assert_eq!(commands.try_recv().unwrap(), ProcessCommand::Input(b"y".to_vec()));
        assert_eq!(commands.try_recv().unwrap(), ProcessCommand::Input(b"\n".to_vec()));
    }

    #[test]
    fn test_read_only_rejects_input() {
        let (hub, mut commands) = hub(true);
        let (conn, mut rx) = ObserverConnection::new();
        let id = conn.id();
        hub.attach(conn, b"", None, false);

        assert!(!hub.route_input(id, b"rm -rf /\n".to_vec()));
        assert!(commands.try_recv().is_err());
        assert_eq!(
            drain(&mut rx),
            vec![ObserverEvent::InputRejected {
                reason: READ_ONLY_REASON.to_string()
            }]
        );
    }

    #[test]
    fn test_invalid_resize_is_ignored() {
        let (hub, mut commands) = hub(false);
        assert!(!hub.route_resize(0, 24));
        assert!(!hub.route_resize(80, -3));
        assert!(commands.try_recv().is_err());

        assert!(hub.route_resize(100, 30));
        assert_eq!(
            commands.try_recv().unwrap(),
            ProcessCommand::Resize(TerminalSize::new(100, 30))
        );
    }

    #[test]
    fn test_event_wire_format() {
        let json = ObserverEvent::output(b"hi").to_json().unwrap();
        assert_eq!(json, r#"{"type":"output","data":"aGk="}"#);

        let json = ObserverEvent::status(None, true).to_json().unwrap();
        assert_eq!(json, r#"{"type":"status","metrics":null,"waitingForInput":true}"#);

        let json = ObserverEvent::exited(3, &ExitInfo::with_code(1)).to_json().unwrap();
        assert_eq!(
            json,
            r#"{"type":"processExited","generation":3,"code":1,"signal":null}"#
        );

        let parsed: ObserverEvent =
            serde_json::from_str(r#"{"type":"replay","data":"bGluZSAxCg=="}"#).unwrap();
        assert_eq!(
            parsed,
            ObserverEvent::Replay {
                data: b"line 1\n".to_vec()
            }
        );
    }

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"input","data":"y\n"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::Input {
                data: "y\n".to_string()
            }
        );

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"resize","cols":-1,"rows":40}"#).unwrap();
        assert_eq!(msg, ClientMessage::Resize { cols: -1, rows: 40 });

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"requestStatus"}"#).unwrap();
        assert_eq!(msg, ClientMessage::RequestStatus);

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"shutdown"}"#).is_err());
    }
}
