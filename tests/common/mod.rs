//! Scripted in-memory transport shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use world_presence::protocol::names;
use world_presence::transport::{
    InboundReceiver, Transport, TransportError, TransportEvent, TransportStatus,
};
use world_presence::SessionConfig;

#[derive(Default)]
struct Script {
    connect_error: Option<String>,
    replies: HashMap<String, Result<Value, String>>,
    calls: Vec<(String, Value)>,
    sends: Vec<(String, Value)>,
    inbound: Option<mpsc::UnboundedSender<TransportEvent>>,
    status: Option<TransportStatus>,
    latency: Option<Duration>,
}

/// Cheap to clone; every clone drives the same script, so a test keeps one
/// handle while the session owns another.
#[derive(Clone, Default)]
pub struct FakeTransport {
    script: Arc<Mutex<Script>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_connect(message: &str) -> Self {
        let t = Self::new();
        t.script.lock().connect_error = Some(message.to_string());
        t
    }

    pub fn reply(&self, name: &str, result: Result<Value, &str>) {
        self.script
            .lock()
            .replies
            .insert(name.to_string(), result.map_err(str::to_string));
    }

    pub fn set_latency(&self, latency: Duration) {
        self.script.lock().latency = Some(latency);
    }

    /// Deliver a named server message.
    pub fn push(&self, name: &str, payload: Value) {
        let tx = self.script.lock().inbound.clone();
        if let Some(tx) = tx {
            let _ = tx.send(TransportEvent::Message {
                name: name.to_string(),
                payload,
            });
        }
    }

    /// Simulate the server going away.
    pub fn drop_connection(&self) {
        let tx = {
            let mut script = self.script.lock();
            script.status = Some(TransportStatus::Closed);
            script.inbound.take()
        };
        if let Some(tx) = tx {
            let _ = tx.send(TransportEvent::Disconnected {
                manual: false,
                reason: Some("server went away".into()),
            });
        }
    }

    pub fn calls(&self, name: &str) -> Vec<Value> {
        self.script
            .lock()
            .calls
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn sends(&self, name: &str) -> Vec<Value> {
        self.script
            .lock()
            .sends
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

impl Transport for FakeTransport {
    async fn connect(&self) -> Result<InboundReceiver, TransportError> {
        let mut script = self.script.lock();
        if let Some(message) = script.connect_error.clone() {
            return Err(TransportError::ConnectFailed(message));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        script.inbound = Some(tx);
        script.status = Some(TransportStatus::Opened);
        Ok(rx)
    }

    async fn call(&self, name: &str, payload: Value) -> Result<Value, TransportError> {
        let mut script = self.script.lock();
        if script.inbound.is_none() {
            return Err(TransportError::NotConnected);
        }
        script.calls.push((name.to_string(), payload));
        match script.replies.get(name) {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(message)) => Err(TransportError::Rejected(message.clone())),
            None => Err(TransportError::Rejected(format!("no reply scripted for {name}"))),
        }
    }

    fn send(&self, name: &str, payload: Value) {
        let mut script = self.script.lock();
        if script.inbound.is_some() {
            script.sends.push((name.to_string(), payload));
        }
    }

    fn disconnect(&self, manual: bool) {
        let tx = {
            let mut script = self.script.lock();
            script.status = Some(TransportStatus::Closed);
            script.inbound.take()
        };
        if let Some(tx) = tx {
            let _ = tx.send(TransportEvent::Disconnected {
                manual,
                reason: None,
            });
        }
    }

    fn status(&self) -> TransportStatus {
        self.script.lock().status.unwrap_or(TransportStatus::Closed)
    }

    fn last_heartbeat_latency(&self) -> Option<Duration> {
        self.script.lock().latency
    }
}

pub fn config() -> SessionConfig {
    SessionConfig::new("fake:0", "secret", "u1", "lobby")
}

pub fn join_reply(world_name: &str) -> Value {
    json!({
        "current_user": { "id": "u1", "name": "Me", "visual_id": 7 },
        "world_state": {
            "id": "w1",
            "name": world_name,
            "participants": [
                { "id": "u1", "name": "Me", "visual_id": 7 },
                { "id": "u2", "name": "Bob", "visual_id": 42 }
            ]
        }
    })
}

/// A transport that accepts the join into `world_name`.
pub fn joinable(world_name: &str) -> FakeTransport {
    let t = FakeTransport::new();
    t.reply(names::JOIN_SUB_WORLD, Ok(join_reply(world_name)));
    t
}

pub fn user_states(entries: Value) -> Value {
    json!({ "entries": entries })
}

/// A `server/UserStates` payload placing `id` at `(x, 0, z)`.
pub fn placed_at(id: &str, x: f32, z: f32) -> Value {
    let mut entries = serde_json::Map::new();
    entries.insert(
        id.to_string(),
        json!({ "position": { "x": x, "y": 0.0, "z": z } }),
    );
    user_states(Value::Object(entries))
}
