//! Room-scoped pub/sub to connected clients. The coordinator publishes
//! through the `Broadcaster` seam; the WebSocket binding tracks clients and
//! their room subscriptions, the null and recording bindings back tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Clone, Debug)]
pub enum OutboundMessage {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueuePolicy {
    DropOnFull,
    DisconnectOnFull,
}

pub trait Broadcaster: Send + Sync {
    /// Publishes an event on the room topic `room:{id}`.
    fn publish_room(&self, room_id: &str, event: &str, payload: Value);
    /// Publishes an event on a user's private topic `user:{id}`.
    fn publish_user(&self, user_id: &str, event: &str, payload: Value);
}

pub struct NullBroadcaster;

impl Broadcaster for NullBroadcaster {
    fn publish_room(&self, _room_id: &str, _event: &str, _payload: Value) {}
    fn publish_user(&self, _user_id: &str, _event: &str, _payload: Value) {}
}

/// Captures published events in order; used by the integration tests to
/// assert patch contents and revision ordering.
#[derive(Default)]
pub struct RecordingBroadcaster {
    pub events: Mutex<Vec<(String, String, Value)>>,
}

impl RecordingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<(String, String, Value)> {
        std::mem::take(&mut *self.events.lock().expect("events lock"))
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn publish_room(&self, room_id: &str, event: &str, payload: Value) {
        self.events.lock().expect("events lock").push((
            format!("room:{room_id}"),
            event.to_string(),
            payload,
        ));
    }

    fn publish_user(&self, user_id: &str, event: &str, payload: Value) {
        self.events.lock().expect("events lock").push((
            format!("user:{user_id}"),
            event.to_string(),
            payload,
        ));
    }
}

struct ClientHandle {
    tx: mpsc::Sender<OutboundMessage>,
    user_id: String,
    rooms: HashSet<String>,
}

/// WebSocket fan-out registry. One outbound channel per client, fed by
/// `try_send` so a slow consumer can never stall a room's critical section.
#[derive(Default)]
pub struct WsBroadcaster {
    clients: DashMap<u64, ClientHandle>,
    next_client_id: AtomicU64,
}

impl WsBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, user_id: &str, tx: mpsc::Sender<OutboundMessage>) -> u64 {
        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.clients.insert(
            client_id,
            ClientHandle {
                tx,
                user_id: user_id.to_string(),
                rooms: HashSet::new(),
            },
        );
        client_id
    }

    pub fn unregister(&self, client_id: u64) {
        self.clients.remove(&client_id);
    }

    pub fn join_room(&self, client_id: u64, room_id: &str) {
        if let Some(mut client) = self.clients.get_mut(&client_id) {
            client.rooms.insert(room_id.to_string());
        }
    }

    pub fn leave_room(&self, client_id: u64, room_id: &str) {
        if let Some(mut client) = self.clients.get_mut(&client_id) {
            client.rooms.remove(room_id);
        }
    }

    pub fn connected_clients(&self) -> usize {
        self.clients.len()
    }

    fn send_where<F>(&self, predicate: F, message: &Value, policy: QueuePolicy)
    where
        F: Fn(&ClientHandle) -> bool,
    {
        let payload = message.to_string();
        let mut failed: Vec<u64> = Vec::new();
        for entry in self.clients.iter() {
            if !predicate(entry.value()) {
                continue;
            }
            if entry
                .value()
                .tx
                .try_send(OutboundMessage::Text(payload.clone()))
                .is_err()
            {
                failed.push(*entry.key());
            }
        }
        if policy == QueuePolicy::DisconnectOnFull {
            for client_id in failed {
                if let Some((_, client)) = self.clients.remove(&client_id) {
                    let _ = client.tx.try_send(OutboundMessage::Close {
                        code: 1013,
                        reason: "outbound queue overflow".to_string(),
                    });
                    debug!(client_id, "client dropped on overflow");
                }
            }
        }
    }
}

fn envelope(event: &str, room_id: Option<&str>, payload: Value) -> Value {
    let mut message = json!({ "type": event });
    if let Some(room_id) = room_id {
        message["roomId"] = json!(room_id);
    }
    if let Value::Object(fields) = payload {
        for (key, value) in fields {
            message[key] = value;
        }
    }
    message
}

impl Broadcaster for WsBroadcaster {
    fn publish_room(&self, room_id: &str, event: &str, payload: Value) {
        let message = envelope(event, Some(room_id), payload);
        self.send_where(
            |client| client.rooms.contains(room_id),
            &message,
            QueuePolicy::DropOnFull,
        );
    }

    fn publish_user(&self, user_id: &str, event: &str, payload: Value) {
        let message = envelope(event, None, payload);
        self.send_where(
            |client| client.user_id == user_id,
            &message,
            QueuePolicy::DropOnFull,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(rx: &mut mpsc::Receiver<OutboundMessage>) -> Vec<Value> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let OutboundMessage::Text(text) = message {
                messages.push(serde_json::from_str(&text).expect("json"));
            }
        }
        messages
    }

    #[tokio::test]
    async fn room_events_reach_only_subscribers() {
        let broadcaster = WsBroadcaster::new();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        let client_a = broadcaster.register("user-a", tx_a);
        let _client_b = broadcaster.register("user-b", tx_b);

        broadcaster.join_room(client_a, "r1");
        broadcaster.publish_room("r1", "dice:roll", json!({ "dice": 4 }));

        let received = drain(&mut rx_a);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["type"], "dice:roll");
        assert_eq!(received[0]["roomId"], "r1");
        assert_eq!(received[0]["dice"], 4);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn user_events_are_private() {
        let broadcaster = WsBroadcaster::new();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        broadcaster.register("user-a", tx_a);
        broadcaster.register("user-b", tx_b);

        broadcaster.publish_user("user-b", "room:taunt-suggestions", json!({ "n": 1 }));
        assert!(drain(&mut rx_a).is_empty());
        let received = drain(&mut rx_b);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0]["type"], "room:taunt-suggestions");
    }

    #[tokio::test]
    async fn leaving_a_room_stops_delivery() {
        let broadcaster = WsBroadcaster::new();
        let (tx, mut rx) = mpsc::channel(8);
        let client = broadcaster.register("user-a", tx);
        broadcaster.join_room(client, "r1");
        broadcaster.leave_room(client, "r1");
        broadcaster.publish_room("r1", "move", json!({}));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn recording_broadcaster_keeps_order() {
        let recorder = RecordingBroadcaster::new();
        recorder.publish_room("r1", "a", json!({ "n": 1 }));
        recorder.publish_user("u1", "b", json!({ "n": 2 }));
        let events = recorder.take();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, "room:r1");
        assert_eq!(events[1].0, "user:u1");
        assert!(recorder.take().is_empty());
    }
}
