//! Shared-cache capability seam. The engagement engine, taunt director and
//! game-state cache mirror their state through this trait; when no external
//! cache is configured the in-memory binding keeps the same semantics and
//! the system degrades to single-process state.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

#[async_trait]
pub trait SharedCache: Send + Sync {
    /// Returns the stored JSON value, or `None` on miss or expiry.
    async fn get_json(&self, key: &str) -> Option<Value>;

    /// Stores a JSON value with a TTL. Errors are handled inside the
    /// binding; callers treat the cache as best-effort.
    async fn set_json(&self, key: &str, value: Value, ttl: Duration);

    /// Appends to a bounded list, trimming to `max` newest entries.
    async fn push_log(&self, key: &str, entry: Value, max: usize, ttl: Duration);

    /// Reads the bounded list, newest last.
    async fn read_log(&self, key: &str) -> Vec<Value>;

    async fn delete(&self, key: &str);

    /// Liveness for the health endpoint.
    fn connected(&self) -> bool;
}

#[derive(Clone, Debug)]
struct CacheEntry {
    value: Value,
    expires_at_ms: u64,
}

#[derive(Clone, Debug)]
struct LogEntry {
    items: Vec<Value>,
    expires_at_ms: u64,
}

/// In-process binding. TTLs are enforced lazily on read and on write, the
/// way the taunt director prunes its history windows.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    logs: Mutex<HashMap<String, LogEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn now_ms() -> u64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

#[async_trait]
impl SharedCache for MemoryCache {
    async fn get_json(&self, key: &str) -> Option<Value> {
        let now_ms = Self::now_ms();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at_ms > now_ms => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set_json(&self, key: &str, value: Value, ttl: Duration) {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at_ms: Self::now_ms().saturating_add(ttl.as_millis() as u64),
            },
        );
    }

    async fn push_log(&self, key: &str, entry: Value, max: usize, ttl: Duration) {
        let now_ms = Self::now_ms();
        let mut logs = self.logs.lock().await;
        let log = logs.entry(key.to_string()).or_insert_with(|| LogEntry {
            items: Vec::new(),
            expires_at_ms: 0,
        });
        if log.expires_at_ms <= now_ms {
            log.items.clear();
        }
        log.items.push(entry);
        if log.items.len() > max {
            let excess = log.items.len() - max;
            log.items.drain(..excess);
        }
        log.expires_at_ms = now_ms.saturating_add(ttl.as_millis() as u64);
    }

    async fn read_log(&self, key: &str) -> Vec<Value> {
        let now_ms = Self::now_ms();
        let mut logs = self.logs.lock().await;
        match logs.get(key) {
            Some(log) if log.expires_at_ms > now_ms => log.items.clone(),
            Some(_) => {
                logs.remove(key);
                Vec::new()
            }
            None => Vec::new(),
        }
    }

    async fn delete(&self, key: &str) {
        self.entries.lock().await.remove(key);
        self.logs.lock().await.remove(key);
    }

    fn connected(&self) -> bool {
        true
    }
}

pub fn room_state_key(room_id: &str) -> String {
    format!("room:{room_id}:state")
}

pub fn room_moves_key(room_id: &str) -> String {
    format!("room:{room_id}:moves")
}

pub fn momentum_key(room_id: &str, player_id: &str) -> String {
    format!("engagement:{room_id}:player:{player_id}:momentum")
}

pub fn force_state_key(room_id: &str) -> String {
    format!("engagement:{room_id}:force-state")
}

pub fn story_director_key(room_id: &str) -> String {
    format!("engagement:{room_id}:story-director")
}

pub fn taunt_state_key(room_id: &str) -> String {
    format!("taunt:{room_id}:state")
}
