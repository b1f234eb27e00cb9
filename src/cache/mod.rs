//! Write-behind game-state cache. Holds the authoritative runtime state of
//! every active room, serializes mutations per room through a fair async
//! mutex, mirrors state into the shared cache, and persists dirty rooms to
//! the durable store on a timer (and synchronously on shutdown).

pub mod shared;

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::json;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::store::GameStore;
use crate::types::{GameBoardState, RoomDoc, RoomStatus, RuntimePersist};

use self::shared::{room_moves_key, room_state_key, SharedCache};

/// Authoritative per-room runtime state. Only ever mutated while holding
/// the room's exclusive guard.
#[derive(Clone, Debug)]
pub struct RuntimeState {
    pub room_id: String,
    pub status: RoomStatus,
    pub current_player_index: usize,
    pub board: GameBoardState,
    pub started_at_ms: u64,
    pub dirty: bool,
}

impl RuntimeState {
    pub fn persist(&self) -> RuntimePersist {
        RuntimePersist {
            status: self.status,
            current_player_index: self.current_player_index,
            game_board: self.board.clone(),
        }
    }
}

type Slot = Arc<Mutex<Option<RuntimeState>>>;

/// Exclusive handle on one room's runtime state, FIFO-fair per room.
pub type RoomGuard = OwnedMutexGuard<Option<RuntimeState>>;

pub struct GameStateCache {
    slots: DashMap<String, Slot>,
    shared: Arc<dyn SharedCache>,
    state_ttl: Duration,
    move_log_ttl: Duration,
    move_log_max: usize,
}

impl GameStateCache {
    pub fn new(
        shared: Arc<dyn SharedCache>,
        state_ttl: Duration,
        move_log_ttl: Duration,
        move_log_max: usize,
    ) -> Self {
        Self {
            slots: DashMap::new(),
            shared,
            state_ttl,
            move_log_ttl,
            move_log_max,
        }
    }

    /// Acquires the room's serialization lock. Waiters on the same room are
    /// queued in submission order; distinct rooms do not contend.
    pub async fn exclusive(&self, room_id: &str) -> RoomGuard {
        let slot = self
            .slots
            .entry(room_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();
        slot.lock_owned().await
    }

    /// Loads runtime state into an empty slot from the durable room doc,
    /// preferring a shared-cache copy when its revision is at least as new
    /// (warm recovery after a restart).
    pub async fn hydrate(&self, guard: &mut RoomGuard, room: &RoomDoc) {
        if guard.is_some() {
            return;
        }
        let from_doc = room.game_board.clone().map(|board| RuntimeState {
            room_id: room.id.clone(),
            status: room.status,
            current_player_index: room.current_player_index,
            board,
            started_at_ms: room.created_at_ms,
            dirty: false,
        });

        let from_cache = self
            .shared
            .get_json(&room_state_key(&room.id))
            .await
            .and_then(|value| serde_json::from_value::<RuntimePersist>(value).ok());

        let chosen = match (from_doc, from_cache) {
            (Some(doc_state), Some(cached))
                if cached.game_board.revision >= doc_state.board.revision =>
            {
                debug!(room_id = %room.id, "hydrated room state from shared cache");
                Some(RuntimeState {
                    room_id: room.id.clone(),
                    status: cached.status,
                    current_player_index: cached.current_player_index,
                    board: cached.game_board,
                    started_at_ms: room.created_at_ms,
                    dirty: false,
                })
            }
            (Some(doc_state), _) => Some(doc_state),
            (None, _) => None,
        };
        **guard = chosen;
    }

    /// Installs a fresh runtime state (game start), marking it dirty so the
    /// next flush persists it.
    pub fn prime(&self, guard: &mut RoomGuard, mut state: RuntimeState) {
        state.dirty = true;
        **guard = Some(state);
    }

    /// Marks the guarded state dirty and mirrors it to the shared cache;
    /// called after every successful mutation, still inside the critical
    /// section so emitted revisions stay ordered.
    pub async fn mark_dirty(&self, guard: &mut RoomGuard) {
        let Some(state) = guard.as_mut() else {
            return;
        };
        state.dirty = true;
        let key = room_state_key(&state.room_id);
        let persist = state.persist();
        match serde_json::to_value(&persist) {
            Ok(value) => self.shared.set_json(&key, value, self.state_ttl).await,
            Err(error) => warn!(room_id = %state.room_id, %error, "state mirror failed"),
        }
    }

    /// Appends a compact entry to the room's recent-moves log.
    pub async fn record_move(&self, room_id: &str, entry: serde_json::Value) {
        self.shared
            .push_log(
                &room_moves_key(room_id),
                entry,
                self.move_log_max,
                self.move_log_ttl,
            )
            .await;
    }

    /// Read-only snapshot for views and diagnostics.
    pub async fn snapshot(&self, room_id: &str) -> Option<RuntimeState> {
        let slot = self.slots.get(room_id)?.clone();
        let guard = slot.lock().await;
        guard.clone()
    }

    /// Drops the room from memory and the shared cache.
    pub async fn evict(&self, room_id: &str) {
        self.slots.remove(room_id);
        self.shared.delete(&room_state_key(room_id)).await;
        self.shared.delete(&room_moves_key(room_id)).await;
    }

    /// One flush pass: snapshots every dirty room, clears the flag, then
    /// writes to the store outside all room locks. Failed writes re-mark
    /// the room dirty for the next tick.
    pub async fn flush_once(&self, store: &Arc<dyn GameStore>) -> usize {
        let room_ids: Vec<String> = self
            .slots
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let mut pending: Vec<(String, RuntimePersist)> = Vec::new();
        for room_id in room_ids {
            let Some(slot) = self.slots.get(&room_id).map(|entry| entry.clone()) else {
                continue;
            };
            let mut guard = slot.lock().await;
            if let Some(state) = guard.as_mut() {
                if state.dirty {
                    state.dirty = false;
                    pending.push((room_id.clone(), state.persist()));
                }
            }
        }

        let mut flushed = 0;
        for (room_id, persist) in pending {
            match store.save_runtime(&room_id, &persist).await {
                Ok(()) => flushed += 1,
                Err(error) => {
                    warn!(room_id = %room_id, %error, "runtime flush failed; will retry");
                    if let Some(slot) = self.slots.get(&room_id).map(|entry| entry.clone()) {
                        let mut guard = slot.lock().await;
                        if let Some(state) = guard.as_mut() {
                            state.dirty = true;
                        }
                    }
                }
            }
        }
        flushed
    }

    /// Background write-behind loop. Aborted on shutdown after a final
    /// synchronous `flush_once`.
    pub fn spawn_flusher(
        self: &Arc<Self>,
        store: Arc<dyn GameStore>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let flushed = cache.flush_once(&store).await;
                if flushed > 0 {
                    debug!(flushed, "runtime states persisted");
                }
            }
        })
    }

    /// Final flush for shutdown paths.
    pub async fn shutdown(&self, store: &Arc<dyn GameStore>) {
        let flushed = self.flush_once(store).await;
        info!(flushed, "final state flush complete");
    }

    /// Compact move-log entry helper shared by roll/move paths.
    pub fn move_log_entry(revision: u64, kind: &str, detail: serde_json::Value) -> serde_json::Value {
        json!({
            "revision": revision,
            "kind": kind,
            "detail": detail,
        })
    }
}
