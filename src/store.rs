//! Durable store seam. The production binding is MongoDB; the in-memory
//! binding backs tests and degraded single-process operation when no
//! `MONGODB_URI` is configured. Both enforce the `(roomId, userId)` seat
//! uniqueness the join path relies on.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, to_bson};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, IndexModel};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::types::{GameEventDoc, RoomDoc, RoomStatus, RuntimePersist, SeatDoc, TeamDoc, UserDoc};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate key")]
    Duplicate,
    #[error("database error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Duplicate => ApiError::conflict("already joined"),
            StoreError::Backend(detail) => {
                warn!(%detail, "store backend failure");
                ApiError::Internal
            }
        }
    }
}

#[async_trait]
pub trait GameStore: Send + Sync {
    fn kind(&self) -> &'static str;
    async fn connected(&self) -> bool;
    fn new_id(&self) -> String;

    async fn find_user_by_token(&self, token: &str) -> StoreResult<Option<UserDoc>>;
    async fn get_user(&self, id: &str) -> StoreResult<Option<UserDoc>>;
    async fn upsert_user(&self, user: &UserDoc) -> StoreResult<()>;

    async fn insert_room(&self, room: &RoomDoc) -> StoreResult<()>;
    async fn get_room(&self, id: &str) -> StoreResult<Option<RoomDoc>>;
    async fn find_room_by_code(&self, code: &str) -> StoreResult<Option<RoomDoc>>;
    async fn list_public_waiting(&self) -> StoreResult<Vec<RoomDoc>>;
    async fn update_room(&self, room: &RoomDoc) -> StoreResult<()>;
    /// Write-behind target: replaces only the runtime subset under the room
    /// key. At-least-once and idempotent by construction.
    async fn save_runtime(&self, room_id: &str, persist: &RuntimePersist) -> StoreResult<()>;
    async fn delete_room(&self, id: &str) -> StoreResult<()>;

    /// Fails with `StoreError::Duplicate` when the user already has a seat
    /// in the room.
    async fn insert_seat(&self, seat: &SeatDoc) -> StoreResult<()>;
    async fn get_seat(&self, room_id: &str, user_id: &str) -> StoreResult<Option<SeatDoc>>;
    async fn get_seat_by_id(&self, seat_id: &str) -> StoreResult<Option<SeatDoc>>;
    async fn list_seats(&self, room_id: &str) -> StoreResult<Vec<SeatDoc>>;
    async fn update_seat(&self, seat: &SeatDoc) -> StoreResult<()>;
    async fn delete_seat(&self, room_id: &str, user_id: &str) -> StoreResult<()>;

    async fn upsert_team(&self, team: &TeamDoc) -> StoreResult<()>;
    async fn delete_teams(&self, room_id: &str) -> StoreResult<()>;
    async fn list_teams(&self, room_id: &str) -> StoreResult<Vec<TeamDoc>>;

    async fn append_event(&self, event: &GameEventDoc) -> StoreResult<()>;
    async fn recent_events(&self, room_id: &str, limit: usize) -> StoreResult<Vec<GameEventDoc>>;
}

// ---------------------------------------------------------------------------
// MongoDB binding
// ---------------------------------------------------------------------------

pub struct MongoStore {
    client: Client,
    rooms: Collection<RoomDoc>,
    seats: Collection<SeatDoc>,
    teams: Collection<TeamDoc>,
    events: Collection<GameEventDoc>,
    users: Collection<UserDoc>,
}

impl MongoStore {
    pub async fn connect(uri: &str) -> StoreResult<Self> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|error| StoreError::Backend(error.to_string()))?;
        let db = client.database("ludo_arena");
        let store = Self {
            rooms: db.collection("rooms"),
            seats: db.collection("roomPlayers"),
            teams: db.collection("roomTeams"),
            events: db.collection("gameEvents"),
            users: db.collection("users"),
            client,
        };
        store.ensure_indexes().await?;
        info!("mongodb store connected");
        Ok(store)
    }

    async fn ensure_indexes(&self) -> StoreResult<()> {
        let unique = |keys| {
            IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().unique(true).build())
                .build()
        };
        self.rooms
            .create_index(unique(doc! { "id": 1 }))
            .await
            .map_err(backend)?;
        self.rooms
            .create_index(unique(doc! { "code": 1 }))
            .await
            .map_err(backend)?;
        self.seats
            .create_index(unique(doc! { "roomId": 1, "userId": 1 }))
            .await
            .map_err(backend)?;
        self.seats
            .create_index(unique(doc! { "id": 1 }))
            .await
            .map_err(backend)?;
        self.teams
            .create_index(unique(doc! { "roomId": 1, "teamIndex": 1 }))
            .await
            .map_err(backend)?;
        self.events
            .create_index(
                IndexModel::builder()
                    .keys(doc! { "roomId": 1, "createdAtMs": -1 })
                    .build(),
            )
            .await
            .map_err(backend)?;
        self.users
            .create_index(unique(doc! { "id": 1 }))
            .await
            .map_err(backend)?;
        Ok(())
    }
}

fn backend(error: mongodb::error::Error) -> StoreError {
    StoreError::Backend(error.to_string())
}

fn classify_write_error(error: mongodb::error::Error) -> StoreError {
    use mongodb::error::{ErrorKind, WriteFailure};
    if let ErrorKind::Write(WriteFailure::WriteError(write_error)) = error.kind.as_ref() {
        if write_error.code == 11000 {
            return StoreError::Duplicate;
        }
    }
    backend(error)
}

#[async_trait]
impl GameStore for MongoStore {
    fn kind(&self) -> &'static str {
        "mongo"
    }

    async fn connected(&self) -> bool {
        self.client
            .database("ludo_arena")
            .run_command(doc! { "ping": 1 })
            .await
            .is_ok()
    }

    fn new_id(&self) -> String {
        ObjectId::new().to_hex()
    }

    async fn find_user_by_token(&self, token: &str) -> StoreResult<Option<UserDoc>> {
        self.users
            .find_one(doc! { "token": token })
            .await
            .map_err(backend)
    }

    async fn get_user(&self, id: &str) -> StoreResult<Option<UserDoc>> {
        self.users.find_one(doc! { "id": id }).await.map_err(backend)
    }

    async fn upsert_user(&self, user: &UserDoc) -> StoreResult<()> {
        let update = doc! { "$set": to_bson(user).map_err(|error| StoreError::Backend(error.to_string()))? };
        self.users
            .update_one(doc! { "id": &user.id }, update)
            .upsert(true)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn insert_room(&self, room: &RoomDoc) -> StoreResult<()> {
        self.rooms
            .insert_one(room)
            .await
            .map(|_| ())
            .map_err(classify_write_error)
    }

    async fn get_room(&self, id: &str) -> StoreResult<Option<RoomDoc>> {
        self.rooms.find_one(doc! { "id": id }).await.map_err(backend)
    }

    async fn find_room_by_code(&self, code: &str) -> StoreResult<Option<RoomDoc>> {
        self.rooms
            .find_one(doc! { "code": code })
            .await
            .map_err(backend)
    }

    async fn list_public_waiting(&self) -> StoreResult<Vec<RoomDoc>> {
        let cursor = self
            .rooms
            .find(doc! { "settings.visibility": "public", "status": "waiting" })
            .sort(doc! { "createdAtMs": -1 })
            .limit(50)
            .await
            .map_err(backend)?;
        cursor.try_collect().await.map_err(backend)
    }

    async fn update_room(&self, room: &RoomDoc) -> StoreResult<()> {
        self.rooms
            .replace_one(doc! { "id": &room.id }, room)
            .upsert(true)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn save_runtime(&self, room_id: &str, persist: &RuntimePersist) -> StoreResult<()> {
        let status =
            to_bson(&persist.status).map_err(|error| StoreError::Backend(error.to_string()))?;
        let board =
            to_bson(&persist.game_board).map_err(|error| StoreError::Backend(error.to_string()))?;
        self.rooms
            .update_one(
                doc! { "id": room_id },
                doc! { "$set": {
                    "status": status,
                    "currentPlayerIndex": persist.current_player_index as i64,
                    "gameBoard": board,
                } },
            )
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn delete_room(&self, id: &str) -> StoreResult<()> {
        self.rooms
            .delete_one(doc! { "id": id })
            .await
            .map_err(backend)?;
        self.seats
            .delete_many(doc! { "roomId": id })
            .await
            .map_err(backend)?;
        self.teams
            .delete_many(doc! { "roomId": id })
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn insert_seat(&self, seat: &SeatDoc) -> StoreResult<()> {
        self.seats
            .insert_one(seat)
            .await
            .map(|_| ())
            .map_err(classify_write_error)
    }

    async fn get_seat(&self, room_id: &str, user_id: &str) -> StoreResult<Option<SeatDoc>> {
        self.seats
            .find_one(doc! { "roomId": room_id, "userId": user_id })
            .await
            .map_err(backend)
    }

    async fn get_seat_by_id(&self, seat_id: &str) -> StoreResult<Option<SeatDoc>> {
        self.seats
            .find_one(doc! { "id": seat_id })
            .await
            .map_err(backend)
    }

    async fn list_seats(&self, room_id: &str) -> StoreResult<Vec<SeatDoc>> {
        let cursor = self
            .seats
            .find(doc! { "roomId": room_id })
            .await
            .map_err(backend)?;
        cursor.try_collect().await.map_err(backend)
    }

    async fn update_seat(&self, seat: &SeatDoc) -> StoreResult<()> {
        self.seats
            .replace_one(doc! { "id": &seat.id }, seat)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn delete_seat(&self, room_id: &str, user_id: &str) -> StoreResult<()> {
        self.seats
            .delete_one(doc! { "roomId": room_id, "userId": user_id })
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn upsert_team(&self, team: &TeamDoc) -> StoreResult<()> {
        let update = doc! { "$set": to_bson(team).map_err(|error| StoreError::Backend(error.to_string()))? };
        self.teams
            .update_one(
                doc! { "roomId": &team.room_id, "teamIndex": team.team_index as i64 },
                update,
            )
            .upsert(true)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn delete_teams(&self, room_id: &str) -> StoreResult<()> {
        self.teams
            .delete_many(doc! { "roomId": room_id })
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn list_teams(&self, room_id: &str) -> StoreResult<Vec<TeamDoc>> {
        let cursor = self
            .teams
            .find(doc! { "roomId": room_id })
            .sort(doc! { "teamIndex": 1 })
            .await
            .map_err(backend)?;
        cursor.try_collect().await.map_err(backend)
    }

    async fn append_event(&self, event: &GameEventDoc) -> StoreResult<()> {
        self.events
            .insert_one(event)
            .await
            .map(|_| ())
            .map_err(backend)
    }

    async fn recent_events(&self, room_id: &str, limit: usize) -> StoreResult<Vec<GameEventDoc>> {
        let cursor = self
            .events
            .find(doc! { "roomId": room_id })
            .sort(doc! { "createdAtMs": -1 })
            .limit(limit.clamp(1, 200) as i64)
            .await
            .map_err(backend)?;
        cursor.try_collect().await.map_err(backend)
    }
}

// ---------------------------------------------------------------------------
// In-memory binding
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryTables {
    rooms: HashMap<String, RoomDoc>,
    seats: Vec<SeatDoc>,
    teams: Vec<TeamDoc>,
    events: Vec<GameEventDoc>,
    users: HashMap<String, UserDoc>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<MemoryTables>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GameStore for MemoryStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn connected(&self) -> bool {
        true
    }

    fn new_id(&self) -> String {
        format!("id_{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    async fn find_user_by_token(&self, token: &str) -> StoreResult<Option<UserDoc>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|user| user.token == token)
            .cloned())
    }

    async fn get_user(&self, id: &str) -> StoreResult<Option<UserDoc>> {
        let tables = self.tables.lock().await;
        Ok(tables.users.get(id).cloned())
    }

    async fn upsert_user(&self, user: &UserDoc) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn insert_room(&self, room: &RoomDoc) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables.rooms.contains_key(&room.id)
            || tables.rooms.values().any(|other| other.code == room.code)
        {
            return Err(StoreError::Duplicate);
        }
        tables.rooms.insert(room.id.clone(), room.clone());
        Ok(())
    }

    async fn get_room(&self, id: &str) -> StoreResult<Option<RoomDoc>> {
        let tables = self.tables.lock().await;
        Ok(tables.rooms.get(id).cloned())
    }

    async fn find_room_by_code(&self, code: &str) -> StoreResult<Option<RoomDoc>> {
        let tables = self.tables.lock().await;
        Ok(tables.rooms.values().find(|room| room.code == code).cloned())
    }

    async fn list_public_waiting(&self) -> StoreResult<Vec<RoomDoc>> {
        let tables = self.tables.lock().await;
        let mut rooms: Vec<RoomDoc> = tables
            .rooms
            .values()
            .filter(|room| {
                room.status == RoomStatus::Waiting
                    && room.settings.visibility == crate::types::Visibility::Public
            })
            .cloned()
            .collect();
        rooms.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
        rooms.truncate(50);
        Ok(rooms)
    }

    async fn update_room(&self, room: &RoomDoc) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.rooms.insert(room.id.clone(), room.clone());
        Ok(())
    }

    async fn save_runtime(&self, room_id: &str, persist: &RuntimePersist) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(room) = tables.rooms.get_mut(room_id) {
            room.status = persist.status;
            room.current_player_index = persist.current_player_index;
            room.game_board = Some(persist.game_board.clone());
        }
        Ok(())
    }

    async fn delete_room(&self, id: &str) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.rooms.remove(id);
        tables.seats.retain(|seat| seat.room_id != id);
        tables.teams.retain(|team| team.room_id != id);
        Ok(())
    }

    async fn insert_seat(&self, seat: &SeatDoc) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if tables
            .seats
            .iter()
            .any(|other| other.room_id == seat.room_id && other.user_id == seat.user_id)
        {
            return Err(StoreError::Duplicate);
        }
        tables.seats.push(seat.clone());
        Ok(())
    }

    async fn get_seat(&self, room_id: &str, user_id: &str) -> StoreResult<Option<SeatDoc>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .seats
            .iter()
            .find(|seat| seat.room_id == room_id && seat.user_id == user_id)
            .cloned())
    }

    async fn get_seat_by_id(&self, seat_id: &str) -> StoreResult<Option<SeatDoc>> {
        let tables = self.tables.lock().await;
        Ok(tables.seats.iter().find(|seat| seat.id == seat_id).cloned())
    }

    async fn list_seats(&self, room_id: &str) -> StoreResult<Vec<SeatDoc>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .seats
            .iter()
            .filter(|seat| seat.room_id == room_id)
            .cloned()
            .collect())
    }

    async fn update_seat(&self, seat: &SeatDoc) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(stored) = tables.seats.iter_mut().find(|other| other.id == seat.id) {
            *stored = seat.clone();
        }
        Ok(())
    }

    async fn delete_seat(&self, room_id: &str, user_id: &str) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables
            .seats
            .retain(|seat| !(seat.room_id == room_id && seat.user_id == user_id));
        Ok(())
    }

    async fn upsert_team(&self, team: &TeamDoc) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(stored) = tables
            .teams
            .iter_mut()
            .find(|other| other.room_id == team.room_id && other.team_index == team.team_index)
        {
            *stored = team.clone();
        } else {
            tables.teams.push(team.clone());
        }
        Ok(())
    }

    async fn delete_teams(&self, room_id: &str) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.teams.retain(|team| team.room_id != room_id);
        Ok(())
    }

    async fn list_teams(&self, room_id: &str) -> StoreResult<Vec<TeamDoc>> {
        let tables = self.tables.lock().await;
        let mut teams: Vec<TeamDoc> = tables
            .teams
            .iter()
            .filter(|team| team.room_id == room_id)
            .cloned()
            .collect();
        teams.sort_by_key(|team| team.team_index);
        Ok(teams)
    }

    async fn append_event(&self, event: &GameEventDoc) -> StoreResult<()> {
        let mut tables = self.tables.lock().await;
        tables.events.push(event.clone());
        Ok(())
    }

    async fn recent_events(&self, room_id: &str, limit: usize) -> StoreResult<Vec<GameEventDoc>> {
        let tables = self.tables.lock().await;
        let mut events: Vec<GameEventDoc> = tables
            .events
            .iter()
            .filter(|event| event.room_id == room_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
        events.truncate(limit.clamp(1, 200));
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Color, GameEventType, RoomMode, RoomSettings, SeatStatus, TauntMode, Visibility,
    };

    fn room(id: &str, code: &str) -> RoomDoc {
        RoomDoc {
            id: id.to_string(),
            code: code.to_string(),
            host_seat_id: None,
            settings: RoomSettings {
                max_players: 2,
                mode: RoomMode::Individual,
                visibility: Visibility::Public,
                team_names: Vec::new(),
                taunt_mode: TauntMode::Suggestion,
            },
            status: RoomStatus::Waiting,
            current_player_index: 0,
            game_board: None,
            seats: Vec::new(),
            created_at_ms: 1,
        }
    }

    fn seat(id: &str, room_id: &str, user_id: &str) -> SeatDoc {
        SeatDoc {
            id: id.to_string(),
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
            user_name: "Player".to_string(),
            color: Color::Red,
            position: 0,
            team_index: None,
            status: SeatStatus::Waiting,
            ready: false,
        }
    }

    #[tokio::test]
    async fn seat_uniqueness_is_enforced() {
        let store = MemoryStore::new();
        store.insert_room(&room("r1", "ABC123")).await.expect("room");
        store.insert_seat(&seat("s1", "r1", "u1")).await.expect("seat");
        let duplicate = store.insert_seat(&seat("s2", "r1", "u1")).await;
        assert!(matches!(duplicate, Err(StoreError::Duplicate)));
        // Same user in another room is fine.
        store.insert_room(&room("r2", "XYZ789")).await.expect("room");
        store.insert_seat(&seat("s3", "r2", "u1")).await.expect("seat");
    }

    #[tokio::test]
    async fn room_codes_are_unique() {
        let store = MemoryStore::new();
        store.insert_room(&room("r1", "ABC123")).await.expect("room");
        let duplicate = store.insert_room(&room("r2", "ABC123")).await;
        assert!(matches!(duplicate, Err(StoreError::Duplicate)));
    }

    #[tokio::test]
    async fn recent_events_return_newest_first_with_limit() {
        let store = MemoryStore::new();
        for index in 0..5u64 {
            store
                .append_event(&GameEventDoc {
                    room_id: "r1".to_string(),
                    event_type: GameEventType::DiceRoll,
                    actor_user_id: None,
                    actor_seat_id: None,
                    revision: index,
                    payload: serde_json::json!({ "n": index }),
                    created_at_ms: 1_000 + index,
                })
                .await
                .expect("event");
        }
        let events = store.recent_events("r1", 3).await.expect("events");
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].revision, 4);
        assert_eq!(events[2].revision, 2);
    }

    #[tokio::test]
    async fn save_runtime_updates_the_persisted_subset() {
        let store = MemoryStore::new();
        store.insert_room(&room("r1", "ABC123")).await.expect("room");

        let board = crate::types::GameBoardState::new_for_colors(&[Color::Red, Color::Yellow]);
        store
            .save_runtime(
                "r1",
                &RuntimePersist {
                    status: RoomStatus::InProgress,
                    current_player_index: 1,
                    game_board: board,
                },
            )
            .await
            .expect("save");

        let stored = store.get_room("r1").await.expect("get").expect("room");
        assert_eq!(stored.status, RoomStatus::InProgress);
        assert_eq!(stored.current_player_index, 1);
        assert!(stored.game_board.is_some());
    }

    #[tokio::test]
    async fn delete_room_cascades_to_seats_and_teams() {
        let store = MemoryStore::new();
        store.insert_room(&room("r1", "ABC123")).await.expect("room");
        store.insert_seat(&seat("s1", "r1", "u1")).await.expect("seat");
        store
            .upsert_team(&TeamDoc {
                room_id: "r1".to_string(),
                team_index: 0,
                name: "Team A".to_string(),
                seat_ids: vec!["s1".to_string()],
            })
            .await
            .expect("team");

        store.delete_room("r1").await.expect("delete");
        assert!(store.get_room("r1").await.expect("get").is_none());
        assert!(store.list_seats("r1").await.expect("seats").is_empty());
        assert!(store.list_teams("r1").await.expect("teams").is_empty());
    }

    #[tokio::test]
    async fn token_lookup_finds_the_user() {
        let store = MemoryStore::new();
        store
            .upsert_user(&UserDoc {
                id: "u1".to_string(),
                name: "Alice".to_string(),
                token: "tok-1".to_string(),
            })
            .await
            .expect("user");
        let user = store.find_user_by_token("tok-1").await.expect("lookup");
        assert_eq!(user.map(|user| user.id), Some("u1".to_string()));
        assert!(store
            .find_user_by_token("tok-2")
            .await
            .expect("lookup")
            .is_none());
    }
}
