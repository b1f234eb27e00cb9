//! Room coordinator: lifecycle and in-game operations. Every mutation of a
//! room's runtime state happens inside that room's exclusive section, bumps
//! the revision exactly once, and leaves as a revision-stamped patch on the
//! room topic before the audit event is appended.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{SecondsFormat, Utc};
use rand::Rng as _;
use serde_json::{json, Value};
use tracing::warn;

use crate::board::{color_order, team_index_for_slot};
use crate::broadcast::Broadcaster;
use crate::cache::{GameStateCache, RuntimeState};
use crate::constants::{MOVE_GRACE_MS, ROOM_CODE_LEN};
use crate::engagement::context::rank_context;
use crate::engagement::momentum::RollReport;
use crate::engagement::{sides_for, DiceRequest, EngagementEngine};
use crate::error::{ApiError, ApiResult};
use crate::rng::Rng;
use crate::rules::{
    advance_turn, apply_move, check_win, controlled_colors, effective_dice_for, find_valid_moves,
    grants_extra_turn, send_to_base, stack_members, CapturedToken,
};
use crate::store::GameStore;
use crate::taunt::{
    TauntDirector, TauntDispatch, TauntEventInput, TauntEventMeta, TauntRoomContext, TauntTrigger,
};
use crate::types::{
    Color, GameBoardState, GameEventDoc, GameEventType, RoomDoc, RoomMode, RoomSettings,
    RoomStatus, SeatDoc, SeatStatus, TauntMode, TeamDoc, UserDoc, ValidMove, Visibility,
    WinnerEntry,
};

const ROOM_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ROOM_CODE_RETRIES: usize = 5;

pub struct Coordinator {
    store: Arc<dyn GameStore>,
    cache: Arc<GameStateCache>,
    engagement: Arc<EngagementEngine>,
    taunts: Arc<TauntDirector>,
    broadcaster: Arc<dyn Broadcaster>,
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| {
            let index = rng.random_range(0..ROOM_CODE_CHARSET.len());
            ROOM_CODE_CHARSET[index] as char
        })
        .collect()
}

fn ordered(mut seats: Vec<SeatDoc>) -> Vec<SeatDoc> {
    seats.sort_by_key(|seat| seat.position);
    seats
}

fn seat_for_color<'a>(seats: &'a [SeatDoc], color: Color) -> Option<&'a SeatDoc> {
    seats.iter().find(|seat| seat.color == color)
}

/// The seat whose turn it is: the stored seat id wins, the cached ordinal
/// is the fallback.
fn resolve_current_seat<'a>(state: &RuntimeState, seats: &'a [SeatDoc]) -> Option<&'a SeatDoc> {
    if let Some(current_id) = state.board.current_player_id.as_deref() {
        if let Some(seat) = seats.iter().find(|seat| seat.id == current_id) {
            return Some(seat);
        }
    }
    if seats.is_empty() {
        return None;
    }
    seats.get(state.current_player_index.min(seats.len() - 1))
}

/// Seats ranked by progress, best first. Feeds taunt targeting.
fn standings<'a>(seats: &'a [SeatDoc], board: &GameBoardState) -> Vec<(&'a SeatDoc, i64)> {
    let mut rows: Vec<(&SeatDoc, i64)> = seats
        .iter()
        .map(|seat| {
            let score = board
                .tokens
                .get(&seat.color)
                .map(|tokens| {
                    tokens
                        .iter()
                        .map(crate::engagement::context::token_progress)
                        .sum()
                })
                .unwrap_or(0);
            (seat, score)
        })
        .collect();
    rows.sort_by(|a, b| b.1.cmp(&a.1));
    rows
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn GameStore>,
        cache: Arc<GameStateCache>,
        engagement: Arc<EngagementEngine>,
        taunts: Arc<TauntDirector>,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            store,
            cache,
            engagement,
            taunts,
            broadcaster,
        }
    }

    pub fn store(&self) -> &Arc<dyn GameStore> {
        &self.store
    }

    // -----------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------

    pub async fn create_room(
        &self,
        user: &UserDoc,
        max_players: u8,
        mode: RoomMode,
        visibility: Visibility,
        selected_color: Option<Color>,
        taunt_mode: TauntMode,
    ) -> ApiResult<Value> {
        if !(2..=6).contains(&max_players) {
            return Err(ApiError::validation("maxPlayers must be between 2 and 6"));
        }
        if mode == RoomMode::Team && !(max_players == 4 || max_players == 6) {
            return Err(ApiError::validation("team mode requires 4 or 6 players"));
        }

        let order = color_order(max_players);
        let color = selected_color
            .filter(|color| order.contains(color))
            .unwrap_or(order[0]);
        let position = order
            .iter()
            .position(|&candidate| candidate == color)
            .unwrap_or(0) as u8;

        let room_id = self.store.new_id();
        let seat = SeatDoc {
            id: self.store.new_id(),
            room_id: room_id.clone(),
            user_id: user.id.clone(),
            user_name: user.name.clone(),
            color,
            position,
            team_index: (mode == RoomMode::Team).then(|| team_index_for_slot(position, max_players)),
            status: SeatStatus::Waiting,
            ready: false,
        };

        let team_names = if mode == RoomMode::Team {
            (0..max_players / 2)
                .map(|index| format!("Team {}", (b'A' + index) as char))
                .collect()
        } else {
            Vec::new()
        };

        let mut room = RoomDoc {
            id: room_id.clone(),
            code: generate_room_code(),
            host_seat_id: Some(seat.id.clone()),
            settings: RoomSettings {
                max_players,
                mode,
                visibility,
                team_names,
                taunt_mode,
            },
            status: RoomStatus::Waiting,
            current_player_index: 0,
            game_board: None,
            seats: vec![seat.id.clone()],
            created_at_ms: now_ms(),
        };

        let mut inserted = false;
        for _ in 0..ROOM_CODE_RETRIES {
            match self.store.insert_room(&room).await {
                Ok(()) => {
                    inserted = true;
                    break;
                }
                Err(crate::store::StoreError::Duplicate) => {
                    room.code = generate_room_code();
                }
                Err(error) => return Err(error.into()),
            }
        }
        if !inserted {
            return Err(ApiError::Internal);
        }
        self.store.insert_seat(&seat).await?;

        self.record_event(
            &room.id,
            GameEventType::RoomCreated,
            Some(&user.id),
            Some(&seat.id),
            0,
            json!({ "code": room.code, "maxPlayers": max_players }),
        )
        .await;

        self.room_view(&room.id).await
    }

    pub async fn list_rooms(&self) -> ApiResult<Value> {
        let rooms = self.store.list_public_waiting().await?;
        let mut listed = Vec::new();
        for room in rooms {
            let seats = self.store.list_seats(&room.id).await?;
            listed.push(json!({
                "id": room.id,
                "code": room.code,
                "maxPlayers": room.settings.max_players,
                "mode": room.settings.mode,
                "tauntMode": room.settings.taunt_mode,
                "playerCount": seats.len(),
                "createdAtMs": room.created_at_ms,
            }));
        }
        Ok(json!(listed))
    }

    pub async fn room_view(&self, room_id: &str) -> ApiResult<Value> {
        let room = self.require_room(room_id).await?;
        let seats = ordered(self.store.list_seats(room_id).await?);
        let teams = self.store.list_teams(room_id).await?;

        // A live runtime copy supersedes the durable snapshot.
        let (status, current_player_index, board) = match self.cache.snapshot(room_id).await {
            Some(runtime)
                if runtime.board.revision
                    >= room
                        .game_board
                        .as_ref()
                        .map(|board| board.revision)
                        .unwrap_or(0) =>
            {
                (
                    runtime.status,
                    runtime.current_player_index,
                    Some(runtime.board),
                )
            }
            _ => (room.status, room.current_player_index, room.game_board),
        };

        let seat_views: Vec<Value> = seats
            .iter()
            .map(|seat| {
                json!({
                    "id": seat.id,
                    "userId": seat.user_id,
                    "userName": seat.user_name,
                    "color": seat.color,
                    "position": seat.position,
                    "teamIndex": seat.team_index,
                    "status": seat.status,
                    "ready": seat.ready,
                    "isHost": room.host_seat_id.as_deref() == Some(seat.id.as_str()),
                })
            })
            .collect();

        Ok(json!({
            "id": room.id,
            "code": room.code,
            "hostSeatId": room.host_seat_id,
            "settings": room.settings,
            "status": status,
            "currentPlayerIndex": current_player_index,
            "gameBoard": board,
            "seats": seat_views,
            "teams": teams,
        }))
    }

    pub async fn join_room(
        &self,
        user: &UserDoc,
        code_or_id: &str,
        by_code: bool,
        selected_color: Option<Color>,
    ) -> ApiResult<Value> {
        let room = if by_code {
            self.store
                .find_room_by_code(&code_or_id.trim().to_ascii_uppercase())
                .await?
                .ok_or_else(|| ApiError::not_found("room not found"))?
        } else {
            self.require_room(code_or_id).await?
        };

        if room.status != RoomStatus::Waiting {
            return Err(ApiError::conflict("ROOM_NOT_JOINABLE"));
        }
        let seats = self.store.list_seats(&room.id).await?;
        if seats.len() >= room.settings.max_players as usize {
            return Err(ApiError::conflict("ROOM_FULL"));
        }

        let order = color_order(room.settings.max_players);
        let pick_color = |taken: &[SeatDoc]| -> Option<Color> {
            let requested = selected_color.filter(|color| {
                order.contains(color) && !taken.iter().any(|seat| seat.color == *color)
            });
            requested.or_else(|| {
                order
                    .iter()
                    .copied()
                    .find(|color| !taken.iter().any(|seat| seat.color == *color))
            })
        };

        let color = pick_color(&seats).ok_or_else(|| ApiError::conflict("ROOM_FULL"))?;
        let position = order
            .iter()
            .position(|&candidate| candidate == color)
            .unwrap_or(0) as u8;

        let mut seat = SeatDoc {
            id: self.store.new_id(),
            room_id: room.id.clone(),
            user_id: user.id.clone(),
            user_name: user.name.clone(),
            color,
            position,
            team_index: (room.settings.mode == RoomMode::Team)
                .then(|| team_index_for_slot(position, room.settings.max_players)),
            status: SeatStatus::Waiting,
            ready: false,
        };
        self.store.insert_seat(&seat).await?;

        // Concurrent joiners can race onto one color; the loser re-picks
        // from the authoritative seat list once.
        let fresh = self.store.list_seats(&room.id).await?;
        let clash = fresh
            .iter()
            .any(|other| other.id != seat.id && other.color == seat.color);
        if clash {
            let others: Vec<SeatDoc> = fresh
                .iter()
                .filter(|other| other.id != seat.id)
                .cloned()
                .collect();
            let fallback = pick_color(&others).ok_or_else(|| ApiError::conflict("ROOM_FULL"))?;
            seat.color = fallback;
            seat.position = order
                .iter()
                .position(|&candidate| candidate == fallback)
                .unwrap_or(0) as u8;
            seat.team_index = (room.settings.mode == RoomMode::Team)
                .then(|| team_index_for_slot(seat.position, room.settings.max_players));
            self.store.update_seat(&seat).await?;
        }

        let mut room = room;
        room.seats.push(seat.id.clone());
        if room.host_seat_id.is_none() {
            room.host_seat_id = Some(seat.id.clone());
        }
        self.store.update_room(&room).await?;

        self.broadcaster.publish_room(
            &room.id,
            "room:player-joined",
            json!({ "seatId": seat.id, "userName": seat.user_name, "color": seat.color }),
        );
        self.record_event(
            &room.id,
            GameEventType::RoomPlayerJoined,
            Some(&user.id),
            Some(&seat.id),
            0,
            json!({ "color": seat.color }),
        )
        .await;

        self.room_view(&room.id).await
    }

    pub async fn leave_room(&self, user: &UserDoc, room_id: &str) -> ApiResult<Value> {
        let mut room = self.require_room(room_id).await?;
        let seat = self
            .store
            .get_seat(room_id, &user.id)
            .await?
            .ok_or_else(|| ApiError::not_found("seat not found"))?;

        self.store.delete_seat(room_id, &user.id).await?;
        room.seats.retain(|seat_id| seat_id != &seat.id);

        let remaining = ordered(self.store.list_seats(room_id).await?);
        if remaining.is_empty() {
            // Cascade delete: last player out takes the room with them.
            self.store.delete_room(room_id).await?;
            self.cache.evict(room_id).await;
            self.engagement
                .evict_room(room_id, std::slice::from_ref(&seat.id))
                .await;
            self.taunts.evict_room(room_id).await;
            return Ok(json!({ "deleted": true }));
        }

        if room.host_seat_id.as_deref() == Some(seat.id.as_str()) {
            room.host_seat_id = remaining.first().map(|seat| seat.id.clone());
        }
        self.store.update_room(&room).await?;

        self.broadcaster.publish_room(
            room_id,
            "room:player-left",
            json!({ "seatId": seat.id, "hostSeatId": room.host_seat_id }),
        );
        self.record_event(
            room_id,
            GameEventType::RoomPlayerLeft,
            Some(&user.id),
            Some(&seat.id),
            0,
            json!({}),
        )
        .await;

        Ok(json!({ "deleted": false, "hostSeatId": room.host_seat_id }))
    }

    pub async fn toggle_ready(&self, user: &UserDoc, room_id: &str) -> ApiResult<Value> {
        let room = self.require_room(room_id).await?;
        if room.status != RoomStatus::Waiting {
            return Err(ApiError::conflict("ROOM_NOT_JOINABLE"));
        }
        let mut seat = self
            .store
            .get_seat(room_id, &user.id)
            .await?
            .ok_or_else(|| ApiError::forbidden("not a member of this room"))?;
        seat.ready = !seat.ready;
        self.store.update_seat(&seat).await?;

        self.broadcaster.publish_room(
            room_id,
            "room:player-ready",
            json!({ "seatId": seat.id, "ready": seat.ready }),
        );
        self.record_event(
            room_id,
            GameEventType::RoomPlayerReady,
            Some(&user.id),
            Some(&seat.id),
            0,
            json!({ "ready": seat.ready }),
        )
        .await;

        Ok(json!({ "ready": seat.ready }))
    }

    pub async fn change_slot(
        &self,
        user: &UserDoc,
        room_id: &str,
        slot_index: u8,
    ) -> ApiResult<Value> {
        let room = self.require_room(room_id).await?;
        if room.settings.mode != RoomMode::Team {
            return Err(ApiError::validation("slot changes are a team mode feature"));
        }
        if room.status != RoomStatus::Waiting {
            return Err(ApiError::conflict("ROOM_NOT_JOINABLE"));
        }
        if slot_index >= room.settings.max_players {
            return Err(ApiError::validation("slotIndex out of range"));
        }

        let seats = self.store.list_seats(room_id).await?;
        let mut seat = seats
            .iter()
            .find(|seat| seat.user_id == user.id)
            .cloned()
            .ok_or_else(|| ApiError::forbidden("not a member of this room"))?;
        if seats
            .iter()
            .any(|other| other.id != seat.id && other.position == slot_index)
        {
            return Err(ApiError::conflict("slot already taken"));
        }

        let order = color_order(room.settings.max_players);
        seat.position = slot_index;
        seat.color = order[slot_index as usize];
        seat.team_index = Some(team_index_for_slot(slot_index, room.settings.max_players));
        self.store.update_seat(&seat).await?;

        self.broadcaster.publish_room(
            room_id,
            "room:slot-change",
            json!({ "seatId": seat.id, "slotIndex": slot_index, "color": seat.color }),
        );
        self.record_event(
            room_id,
            GameEventType::RoomSlotChange,
            Some(&user.id),
            Some(&seat.id),
            0,
            json!({ "slotIndex": slot_index }),
        )
        .await;

        self.room_view(room_id).await
    }

    pub async fn set_team_names(
        &self,
        user: &UserDoc,
        room_id: &str,
        team_names: Vec<String>,
    ) -> ApiResult<Value> {
        let mut room = self.require_room(room_id).await?;
        if room.settings.mode != RoomMode::Team {
            return Err(ApiError::validation("team names are a team mode feature"));
        }
        if room.status != RoomStatus::Waiting {
            return Err(ApiError::conflict("ROOM_NOT_JOINABLE"));
        }
        self.require_host(&room, &user.id).await?;
        if team_names.len() != room.settings.team_count() {
            return Err(ApiError::validation("wrong number of team names"));
        }
        if team_names
            .iter()
            .any(|name| name.trim().is_empty() || name.len() > 24)
        {
            return Err(ApiError::validation("team names must be 1-24 characters"));
        }

        room.settings.team_names = team_names.clone();
        self.store.update_room(&room).await?;

        self.broadcaster.publish_room(
            room_id,
            "room:team-names",
            json!({ "teamNames": team_names }),
        );
        self.record_event(
            room_id,
            GameEventType::RoomTeamNames,
            Some(&user.id),
            None,
            0,
            json!({ "teamNames": team_names }),
        )
        .await;

        Ok(json!({ "teamNames": room.settings.team_names }))
    }

    pub async fn start_game(&self, user: &UserDoc, room_id: &str) -> ApiResult<Value> {
        let mut room = self.require_room(room_id).await?;
        if room.status != RoomStatus::Waiting {
            return Err(ApiError::conflict("game already started"));
        }
        self.require_host(&room, &user.id).await?;

        let seats = ordered(self.store.list_seats(room_id).await?);
        if seats.len() < 2 {
            return Err(ApiError::conflict("need at least 2 players"));
        }
        if seats.iter().any(|seat| !seat.ready) {
            return Err(ApiError::conflict("all players must be ready"));
        }

        let colors: Vec<Color> = seats.iter().map(|seat| seat.color).collect();
        let mut board = GameBoardState::new_for_colors(&colors);
        let start_index = rand::rng().random_range(0..seats.len());
        board.current_player_id = Some(seats[start_index].id.clone());
        board.push_log("Game started");
        board.revision = 1;

        let started_at_ms = now_ms();
        let patch;
        {
            let mut guard = self.cache.exclusive(room_id).await;
            self.cache.prime(
                &mut guard,
                RuntimeState {
                    room_id: room_id.to_string(),
                    status: RoomStatus::InProgress,
                    current_player_index: start_index,
                    board: board.clone(),
                    started_at_ms,
                    dirty: true,
                },
            );
            self.cache.mark_dirty(&mut guard).await;
            patch = json!({
                "revision": board.revision,
                "status": RoomStatus::InProgress,
                "currentPlayerIndex": start_index,
                "gameBoard": board,
            });
            self.broadcaster
                .publish_room(room_id, "game:start", json!({ "patch": patch }));
        }

        room.status = RoomStatus::InProgress;
        room.current_player_index = start_index;
        room.game_board = Some(board.clone());
        self.store.update_room(&room).await?;

        for seat in &seats {
            let mut playing = seat.clone();
            playing.status = SeatStatus::Playing;
            self.store.update_seat(&playing).await?;
        }

        if room.settings.mode == RoomMode::Team {
            let half = room.settings.max_players / 2;
            for team_index in 0..half {
                let members: Vec<String> = seats
                    .iter()
                    .filter(|seat| seat.team_index == Some(team_index))
                    .map(|seat| seat.id.clone())
                    .collect();
                let name = room
                    .settings
                    .team_names
                    .get(team_index as usize)
                    .cloned()
                    .unwrap_or_else(|| format!("Team {}", team_index + 1));
                self.store
                    .upsert_team(&TeamDoc {
                        room_id: room_id.to_string(),
                        team_index,
                        name,
                        seat_ids: members,
                    })
                    .await?;
            }
        }

        self.record_event(
            room_id,
            GameEventType::GameStart,
            Some(&user.id),
            Some(&seats[start_index].id),
            board.revision,
            json!({ "startIndex": start_index }),
        )
        .await;

        Ok(patch)
    }

    // -----------------------------------------------------------------
    // In-game operations
    // -----------------------------------------------------------------

    pub async fn roll_dice(&self, user: &UserDoc, room_id: &str) -> ApiResult<Value> {
        let room = self.require_room(room_id).await?;
        let seats = ordered(self.store.list_seats(room_id).await?);
        let seat_ids: Vec<String> = seats.iter().map(|seat| seat.id.clone()).collect();

        let mut guard = self.cache.exclusive(room_id).await;
        self.cache.hydrate(&mut guard, &room).await;
        let response;
        let event_revision;
        let actor_seat_id;
        let event_payload;
        {
            let state = guard
                .as_mut()
                .ok_or_else(|| ApiError::conflict("game not started"))?;
            if state.status == RoomStatus::Completed {
                return Err(ApiError::conflict("game already completed"));
            }
            if state.status != RoomStatus::InProgress {
                return Err(ApiError::conflict("game not started"));
            }

            let current_seat = resolve_current_seat(state, &seats)
                .cloned()
                .ok_or(ApiError::Internal)?;
            if current_seat.user_id != user.id {
                return Err(ApiError::forbidden("NOT_YOUR_TURN"));
            }
            if state.board.dice_value.is_some() {
                return Err(ApiError::conflict("ALREADY_ROLLED"));
            }
            if room.settings.mode == RoomMode::Individual
                && state
                    .board
                    .winners
                    .iter()
                    .any(|winner| winner.seat_id == current_seat.id)
            {
                return Err(ApiError::forbidden("WINNER_CANNOT_ROLL"));
            }

            let controlled: Vec<Color> = controlled_colors(
                current_seat.color,
                room.settings.mode,
                room.settings.max_players,
            )
            .into_iter()
            .filter(|color| state.board.tokens.contains_key(color))
            .collect();

            let now = now_ms();
            let mut rng = Rng::from_entropy();
            let rolled = self
                .engagement
                .roll(
                    &DiceRequest {
                        room_id,
                        seat_id: &current_seat.id,
                        player_color: current_seat.color,
                        controlled: &controlled,
                        tokens: &state.board.tokens,
                        mode: room.settings.mode,
                        max_players: room.settings.max_players,
                        elapsed_ms: now.saturating_sub(state.started_at_ms),
                    },
                    &mut rng,
                )
                .await;

            let valid_moves =
                find_valid_moves(&state.board.tokens, current_seat.color, rolled.face, &controlled);
            let has_moves = !valid_moves.is_empty();
            let all_in_base = controlled
                .iter()
                .filter_map(|color| state.board.tokens.get(color))
                .flatten()
                .all(|token| token.status == crate::types::TokenStatus::Base || token.is_home());

            if has_moves {
                state.board.dice_value = Some(rolled.face);
                state.board.last_roll_at = Some(now);
                state.board.valid_moves = valid_moves.clone();
                state
                    .board
                    .push_log(format!("{} rolled a {}", current_seat.user_name, rolled.face));
            } else {
                // No playable token: the turn rotates inside this same
                // request and the patch carries the advanced player.
                let next = advance_turn(
                    state.current_player_index,
                    &seat_ids,
                    &state.board.winners,
                    room.settings.mode == RoomMode::Individual,
                );
                state.current_player_index = next;
                state.board.current_player_id = Some(seat_ids[next].clone());
                state.board.dice_value = None;
                state.board.valid_moves.clear();
                state.board.last_roll_at = None;
                state.board.push_log(format!(
                    "{} rolled a {}, no move",
                    current_seat.user_name, rolled.face
                ));
            }
            state.board.revision += 1;
            event_revision = state.board.revision;

            self.engagement
                .report_outcome(
                    room_id,
                    &current_seat.id,
                    RollReport {
                        rolled_value: rolled.face,
                        had_valid_move: has_moves,
                        all_in_base,
                        was_forced: rolled.forced,
                    },
                )
                .await;

            // Social layer.
            let sides = sides_for(&state.board.tokens, room.settings.mode, room.settings.max_players);
            let rank = rank_context(&state.board.tokens, &controlled, &sides);
            let mut taunt_events = Vec::new();
            if rolled.face == 6 {
                taunt_events.push(self.taunt_event(
                    TauntTrigger::RolledSix,
                    &current_seat,
                    None,
                    TauntEventMeta {
                        actor_was_last: rank.is_last,
                        ..TauntEventMeta::default()
                    },
                ));
            }
            let unfinished = seats.len().saturating_sub(state.board.winners.len());
            if rolled.face >= 5 && unfinished <= 2 {
                taunt_events.push(self.taunt_event(
                    TauntTrigger::ClutchRoll,
                    &current_seat,
                    None,
                    TauntEventMeta::default(),
                ));
            }
            if rank.is_last && has_moves {
                taunt_events.push(self.taunt_event(
                    TauntTrigger::LastPlace,
                    &current_seat,
                    None,
                    TauntEventMeta {
                        actor_was_last: true,
                        ..TauntEventMeta::default()
                    },
                ));
            }
            self.dispatch_taunts(room_id, &room.settings, &seats, &state.board, taunt_events, now)
                .await;

            self.cache.mark_dirty(&mut guard).await;
            let state = guard.as_ref().expect("state present");
            let patch = json!({
                "revision": state.board.revision,
                "currentPlayerIndex": state.current_player_index,
                "gameBoard": {
                    "diceValue": state.board.dice_value,
                    "validMoves": state.board.valid_moves,
                    "currentPlayerId": state.board.current_player_id,
                    "lastRollAt": state.board.last_roll_at,
                },
            });
            self.broadcaster.publish_room(
                room_id,
                "dice:roll",
                json!({ "patch": patch, "dice": rolled.face, "valid": has_moves }),
            );
            self.cache
                .record_move(
                    room_id,
                    GameStateCache::move_log_entry(
                        state.board.revision,
                        "dice:roll",
                        json!({ "seatId": current_seat.id, "dice": rolled.face }),
                    ),
                )
                .await;
            response = json!({ "dice": rolled.face, "valid": has_moves, "patch": patch });
            actor_seat_id = current_seat.id;
            event_payload = json!({ "dice": rolled.face, "valid": has_moves });
        }
        drop(guard);

        // Audit trail lands after the patch, outside the critical section.
        self.record_event(
            room_id,
            GameEventType::DiceRoll,
            Some(&user.id),
            Some(&actor_seat_id),
            event_revision,
            event_payload,
        )
        .await;

        Ok(response)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn make_move(
        &self,
        user: &UserDoc,
        room_id: &str,
        token_id: u8,
        move_color: Color,
        dice_value: u8,
        _enter_home: Option<bool>,
    ) -> ApiResult<Value> {
        let room = self.require_room(room_id).await?;
        let seats = ordered(self.store.list_seats(room_id).await?);
        let seat_ids: Vec<String> = seats.iter().map(|seat| seat.id.clone()).collect();

        let mut guard = self.cache.exclusive(room_id).await;
        self.cache.hydrate(&mut guard, &room).await;

        let mut finished_seat_ids: Vec<String> = Vec::new();
        let response;
        let event_revision;
        let actor_seat_id;
        let event_payload;
        {
            let state = guard
                .as_mut()
                .ok_or_else(|| ApiError::conflict("game not started"))?;
            if state.status == RoomStatus::Completed {
                return Err(ApiError::conflict("game already completed"));
            }
            if state.status != RoomStatus::InProgress {
                return Err(ApiError::conflict("game not started"));
            }

            let current_seat = resolve_current_seat(state, &seats)
                .cloned()
                .ok_or(ApiError::Internal)?;
            if current_seat.user_id != user.id {
                return Err(ApiError::forbidden("NOT_YOUR_TURN"));
            }
            let Some(outstanding) = state.board.dice_value else {
                return Err(ApiError::conflict("DICE_MISMATCH"));
            };
            if outstanding != dice_value {
                return Err(ApiError::conflict("DICE_MISMATCH"));
            }
            if !state.board.valid_moves.contains(&ValidMove {
                token_id,
                color: move_color,
            }) {
                return Err(ApiError::conflict("INVALID_MOVE"));
            }

            let controlled: Vec<Color> = controlled_colors(
                current_seat.color,
                room.settings.mode,
                room.settings.max_players,
            )
            .into_iter()
            .filter(|color| state.board.tokens.contains_key(color))
            .collect();
            if !controlled.contains(&move_color) {
                return Err(ApiError::forbidden("INVALID_TEAM_COLOR"));
            }

            let sides = sides_for(&state.board.tokens, room.settings.mode, room.settings.max_players);
            let rank_before = rank_context(&state.board.tokens, &controlled, &sides);

            let chosen = *state
                .board
                .token(move_color, token_id)
                .ok_or_else(|| ApiError::not_found("token not found"))?;
            let Some((effective, _)) =
                effective_dice_for(&state.board.tokens, &chosen, dice_value, &controlled)
            else {
                return Err(ApiError::conflict("INVALID_MOVE"));
            };
            let members = stack_members(&state.board.tokens, &chosen, &controlled);
            let stack_len = members.len();

            let mut captured_all: Vec<CapturedToken> = Vec::new();
            let mut any_home = false;
            let mut released = false;
            let mut entered_safe = false;
            for member in &members {
                let Some(token) = state.board.token(member.color, member.token_id).copied() else {
                    continue;
                };
                let was_base = token.status == crate::types::TokenStatus::Base;
                let was_home = token.is_home();
                let outcome = apply_move(
                    &token,
                    effective,
                    &state.board.tokens,
                    &controlled,
                    stack_len,
                );

                if let Some(slot) = state.board.token_mut(member.color, member.token_id) {
                    *slot = outcome.token;
                }
                for victim in &outcome.captured {
                    if let Some(victim_token) =
                        state.board.token_mut(victim.color, victim.token_id)
                    {
                        send_to_base(victim_token);
                    }
                    if !captured_all.contains(victim) {
                        captured_all.push(*victim);
                    }
                }

                if outcome.token.is_home() && !was_home {
                    any_home = true;
                }
                if was_base && !outcome.token.is_home()
                    && outcome.token.status != crate::types::TokenStatus::Base
                {
                    released = true;
                }
                if outcome.token.status == crate::types::TokenStatus::Safe
                    && crate::constants::on_main_track(outcome.token.position)
                {
                    entered_safe = true;
                }
            }

            for victim in &captured_all {
                let victim_name = seat_for_color(&seats, victim.color)
                    .map(|seat| seat.user_name.clone())
                    .unwrap_or_else(|| victim.color.as_str().to_string());
                state.board.push_log(format!(
                    "{} captured {}'s token",
                    current_seat.user_name, victim_name
                ));
            }

            // Win detection for every color the stack touched.
            let mut moved_colors: Vec<Color> = members.iter().map(|member| member.color).collect();
            moved_colors.dedup();
            for moved_color in moved_colors {
                if !check_win(&state.board.tokens, moved_color) {
                    continue;
                }
                let Some(winner_seat) = seat_for_color(&seats, moved_color) else {
                    continue;
                };
                if state
                    .board
                    .winners
                    .iter()
                    .any(|winner| winner.seat_id == winner_seat.id)
                {
                    continue;
                }
                let rank = state.board.winners.len() as u32 + 1;
                state.board.winners.push(WinnerEntry {
                    seat_id: winner_seat.id.clone(),
                    rank,
                });
                finished_seat_ids.push(winner_seat.id.clone());
                state
                    .board
                    .push_log(format!("{} finished #{rank}", winner_seat.user_name));
            }

            state.board.dice_value = None;
            state.board.valid_moves.clear();
            state.board.last_roll_at = None;

            let completed = state.board.winners.len() == seats.len();
            if completed {
                state.status = RoomStatus::Completed;
                state.board.push_log("Game over");
            } else if !grants_extra_turn(dice_value, !captured_all.is_empty(), any_home) {
                let next = advance_turn(
                    state.current_player_index,
                    &seat_ids,
                    &state.board.winners,
                    room.settings.mode == RoomMode::Individual,
                );
                state.current_player_index = next;
                state.board.current_player_id = Some(seat_ids[next].clone());
            }
            state.board.revision += 1;

            // Engagement and taunt bookkeeping inside the critical section
            // so the emitted patch reflects every dependent mutation.
            let now = now_ms();
            let mut taunt_events = Vec::new();
            if !captured_all.is_empty() {
                let victim_seat_ids: Vec<String> = captured_all
                    .iter()
                    .filter_map(|victim| seat_for_color(&seats, victim.color))
                    .map(|seat| seat.id.clone())
                    .collect::<std::collections::BTreeSet<_>>()
                    .into_iter()
                    .collect();
                self.engagement
                    .report_capture(room_id, &current_seat.id, move_color, &victim_seat_ids)
                    .await;

                for victim_seat_id in &victim_seat_ids {
                    let is_revenge = self
                        .taunts
                        .note_capture(room_id, &current_seat.id, victim_seat_id, now)
                        .await;
                    let victim_seat = seats.iter().find(|seat| &seat.id == victim_seat_id);
                    let target_was_leader = rank_before
                        .leader_colors
                        .iter()
                        .any(|leader| captured_all.iter().any(|victim| victim.color == *leader));
                    taunt_events.push(self.taunt_event(
                        if is_revenge {
                            TauntTrigger::RevengeKill
                        } else {
                            TauntTrigger::Captured
                        },
                        &current_seat,
                        Some(victim_seat_id.clone()),
                        TauntEventMeta {
                            actor_was_last: rank_before.is_last,
                            revenge_active: is_revenge,
                            target_was_leader,
                        },
                    ));
                    if let Some(victim_seat) = victim_seat {
                        taunt_events.push(self.taunt_event(
                            TauntTrigger::GotCaptured,
                            victim_seat,
                            Some(current_seat.id.clone()),
                            TauntEventMeta::default(),
                        ));
                    }
                }
            }
            if released {
                taunt_events.push(self.taunt_event(
                    TauntTrigger::ReleasedToken,
                    &current_seat,
                    None,
                    TauntEventMeta::default(),
                ));
            }
            if entered_safe {
                taunt_events.push(self.taunt_event(
                    TauntTrigger::EnteredSafe,
                    &current_seat,
                    None,
                    TauntEventMeta::default(),
                ));
            }

            let rank_after = rank_context(&state.board.tokens, &controlled, &sides);
            if rank_after.is_leader && rank_before.leader_key != rank_after.leader_key {
                taunt_events.push(self.taunt_event(
                    TauntTrigger::LeadChange,
                    &current_seat,
                    None,
                    TauntEventMeta {
                        actor_was_last: rank_before.is_last,
                        ..TauntEventMeta::default()
                    },
                ));
            }
            if rank_after.self_near_win && !rank_before.self_near_win {
                taunt_events.push(self.taunt_event(
                    TauntTrigger::NearWin,
                    &current_seat,
                    None,
                    TauntEventMeta::default(),
                ));
            }
            if rank_before.is_last && (released || any_home || !captured_all.is_empty()) {
                taunt_events.push(self.taunt_event(
                    TauntTrigger::LastPlace,
                    &current_seat,
                    None,
                    TauntEventMeta {
                        actor_was_last: true,
                        ..TauntEventMeta::default()
                    },
                ));
            }
            self.dispatch_taunts(room_id, &room.settings, &seats, &state.board, taunt_events, now)
                .await;

            self.cache.mark_dirty(&mut guard).await;
            let state = guard.as_ref().expect("state present");
            let patch = json!({
                "revision": state.board.revision,
                "status": state.status,
                "currentPlayerIndex": state.current_player_index,
                "gameBoard": state.board,
            });
            self.broadcaster.publish_room(
                room_id,
                "move",
                json!({
                    "patch": patch,
                    "tokenId": token_id,
                    "color": move_color,
                    "diceValue": dice_value,
                }),
            );
            self.cache
                .record_move(
                    room_id,
                    GameStateCache::move_log_entry(
                        state.board.revision,
                        "move",
                        json!({
                            "seatId": current_seat.id,
                            "tokenId": token_id,
                            "color": move_color,
                            "captured": captured_all.len(),
                        }),
                    ),
                )
                .await;
            response = json!({
                "gameBoard": state.board,
                "currentPlayerIndex": state.current_player_index,
                "status": state.status,
                "patch": patch,
            });
            actor_seat_id = current_seat.id;
            event_revision = state.board.revision;
            event_payload = json!({
                "tokenId": token_id,
                "color": move_color,
                "dice": dice_value,
                "captured": captured_all.len(),
            });
        }
        drop(guard);

        self.record_event(
            room_id,
            GameEventType::Move,
            Some(&user.id),
            Some(&actor_seat_id),
            event_revision,
            event_payload,
        )
        .await;

        for seat_id in finished_seat_ids {
            if let Ok(Some(mut seat)) = self.store.get_seat_by_id(&seat_id).await {
                seat.status = SeatStatus::Finished;
                if let Err(error) = self.store.update_seat(&seat).await {
                    warn!(room_id, seat_id = %seat.id, %error, "seat status update failed");
                }
            }
        }

        Ok(response)
    }

    pub async fn advance_turn_request(&self, user: &UserDoc, room_id: &str) -> ApiResult<Value> {
        let room = self.require_room(room_id).await?;
        let seats = ordered(self.store.list_seats(room_id).await?);
        let seat_ids: Vec<String> = seats.iter().map(|seat| seat.id.clone()).collect();

        let mut guard = self.cache.exclusive(room_id).await;
        self.cache.hydrate(&mut guard, &room).await;
        let response;
        let event_revision;
        let actor_seat_id;
        {
            let state = guard
                .as_mut()
                .ok_or_else(|| ApiError::conflict("game not started"))?;
            if state.status != RoomStatus::InProgress {
                return Err(ApiError::conflict("game not in progress"));
            }

            let current_seat = resolve_current_seat(state, &seats)
                .cloned()
                .ok_or(ApiError::Internal)?;
            // Only the stalled player may skip themselves.
            if current_seat.user_id != user.id {
                return Err(ApiError::forbidden("NOT_YOUR_TURN"));
            }

            let now = now_ms();
            if let Some(last_roll_at) = state.board.last_roll_at {
                if now.saturating_sub(last_roll_at) < MOVE_GRACE_MS {
                    return Err(ApiError::conflict("MOVE_TIME_NOT_EXPIRED"));
                }
            }

            if let Some(dice) = state.board.dice_value {
                let had_valid_move = !state.board.valid_moves.is_empty();
                self.engagement
                    .report_outcome(
                        room_id,
                        &current_seat.id,
                        RollReport {
                            rolled_value: dice,
                            had_valid_move,
                            all_in_base: false,
                            was_forced: false,
                        },
                    )
                    .await;
            }

            let next = advance_turn(
                state.current_player_index,
                &seat_ids,
                &state.board.winners,
                room.settings.mode == RoomMode::Individual,
            );
            state.current_player_index = next;
            state.board.current_player_id = Some(seat_ids[next].clone());
            state.board.dice_value = None;
            state.board.valid_moves.clear();
            state.board.last_roll_at = None;
            state
                .board
                .push_log(format!("{} passed the turn", current_seat.user_name));
            state.board.revision += 1;

            self.cache.mark_dirty(&mut guard).await;
            let state = guard.as_ref().expect("state present");
            let patch = json!({
                "revision": state.board.revision,
                "currentPlayerIndex": state.current_player_index,
                "gameBoard": {
                    "diceValue": state.board.dice_value,
                    "validMoves": state.board.valid_moves,
                    "currentPlayerId": state.board.current_player_id,
                    "lastRollAt": state.board.last_roll_at,
                },
            });
            self.broadcaster
                .publish_room(room_id, "turn:advance", json!({ "patch": patch }));
            response = json!({ "patch": patch });
            actor_seat_id = current_seat.id;
            event_revision = state.board.revision;
        }
        drop(guard);

        self.record_event(
            room_id,
            GameEventType::TurnAdvance,
            Some(&user.id),
            Some(&actor_seat_id),
            event_revision,
            json!({}),
        )
        .await;

        Ok(response)
    }

    pub async fn recent_events(&self, room_id: &str, limit: usize) -> ApiResult<Value> {
        self.require_room(room_id).await?;
        let events = self.store.recent_events(room_id, limit).await?;
        let listed: Vec<Value> = events
            .iter()
            .map(|event| {
                json!({
                    "type": event.event_type,
                    "actorUserId": event.actor_user_id,
                    "actorSeatId": event.actor_seat_id,
                    "revision": event.revision,
                    "payload": event.payload,
                    "createdAtMs": event.created_at_ms,
                })
            })
            .collect();
        Ok(json!({
            "generatedAtIso": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "events": listed,
        }))
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    async fn require_room(&self, room_id: &str) -> ApiResult<RoomDoc> {
        self.store
            .get_room(room_id)
            .await?
            .ok_or_else(|| ApiError::not_found("room not found"))
    }

    async fn require_host(&self, room: &RoomDoc, user_id: &str) -> ApiResult<()> {
        let host_seat_id = room
            .host_seat_id
            .as_deref()
            .ok_or_else(|| ApiError::forbidden("host only"))?;
        let host = self
            .store
            .get_seat_by_id(host_seat_id)
            .await?
            .ok_or_else(|| ApiError::forbidden("host only"))?;
        if host.user_id != user_id {
            return Err(ApiError::forbidden("host only"));
        }
        Ok(())
    }

    fn taunt_event(
        &self,
        trigger: TauntTrigger,
        actor: &SeatDoc,
        target_seat_id: Option<String>,
        meta: TauntEventMeta,
    ) -> TauntEventInput {
        TauntEventInput {
            trigger,
            actor_seat_id: actor.id.clone(),
            actor_user_id: actor.user_id.clone(),
            actor_name: actor.user_name.clone(),
            target_seat_id,
            meta,
        }
    }

    async fn dispatch_taunts(
        &self,
        room_id: &str,
        settings: &RoomSettings,
        seats: &[SeatDoc],
        board: &GameBoardState,
        events: Vec<TauntEventInput>,
        now: u64,
    ) {
        if events.is_empty() {
            return;
        }
        let ranked = standings(seats, board);
        let context = TauntRoomContext {
            leader_seat_id: ranked.first().map(|(seat, _)| seat.id.clone()),
            chaser_seat_id: ranked.get(1).map(|(seat, _)| seat.id.clone()),
            story_phase: self.engagement.story_phase(room_id).await,
        };
        let mut rng = Rng::from_entropy();
        let dispatches = self
            .taunts
            .process_events(room_id, settings.taunt_mode, &context, &events, now, &mut rng)
            .await;
        for dispatch in dispatches {
            match dispatch {
                TauntDispatch::Suggestions {
                    actor_user_id,
                    suggestions,
                } => {
                    self.broadcaster.publish_user(
                        &actor_user_id,
                        "room:taunt-suggestions",
                        json!({ "roomId": room_id, "suggestions": suggestions }),
                    );
                }
                TauntDispatch::Auto(message) => {
                    self.broadcaster.publish_room(
                        room_id,
                        "room:quick-message",
                        serde_json::to_value(&message).unwrap_or_else(|_| json!({})),
                    );
                }
            }
        }
    }

    async fn record_event(
        &self,
        room_id: &str,
        event_type: GameEventType,
        actor_user_id: Option<&str>,
        actor_seat_id: Option<&str>,
        revision: u64,
        payload: Value,
    ) {
        let event = GameEventDoc {
            room_id: room_id.to_string(),
            event_type,
            actor_user_id: actor_user_id.map(str::to_string),
            actor_seat_id: actor_seat_id.map(str::to_string),
            revision,
            payload,
            created_at_ms: now_ms(),
        };
        if let Err(error) = self.store.append_event(&event).await {
            warn!(room_id, event = event_type.as_str(), %error, "event append failed");
        }
    }
}
