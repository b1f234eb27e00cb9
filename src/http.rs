//! HTTP and WebSocket surface. Every response uses the
//! `{success, data|error}` envelope; request bodies are parsed leniently
//! and rejected with a stable validation message rather than a framework
//! error page.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::debug;

use crate::broadcast::{OutboundMessage, WsBroadcaster};
use crate::cache::shared::SharedCache;
use crate::coordinator::Coordinator;
use crate::error::{ApiError, ApiResult};
use crate::store::GameStore;
use crate::types::{Color, RoomMode, TauntMode, UserDoc, Visibility};

pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub store: Arc<dyn GameStore>,
    pub shared_cache: Arc<dyn SharedCache>,
    pub ws: Arc<WsBroadcaster>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/rooms", post(create_room).get(list_rooms))
        .route("/rooms/join", post(join_by_code))
        .route("/rooms/{id}", get(get_room).delete(leave_room))
        .route("/rooms/{id}/join", post(join_by_id))
        .route("/rooms/{id}/leave", post(leave_room_post))
        .route("/rooms/{id}/ready", patch(toggle_ready))
        .route("/rooms/{id}/slot", patch(change_slot))
        .route("/rooms/{id}/team-names", patch(set_team_names))
        .route("/rooms/{id}/start", post(start_game))
        .route("/rooms/{id}/dice", post(roll_dice))
        .route("/rooms/{id}/move", post(make_move))
        .route("/rooms/{id}/next-turn", post(next_turn))
        .route("/rooms/{id}/events", get(room_events))
        .route("/ws", get(ws_handler))
        .with_state(state)
}

fn ok(data: Value) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}

async fn authenticate(state: &AppState, headers: &HeaderMap) -> ApiResult<UserDoc> {
    let token = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::unauthorized("missing bearer token"))?;
    state
        .store
        .find_user_by_token(token)
        .await?
        .ok_or_else(|| ApiError::unauthorized("invalid token"))
}

fn field_str<'a>(body: &'a Value, name: &str) -> Option<&'a str> {
    body.get(name).and_then(Value::as_str)
}

fn field_u64(body: &Value, name: &str) -> Option<u64> {
    body.get(name).and_then(Value::as_u64)
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_connected = state.store.connected().await;
    ok(json!({
        "dbState": if db_connected { "connected" } else { "unreachable" },
        "dbKind": state.store.kind(),
        "cacheConnected": state.shared_cache.connected(),
        "wsClients": state.ws.connected_clients(),
    }))
}

async fn create_room(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let user = authenticate(&state, &headers).await?;

    let max_players = field_u64(&body, "maxPlayers")
        .and_then(|value| u8::try_from(value).ok())
        .ok_or_else(|| ApiError::validation("maxPlayers is required"))?;
    let mode = match field_str(&body, "mode") {
        Some(raw) => RoomMode::parse(raw).ok_or_else(|| ApiError::validation("invalid mode"))?,
        None => RoomMode::Individual,
    };
    let visibility = match field_str(&body, "visibility") {
        Some(raw) => {
            Visibility::parse(raw).ok_or_else(|| ApiError::validation("invalid visibility"))?
        }
        None => Visibility::Public,
    };
    let selected_color = match field_str(&body, "selectedColor") {
        Some(raw) => {
            Some(Color::parse(raw).ok_or_else(|| ApiError::validation("invalid color"))?)
        }
        None => None,
    };
    let taunt_mode = match field_str(&body, "tauntMode") {
        Some(raw) => {
            TauntMode::parse(raw).ok_or_else(|| ApiError::validation("invalid tauntMode"))?
        }
        None => TauntMode::Suggestion,
    };

    let view = state
        .coordinator
        .create_room(&user, max_players, mode, visibility, selected_color, taunt_mode)
        .await?;
    Ok(ok(view))
}

async fn list_rooms(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    Ok(ok(state.coordinator.list_rooms().await?))
}

async fn get_room(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> ApiResult<Json<Value>> {
    Ok(ok(state.coordinator.room_view(&room_id).await?))
}

async fn join_by_code(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let user = authenticate(&state, &headers).await?;
    let code = field_str(&body, "code")
        .filter(|code| !code.trim().is_empty())
        .ok_or_else(|| ApiError::validation("code is required"))?;
    let selected_color = parse_optional_color(&body)?;
    let view = state
        .coordinator
        .join_room(&user, code, true, selected_color)
        .await?;
    Ok(ok(view))
}

async fn join_by_id(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
    body: Option<Json<Value>>,
) -> ApiResult<Json<Value>> {
    let user = authenticate(&state, &headers).await?;
    let body = body.map(|Json(body)| body).unwrap_or_else(|| json!({}));
    let selected_color = parse_optional_color(&body)?;
    let view = state
        .coordinator
        .join_room(&user, &room_id, false, selected_color)
        .await?;
    Ok(ok(view))
}

fn parse_optional_color(body: &Value) -> ApiResult<Option<Color>> {
    match field_str(body, "selectedColor") {
        Some(raw) => Color::parse(raw)
            .map(Some)
            .ok_or_else(|| ApiError::validation("invalid color")),
        None => Ok(None),
    }
}

async fn leave_room(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let user = authenticate(&state, &headers).await?;
    Ok(ok(state.coordinator.leave_room(&user, &room_id).await?))
}

async fn leave_room_post(
    state: State<Arc<AppState>>,
    headers: HeaderMap,
    path: Path<String>,
) -> ApiResult<Json<Value>> {
    leave_room(state, headers, path).await
}

async fn toggle_ready(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let user = authenticate(&state, &headers).await?;
    Ok(ok(state.coordinator.toggle_ready(&user, &room_id).await?))
}

async fn change_slot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let user = authenticate(&state, &headers).await?;
    let slot_index = field_u64(&body, "slotIndex")
        .and_then(|value| u8::try_from(value).ok())
        .ok_or_else(|| ApiError::validation("slotIndex is required"))?;
    Ok(ok(state
        .coordinator
        .change_slot(&user, &room_id, slot_index)
        .await?))
}

async fn set_team_names(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let user = authenticate(&state, &headers).await?;
    let team_names: Vec<String> = body
        .get("teamNames")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .ok_or_else(|| ApiError::validation("teamNames is required"))?;
    Ok(ok(state
        .coordinator
        .set_team_names(&user, &room_id, team_names)
        .await?))
}

async fn start_game(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let user = authenticate(&state, &headers).await?;
    Ok(ok(state.coordinator.start_game(&user, &room_id).await?))
}

async fn roll_dice(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let user = authenticate(&state, &headers).await?;
    Ok(ok(state.coordinator.roll_dice(&user, &room_id).await?))
}

async fn make_move(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let user = authenticate(&state, &headers).await?;
    let token_id = field_u64(&body, "tokenId")
        .and_then(|value| u8::try_from(value).ok())
        .filter(|id| *id < 4)
        .ok_or_else(|| ApiError::validation("tokenId must be 0-3"))?;
    let color = field_str(&body, "color")
        .and_then(Color::parse)
        .ok_or_else(|| ApiError::validation("invalid color"))?;
    let dice_value = field_u64(&body, "diceValue")
        .and_then(|value| u8::try_from(value).ok())
        .filter(|dice| (1..=6).contains(dice))
        .ok_or_else(|| ApiError::validation("diceValue must be 1-6"))?;
    let enter_home = body.get("enterHome").and_then(Value::as_bool);

    Ok(ok(state
        .coordinator
        .make_move(&user, &room_id, token_id, color, dice_value, enter_home)
        .await?))
}

async fn next_turn(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(room_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let user = authenticate(&state, &headers).await?;
    Ok(ok(state
        .coordinator
        .advance_turn_request(&user, &room_id)
        .await?))
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    limit: Option<String>,
}

async fn room_events(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Value>> {
    let limit = query
        .limit
        .as_deref()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(50);
    Ok(ok(state.coordinator.recent_events(&room_id, limit).await?))
}

// ---------------------------------------------------------------------------
// Realtime channel
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
) -> axum::response::Response {
    // Browser WebSocket clients cannot set headers; accept `?token=` too.
    let token = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
        .or(query.token);

    let user = match token {
        Some(token) => state.store.find_user_by_token(&token).await.ok().flatten(),
        None => None,
    };
    let Some(user) = user else {
        return ApiError::unauthorized("invalid token").into_response();
    };

    ws.on_upgrade(move |socket| handle_socket(state, socket, user))
}

async fn handle_socket(state: Arc<AppState>, socket: WebSocket, user: UserDoc) {
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(256);
    let client_id = state.ws.register(&user.id, tx);
    debug!(client_id, user_id = user.id, "ws client connected");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let should_close = matches!(outbound, OutboundMessage::Close { .. });
            let result = match outbound {
                OutboundMessage::Text(payload) => {
                    ws_sender.send(Message::Text(payload.into())).await
                }
                OutboundMessage::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    ws_sender.send(Message::Close(Some(frame))).await
                }
            };
            if result.is_err() || should_close {
                break;
            }
        }
    });

    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };
        match message {
            Message::Text(raw) => {
                handle_channel_command(&state, client_id, &user, raw.to_string()).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.ws.unregister(client_id);
    debug!(client_id, "ws client disconnected");
    let _ = writer.await;
}

/// Channel commands are line-oriented: `room:join <roomId>`,
/// `room:leave <roomId>`, `room:chat <roomId> <text>`.
async fn handle_channel_command(state: &Arc<AppState>, client_id: u64, user: &UserDoc, raw: String) {
    let mut parts = raw.splitn(3, ' ');
    let command = parts.next().unwrap_or_default();
    let room_id = parts.next().unwrap_or_default();
    if room_id.is_empty() {
        return;
    }
    match command {
        "room:join" => state.ws.join_room(client_id, room_id),
        "room:leave" => state.ws.leave_room(client_id, room_id),
        "room:chat" => {
            let text: String = parts.next().unwrap_or_default().chars().take(200).collect();
            if text.trim().is_empty() {
                return;
            }
            use crate::broadcast::Broadcaster;
            state.ws.publish_room(
                room_id,
                "room:chat",
                json!({
                    "userId": user.id,
                    "userName": user.name,
                    "message": text,
                }),
            );
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_helpers_read_json_bodies() {
        let body = json!({ "maxPlayers": 4, "mode": "team", "flag": true });
        assert_eq!(field_u64(&body, "maxPlayers"), Some(4));
        assert_eq!(field_str(&body, "mode"), Some("team"));
        assert_eq!(field_str(&body, "missing"), None);
        assert_eq!(field_u64(&body, "mode"), None);
    }

    #[test]
    fn optional_color_rejects_unknown_names() {
        assert_eq!(
            parse_optional_color(&json!({ "selectedColor": "red" })).expect("valid"),
            Some(Color::Red)
        );
        assert_eq!(parse_optional_color(&json!({})).expect("valid"), None);
        assert!(parse_optional_color(&json!({ "selectedColor": "pink" })).is_err());
    }
}
