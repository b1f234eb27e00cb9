use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::constants::{BASE_POS, GAME_LOG_MAX_LINES, TOKENS_PER_COLOR};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Color {
    Red,
    Green,
    Yellow,
    Blue,
    Purple,
    Orange,
}

impl Color {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "red" => Some(Self::Red),
            "green" => Some(Self::Green),
            "yellow" => Some(Self::Yellow),
            "blue" => Some(Self::Blue),
            "purple" => Some(Self::Purple),
            "orange" => Some(Self::Orange),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Blue => "blue",
            Self::Purple => "purple",
            Self::Orange => "orange",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Base,
    Active,
    Safe,
    Home,
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Waiting,
    InProgress,
    Completed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomMode {
    Individual,
    Team,
}

impl RoomMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "individual" => Some(Self::Individual),
            "team" => Some(Self::Team),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "public" => Some(Self::Public),
            "private" => Some(Self::Private),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TauntMode {
    Suggestion,
    Hybrid,
    Auto,
}

impl TauntMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "suggestion" => Some(Self::Suggestion),
            "hybrid" => Some(Self::Hybrid),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatStatus {
    Waiting,
    Playing,
    Finished,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    Early,
    Mid,
    Late,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryPhase {
    #[default]
    Start,
    Spread,
    Fights,
    Leader,
    Hope,
    Chaos,
    Finish,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameEventType {
    #[serde(rename = "room:created")]
    RoomCreated,
    #[serde(rename = "room:player-joined")]
    RoomPlayerJoined,
    #[serde(rename = "room:player-left")]
    RoomPlayerLeft,
    #[serde(rename = "room:player-ready")]
    RoomPlayerReady,
    #[serde(rename = "room:slot-change")]
    RoomSlotChange,
    #[serde(rename = "room:team-names")]
    RoomTeamNames,
    #[serde(rename = "game:start")]
    GameStart,
    #[serde(rename = "dice:roll")]
    DiceRoll,
    #[serde(rename = "move")]
    Move,
    #[serde(rename = "turn:advance")]
    TurnAdvance,
}

impl GameEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RoomCreated => "room:created",
            Self::RoomPlayerJoined => "room:player-joined",
            Self::RoomPlayerLeft => "room:player-left",
            Self::RoomPlayerReady => "room:player-ready",
            Self::RoomSlotChange => "room:slot-change",
            Self::RoomTeamNames => "room:team-names",
            Self::GameStart => "game:start",
            Self::DiceRoll => "dice:roll",
            Self::Move => "move",
            Self::TurnAdvance => "turn:advance",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub id: u8,
    pub color: Color,
    pub position: i16,
    pub status: TokenStatus,
    pub steps: i32,
}

impl Token {
    pub fn at_base(id: u8, color: Color) -> Self {
        Self {
            id,
            color,
            position: BASE_POS,
            status: TokenStatus::Base,
            steps: 0,
        }
    }

    pub fn is_home(&self) -> bool {
        matches!(self.status, TokenStatus::Home | TokenStatus::Finished)
    }

    pub fn on_board(&self) -> bool {
        matches!(self.status, TokenStatus::Active | TokenStatus::Safe)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidMove {
    pub token_id: u8,
    pub color: Color,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinnerEntry {
    pub seat_id: String,
    pub rank: u32,
}

/// Runtime board of a single room. The authoritative copy lives in the game
/// state cache; every mutation bumps `revision` exactly once.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameBoardState {
    pub tokens: BTreeMap<Color, Vec<Token>>,
    pub current_player_id: Option<String>,
    pub dice_value: Option<u8>,
    pub valid_moves: Vec<ValidMove>,
    pub game_log: VecDeque<String>,
    pub winners: Vec<WinnerEntry>,
    pub last_roll_at: Option<u64>,
    pub revision: u64,
}

impl GameBoardState {
    pub fn new_for_colors(colors: &[Color]) -> Self {
        let mut tokens = BTreeMap::new();
        for &color in colors {
            tokens.insert(
                color,
                (0..TOKENS_PER_COLOR as u8)
                    .map(|id| Token::at_base(id, color))
                    .collect(),
            );
        }
        Self {
            tokens,
            current_player_id: None,
            dice_value: None,
            valid_moves: Vec::new(),
            game_log: VecDeque::new(),
            winners: Vec::new(),
            last_roll_at: None,
            revision: 0,
        }
    }

    pub fn push_log(&mut self, line: impl Into<String>) {
        if self.game_log.len() >= GAME_LOG_MAX_LINES {
            self.game_log.pop_front();
        }
        self.game_log.push_back(line.into());
    }

    pub fn token(&self, color: Color, token_id: u8) -> Option<&Token> {
        self.tokens
            .get(&color)
            .and_then(|tokens| tokens.iter().find(|token| token.id == token_id))
    }

    pub fn token_mut(&mut self, color: Color, token_id: u8) -> Option<&mut Token> {
        self.tokens
            .get_mut(&color)
            .and_then(|tokens| tokens.iter_mut().find(|token| token.id == token_id))
    }

    pub fn all_finished(&self, color: Color) -> bool {
        self.tokens
            .get(&color)
            .map(|tokens| tokens.iter().all(Token::is_home))
            .unwrap_or(false)
    }

    pub fn finished_token_count(&self) -> usize {
        self.tokens
            .values()
            .flatten()
            .filter(|token| token.is_home())
            .count()
    }

    pub fn total_token_count(&self) -> usize {
        self.tokens.values().map(Vec::len).sum()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSettings {
    pub max_players: u8,
    pub mode: RoomMode,
    pub visibility: Visibility,
    pub team_names: Vec<String>,
    pub taunt_mode: TauntMode,
}

impl RoomSettings {
    pub fn team_count(&self) -> usize {
        if self.mode == RoomMode::Team {
            self.max_players as usize / 2
        } else {
            0
        }
    }
}

/// Durable room document. `game_board` is the write-behind snapshot; the
/// in-memory runtime copy is the source of truth while the room is live.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDoc {
    pub id: String,
    pub code: String,
    pub host_seat_id: Option<String>,
    pub settings: RoomSettings,
    pub status: RoomStatus,
    pub current_player_index: usize,
    pub game_board: Option<GameBoardState>,
    pub seats: Vec<String>,
    pub created_at_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatDoc {
    pub id: String,
    pub room_id: String,
    pub user_id: String,
    pub user_name: String,
    pub color: Color,
    pub position: u8,
    pub team_index: Option<u8>,
    pub status: SeatStatus,
    pub ready: bool,
}

/// Denormalized team snapshot, persisted on start and team-name changes.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamDoc {
    pub room_id: String,
    pub team_index: u8,
    pub name: String,
    pub seat_ids: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEventDoc {
    pub room_id: String,
    #[serde(rename = "type")]
    pub event_type: GameEventType,
    pub actor_user_id: Option<String>,
    pub actor_seat_id: Option<String>,
    pub revision: u64,
    pub payload: serde_json::Value,
    pub created_at_ms: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDoc {
    pub id: String,
    pub name: String,
    pub token: String,
}

/// Subset of room state persisted by the background flusher.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimePersist {
    pub status: RoomStatus,
    pub current_player_index: usize,
    pub game_board: GameBoardState,
}
