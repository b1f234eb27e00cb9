pub const TRACK_LEN: i16 = 52;
pub const HOME_RUN_CELLS: usize = 6;
pub const HOME_RUN_MAX: i16 = HOME_RUN_CELLS as i16 - 1;
pub const FINISH_POS: i16 = 58;
pub const HOME_LANE_BASE: i16 = 52;
pub const BASE_POS: i16 = -1;
pub const TOKENS_PER_COLOR: usize = 4;

/// Absolute track offset between a color's entry cell and its home-entry
/// arrow. Aligns home-entry timing with the coordinate table; must stay
/// bit-exact for client compatibility.
pub const HOME_ENTRY_OFFSET: i16 = 2;

/// Minimum cumulative steps (plus remaining distance to the arrow) for a
/// token to be considered to have completed its lap.
pub const ROTATION_THRESHOLD: i32 = 50;

pub const SAFE_INDICES: [i16; 8] = [0, 8, 13, 21, 26, 34, 39, 47];

pub const GAME_LOG_MAX_LINES: usize = 64;
pub const ROOM_CODE_LEN: usize = 6;

/// Grace period the current player gets to submit a move after a roll
/// before anyone may rotate the turn past them.
pub const MOVE_GRACE_MS: u64 = 20_000;

/// Soft ceiling on match duration; feeds the engagement engine's urgency
/// factor, not a hard cutoff.
pub const MAX_MATCH_TIME_MS: u64 = 40 * 60 * 1000;

pub fn is_safe_index(position: i16) -> bool {
    SAFE_INDICES.contains(&position)
}

pub fn on_main_track(position: i16) -> bool {
    (0..TRACK_LEN).contains(&position)
}

pub fn in_home_run(position: i16) -> bool {
    (HOME_LANE_BASE..FINISH_POS).contains(&position)
}
