//! Pure rule engine. Every function here takes and returns plain values;
//! illegal inputs yield sentinel results (empty move sets, unchanged
//! tokens), never panics. The coordinator owns error reporting.

use std::collections::BTreeMap;

use crate::board::{home_entry_index, home_start, partner_color};
use crate::constants::{
    in_home_run, is_safe_index, on_main_track, BASE_POS, FINISH_POS, HOME_LANE_BASE,
    HOME_RUN_MAX, ROTATION_THRESHOLD, TRACK_LEN,
};
use crate::types::{Color, RoomMode, Token, TokenStatus, ValidMove, WinnerEntry};

pub type TokenMap = BTreeMap<Color, Vec<Token>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CapturedToken {
    pub token_id: u8,
    pub color: Color,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MoveOutcome {
    pub token: Token,
    pub captured: Vec<CapturedToken>,
}

/// Colors the current seat may move: its own color, plus the partner color
/// opposite in the color order when playing teams.
pub fn controlled_colors(current: Color, mode: RoomMode, max_players: u8) -> Vec<Color> {
    match mode {
        RoomMode::Individual => vec![current],
        RoomMode::Team => {
            let mut colors = vec![current];
            if let Some(partner) = partner_color(current, max_players) {
                if partner != current {
                    colors.push(partner);
                }
            }
            colors
        }
    }
}

/// Number of controlled tokens standing on a non-safe main-track cell.
/// Two or more means the forced-stack rule is in play for that cell.
pub fn stack_size_on_cell(tokens: &TokenMap, cell: i16, controlled: &[Color]) -> usize {
    if !on_main_track(cell) || is_safe_index(cell) {
        return 0;
    }
    controlled
        .iter()
        .filter_map(|color| tokens.get(color))
        .flatten()
        .filter(|token| token.on_board() && token.position == cell)
        .count()
}

/// Resolves the forced-stack rule for a token on the main track. Returns
/// `(effective_dice, stack_size)`, or `None` when the stack cannot move on
/// this dice (odd value).
pub fn effective_dice_for(
    tokens: &TokenMap,
    token: &Token,
    dice: u8,
    controlled: &[Color],
) -> Option<(u8, usize)> {
    let stack = stack_size_on_cell(tokens, token.position, controlled).max(1);
    if stack >= 2 {
        if dice % 2 != 0 || dice / 2 < 1 {
            return None;
        }
        Some((dice / 2, stack))
    } else {
        Some((dice, 1))
    }
}

/// All controlled tokens that must move together with `token`. A single
/// token yields a singleton set.
pub fn stack_members(tokens: &TokenMap, token: &Token, controlled: &[Color]) -> Vec<ValidMove> {
    if stack_size_on_cell(tokens, token.position, controlled) >= 2 {
        controlled
            .iter()
            .filter_map(|color| tokens.get(color))
            .flatten()
            .filter(|member| member.on_board() && member.position == token.position)
            .map(|member| ValidMove {
                token_id: member.id,
                color: member.color,
            })
            .collect()
    } else {
        vec![ValidMove {
            token_id: token.id,
            color: token.color,
        }]
    }
}

fn enemy_count_on_cell(tokens: &TokenMap, cell: i16, allied: &[Color]) -> usize {
    tokens
        .iter()
        .filter(|(color, _)| !allied.contains(color))
        .flat_map(|(_, list)| list)
        .filter(|token| token.on_board() && token.position == cell)
        .count()
}

/// A span of track cells is traversable when every cell is either safe or
/// free of an enemy blockade; a stack of two or more may break through.
fn path_clear(
    tokens: &TokenMap,
    from: i16,
    span: i16,
    stack: usize,
    allied: &[Color],
) -> bool {
    if stack >= 2 {
        return true;
    }
    for step in 1..=span {
        let cell = (from + step) % TRACK_LEN;
        if is_safe_index(cell) {
            continue;
        }
        if enemy_count_on_cell(tokens, cell, allied) >= 2 {
            return false;
        }
    }
    true
}

struct LapContext {
    distance_to_arrow: i16,
    completes_lap: bool,
    overshoot: i16,
}

fn lap_context(token: &Token, effective: u8) -> LapContext {
    let arrow = home_entry_index(token.color);
    let distance_to_arrow = (arrow - token.position + TRACK_LEN) % TRACK_LEN;
    let completes_lap = token.steps + distance_to_arrow as i32 >= ROTATION_THRESHOLD;
    LapContext {
        distance_to_arrow,
        completes_lap,
        overshoot: effective as i16 - distance_to_arrow,
    }
}

fn home_entry_window(lap: &LapContext) -> bool {
    lap.completes_lap && lap.overshoot >= 1 && lap.overshoot <= HOME_RUN_MAX + 1
}

/// Enumerates every `(token, color)` the current seat may legally move for
/// this dice value.
pub fn find_valid_moves(
    tokens: &TokenMap,
    current_color: Color,
    dice: u8,
    controlled: &[Color],
) -> Vec<ValidMove> {
    debug_assert!(controlled.contains(&current_color) || controlled.is_empty());
    let mut moves = Vec::new();
    if !(1..=6).contains(&dice) {
        return moves;
    }

    for &color in controlled {
        let Some(list) = tokens.get(&color) else {
            continue;
        };
        for token in list {
            if token.is_home() {
                continue;
            }

            if token.status == TokenStatus::Base {
                if dice == 6 {
                    moves.push(ValidMove {
                        token_id: token.id,
                        color,
                    });
                }
                continue;
            }

            if in_home_run(token.position) {
                let lane = token.position - HOME_LANE_BASE;
                if lane + dice as i16 <= HOME_RUN_MAX {
                    moves.push(ValidMove {
                        token_id: token.id,
                        color,
                    });
                }
                continue;
            }

            if !on_main_track(token.position) {
                continue;
            }

            let Some((effective, stack)) = effective_dice_for(tokens, token, dice, controlled)
            else {
                continue;
            };

            let lap = lap_context(token, effective);
            if home_entry_window(&lap) {
                // The entry window rules out continuing past the arrow.
                if path_clear(tokens, token.position, lap.distance_to_arrow, stack, controlled) {
                    moves.push(ValidMove {
                        token_id: token.id,
                        color,
                    });
                }
                continue;
            }

            if path_clear(tokens, token.position, effective as i16, stack, controlled) {
                moves.push(ValidMove {
                    token_id: token.id,
                    color,
                });
            }
        }
    }
    moves
}

/// Applies one token's movement for an already-validated move. `dice` is the
/// effective value (halved for stack moves); `stack` is the mover's stack
/// size, which decides whether an enemy blockade on the landing cell is
/// broken (all members captured) or left alone.
pub fn apply_move(
    token: &Token,
    dice: u8,
    all_tokens: &TokenMap,
    allied: &[Color],
    stack: usize,
) -> MoveOutcome {
    let mut updated = *token;
    let mut captured = Vec::new();

    match token.status {
        TokenStatus::Home | TokenStatus::Finished => {}
        TokenStatus::Base => {
            if dice == 6 {
                let spawn = home_start(token.color);
                updated.position = spawn;
                updated.steps = 0;
                updated.status = if is_safe_index(spawn) {
                    TokenStatus::Safe
                } else {
                    TokenStatus::Active
                };
                // Spawning on an enemy never captures.
            }
        }
        TokenStatus::Active | TokenStatus::Safe => {
            if in_home_run(token.position) {
                let next = (token.position - HOME_LANE_BASE) + dice as i16;
                if next <= HOME_RUN_MAX {
                    updated.steps += dice as i32;
                    if next == HOME_RUN_MAX {
                        updated.position = FINISH_POS;
                        updated.status = TokenStatus::Home;
                    } else {
                        updated.position = HOME_LANE_BASE + next;
                        updated.status = TokenStatus::Safe;
                    }
                }
            } else if on_main_track(token.position) {
                let lap = lap_context(token, dice);
                if home_entry_window(&lap) {
                    updated.steps += dice as i32;
                    if lap.overshoot == HOME_RUN_MAX + 1 {
                        updated.position = FINISH_POS;
                        updated.status = TokenStatus::Home;
                    } else {
                        updated.position = HOME_LANE_BASE + lap.overshoot - 1;
                        updated.status = TokenStatus::Safe;
                    }
                } else {
                    let landing = (token.position + dice as i16) % TRACK_LEN;
                    updated.position = landing;
                    updated.steps += dice as i32;
                    updated.status = if is_safe_index(landing) {
                        TokenStatus::Safe
                    } else {
                        TokenStatus::Active
                    };

                    if !is_safe_index(landing) {
                        let victims: Vec<&Token> = all_tokens
                            .iter()
                            .filter(|(color, _)| !allied.contains(color))
                            .flat_map(|(_, list)| list)
                            .filter(|enemy| enemy.on_board() && enemy.position == landing)
                            .collect();
                        if victims.len() == 1 || (victims.len() >= 2 && stack >= 2) {
                            captured.extend(victims.iter().map(|enemy| CapturedToken {
                                token_id: enemy.id,
                                color: enemy.color,
                            }));
                        }
                    }
                }
            }
        }
    }

    MoveOutcome {
        token: updated,
        captured,
    }
}

/// Captured tokens teleport back to base with the capture sentinel on
/// `steps`. The `-1` is asymmetric with the `0` written on release and is
/// preserved for compatibility.
pub fn send_to_base(token: &mut Token) {
    token.position = BASE_POS;
    token.status = TokenStatus::Base;
    token.steps = -1;
}

pub fn check_win(tokens: &TokenMap, color: Color) -> bool {
    tokens
        .get(&color)
        .map(|list| !list.is_empty() && list.iter().all(Token::is_home))
        .unwrap_or(false)
}

/// Next seat ordinal in canonical order. With `skip_winners`, finished seats
/// are passed over; team mode disables the skip so a finished color's owner
/// still takes turns for the partner color.
pub fn advance_turn(
    current_index: usize,
    seat_ids: &[String],
    winners: &[WinnerEntry],
    skip_winners: bool,
) -> usize {
    if seat_ids.is_empty() {
        return 0;
    }
    let len = seat_ids.len();
    let current = current_index.min(len - 1);
    for step in 1..=len {
        let candidate = (current + step) % len;
        if skip_winners
            && winners
                .iter()
                .any(|winner| winner.seat_id == seat_ids[candidate])
        {
            continue;
        }
        return candidate;
    }
    current
}

/// The roller keeps the turn on a six, a capture, or a token reaching home.
pub fn grants_extra_turn(dice: u8, any_captured: bool, any_home: bool) -> bool {
    dice == 6 || any_captured || any_home
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TOKENS_PER_COLOR;

    fn board_for(colors: &[Color]) -> TokenMap {
        let mut tokens = TokenMap::new();
        for &color in colors {
            tokens.insert(
                color,
                (0..TOKENS_PER_COLOR as u8)
                    .map(|id| Token::at_base(id, color))
                    .collect(),
            );
        }
        tokens
    }

    fn place(tokens: &mut TokenMap, color: Color, id: u8, position: i16, steps: i32) {
        let token = tokens
            .get_mut(&color)
            .and_then(|list| list.iter_mut().find(|token| token.id == id))
            .expect("token exists");
        token.position = position;
        token.steps = steps;
        token.status = if position == FINISH_POS {
            TokenStatus::Home
        } else if is_safe_index(position) || in_home_run(position) {
            TokenStatus::Safe
        } else {
            TokenStatus::Active
        };
    }

    fn ids(moves: &[ValidMove], color: Color) -> Vec<u8> {
        let mut ids: Vec<u8> = moves
            .iter()
            .filter(|candidate| candidate.color == color)
            .map(|candidate| candidate.token_id)
            .collect();
        ids.sort_unstable();
        ids
    }

    #[test]
    fn base_release_requires_a_six() {
        let tokens = board_for(&[Color::Red, Color::Yellow]);
        for dice in 1..=5u8 {
            assert!(
                find_valid_moves(&tokens, Color::Red, dice, &[Color::Red]).is_empty(),
                "dice {dice} must not release"
            );
        }
        let moves = find_valid_moves(&tokens, Color::Red, 6, &[Color::Red]);
        assert_eq!(ids(&moves, Color::Red), vec![0, 1, 2, 3]);
    }

    #[test]
    fn base_release_lands_on_safe_entry_cell() {
        let tokens = board_for(&[Color::Red, Color::Yellow]);
        let token = tokens[&Color::Red][0];
        let outcome = apply_move(&token, 6, &tokens, &[Color::Red], 1);
        assert_eq!(outcome.token.position, 0);
        assert_eq!(outcome.token.status, TokenStatus::Safe);
        assert_eq!(outcome.token.steps, 0);
        assert!(outcome.captured.is_empty());
        assert!(grants_extra_turn(6, false, false));
    }

    #[test]
    fn landing_on_single_enemy_captures_it() {
        let mut tokens = board_for(&[Color::Red, Color::Yellow]);
        place(&mut tokens, Color::Red, 0, 5, 5);
        place(&mut tokens, Color::Yellow, 0, 2, 20);

        let yellow = tokens[&Color::Yellow][0];
        let outcome = apply_move(&yellow, 3, &tokens, &[Color::Yellow], 1);
        assert_eq!(outcome.token.position, 5);
        assert_eq!(
            outcome.captured,
            vec![CapturedToken {
                token_id: 0,
                color: Color::Red
            }]
        );
        assert!(grants_extra_turn(3, true, false));
    }

    #[test]
    fn captured_token_returns_to_base_with_sentinel_steps() {
        let mut tokens = board_for(&[Color::Red]);
        place(&mut tokens, Color::Red, 0, 5, 5);
        let token = tokens
            .get_mut(&Color::Red)
            .and_then(|list| list.first_mut())
            .expect("token");
        send_to_base(token);
        assert_eq!(token.position, BASE_POS);
        assert_eq!(token.status, TokenStatus::Base);
        assert_eq!(token.steps, -1);
    }

    #[test]
    fn capture_is_forbidden_on_safe_cells() {
        let mut tokens = board_for(&[Color::Red, Color::Yellow]);
        place(&mut tokens, Color::Red, 0, 8, 8);
        place(&mut tokens, Color::Yellow, 0, 5, 20);

        let yellow = tokens[&Color::Yellow][0];
        let outcome = apply_move(&yellow, 3, &tokens, &[Color::Yellow], 1);
        assert_eq!(outcome.token.position, 8);
        assert_eq!(outcome.token.status, TokenStatus::Safe);
        assert!(outcome.captured.is_empty());
    }

    #[test]
    fn enemy_blockade_blocks_single_movers() {
        let mut tokens = board_for(&[Color::Red, Color::Green]);
        place(&mut tokens, Color::Green, 0, 10, 10);
        place(&mut tokens, Color::Green, 1, 10, 10);
        place(&mut tokens, Color::Red, 0, 6, 6);

        // Landing on or crossing the blockade is excluded.
        let moves = find_valid_moves(&tokens, Color::Red, 4, &[Color::Red]);
        assert!(ids(&moves, Color::Red).is_empty());
        let moves = find_valid_moves(&tokens, Color::Red, 5, &[Color::Red]);
        assert!(ids(&moves, Color::Red).is_empty());

        // Stopping short of it is fine.
        let moves = find_valid_moves(&tokens, Color::Red, 3, &[Color::Red]);
        assert_eq!(ids(&moves, Color::Red), vec![0]);
    }

    #[test]
    fn two_enemies_on_a_cell_are_uncapturable_in_individual_mode() {
        let mut tokens = board_for(&[Color::Red, Color::Green]);
        place(&mut tokens, Color::Green, 0, 10, 10);
        place(&mut tokens, Color::Green, 1, 10, 10);
        place(&mut tokens, Color::Red, 0, 6, 6);

        let red = tokens[&Color::Red][0];
        let outcome = apply_move(&red, 4, &tokens, &[Color::Red], 1);
        assert!(outcome.captured.is_empty());
    }

    #[test]
    fn forced_stack_requires_even_dice_and_halves_movement() {
        let mut tokens = board_for(&[Color::Red, Color::Green, Color::Yellow, Color::Blue]);
        let controlled = [Color::Red, Color::Yellow];
        place(&mut tokens, Color::Red, 0, 10, 10);
        place(&mut tokens, Color::Yellow, 0, 10, 36);

        let red = tokens[&Color::Red][0];
        assert_eq!(effective_dice_for(&tokens, &red, 5, &controlled), None);
        assert_eq!(effective_dice_for(&tokens, &red, 6, &controlled), Some((3, 2)));

        let moves = find_valid_moves(&tokens, Color::Red, 5, &controlled);
        assert!(ids(&moves, Color::Red).is_empty());
        assert!(ids(&moves, Color::Yellow).is_empty());

        let moves = find_valid_moves(&tokens, Color::Red, 6, &controlled);
        assert_eq!(ids(&moves, Color::Red), vec![0]);
        assert_eq!(ids(&moves, Color::Yellow), vec![0]);

        let members = stack_members(&tokens, &red, &controlled);
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn stack_breaks_enemy_blockade_and_captures_all_members() {
        let mut tokens = board_for(&[Color::Red, Color::Green, Color::Yellow, Color::Blue]);
        let controlled = [Color::Red, Color::Yellow];
        place(&mut tokens, Color::Red, 0, 10, 10);
        place(&mut tokens, Color::Yellow, 0, 10, 36);
        place(&mut tokens, Color::Blue, 0, 12, 25);
        place(&mut tokens, Color::Blue, 1, 12, 25);

        // Effective movement 2 for the stack on a rolled 4.
        let moves = find_valid_moves(&tokens, Color::Red, 4, &controlled);
        assert_eq!(ids(&moves, Color::Red), vec![0]);

        let red = tokens[&Color::Red][0];
        let outcome = apply_move(&red, 2, &tokens, &controlled, 2);
        assert_eq!(outcome.token.position, 12);
        let mut captured = outcome.captured.clone();
        captured.sort_by_key(|victim| victim.token_id);
        assert_eq!(
            captured,
            vec![
                CapturedToken {
                    token_id: 0,
                    color: Color::Blue
                },
                CapturedToken {
                    token_id: 1,
                    color: Color::Blue
                },
            ]
        );
    }

    #[test]
    fn stack_on_safe_cell_is_not_forced() {
        let mut tokens = board_for(&[Color::Red, Color::Green, Color::Yellow, Color::Blue]);
        let controlled = [Color::Red, Color::Yellow];
        place(&mut tokens, Color::Red, 0, 8, 8);
        place(&mut tokens, Color::Yellow, 0, 8, 34);

        let red = tokens[&Color::Red][0];
        assert_eq!(effective_dice_for(&tokens, &red, 5, &controlled), Some((5, 1)));
        let moves = find_valid_moves(&tokens, Color::Red, 5, &controlled);
        assert_eq!(ids(&moves, Color::Red), vec![0]);
    }

    #[test]
    fn home_entry_uses_the_arrow_offset_and_overshoot_window() {
        let mut tokens = board_for(&[Color::Red, Color::Green, Color::Blue]);
        // Green's arrow sits at track index 11. Two cells short with a full
        // lap behind it, a 4 enters the lane at its second cell.
        place(&mut tokens, Color::Green, 0, 9, 49);

        let moves = find_valid_moves(&tokens, Color::Green, 4, &[Color::Green]);
        assert_eq!(ids(&moves, Color::Green), vec![0]);

        let green = tokens[&Color::Green][0];
        let outcome = apply_move(&green, 4, &tokens, &[Color::Green], 1);
        assert_eq!(outcome.token.position, 53);
        assert_eq!(outcome.token.status, TokenStatus::Safe);
    }

    #[test]
    fn exact_overshoot_finishes_the_token() {
        let mut tokens = board_for(&[Color::Red, Color::Green, Color::Blue]);
        // Arrow two ahead, overshoot of six lands exactly home.
        place(&mut tokens, Color::Green, 0, 9, 49);

        let green = tokens[&Color::Green][0];
        let outcome = apply_move(&green, 6, &tokens, &[Color::Green], 1);
        assert_eq!(outcome.token.position, FINISH_POS);
        assert_eq!(outcome.token.status, TokenStatus::Home);
        assert!(grants_extra_turn(6, false, true));
    }

    #[test]
    fn token_without_a_completed_lap_passes_the_arrow() {
        let mut tokens = board_for(&[Color::Red, Color::Green, Color::Blue]);
        // Fresh token near green's arrow: keeps circling instead of entering.
        place(&mut tokens, Color::Green, 0, 9, 5);

        let green = tokens[&Color::Green][0];
        let outcome = apply_move(&green, 4, &tokens, &[Color::Green], 1);
        assert_eq!(outcome.token.position, 13);
        assert_eq!(outcome.token.status, TokenStatus::Safe);
    }

    #[test]
    fn home_run_movement_is_exact() {
        let mut tokens = board_for(&[Color::Red, Color::Yellow]);
        place(&mut tokens, Color::Red, 0, 53, 52);

        // Lane index 1: anything above a 4 overshoots and is illegal.
        let moves = find_valid_moves(&tokens, Color::Red, 5, &[Color::Red]);
        assert!(ids(&moves, Color::Red).is_empty());

        let moves = find_valid_moves(&tokens, Color::Red, 4, &[Color::Red]);
        assert_eq!(ids(&moves, Color::Red), vec![0]);

        let red = tokens[&Color::Red][0];
        let outcome = apply_move(&red, 4, &tokens, &[Color::Red], 1);
        assert_eq!(outcome.token.position, FINISH_POS);
        assert_eq!(outcome.token.status, TokenStatus::Home);

        let outcome = apply_move(&red, 2, &tokens, &[Color::Red], 1);
        assert_eq!(outcome.token.position, 55);
        assert_eq!(outcome.token.status, TokenStatus::Safe);
    }

    #[test]
    fn check_win_requires_all_four_tokens_home() {
        let mut tokens = board_for(&[Color::Red, Color::Yellow]);
        for id in 0..3 {
            place(&mut tokens, Color::Red, id, FINISH_POS, 60);
        }
        assert!(!check_win(&tokens, Color::Red));
        place(&mut tokens, Color::Red, 3, FINISH_POS, 60);
        assert!(check_win(&tokens, Color::Red));
        assert!(!check_win(&tokens, Color::Yellow));
    }

    #[test]
    fn advance_turn_skips_finished_seats() {
        let seats: Vec<String> = ["s0", "s1", "s2", "s3"]
            .iter()
            .map(|seat| seat.to_string())
            .collect();
        let winners = vec![WinnerEntry {
            seat_id: "s1".to_string(),
            rank: 1,
        }];
        assert_eq!(advance_turn(0, &seats, &winners, true), 2);
        assert_eq!(advance_turn(0, &seats, &winners, false), 1);
        assert_eq!(advance_turn(3, &seats, &winners, true), 0);
    }

    #[test]
    fn advance_turn_with_all_winners_stays_put() {
        let seats: Vec<String> = ["s0", "s1"].iter().map(|seat| seat.to_string()).collect();
        let winners = vec![
            WinnerEntry {
                seat_id: "s0".to_string(),
                rank: 1,
            },
            WinnerEntry {
                seat_id: "s1".to_string(),
                rank: 2,
            },
        ];
        assert_eq!(advance_turn(0, &seats, &winners, true), 0);
    }

    #[test]
    fn team_mode_controls_the_partner_color() {
        let controlled = controlled_colors(Color::Red, RoomMode::Team, 4);
        assert_eq!(controlled, vec![Color::Red, Color::Yellow]);
        let controlled = controlled_colors(Color::Red, RoomMode::Individual, 4);
        assert_eq!(controlled, vec![Color::Red]);
    }

    #[test]
    fn valid_moves_never_degrade_a_token() {
        // Every enumerated move must change position or status when applied.
        let mut tokens = board_for(&[Color::Red, Color::Green, Color::Yellow, Color::Blue]);
        place(&mut tokens, Color::Red, 0, 5, 5);
        place(&mut tokens, Color::Red, 1, 54, 53);
        place(&mut tokens, Color::Green, 0, 9, 49);
        place(&mut tokens, Color::Yellow, 0, 20, 20);

        for dice in 1..=6u8 {
            for &color in &[Color::Red, Color::Green, Color::Yellow, Color::Blue] {
                let controlled = [color];
                for candidate in find_valid_moves(&tokens, color, dice, &controlled) {
                    let token = tokens[&candidate.color]
                        .iter()
                        .find(|token| token.id == candidate.token_id)
                        .copied()
                        .expect("token");
                    let (effective, stack) = effective_dice_for(&tokens, &token, dice, &controlled)
                        .expect("legal move must have an effective dice");
                    let outcome = apply_move(&token, effective, &tokens, &controlled, stack);
                    assert!(
                        outcome.token.position != token.position
                            || outcome.token.status != token.status,
                        "move {candidate:?} with dice {dice} did not change the token"
                    );
                }
            }
        }
    }
}
