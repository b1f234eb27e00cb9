//! Per-roll context analysis: which faces do something useful, and where
//! the roller stands in the race. All pure.

use crate::board::home_entry_index;
use crate::constants::{
    in_home_run, is_safe_index, on_main_track, HOME_LANE_BASE, HOME_RUN_MAX, TRACK_LEN,
};
use crate::rules::{apply_move, effective_dice_for, find_valid_moves, TokenMap};
use crate::types::{Color, MatchPhase, Token, TokenStatus};

pub const FACES: usize = 6;

/// Face index helper: face value 1..=6 to array slot.
fn slot(face: u8) -> usize {
    (face - 1) as usize
}

#[derive(Clone, Debug, Default)]
pub struct FaceSets {
    pub playable: [bool; FACES],
    pub kill: [bool; FACES],
    pub leader_kill: [bool; FACES],
    pub leader_pressure: [bool; FACES],
    pub escape: [bool; FACES],
    pub finish: [bool; FACES],
    pub revenge_kill: [bool; FACES],
    pub base_token_count: usize,
    pub own_token_count: usize,
    pub all_in_base: bool,
}

impl FaceSets {
    pub fn playable_count(&self) -> usize {
        self.playable.iter().filter(|playable| **playable).count()
    }

    pub fn any_kill(&self) -> bool {
        self.kill.iter().any(|kill| *kill)
    }
}

#[derive(Clone, Debug)]
pub struct RankContext {
    pub self_score: i64,
    pub leader_score: i64,
    pub is_leader: bool,
    pub is_last: bool,
    pub lead_gap: i64,
    pub behind_gap: i64,
    pub behind_ratio: f64,
    pub match_phase: MatchPhase,
    pub spread_high: bool,
    pub any_near_win: bool,
    pub self_near_win: bool,
    pub close_chase: bool,
    pub leader_colors: Vec<Color>,
    /// Stable identifier of the leading side (its first color), for the
    /// story director's leader-change counter.
    pub leader_key: String,
    pub side_count: usize,
}

/// Progress score of a single token: a home token dominates, leaving base
/// and reaching the lane earn flat bonuses, and walked cells accumulate.
pub fn token_progress(token: &Token) -> i64 {
    match token.status {
        TokenStatus::Home | TokenStatus::Finished => 95,
        TokenStatus::Base => 0,
        TokenStatus::Active | TokenStatus::Safe => {
            let lane_bonus = if in_home_run(token.position) { 14 } else { 0 };
            30 + lane_bonus + i64::from(token.steps.max(0))
        }
    }
}

/// Cells left to walk before the token is home.
pub fn token_remaining(token: &Token) -> i64 {
    match token.status {
        TokenStatus::Home | TokenStatus::Finished => 0,
        TokenStatus::Base => 58,
        TokenStatus::Active | TokenStatus::Safe => {
            if in_home_run(token.position) {
                i64::from(HOME_RUN_MAX - (token.position - HOME_LANE_BASE))
            } else {
                let arrow = home_entry_index(token.color);
                let distance = (arrow - token.position + TRACK_LEN) % TRACK_LEN;
                i64::from(distance) + i64::from(HOME_RUN_MAX) + 1
            }
        }
    }
}

fn side_score(tokens: &TokenMap, colors: &[Color]) -> i64 {
    colors
        .iter()
        .filter_map(|color| tokens.get(color))
        .flatten()
        .map(token_progress)
        .sum()
}

fn side_remaining(tokens: &TokenMap, colors: &[Color]) -> i64 {
    colors
        .iter()
        .filter_map(|color| tokens.get(color))
        .flatten()
        .map(token_remaining)
        .sum()
}

/// Ranks all sides and situates the roller's side among them. `sides` is
/// the full partition of active colors (singletons in individual mode,
/// color pairs in team mode); `self_colors` must be one of its members.
pub fn rank_context(tokens: &TokenMap, self_colors: &[Color], sides: &[Vec<Color>]) -> RankContext {
    let scores: Vec<i64> = sides.iter().map(|side| side_score(tokens, side)).collect();
    let remainings: Vec<i64> = sides
        .iter()
        .map(|side| side_remaining(tokens, side))
        .collect();

    let self_index = sides
        .iter()
        .position(|side| side.first() == self_colors.first())
        .unwrap_or(0);
    let self_score = scores.get(self_index).copied().unwrap_or(0);

    let leader_score = scores.iter().copied().max().unwrap_or(0);
    let lowest_score = scores.iter().copied().min().unwrap_or(0);
    let is_leader = self_score == leader_score;
    let is_last = sides.len() > 1 && self_score == lowest_score && !is_leader;

    let second_best = scores
        .iter()
        .copied()
        .filter(|score| *score < leader_score)
        .max()
        .unwrap_or(leader_score);
    let lead_gap = if is_leader {
        leader_score - second_best
    } else {
        0
    };
    let behind_gap = leader_score - self_score;
    let behind_ratio = behind_gap as f64 / leader_score.max(1) as f64;

    let total_tokens: usize = tokens.values().map(Vec::len).sum();
    let finished: usize = tokens
        .values()
        .flatten()
        .filter(|token| token.is_home())
        .count();
    let finished_fraction = if total_tokens == 0 {
        0.0
    } else {
        finished as f64 / total_tokens as f64
    };
    let match_phase = if finished_fraction < 0.12 {
        MatchPhase::Early
    } else if finished_fraction < 0.55 {
        MatchPhase::Mid
    } else {
        MatchPhase::Late
    };

    let active_steps: Vec<f64> = tokens
        .values()
        .flatten()
        .filter(|token| token.on_board())
        .map(|token| f64::from(token.steps.max(0)))
        .collect();
    let spread_high = step_stddev(&active_steps) > 12.0;

    let any_near_win = remainings.iter().any(|remaining| *remaining <= 10);
    let self_near_win = remainings
        .get(self_index)
        .map(|remaining| *remaining <= 10)
        .unwrap_or(false);
    let close_chase = !is_leader && behind_gap <= 14;

    let leader_colors: Vec<Color> = sides
        .iter()
        .zip(&scores)
        .filter(|(_, score)| **score == leader_score)
        .flat_map(|(side, _)| side.iter().copied())
        .filter(|color| !self_colors.contains(color))
        .collect();

    let leader_key = sides
        .iter()
        .zip(&scores)
        .find(|(_, score)| **score == leader_score)
        .and_then(|(side, _)| side.first())
        .map(|color| color.as_str().to_string())
        .unwrap_or_default();

    RankContext {
        self_score,
        leader_score,
        is_leader,
        is_last,
        lead_gap,
        behind_gap,
        behind_ratio,
        match_phase,
        spread_high,
        any_near_win,
        self_near_win,
        close_chase,
        leader_colors,
        leader_key,
        side_count: sides.len(),
    }
}

fn step_stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance =
        values.iter().map(|value| (value - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn threatened(tokens: &TokenMap, token: &Token, allied: &[Color]) -> bool {
    if !on_main_track(token.position) || is_safe_index(token.position) {
        return false;
    }
    enemy_within_striking_distance(tokens, token.position, allied)
}

fn enemy_within_striking_distance(tokens: &TokenMap, cell: i16, allied: &[Color]) -> bool {
    tokens
        .iter()
        .filter(|(color, _)| !allied.contains(color))
        .flat_map(|(_, list)| list)
        .filter(|enemy| enemy.on_board() && on_main_track(enemy.position))
        .any(|enemy| {
            let gap = (cell - enemy.position + TRACK_LEN) % TRACK_LEN;
            (1..=6).contains(&gap)
        })
}

/// Classifies every face of the die for the current roller.
pub fn analyze_faces(
    tokens: &TokenMap,
    current_color: Color,
    controlled: &[Color],
    revenge_targets: &[Color],
    leader_colors: &[Color],
) -> FaceSets {
    let mut sets = FaceSets::default();

    let own_tokens: Vec<&Token> = controlled
        .iter()
        .filter_map(|color| tokens.get(color))
        .flatten()
        .collect();
    sets.base_token_count = own_tokens
        .iter()
        .filter(|token| token.status == TokenStatus::Base)
        .count();
    sets.own_token_count = own_tokens.len();
    sets.all_in_base = own_tokens
        .iter()
        .all(|token| token.status == TokenStatus::Base || token.is_home());

    for face in 1..=6u8 {
        let moves = find_valid_moves(tokens, current_color, face, controlled);
        if moves.is_empty() {
            continue;
        }
        sets.playable[slot(face)] = true;

        for candidate in &moves {
            let Some(token) = tokens
                .get(&candidate.color)
                .and_then(|list| list.iter().find(|token| token.id == candidate.token_id))
            else {
                continue;
            };
            let Some((effective, stack)) = effective_dice_for(tokens, token, face, controlled)
            else {
                continue;
            };
            let outcome = apply_move(token, effective, tokens, controlled, stack);

            if outcome.token.status == TokenStatus::Home && !token.is_home() {
                sets.finish[slot(face)] = true;
            }

            if !outcome.captured.is_empty() {
                sets.kill[slot(face)] = true;
                for victim in &outcome.captured {
                    if leader_colors.contains(&victim.color) {
                        sets.leader_kill[slot(face)] = true;
                    }
                    if revenge_targets.contains(&victim.color) {
                        sets.revenge_kill[slot(face)] = true;
                    }
                }
            }

            let landing = outcome.token.position;
            if on_main_track(landing) {
                let pressures_leader = tokens
                    .iter()
                    .filter(|(color, _)| leader_colors.contains(color))
                    .flat_map(|(_, list)| list)
                    .filter(|enemy| {
                        enemy.on_board()
                            && on_main_track(enemy.position)
                            && !is_safe_index(enemy.position)
                    })
                    .any(|enemy| {
                        let gap = (enemy.position - landing + TRACK_LEN) % TRACK_LEN;
                        (1..=6).contains(&gap)
                    });
                if pressures_leader {
                    sets.leader_pressure[slot(face)] = true;
                }
            }

            if threatened(tokens, token, controlled) {
                let lands_safe = !on_main_track(landing)
                    || is_safe_index(landing)
                    || !enemy_within_striking_distance(tokens, landing, controlled);
                if lands_safe {
                    sets.escape[slot(face)] = true;
                }
            }
        }
    }

    sets
}
