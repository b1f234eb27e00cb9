//! Ordered weight pipeline. Starting from a flat prior, each stage nudges
//! the six face weights by a bounded multiplier; the final distribution is
//! normalized, floored, perception-masked and guarded before sampling.

use crate::rng::Rng;
use crate::types::{MatchPhase, StoryPhase};

use super::context::{FaceSets, RankContext, FACES};
use super::momentum::{ForceState, PlayerMomentum, RollBand};

/// The canonical tuning profile. Every knob of the shaping pipeline is a
/// named field so alternative profiles stay diffable.
#[derive(Clone, Debug)]
pub struct EngagementProfile {
    pub force_six_at: u32,
    pub pity_boost_per_turn: f64,
    pub base_assist_at: u32,
    pub base_assist_boost: f64,
    pub base_force_extra_turns: u32,
    pub luck_debt_low: f64,
    pub luck_debt_high: f64,
    pub luck_debt_playable_boost: f64,
    pub luck_debt_high_nerf: f64,
    pub luck_forgiveness: f64,
    pub late_tempo_boost: f64,
    pub urgency_tempo_boost: f64,
    pub playable_boost: f64,
    pub non_playable_nerf: f64,
    pub kill_boost: f64,
    pub finish_boost: f64,
    pub leader_kill_behind_boost: f64,
    pub leader_pressure_boost: f64,
    pub revenge_kill_boost: f64,
    pub power_roll_kill_boost: f64,
    pub escape_boost: f64,
    pub leader_high_nerf: f64,
    pub leader_escape_nerf: f64,
    pub leader_heat_boost: f64,
    pub last_place_playable_boost: f64,
    pub last_place_low_nerf: f64,
    pub spread_kill_boost: f64,
    pub spread_playable_boost: f64,
    pub rubber_band_cap: f64,
    pub dead_turn_rescue_boost: f64,
    pub emotion_recovery_boost: f64,
    pub session_assist_threshold: f64,
    pub session_assist_boost: f64,
    pub low_pattern_threshold: f64,
    pub low_face_nerf: f64,
    pub high_face_reward: f64,
    pub repeat_face_shave: f64,
    pub repeat_band_shave: f64,
    pub clutch_volatility_boost: f64,
    pub urgency_low_squash: f64,
    pub urgency_high_stretch: f64,
    pub noise_min: f64,
    pub noise_max: f64,
    pub entropy_floor: f64,
    pub mask_alpha_min: f64,
    pub mask_alpha_max: f64,
    pub max_probability: f64,
    pub six_floor_base: f64,
    pub six_floor_all_base: f64,
    pub six_floor_mostly_base: f64,
    pub six_floor_no_move_streak: f64,
    pub six_floor_urgent: f64,
    pub leader_near_win_six_relief: f64,
    pub double_six_resample_probability: f64,
    pub comeback_resample_relief: f64,
    pub force_budget: u32,
    pub force_min_gap: u64,
}

impl Default for EngagementProfile {
    fn default() -> Self {
        Self {
            force_six_at: 9,
            pity_boost_per_turn: 0.09,
            base_assist_at: 3,
            base_assist_boost: 2.6,
            base_force_extra_turns: 3,
            luck_debt_low: -4.0,
            luck_debt_high: 5.0,
            luck_debt_playable_boost: 1.18,
            luck_debt_high_nerf: 0.86,
            luck_forgiveness: 0.88,
            late_tempo_boost: 1.3,
            urgency_tempo_boost: 1.25,
            playable_boost: 1.3,
            non_playable_nerf: 0.74,
            kill_boost: 1.24,
            finish_boost: 1.20,
            leader_kill_behind_boost: 1.3,
            leader_pressure_boost: 1.12,
            revenge_kill_boost: 1.35,
            power_roll_kill_boost: 1.15,
            escape_boost: 1.24,
            leader_high_nerf: 0.9,
            leader_escape_nerf: 0.92,
            leader_heat_boost: 1.1,
            last_place_playable_boost: 1.12,
            last_place_low_nerf: 0.93,
            spread_kill_boost: 1.15,
            spread_playable_boost: 1.08,
            rubber_band_cap: 1.15,
            dead_turn_rescue_boost: 1.2,
            emotion_recovery_boost: 1.15,
            session_assist_threshold: 3.0,
            session_assist_boost: 1.1,
            low_pattern_threshold: 0.5,
            low_face_nerf: 0.82,
            high_face_reward: 1.18,
            repeat_face_shave: 0.7,
            repeat_band_shave: 0.85,
            clutch_volatility_boost: 1.1,
            urgency_low_squash: 0.3,
            urgency_high_stretch: 0.3,
            noise_min: 0.97,
            noise_max: 1.03,
            entropy_floor: 0.05,
            mask_alpha_min: 0.06,
            mask_alpha_max: 0.14,
            max_probability: 0.46,
            six_floor_base: 0.10,
            six_floor_all_base: 0.34,
            six_floor_mostly_base: 0.24,
            six_floor_no_move_streak: 0.20,
            six_floor_urgent: 0.16,
            leader_near_win_six_relief: 0.8,
            double_six_resample_probability: 0.85,
            comeback_resample_relief: 0.15,
            force_budget: 6,
            force_min_gap: 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForcedReason {
    SixPity,
    BaseLock,
}

#[derive(Clone, Debug)]
pub struct ShapedRoll {
    pub probabilities: [f64; FACES],
    pub forced: Option<u8>,
    pub forced_reason: Option<ForcedReason>,
}

pub struct WeightInputs<'a> {
    pub faces: &'a FaceSets,
    pub rank: &'a RankContext,
    pub momentum: &'a PlayerMomentum,
    pub story: StoryPhase,
    /// Elapsed fraction of the soft match budget, clamped to `[0, 1]`.
    pub urgency: f64,
}

const SIX: usize = 5;
const LOW_FACES: [usize; 2] = [0, 1];
const HIGH_FACES: [usize; 3] = [3, 4, 5];

fn boost_set(weights: &mut [f64; FACES], set: &[bool; FACES], factor: f64) {
    for (weight, member) in weights.iter_mut().zip(set) {
        if *member {
            *weight *= factor;
        }
    }
}

/// Runs the full shaping pipeline and returns the final probability vector,
/// or a forced face when a guarantee fires within the force budget.
pub fn shape_distribution(
    inputs: &WeightInputs<'_>,
    profile: &EngagementProfile,
    force: &ForceState,
    rng: &mut Rng,
) -> ShapedRoll {
    let faces = inputs.faces;
    let rank = inputs.rank;
    let momentum = inputs.momentum;
    let urgency = inputs.urgency.clamp(0.0, 1.0);

    let emergency_base_lock =
        faces.all_in_base && momentum.turns_all_tokens_in_base >= profile.base_assist_at + 2;

    // Progressive six pity.
    if momentum.turns_since_six >= profile.force_six_at
        && force.may_force(profile.force_budget, profile.force_min_gap, emergency_base_lock)
    {
        return ShapedRoll {
            probabilities: one_hot(6),
            forced: Some(6),
            forced_reason: Some(ForcedReason::SixPity),
        };
    }

    // Participation guarantee escalates into a forced release.
    if faces.all_in_base
        && momentum.turns_all_tokens_in_base
            >= profile.base_assist_at + profile.base_force_extra_turns
        && force.may_force(profile.force_budget, profile.force_min_gap, emergency_base_lock)
    {
        return ShapedRoll {
            probabilities: one_hot(6),
            forced: Some(6),
            forced_reason: Some(ForcedReason::BaseLock),
        };
    }

    let mut weights = [1.0f64; FACES];

    if momentum.turns_since_six > 0 {
        weights[SIX] *= 1.0 + profile.pity_boost_per_turn * f64::from(momentum.turns_since_six);
    }

    if faces.all_in_base && momentum.turns_all_tokens_in_base >= profile.base_assist_at {
        weights[SIX] *= profile.base_assist_boost;
    }

    // Luck-debt balancing.
    if momentum.luck_delta < profile.luck_debt_low {
        boost_set(&mut weights, &faces.playable, profile.luck_debt_playable_boost);
    } else if momentum.luck_delta > profile.luck_debt_high {
        weights[4] *= profile.luck_debt_high_nerf;
        weights[SIX] *= profile.luck_debt_high_nerf;
    }

    // Tempo by match phase and urgency.
    let tempo = match rank.match_phase {
        MatchPhase::Early => 1.0,
        MatchPhase::Mid => 1.0 + (profile.late_tempo_boost - 1.0) * 0.4,
        MatchPhase::Late => profile.late_tempo_boost,
    } * (1.0 + (profile.urgency_tempo_boost - 1.0) * urgency);
    boost_set(&mut weights, &faces.playable, tempo.min(profile.late_tempo_boost));
    for face in HIGH_FACES {
        weights[face] *= 1.0 + (tempo.min(profile.urgency_tempo_boost) - 1.0) * 0.5;
    }

    // Tactical relevance.
    for face in 0..FACES {
        if faces.playable[face] {
            weights[face] *= profile.playable_boost;
        } else {
            weights[face] *= profile.non_playable_nerf;
        }
    }
    boost_set(&mut weights, &faces.kill, profile.kill_boost);
    boost_set(&mut weights, &faces.finish, profile.finish_boost);

    // Kill and leader pressure.
    if !rank.is_leader {
        boost_set(&mut weights, &faces.leader_kill, profile.leader_kill_behind_boost);
        if rank.behind_gap > 0 {
            boost_set(&mut weights, &faces.leader_pressure, profile.leader_heat_boost);
        }
    }
    boost_set(&mut weights, &faces.leader_pressure, profile.leader_pressure_boost);
    if momentum.revenge_armed_turns > 0 {
        boost_set(&mut weights, &faces.revenge_kill, profile.revenge_kill_boost);
    }
    if momentum.power_roll_charges > 0 {
        boost_set(&mut weights, &faces.kill, profile.power_roll_kill_boost);
    }

    // Escape preservation for trailing or tilted players.
    if rank.is_last || rank.behind_ratio > 0.25 || momentum.recently_killed_turns > 0 {
        boost_set(&mut weights, &faces.escape, profile.escape_boost);
    }

    // Anti-snowball on the current leader.
    if rank.is_leader {
        weights[4] *= profile.leader_high_nerf;
        weights[SIX] *= profile.leader_high_nerf;
        boost_set(&mut weights, &faces.escape, profile.leader_escape_nerf);
    }

    // Last-place hope.
    if rank.is_last {
        boost_set(&mut weights, &faces.playable, profile.last_place_playable_boost);
        for face in LOW_FACES {
            weights[face] *= profile.last_place_low_nerf;
        }
    }

    apply_story_overrides(&mut weights, inputs);

    // Spread awareness.
    if rank.spread_high {
        if faces.any_kill() {
            boost_set(&mut weights, &faces.kill, profile.spread_kill_boost);
        } else {
            boost_set(&mut weights, &faces.playable, profile.spread_playable_boost);
        }
    }

    // Rubber band.
    if rank.behind_ratio >= 0.3 {
        let factor = (1.0 + rank.behind_ratio * 0.5).min(profile.rubber_band_cap);
        boost_set(&mut weights, &faces.playable, factor);
        for face in HIGH_FACES {
            weights[face] *= factor;
        }
    }
    // Dead-turn rescue.
    if momentum.no_move_streak >= 2 {
        boost_set(&mut weights, &faces.playable, profile.dead_turn_rescue_boost);
    }
    // Emotion recovery after a capture.
    if momentum.recently_killed_turns > 0 {
        boost_set(&mut weights, &faces.escape, profile.emotion_recovery_boost);
    }
    // Session-pressure assist.
    if momentum.session_assist_score >= profile.session_assist_threshold {
        boost_set(&mut weights, &faces.playable, profile.session_assist_boost);
    }

    // Anti-frustration.
    if momentum.low_roll_pattern_score() >= profile.low_pattern_threshold {
        for face in LOW_FACES {
            weights[face] *= profile.low_face_nerf;
        }
        for face in HIGH_FACES {
            weights[face] *= profile.high_face_reward;
        }
    }
    if let Some((face, run)) = momentum.repeated_face_run() {
        if run >= 2 {
            weights[(face - 1) as usize] *= profile.repeat_face_shave;
        }
    }
    if let Some((band, run)) = momentum.repeated_band_run() {
        if run >= 3 {
            let members: [usize; 2] = match band {
                RollBand::Low => [0, 1],
                RollBand::Mid => [2, 3],
                RollBand::High => [4, 5],
            };
            for face in members {
                weights[face] *= profile.repeat_band_shave;
            }
        }
    }

    // Drama and clutch volatility.
    if momentum.revenge_armed_turns > 0 {
        boost_set(&mut weights, &faces.kill, profile.clutch_volatility_boost);
    }
    if rank.close_chase || rank.any_near_win {
        weights[0] *= profile.clutch_volatility_boost;
        weights[SIX] *= profile.clutch_volatility_boost;
    }

    // Urgency hard floor.
    for face in LOW_FACES {
        weights[face] *= 1.0 - profile.urgency_low_squash * urgency;
    }
    for face in [4, SIX] {
        weights[face] *= 1.0 + profile.urgency_high_stretch * urgency;
    }

    // Entropy noise.
    for weight in weights.iter_mut() {
        *weight *= f64::from(rng.uniform(profile.noise_min as f32, profile.noise_max as f32));
    }

    let mut probabilities = normalize_with_floor(&weights, profile.entropy_floor);
    mask_perception(&mut probabilities, momentum, profile, rng);
    guard_six_probability(&mut probabilities, inputs, profile);
    // Final floor pass: masking and the six guard may have pushed a face
    // fractionally under the entropy floor.
    probabilities = normalize_with_floor(&probabilities, profile.entropy_floor);

    ShapedRoll {
        probabilities,
        forced: None,
        forced_reason: None,
    }
}

fn apply_story_overrides(weights: &mut [f64; FACES], inputs: &WeightInputs<'_>) {
    let faces = inputs.faces;
    match inputs.story {
        StoryPhase::Start => boost_set(weights, &faces.playable, 1.05),
        StoryPhase::Spread => {
            boost_set(weights, &faces.playable, 1.06);
            weights[SIX] *= 1.04;
        }
        StoryPhase::Fights => boost_set(weights, &faces.kill, 1.1),
        StoryPhase::Leader => {
            boost_set(weights, &faces.leader_kill, 1.1);
            boost_set(weights, &faces.leader_pressure, 1.08);
        }
        StoryPhase::Hope => {
            boost_set(weights, &faces.escape, 1.08);
            if !inputs.rank.is_leader {
                boost_set(weights, &faces.playable, 1.05);
            }
        }
        StoryPhase::Chaos => {
            boost_set(weights, &faces.kill, 1.08);
            weights[0] *= 1.05;
            weights[SIX] *= 1.05;
        }
        StoryPhase::Finish => {
            boost_set(weights, &faces.finish, 1.12);
            for face in HIGH_FACES {
                weights[face] *= 1.05;
            }
        }
    }
}

fn one_hot(face: u8) -> [f64; FACES] {
    let mut probabilities = [0.0; FACES];
    probabilities[(face - 1) as usize] = 1.0;
    probabilities
}

/// Normalizes weights into probabilities and lifts every face to at least
/// the entropy floor, rescaling the rest.
pub fn normalize_with_floor(weights: &[f64; FACES], floor: f64) -> [f64; FACES] {
    let mut probabilities = [0.0f64; FACES];
    let sum: f64 = weights.iter().map(|weight| weight.max(0.0)).sum();
    if sum <= f64::EPSILON {
        return [1.0 / FACES as f64; FACES];
    }
    for (probability, weight) in probabilities.iter_mut().zip(weights) {
        *probability = weight.max(0.0) / sum;
    }

    let mut floored_mass = 0.0;
    let mut free_mass = 0.0;
    for probability in probabilities.iter() {
        if *probability < floor {
            floored_mass += floor;
        } else {
            free_mass += *probability;
        }
    }
    if floored_mass > 0.0 && free_mass > 0.0 {
        let scale = (1.0 - floored_mass) / free_mass;
        for probability in probabilities.iter_mut() {
            if *probability < floor {
                *probability = floor;
            } else {
                *probability *= scale;
            }
        }
    }
    probabilities
}

/// Blends toward uniform, caps the dominant face, and shaves a still-
/// dominant repeated face so streaks read as luck rather than policy.
fn mask_perception(
    probabilities: &mut [f64; FACES],
    momentum: &PlayerMomentum,
    profile: &EngagementProfile,
    rng: &mut Rng,
) {
    let alpha = f64::from(rng.uniform(
        profile.mask_alpha_min as f32,
        profile.mask_alpha_max as f32,
    ));
    for probability in probabilities.iter_mut() {
        *probability = (1.0 - alpha) * *probability + alpha / FACES as f64;
    }

    cap_max_probability(probabilities, profile.max_probability);

    if let Some((face, run)) = momentum.repeated_face_run() {
        if run >= 2 {
            let index = (face - 1) as usize;
            let max = probabilities
                .iter()
                .cloned()
                .fold(f64::MIN, f64::max);
            if (probabilities[index] - max).abs() < f64::EPSILON {
                probabilities[index] *= 0.9;
            }
        }
    }

    // Micro-jitter, then renormalize.
    for probability in probabilities.iter_mut() {
        *probability *= f64::from(rng.uniform(0.995, 1.005));
    }
    renormalize(probabilities);
}

fn cap_max_probability(probabilities: &mut [f64; FACES], cap: f64) {
    for _ in 0..FACES {
        let (index, max) = probabilities
            .iter()
            .enumerate()
            .fold((0, f64::MIN), |acc, (index, probability)| {
                if *probability > acc.1 {
                    (index, *probability)
                } else {
                    acc
                }
            });
        if max <= cap {
            return;
        }
        let excess = max - cap;
        probabilities[index] = cap;
        let others: f64 = probabilities
            .iter()
            .enumerate()
            .filter(|(other, _)| *other != index)
            .map(|(_, probability)| *probability)
            .sum();
        if others <= f64::EPSILON {
            return;
        }
        for (other, probability) in probabilities.iter_mut().enumerate() {
            if other != index {
                *probability += excess * (*probability / others);
            }
        }
    }
}

/// Lower bound on rolling a six, scaled by how stuck the player is.
fn guard_six_probability(
    probabilities: &mut [f64; FACES],
    inputs: &WeightInputs<'_>,
    profile: &EngagementProfile,
) {
    let faces = inputs.faces;
    let momentum = inputs.momentum;

    let mut floor = profile.six_floor_base;
    if faces.all_in_base {
        floor = floor.max(profile.six_floor_all_base);
    } else if faces.own_token_count > 0
        && faces.base_token_count * 4 >= faces.own_token_count * 3
    {
        floor = floor.max(profile.six_floor_mostly_base);
    }
    if momentum.no_move_streak >= 2 {
        floor = floor.max(profile.six_floor_no_move_streak);
    }
    if inputs.urgency >= 0.9 {
        floor = floor.max(profile.six_floor_urgent);
    }
    if inputs.rank.is_leader && inputs.rank.self_near_win {
        floor *= profile.leader_near_win_six_relief;
    }

    if probabilities[SIX] < floor {
        let deficit_scale = (1.0 - floor) / (1.0 - probabilities[SIX]).max(f64::EPSILON);
        for (index, probability) in probabilities.iter_mut().enumerate() {
            if index != SIX {
                *probability *= deficit_scale;
            }
        }
        probabilities[SIX] = floor;
    }
    renormalize(probabilities);
}

fn renormalize(probabilities: &mut [f64; FACES]) {
    let sum: f64 = probabilities.iter().sum();
    if sum <= f64::EPSILON {
        *probabilities = [1.0 / FACES as f64; FACES];
        return;
    }
    for probability in probabilities.iter_mut() {
        *probability /= sum;
    }
}

/// Cumulative-weight sample over the final distribution.
pub fn sample_face(probabilities: &[f64; FACES], rng: &mut Rng) -> u8 {
    let roll = f64::from(rng.next_f32());
    let mut cumulative = 0.0;
    for (index, probability) in probabilities.iter().enumerate() {
        cumulative += probability;
        if roll < cumulative {
            return (index + 1) as u8;
        }
    }
    6
}

/// Resample excluding the six, for the triple-six suppressor.
pub fn sample_face_without_six(probabilities: &[f64; FACES], rng: &mut Rng) -> u8 {
    let mut truncated = *probabilities;
    truncated[SIX] = 0.0;
    let sum: f64 = truncated.iter().sum();
    if sum <= f64::EPSILON {
        return rng.int(1, 5) as u8;
    }
    for probability in truncated.iter_mut() {
        *probability /= sum;
    }
    let roll = f64::from(rng.next_f32());
    let mut cumulative = 0.0;
    for (index, probability) in truncated.iter().enumerate() {
        cumulative += probability;
        if roll < cumulative {
            return (index + 1) as u8;
        }
    }
    5
}
