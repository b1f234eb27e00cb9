//! Engagement dice engine. Shapes each roll's face distribution toward
//! pacing, participation, comeback and anti-frustration goals while keeping
//! the result looking like dice. The whole pipeline is best-effort: any
//! failure inside a roll falls back to a uniform face and never surfaces.

pub mod context;
pub mod momentum;
pub mod story;
pub mod weights;

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::shared::{force_state_key, momentum_key, story_director_key, SharedCache};
use crate::constants::MAX_MATCH_TIME_MS;
use crate::rng::Rng;
use crate::rules::TokenMap;
use crate::types::{Color, RoomMode};

use self::context::{analyze_faces, rank_context};
use self::momentum::{ForceState, PlayerMomentum, RollReport};
use self::story::StoryDirector;
use self::weights::{
    sample_face, sample_face_without_six, shape_distribution, EngagementProfile, WeightInputs,
};

/// Turns a capture's victim keeps the revenge window armed.
const REVENGE_WINDOW_TURNS: u32 = 4;
/// Turns a victim counts as freshly hit for recovery shaping.
const DAZED_TURNS: u32 = 3;
const POWER_ROLL_CHARGE_CAP: u32 = 3;

#[derive(Clone, Copy, Debug)]
pub struct DiceRollResult {
    pub face: u8,
    pub forced: bool,
}

/// Everything the engine needs to shape one roll, passed by the coordinator
/// from inside the room's critical section.
pub struct DiceRequest<'a> {
    pub room_id: &'a str,
    pub seat_id: &'a str,
    pub player_color: Color,
    pub controlled: &'a [Color],
    pub tokens: &'a TokenMap,
    pub mode: RoomMode,
    pub max_players: u8,
    pub elapsed_ms: u64,
}

pub struct EngagementEngine {
    cache: Arc<dyn SharedCache>,
    profile: EngagementProfile,
    enabled: bool,
    state_ttl: Duration,
}

impl EngagementEngine {
    pub fn new(cache: Arc<dyn SharedCache>, enabled: bool) -> Self {
        Self {
            cache,
            profile: EngagementProfile::default(),
            enabled,
            state_ttl: Duration::from_secs(3_600),
        }
    }

    pub fn with_profile(mut self, profile: EngagementProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Produces a face for the current roller. Never fails: a disabled
    /// engine or any internal problem degrades to uniform dice.
    pub async fn roll(&self, request: &DiceRequest<'_>, rng: &mut Rng) -> DiceRollResult {
        if !self.enabled {
            return DiceRollResult {
                face: rng.dice_face(),
                forced: false,
            };
        }
        match self.shaped_roll(request, rng).await {
            Some(result) => result,
            None => {
                warn!(
                    room_id = request.room_id,
                    "engagement shaping unavailable, falling back to uniform dice"
                );
                DiceRollResult {
                    face: rng.dice_face(),
                    forced: false,
                }
            }
        }
    }

    async fn shaped_roll(&self, request: &DiceRequest<'_>, rng: &mut Rng) -> Option<DiceRollResult> {
        if request.controlled.is_empty() || request.tokens.is_empty() {
            return None;
        }

        let momentum: PlayerMomentum = self
            .load(&momentum_key(request.room_id, request.seat_id))
            .await;
        let mut director: StoryDirector = self.load(&story_director_key(request.room_id)).await;
        let mut force: ForceState = self.load(&force_state_key(request.room_id)).await;

        let sides = sides_for(request.tokens, request.mode, request.max_players);
        let rank = rank_context(request.tokens, request.controlled, &sides);
        let leader_key = rank.leader_key.clone();
        director.observe(&rank, &leader_key);

        let faces = analyze_faces(
            request.tokens,
            request.player_color,
            request.controlled,
            &momentum.revenge_target_colors,
            &rank.leader_colors,
        );

        let urgency = request.elapsed_ms as f64 / MAX_MATCH_TIME_MS as f64;
        let inputs = WeightInputs {
            faces: &faces,
            rank: &rank,
            momentum: &momentum,
            story: director.phase,
            urgency,
        };
        let shaped = shape_distribution(&inputs, &self.profile, &force, rng);

        let face = match shaped.forced {
            Some(face) => face,
            None => {
                let sampled = sample_face(&shaped.probabilities, rng);
                self.suppress_runaway_sixes(sampled, &momentum, &rank, &shaped.probabilities, rng)
            }
        };
        force.record_roll(shaped.forced.is_some());

        debug!(
            room_id = request.room_id,
            seat_id = request.seat_id,
            face,
            forced = shaped.forced.is_some(),
            phase = ?director.phase,
            "dice shaped"
        );

        self.store(&story_director_key(request.room_id), &director).await;
        self.store(&force_state_key(request.room_id), &force).await;

        Some(DiceRollResult {
            face,
            forced: shaped.forced.is_some(),
        })
    }

    /// A third consecutive six is always rerolled; a second one usually is,
    /// softened for players chasing the leader.
    fn suppress_runaway_sixes(
        &self,
        sampled: u8,
        momentum: &PlayerMomentum,
        rank: &context::RankContext,
        probabilities: &[f64; context::FACES],
        rng: &mut Rng,
    ) -> u8 {
        if sampled != 6 {
            return sampled;
        }
        match momentum.consecutive_sixes() {
            0 => sampled,
            1 => {
                let mut resample_probability = self.profile.double_six_resample_probability;
                if !rank.is_leader && rank.behind_gap > 0 {
                    resample_probability -= self.profile.comeback_resample_relief;
                }
                if rng.bool(resample_probability as f32) {
                    sample_face_without_six(probabilities, rng)
                } else {
                    sampled
                }
            }
            _ => sample_face_without_six(probabilities, rng),
        }
    }

    /// Reported after the roll's move (or forfeit) resolves, inside the
    /// same critical section, so the next roll sees fresh momentum.
    pub async fn report_outcome(&self, room_id: &str, seat_id: &str, report: RollReport) {
        if !self.enabled {
            return;
        }
        let key = momentum_key(room_id, seat_id);
        let mut momentum: PlayerMomentum = self.load(&key).await;
        momentum.register_roll(report, self.profile.luck_forgiveness);
        self.store(&key, &momentum).await;
    }

    /// Capture bookkeeping: the attacker banks a power roll, each victim
    /// arms revenge against the attacker's color.
    pub async fn report_capture(
        &self,
        room_id: &str,
        attacker_seat_id: &str,
        attacker_color: Color,
        victim_seat_ids: &[String],
    ) {
        if !self.enabled {
            return;
        }
        let attacker_key = momentum_key(room_id, attacker_seat_id);
        let mut attacker: PlayerMomentum = self.load(&attacker_key).await;
        attacker.register_capture_as_attacker(POWER_ROLL_CHARGE_CAP);
        self.store(&attacker_key, &attacker).await;

        for victim_seat_id in victim_seat_ids {
            let victim_key = momentum_key(room_id, victim_seat_id);
            let mut victim: PlayerMomentum = self.load(&victim_key).await;
            victim.register_capture_as_victim(attacker_color, REVENGE_WINDOW_TURNS, DAZED_TURNS);
            self.store(&victim_key, &victim).await;
        }

        let director_key = story_director_key(room_id);
        let mut director: StoryDirector = self.load(&director_key).await;
        director.record_capture();
        self.store(&director_key, &director).await;
    }

    /// Current story-phase label for the room, for the taunt director's
    /// phase boosts. Start when no director state exists yet.
    pub async fn story_phase(&self, room_id: &str) -> crate::types::StoryPhase {
        let director: StoryDirector = self.load(&story_director_key(room_id)).await;
        director.phase
    }

    /// Drops all engagement state for a deleted room.
    pub async fn evict_room(&self, room_id: &str, seat_ids: &[String]) {
        self.cache.delete(&story_director_key(room_id)).await;
        self.cache.delete(&force_state_key(room_id)).await;
        for seat_id in seat_ids {
            self.cache.delete(&momentum_key(room_id, seat_id)).await;
        }
    }

    async fn load<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.cache.get_json(key).await {
            Some(value) => serde_json::from_value(value).unwrap_or_default(),
            None => T::default(),
        }
    }

    async fn store<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(json) => self.cache.set_json(key, json, self.state_ttl).await,
            Err(error) => warn!(key, %error, "failed to serialize engagement state"),
        }
    }
}

/// Partition of active colors into ranked sides: singletons in individual
/// mode, opposite-color pairs in team mode.
pub fn sides_for(tokens: &TokenMap, mode: RoomMode, max_players: u8) -> Vec<Vec<Color>> {
    let order = crate::board::color_order(max_players);
    let active: Vec<Color> = order
        .iter()
        .copied()
        .filter(|color| tokens.contains_key(color))
        .collect();
    match mode {
        RoomMode::Individual => active.into_iter().map(|color| vec![color]).collect(),
        RoomMode::Team => {
            let half = order.len() / 2;
            (0..half)
                .map(|index| {
                    [order[index], order[index + half]]
                        .into_iter()
                        .filter(|color| tokens.contains_key(color))
                        .collect()
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::shared::MemoryCache;
    use crate::types::Token;

    fn board_for(colors: &[Color]) -> TokenMap {
        let mut tokens = TokenMap::new();
        for &color in colors {
            tokens.insert(
                color,
                (0..4u8).map(|id| Token::at_base(id, color)).collect(),
            );
        }
        tokens
    }

    fn engine() -> EngagementEngine {
        EngagementEngine::new(Arc::new(MemoryCache::new()), true)
    }

    fn request<'a>(tokens: &'a TokenMap, controlled: &'a [Color]) -> DiceRequest<'a> {
        DiceRequest {
            room_id: "room1",
            seat_id: "seat1",
            player_color: Color::Red,
            controlled,
            tokens,
            mode: RoomMode::Individual,
            max_players: 2,
            elapsed_ms: 60_000,
        }
    }

    #[tokio::test]
    async fn disabled_engine_rolls_uniform_faces() {
        let engine = EngagementEngine::new(Arc::new(MemoryCache::new()), false);
        let tokens = board_for(&[Color::Red, Color::Yellow]);
        let controlled = [Color::Red];
        let mut rng = Rng::new(1);
        let mut seen = [false; 6];
        for _ in 0..500 {
            let result = engine.roll(&request(&tokens, &controlled), &mut rng).await;
            assert!(!result.forced);
            seen[(result.face - 1) as usize] = true;
        }
        assert!(seen.iter().all(|face| *face));
    }

    #[tokio::test]
    async fn empty_context_falls_back_to_uniform() {
        let engine = engine();
        let tokens = TokenMap::new();
        let controlled = [Color::Red];
        let mut rng = Rng::new(2);
        let result = engine.roll(&request(&tokens, &controlled), &mut rng).await;
        assert!((1..=6).contains(&result.face));
        assert!(!result.forced);
    }

    #[tokio::test]
    async fn rolls_stay_in_range_and_update_force_state() {
        let engine = engine();
        let tokens = board_for(&[Color::Red, Color::Yellow]);
        let controlled = [Color::Red];
        let mut rng = Rng::new(3);
        for _ in 0..50 {
            let result = engine.roll(&request(&tokens, &controlled), &mut rng).await;
            assert!((1..=6).contains(&result.face));
        }
        let force: ForceState = engine.load(&force_state_key("room1")).await;
        assert_eq!(force.total_rolls, 50);
    }

    #[tokio::test]
    async fn drought_reported_through_outcomes_forces_a_six() {
        let engine = engine();
        let tokens = board_for(&[Color::Red, Color::Yellow]);
        let controlled = [Color::Red];
        let profile = EngagementProfile::default();

        for _ in 0..profile.force_six_at {
            engine
                .report_outcome(
                    "room1",
                    "seat1",
                    RollReport {
                        rolled_value: 2,
                        had_valid_move: true,
                        all_in_base: false,
                        was_forced: false,
                    },
                )
                .await;
        }

        let mut rng = Rng::new(9);
        let result = engine.roll(&request(&tokens, &controlled), &mut rng).await;
        assert_eq!(result.face, 6);
        assert!(result.forced);
    }

    #[tokio::test]
    async fn third_consecutive_six_is_suppressed() {
        let engine = engine();
        let tokens = board_for(&[Color::Red, Color::Yellow]);
        let controlled = [Color::Red];

        // Two sixes on record arm the suppressor.
        for _ in 0..2 {
            engine
                .report_outcome(
                    "room1",
                    "seat1",
                    RollReport {
                        rolled_value: 6,
                        had_valid_move: true,
                        all_in_base: false,
                        was_forced: false,
                    },
                )
                .await;
        }

        let mut rng = Rng::new(17);
        for _ in 0..300 {
            let result = engine.roll(&request(&tokens, &controlled), &mut rng).await;
            if !result.forced {
                assert_ne!(result.face, 6, "third consecutive six must be resampled");
            }
        }
    }

    #[tokio::test]
    async fn capture_reports_arm_revenge_and_power_rolls() {
        let engine = engine();
        engine
            .report_capture("room1", "seat1", Color::Red, &["seat2".to_string()])
            .await;

        let attacker: PlayerMomentum = engine.load(&momentum_key("room1", "seat1")).await;
        assert_eq!(attacker.power_roll_charges, 1);

        let victim: PlayerMomentum = engine.load(&momentum_key("room1", "seat2")).await;
        assert_eq!(victim.revenge_armed_turns, REVENGE_WINDOW_TURNS);
        assert_eq!(victim.revenge_target_colors, vec![Color::Red]);

        let director: StoryDirector = engine.load(&story_director_key("room1")).await;
        assert_eq!(director.capture_count, 1);
    }

    #[test]
    fn sides_partition_matches_mode() {
        let tokens = board_for(&[Color::Red, Color::Green, Color::Yellow, Color::Blue]);
        let individual = sides_for(&tokens, RoomMode::Individual, 4);
        assert_eq!(individual.len(), 4);
        let team = sides_for(&tokens, RoomMode::Team, 4);
        assert_eq!(team.len(), 2);
        assert_eq!(team[0], vec![Color::Red, Color::Yellow]);
        assert_eq!(team[1], vec![Color::Green, Color::Blue]);
    }

    #[tokio::test]
    async fn triple_six_rate_stays_under_ceiling() {
        let engine = engine();
        let tokens = board_for(&[Color::Red, Color::Yellow]);
        let controlled = [Color::Red];
        let mut rng = Rng::new(4242);

        let mut streak = 0u32;
        let mut triples = 0u32;
        let total = 20_000u32;
        for _ in 0..total {
            let result = engine.roll(&request(&tokens, &controlled), &mut rng).await;
            engine
                .report_outcome(
                    "room1",
                    "seat1",
                    RollReport {
                        rolled_value: result.face,
                        had_valid_move: true,
                        all_in_base: false,
                        was_forced: result.forced,
                    },
                )
                .await;
            if result.face == 6 {
                streak += 1;
                if streak >= 3 {
                    triples += 1;
                }
            } else {
                streak = 0;
            }
        }
        // Uniform dice would produce ~0.46% triples; the suppressor keeps
        // the shaped engine well under that.
        assert!(
            f64::from(triples) / f64::from(total) < 0.004,
            "triples: {triples}"
        );
    }
}
