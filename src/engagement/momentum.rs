//! Per-player momentum and per-room force accounting. Both snapshots live
//! in the shared cache between rolls and default to a neutral state on any
//! miss.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::types::Color;

pub const RECENT_ROLL_WINDOW: usize = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RollBand {
    Low,
    Mid,
    High,
}

pub fn roll_band(face: u8) -> RollBand {
    match face {
        1 | 2 => RollBand::Low,
        3 | 4 => RollBand::Mid,
        _ => RollBand::High,
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerMomentum {
    pub recent_rolls: VecDeque<u8>,
    pub no_move_streak: u32,
    pub turns_since_six: u32,
    pub turns_all_tokens_in_base: u32,
    pub luck_delta: f64,
    pub revenge_armed_turns: u32,
    pub revenge_target_colors: Vec<Color>,
    pub recently_killed_turns: u32,
    pub power_roll_charges: u32,
    pub session_assist_score: f64,
}

impl Default for PlayerMomentum {
    fn default() -> Self {
        Self {
            recent_rolls: VecDeque::new(),
            no_move_streak: 0,
            turns_since_six: 0,
            turns_all_tokens_in_base: 0,
            luck_delta: 0.0,
            revenge_armed_turns: 0,
            revenge_target_colors: Vec::new(),
            recently_killed_turns: 0,
            power_roll_charges: 0,
            session_assist_score: 0.0,
        }
    }
}

/// Outcome of a resolved roll, reported after the client's move (or the
/// forfeit of it) settles.
#[derive(Clone, Copy, Debug)]
pub struct RollReport {
    pub rolled_value: u8,
    pub had_valid_move: bool,
    pub all_in_base: bool,
    pub was_forced: bool,
}

impl PlayerMomentum {
    pub fn register_roll(&mut self, report: RollReport, forgiveness: f64) {
        if self.recent_rolls.len() >= RECENT_ROLL_WINDOW {
            self.recent_rolls.pop_front();
        }
        self.recent_rolls.push_back(report.rolled_value);

        if report.had_valid_move {
            self.no_move_streak = 0;
        } else {
            self.no_move_streak = self.no_move_streak.saturating_add(1);
        }

        if report.rolled_value == 6 {
            self.turns_since_six = 0;
        } else {
            self.turns_since_six = self.turns_since_six.saturating_add(1);
        }

        if report.all_in_base {
            self.turns_all_tokens_in_base = self.turns_all_tokens_in_base.saturating_add(1);
        } else {
            self.turns_all_tokens_in_base = 0;
        }

        let rho = forgiveness.clamp(0.6, 0.99);
        self.luck_delta = self.luck_delta * rho + (f64::from(report.rolled_value) - 3.5);

        self.revenge_armed_turns = self.revenge_armed_turns.saturating_sub(1);
        if self.revenge_armed_turns == 0 {
            self.revenge_target_colors.clear();
        }
        self.recently_killed_turns = self.recently_killed_turns.saturating_sub(1);
        self.power_roll_charges = self.power_roll_charges.saturating_sub(1);

        // Assist credit decays toward zero; dead turns build it back up.
        self.session_assist_score *= 0.92;
        if !report.had_valid_move {
            self.session_assist_score += 1.0;
        }
    }

    pub fn register_capture_as_attacker(&mut self, charge_cap: u32) {
        self.power_roll_charges = (self.power_roll_charges + 1).min(charge_cap);
    }

    pub fn register_capture_as_victim(
        &mut self,
        attacker: Color,
        revenge_window_turns: u32,
        dazed_turns: u32,
    ) {
        self.revenge_armed_turns = self.revenge_armed_turns.max(revenge_window_turns);
        if !self.revenge_target_colors.contains(&attacker) {
            self.revenge_target_colors.push(attacker);
        }
        self.recently_killed_turns = self.recently_killed_turns.max(dazed_turns);
    }

    /// Fraction of the recent window at or below two.
    pub fn low_roll_pattern_score(&self) -> f64 {
        if self.recent_rolls.is_empty() {
            return 0.0;
        }
        let low = self.recent_rolls.iter().filter(|face| **face <= 2).count();
        low as f64 / self.recent_rolls.len() as f64
    }

    /// The most recent face and how many times it repeated consecutively.
    pub fn repeated_face_run(&self) -> Option<(u8, usize)> {
        let last = *self.recent_rolls.back()?;
        let run = self
            .recent_rolls
            .iter()
            .rev()
            .take_while(|face| **face == last)
            .count();
        Some((last, run))
    }

    /// Consecutive run length of the most recent low/mid/high band.
    pub fn repeated_band_run(&self) -> Option<(RollBand, usize)> {
        let last = roll_band(*self.recent_rolls.back()?);
        let run = self
            .recent_rolls
            .iter()
            .rev()
            .take_while(|face| roll_band(**face) == last)
            .count();
        Some((last, run))
    }

    pub fn consecutive_sixes(&self) -> usize {
        self.recent_rolls
            .iter()
            .rev()
            .take_while(|face| **face == 6)
            .count()
    }
}

/// Per-room accounting that keeps forced outcomes within budget.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ForceState {
    pub total_rolls: u64,
    pub forced_count: u32,
    pub last_forced_at_roll: Option<u64>,
}

impl ForceState {
    /// A forced value is allowed while the match budget holds and enough
    /// organic rolls passed since the previous one. The emergency base lock
    /// bypasses both limits.
    pub fn may_force(&self, budget: u32, min_gap: u64, emergency: bool) -> bool {
        if emergency {
            return true;
        }
        if self.forced_count >= budget {
            return false;
        }
        match self.last_forced_at_roll {
            Some(at) => self.total_rolls.saturating_sub(at) >= min_gap,
            None => true,
        }
    }

    pub fn record_roll(&mut self, forced: bool) {
        self.total_rolls += 1;
        if forced {
            self.forced_count += 1;
            self.last_forced_at_roll = Some(self.total_rolls);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(value: u8) -> RollReport {
        RollReport {
            rolled_value: value,
            had_valid_move: true,
            all_in_base: false,
            was_forced: false,
        }
    }

    #[test]
    fn recent_rolls_window_is_bounded() {
        let mut momentum = PlayerMomentum::default();
        for value in 1..=13u8 {
            momentum.register_roll(report(1 + value % 6), 0.9);
        }
        assert_eq!(momentum.recent_rolls.len(), RECENT_ROLL_WINDOW);
    }

    #[test]
    fn six_resets_the_drought_counter() {
        let mut momentum = PlayerMomentum::default();
        momentum.register_roll(report(2), 0.9);
        momentum.register_roll(report(3), 0.9);
        assert_eq!(momentum.turns_since_six, 2);
        momentum.register_roll(report(6), 0.9);
        assert_eq!(momentum.turns_since_six, 0);
    }

    #[test]
    fn luck_delta_tracks_signed_distance_from_expectation() {
        let mut momentum = PlayerMomentum::default();
        momentum.register_roll(report(1), 0.9);
        assert!(momentum.luck_delta < 0.0);
        let after_one = momentum.luck_delta;
        momentum.register_roll(report(6), 0.9);
        assert!(momentum.luck_delta > after_one);
    }

    #[test]
    fn low_roll_pattern_score_counts_ones_and_twos() {
        let mut momentum = PlayerMomentum::default();
        for value in [1, 2, 1, 2] {
            momentum.register_roll(report(value), 0.9);
        }
        assert!(momentum.low_roll_pattern_score() >= 0.5);
        momentum.register_roll(report(5), 0.9);
        assert!(momentum.low_roll_pattern_score() < 0.9);
    }

    #[test]
    fn repeated_runs_detect_face_and_band() {
        let mut momentum = PlayerMomentum::default();
        for value in [3, 4, 4] {
            momentum.register_roll(report(value), 0.9);
        }
        assert_eq!(momentum.repeated_face_run(), Some((4, 2)));
        assert_eq!(momentum.repeated_band_run(), Some((RollBand::Mid, 3)));
        assert_eq!(momentum.consecutive_sixes(), 0);
    }

    #[test]
    fn revenge_window_arms_and_decays() {
        let mut momentum = PlayerMomentum::default();
        momentum.register_capture_as_victim(Color::Blue, 4, 3);
        assert_eq!(momentum.revenge_armed_turns, 4);
        assert_eq!(momentum.revenge_target_colors, vec![Color::Blue]);

        for _ in 0..4 {
            momentum.register_roll(report(3), 0.9);
        }
        assert_eq!(momentum.revenge_armed_turns, 0);
        assert!(momentum.revenge_target_colors.is_empty());
    }

    #[test]
    fn attacker_charges_are_capped() {
        let mut momentum = PlayerMomentum::default();
        for _ in 0..5 {
            momentum.register_capture_as_attacker(3);
        }
        assert_eq!(momentum.power_roll_charges, 3);
    }

    #[test]
    fn force_budget_and_gap_are_enforced() {
        let mut force = ForceState::default();
        assert!(force.may_force(2, 4, false));
        force.record_roll(true);
        assert!(!force.may_force(2, 4, false));
        for _ in 0..4 {
            force.record_roll(false);
        }
        assert!(force.may_force(2, 4, false));
        force.record_roll(true);
        assert!(!force.may_force(2, 4, false));
        assert!(force.may_force(2, 4, true));
    }
}
