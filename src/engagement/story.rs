//! Per-room story director. Aggregates a few coarse signals across rolls
//! and labels the match arc; the weight pipeline reads the label to nudge
//! face weights. Signals only grow, the label can move back and forth.

use serde::{Deserialize, Serialize};

use crate::types::{MatchPhase, StoryPhase};

use super::context::RankContext;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoryDirector {
    pub total_rolls: u64,
    pub capture_count: u32,
    pub leader_changes: u32,
    pub comeback_pulses: u32,
    pub last_leader_key: Option<String>,
    pub phase: StoryPhase,
}

impl StoryDirector {
    /// Folds one roll's rank context into the aggregates and reclassifies
    /// the phase. `leader_key` identifies the current leading side.
    pub fn observe(&mut self, rank: &RankContext, leader_key: &str) {
        self.total_rolls += 1;

        match self.last_leader_key.as_deref() {
            Some(previous) if previous != leader_key => {
                self.leader_changes += 1;
                self.last_leader_key = Some(leader_key.to_string());
            }
            None => self.last_leader_key = Some(leader_key.to_string()),
            _ => {}
        }

        if rank.close_chase && rank.behind_gap > 0 {
            self.comeback_pulses += 1;
        }

        self.phase = self.classify(rank);
    }

    pub fn record_capture(&mut self) {
        self.capture_count += 1;
    }

    fn classify(&self, rank: &RankContext) -> StoryPhase {
        if rank.any_near_win || rank.match_phase == MatchPhase::Late {
            return StoryPhase::Finish;
        }
        if self.capture_count >= 6 && self.leader_changes >= 3 {
            return StoryPhase::Chaos;
        }
        if self.comeback_pulses >= 4 && rank.match_phase == MatchPhase::Mid {
            return StoryPhase::Hope;
        }
        if rank.lead_gap >= 25 || (rank.behind_gap >= 25 && rank.match_phase == MatchPhase::Mid) {
            return StoryPhase::Leader;
        }
        if self.capture_count >= 2 {
            return StoryPhase::Fights;
        }
        if self.total_rolls >= 12 {
            return StoryPhase::Spread;
        }
        StoryPhase::Start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MatchPhase;

    fn rank(match_phase: MatchPhase) -> RankContext {
        RankContext {
            self_score: 0,
            leader_score: 0,
            is_leader: false,
            is_last: false,
            lead_gap: 0,
            behind_gap: 0,
            behind_ratio: 0.0,
            match_phase,
            spread_high: false,
            any_near_win: false,
            self_near_win: false,
            close_chase: false,
            leader_colors: Vec::new(),
            leader_key: String::new(),
            side_count: 2,
        }
    }

    #[test]
    fn opens_in_start_and_spreads_with_rolls() {
        let mut director = StoryDirector::default();
        let context = rank(MatchPhase::Early);
        for _ in 0..11 {
            director.observe(&context, "red");
        }
        assert_eq!(director.phase, StoryPhase::Start);
        director.observe(&context, "red");
        assert_eq!(director.phase, StoryPhase::Spread);
    }

    #[test]
    fn captures_move_the_arc_into_fights() {
        let mut director = StoryDirector::default();
        director.record_capture();
        director.record_capture();
        director.observe(&rank(MatchPhase::Early), "red");
        assert_eq!(director.phase, StoryPhase::Fights);
    }

    #[test]
    fn runaway_leader_is_labelled() {
        let mut director = StoryDirector::default();
        let mut context = rank(MatchPhase::Mid);
        context.lead_gap = 30;
        director.observe(&context, "red");
        assert_eq!(director.phase, StoryPhase::Leader);
    }

    #[test]
    fn near_win_always_wins_classification() {
        let mut director = StoryDirector::default();
        let mut context = rank(MatchPhase::Mid);
        context.any_near_win = true;
        director.observe(&context, "red");
        assert_eq!(director.phase, StoryPhase::Finish);
    }

    #[test]
    fn leader_changes_are_counted() {
        let mut director = StoryDirector::default();
        let context = rank(MatchPhase::Early);
        director.observe(&context, "red");
        director.observe(&context, "yellow");
        director.observe(&context, "yellow");
        director.observe(&context, "red");
        assert_eq!(director.leader_changes, 2);
    }
}
