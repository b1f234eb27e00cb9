//! Taunt and quick-message director. Turns gameplay events into short
//! social reactions: ranked suggestions for the actor, or auto-emitted
//! lines under strict rate limits, plus a capture memory that upgrades a
//! payback into a revenge kill.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cache::shared::{taunt_state_key, SharedCache};
use crate::rng::Rng;
use crate::types::{StoryPhase, TauntMode};

pub const REVENGE_MEMORY_MS: u64 = 4 * 60 * 1000;
const AUTO_BURST_WINDOW_MS: u64 = 3_000;
const RATE_WINDOW_MS: u64 = 60_000;
const RECENT_LINE_MEMORY: usize = 8;
const SUGGESTION_COUNT: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TauntTrigger {
    RolledSix,
    ReleasedToken,
    Captured,
    GotCaptured,
    EnteredSafe,
    NearWin,
    LeadChange,
    LastPlace,
    RevengeKill,
    ClutchRoll,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    Dominance,
    Revenge,
    MockEscape,
    Appreciation,
    PanicReaction,
    Pressure,
    Comeback,
    Clutch,
}

#[derive(Clone, Debug, Default)]
pub struct TauntEventMeta {
    pub actor_was_last: bool,
    pub revenge_active: bool,
    pub target_was_leader: bool,
}

#[derive(Clone, Debug)]
pub struct TauntEventInput {
    pub trigger: TauntTrigger,
    pub actor_seat_id: String,
    pub actor_user_id: String,
    pub actor_name: String,
    /// Explicit target (the capture victim, say); untargeted events pick
    /// one from the room context.
    pub target_seat_id: Option<String>,
    pub meta: TauntEventMeta,
}

/// Standings snapshot the coordinator passes alongside a batch of events.
#[derive(Clone, Debug, Default)]
pub struct TauntRoomContext {
    pub leader_seat_id: Option<String>,
    pub chaser_seat_id: Option<String>,
    pub story_phase: StoryPhase,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TauntSuggestion {
    pub line_id: &'static str,
    pub text: &'static str,
    pub emotion: Emotion,
    pub trigger: TauntTrigger,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TauntMessage {
    pub actor_seat_id: String,
    pub actor_name: String,
    pub target_seat_id: Option<String>,
    pub line_id: &'static str,
    pub text: &'static str,
    pub emotion: Emotion,
    pub trigger: TauntTrigger,
    pub at_ms: u64,
}

/// One director decision: suggestions go to the actor's private topic,
/// auto messages to the room.
#[derive(Clone, Debug)]
pub enum TauntDispatch {
    Suggestions {
        actor_user_id: String,
        suggestions: Vec<TauntSuggestion>,
    },
    Auto(TauntMessage),
}

#[derive(Clone, Copy, Debug)]
pub struct TauntOptions {
    pub enabled: bool,
    pub cooldown_ms: u64,
    pub limit_per_min: usize,
    pub auto_burst_limit: usize,
}

impl Default for TauntOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown_ms: 5_000,
            limit_per_min: 6,
            auto_burst_limit: 2,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CaptureMemoryEntry {
    killer_seat_id: String,
    victim_seat_id: String,
    at_ms: u64,
}

/// Per-room social state, round-tripped through the shared cache.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct TauntState {
    recent_line_ids: Vec<String>,
    last_line_by_actor: HashMap<String, String>,
    auto_sent_at_by_actor: HashMap<String, Vec<u64>>,
    room_auto_sent_at: Vec<u64>,
    capture_memory: Vec<CaptureMemoryEntry>,
}

struct CatalogLine {
    id: &'static str,
    text: &'static str,
    triggers: &'static [TauntTrigger],
    emotions: &'static [Emotion],
    weight: f64,
    phase_boosts: &'static [(StoryPhase, f64)],
}

static CATALOG: &[CatalogLine] = &[
    CatalogLine {
        id: "six-strut",
        text: "Sixes just like me.",
        triggers: &[TauntTrigger::RolledSix],
        emotions: &[Emotion::Dominance],
        weight: 1.0,
        phase_boosts: &[(StoryPhase::Start, 1.2)],
    },
    CatalogLine {
        id: "six-clutch",
        text: "Right when it matters.",
        triggers: &[TauntTrigger::RolledSix, TauntTrigger::ClutchRoll],
        emotions: &[Emotion::Clutch],
        weight: 1.1,
        phase_boosts: &[(StoryPhase::Finish, 1.4)],
    },
    CatalogLine {
        id: "release-march",
        text: "Another one joins the march.",
        triggers: &[TauntTrigger::ReleasedToken],
        emotions: &[Emotion::Pressure, Emotion::Appreciation],
        weight: 1.0,
        phase_boosts: &[(StoryPhase::Spread, 1.3)],
    },
    CatalogLine {
        id: "release-army",
        text: "The army grows.",
        triggers: &[TauntTrigger::ReleasedToken],
        emotions: &[Emotion::Dominance],
        weight: 0.9,
        phase_boosts: &[],
    },
    CatalogLine {
        id: "capture-sent-home",
        text: "Back to base with you!",
        triggers: &[TauntTrigger::Captured],
        emotions: &[Emotion::Dominance],
        weight: 1.2,
        phase_boosts: &[(StoryPhase::Fights, 1.3)],
    },
    CatalogLine {
        id: "capture-taxi",
        text: "I called you a taxi. It goes to base.",
        triggers: &[TauntTrigger::Captured],
        emotions: &[Emotion::Dominance, Emotion::MockEscape],
        weight: 1.0,
        phase_boosts: &[(StoryPhase::Chaos, 1.2)],
    },
    CatalogLine {
        id: "capture-warned",
        text: "I warned you about that lane.",
        triggers: &[TauntTrigger::Captured],
        emotions: &[Emotion::Pressure],
        weight: 0.9,
        phase_boosts: &[],
    },
    CatalogLine {
        id: "revenge-served",
        text: "Revenge is served cold.",
        triggers: &[TauntTrigger::RevengeKill],
        emotions: &[Emotion::Revenge],
        weight: 1.4,
        phase_boosts: &[(StoryPhase::Fights, 1.2), (StoryPhase::Chaos, 1.2)],
    },
    CatalogLine {
        id: "revenge-remember",
        text: "Told you I'd remember that.",
        triggers: &[TauntTrigger::RevengeKill, TauntTrigger::Captured],
        emotions: &[Emotion::Revenge, Emotion::Dominance],
        weight: 1.2,
        phase_boosts: &[],
    },
    CatalogLine {
        id: "hit-shrug",
        text: "Lucky dice, that's all.",
        triggers: &[TauntTrigger::GotCaptured],
        emotions: &[Emotion::PanicReaction],
        weight: 1.0,
        phase_boosts: &[],
    },
    CatalogLine {
        id: "hit-comeback",
        text: "You just woke me up.",
        triggers: &[TauntTrigger::GotCaptured, TauntTrigger::LastPlace],
        emotions: &[Emotion::Comeback],
        weight: 1.1,
        phase_boosts: &[(StoryPhase::Hope, 1.4)],
    },
    CatalogLine {
        id: "safe-wave",
        text: "Can't touch me here.",
        triggers: &[TauntTrigger::EnteredSafe],
        emotions: &[Emotion::MockEscape],
        weight: 1.0,
        phase_boosts: &[],
    },
    CatalogLine {
        id: "safe-close-one",
        text: "Phew. Planned, obviously.",
        triggers: &[TauntTrigger::EnteredSafe],
        emotions: &[Emotion::MockEscape, Emotion::PanicReaction],
        weight: 0.9,
        phase_boosts: &[],
    },
    CatalogLine {
        id: "nearwin-countdown",
        text: "Start counting. I'm almost home.",
        triggers: &[TauntTrigger::NearWin],
        emotions: &[Emotion::Pressure, Emotion::Clutch],
        weight: 1.2,
        phase_boosts: &[(StoryPhase::Finish, 1.5)],
    },
    CatalogLine {
        id: "lead-new-boss",
        text: "New leader. Get used to it.",
        triggers: &[TauntTrigger::LeadChange],
        emotions: &[Emotion::Dominance, Emotion::Comeback],
        weight: 1.1,
        phase_boosts: &[(StoryPhase::Leader, 1.2)],
    },
    CatalogLine {
        id: "lead-comeback",
        text: "From last to first. Take notes.",
        triggers: &[TauntTrigger::LeadChange],
        emotions: &[Emotion::Comeback],
        weight: 1.0,
        phase_boosts: &[(StoryPhase::Hope, 1.4)],
    },
    CatalogLine {
        id: "last-not-done",
        text: "Last place is just a long runway.",
        triggers: &[TauntTrigger::LastPlace],
        emotions: &[Emotion::Comeback, Emotion::PanicReaction],
        weight: 1.0,
        phase_boosts: &[(StoryPhase::Hope, 1.3)],
    },
    CatalogLine {
        id: "clutch-ice",
        text: "Ice in the veins.",
        triggers: &[TauntTrigger::ClutchRoll],
        emotions: &[Emotion::Clutch],
        weight: 1.1,
        phase_boosts: &[(StoryPhase::Finish, 1.3)],
    },
];

fn candidate_emotions(event: &TauntEventInput) -> Vec<Emotion> {
    let mut emotions = match event.trigger {
        TauntTrigger::RolledSix => vec![Emotion::Dominance, Emotion::Clutch],
        TauntTrigger::ReleasedToken => vec![Emotion::Appreciation, Emotion::Pressure],
        TauntTrigger::Captured => vec![Emotion::Dominance],
        TauntTrigger::GotCaptured => vec![Emotion::PanicReaction, Emotion::Comeback],
        TauntTrigger::EnteredSafe => vec![Emotion::MockEscape, Emotion::Appreciation],
        TauntTrigger::NearWin => vec![Emotion::Pressure, Emotion::Clutch],
        TauntTrigger::LeadChange => vec![Emotion::Dominance],
        TauntTrigger::LastPlace => vec![Emotion::Comeback, Emotion::PanicReaction],
        TauntTrigger::RevengeKill => vec![Emotion::Revenge, Emotion::Dominance],
        TauntTrigger::ClutchRoll => vec![Emotion::Clutch, Emotion::Appreciation],
    };
    if event.meta.revenge_active && !emotions.contains(&Emotion::Revenge) {
        emotions.push(Emotion::Revenge);
    }
    if event.meta.target_was_leader && !emotions.contains(&Emotion::Pressure) {
        emotions.push(Emotion::Pressure);
    }
    if event.meta.actor_was_last && !emotions.contains(&Emotion::Comeback) {
        emotions.push(Emotion::Comeback);
    }
    emotions
}

/// Triggers that may auto-fire in hybrid mode.
fn hybrid_auto_trigger(trigger: TauntTrigger) -> bool {
    matches!(
        trigger,
        TauntTrigger::Captured | TauntTrigger::RevengeKill | TauntTrigger::NearWin
    )
}

pub struct TauntDirector {
    cache: Arc<dyn SharedCache>,
    options: TauntOptions,
    state_ttl: Duration,
}

impl TauntDirector {
    pub fn new(cache: Arc<dyn SharedCache>, options: TauntOptions) -> Self {
        Self {
            cache,
            options,
            state_ttl: Duration::from_secs(3_600),
        }
    }

    /// Records a capture and reports whether it pays back an earlier one,
    /// which upgrades the event to a revenge kill.
    pub async fn note_capture(
        &self,
        room_id: &str,
        killer_seat_id: &str,
        victim_seat_id: &str,
        now_ms: u64,
    ) -> bool {
        if !self.options.enabled {
            return false;
        }
        let mut state = self.load_state(room_id).await;
        state
            .capture_memory
            .retain(|entry| now_ms.saturating_sub(entry.at_ms) <= REVENGE_MEMORY_MS);

        let is_revenge = state.capture_memory.iter().any(|entry| {
            entry.killer_seat_id == victim_seat_id && entry.victim_seat_id == killer_seat_id
        });

        state.capture_memory.push(CaptureMemoryEntry {
            killer_seat_id: killer_seat_id.to_string(),
            victim_seat_id: victim_seat_id.to_string(),
            at_ms: now_ms,
        });
        self.store_state(room_id, &state).await;
        is_revenge
    }

    /// Processes a batch of events produced by one roll/move resolution and
    /// returns what to dispatch.
    pub async fn process_events(
        &self,
        room_id: &str,
        mode: TauntMode,
        context: &TauntRoomContext,
        events: &[TauntEventInput],
        now_ms: u64,
        rng: &mut Rng,
    ) -> Vec<TauntDispatch> {
        if !self.options.enabled || events.is_empty() {
            return Vec::new();
        }
        let mut state = self.load_state(room_id).await;
        self.prune(&mut state, now_ms);

        let mut dispatches = Vec::new();
        for event in events {
            let target = event
                .target_seat_id
                .clone()
                .or_else(|| select_target(event, context));

            let ranked = self.rank_lines(event, context, &state);
            if ranked.is_empty() {
                continue;
            }

            let want_suggestions =
                matches!(mode, TauntMode::Suggestion | TauntMode::Hybrid);
            let want_auto = match mode {
                TauntMode::Auto => true,
                TauntMode::Hybrid => hybrid_auto_trigger(event.trigger),
                TauntMode::Suggestion => false,
            };

            if want_suggestions {
                let suggestions = pick_suggestions(&ranked, event, rng);
                if !suggestions.is_empty() {
                    dispatches.push(TauntDispatch::Suggestions {
                        actor_user_id: event.actor_user_id.clone(),
                        suggestions,
                    });
                }
            }

            if want_auto && self.may_auto_send(&state, &event.actor_seat_id, now_ms) {
                let (line, emotion) = ranked[0];
                state
                    .auto_sent_at_by_actor
                    .entry(event.actor_seat_id.clone())
                    .or_default()
                    .push(now_ms);
                state.room_auto_sent_at.push(now_ms);
                state
                    .last_line_by_actor
                    .insert(event.actor_seat_id.clone(), line.id.to_string());
                state.recent_line_ids.push(line.id.to_string());
                if state.recent_line_ids.len() > RECENT_LINE_MEMORY {
                    let excess = state.recent_line_ids.len() - RECENT_LINE_MEMORY;
                    state.recent_line_ids.drain(..excess);
                }

                dispatches.push(TauntDispatch::Auto(TauntMessage {
                    actor_seat_id: event.actor_seat_id.clone(),
                    actor_name: event.actor_name.clone(),
                    target_seat_id: target,
                    line_id: line.id,
                    text: line.text,
                    emotion,
                    trigger: event.trigger,
                    at_ms: now_ms,
                }));
            }
        }

        self.store_state(room_id, &state).await;
        dispatches
    }

    pub async fn evict_room(&self, room_id: &str) {
        self.cache.delete(&taunt_state_key(room_id)).await;
    }

    fn rank_lines(
        &self,
        event: &TauntEventInput,
        context: &TauntRoomContext,
        state: &TauntState,
    ) -> Vec<(&'static CatalogLine, Emotion)> {
        let emotions = candidate_emotions(event);
        let mut scored: Vec<(f64, &CatalogLine, Emotion)> = CATALOG
            .iter()
            .filter(|line| line.triggers.contains(&event.trigger))
            .filter_map(|line| {
                let overlap: Vec<Emotion> = line
                    .emotions
                    .iter()
                    .copied()
                    .filter(|emotion| emotions.contains(emotion))
                    .collect();
                let lead_emotion = *overlap.first()?;

                let mut score = line.weight * (1.0 + 0.25 * overlap.len() as f64);
                for (phase, boost) in line.phase_boosts {
                    if *phase == context.story_phase {
                        score *= boost;
                    }
                }
                if state.recent_line_ids.iter().any(|id| id.as_str() == line.id) {
                    score *= 0.5;
                }
                if state
                    .last_line_by_actor
                    .get(&event.actor_seat_id)
                    .is_some_and(|id| id.as_str() == line.id)
                {
                    score *= 0.3;
                }
                Some((score, line, lead_emotion))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .map(|(_, line, emotion)| (line, emotion))
            .collect()
    }

    fn may_auto_send(&self, state: &TauntState, actor_seat_id: &str, now_ms: u64) -> bool {
        if let Some(history) = state.auto_sent_at_by_actor.get(actor_seat_id) {
            if let Some(last) = history.last() {
                if now_ms.saturating_sub(*last) < self.options.cooldown_ms {
                    return false;
                }
            }
            let recent = history
                .iter()
                .filter(|at| now_ms.saturating_sub(**at) <= RATE_WINDOW_MS)
                .count();
            if recent >= self.options.limit_per_min {
                return false;
            }
        }
        let burst = state
            .room_auto_sent_at
            .iter()
            .filter(|at| now_ms.saturating_sub(**at) <= AUTO_BURST_WINDOW_MS)
            .count();
        burst < self.options.auto_burst_limit
    }

    fn prune(&self, state: &mut TauntState, now_ms: u64) {
        for history in state.auto_sent_at_by_actor.values_mut() {
            history.retain(|at| now_ms.saturating_sub(*at) <= RATE_WINDOW_MS);
        }
        state
            .auto_sent_at_by_actor
            .retain(|_, history| !history.is_empty());
        state
            .room_auto_sent_at
            .retain(|at| now_ms.saturating_sub(*at) <= RATE_WINDOW_MS);
        state
            .capture_memory
            .retain(|entry| now_ms.saturating_sub(entry.at_ms) <= REVENGE_MEMORY_MS);
    }

    async fn load_state(&self, room_id: &str) -> TauntState {
        match self.cache.get_json(&taunt_state_key(room_id)).await {
            Some(value) => serde_json::from_value(value).unwrap_or_default(),
            None => TauntState::default(),
        }
    }

    async fn store_state(&self, room_id: &str, state: &TauntState) {
        match serde_json::to_value(state) {
            Ok(json) => {
                self.cache
                    .set_json(&taunt_state_key(room_id), json, self.state_ttl)
                    .await;
            }
            Err(error) => warn!(room_id, %error, "failed to serialize taunt state"),
        }
    }
}

/// Untargeted events aim at the chaser when the actor leads, else at the
/// leader.
fn select_target(event: &TauntEventInput, context: &TauntRoomContext) -> Option<String> {
    let actor_leads = context
        .leader_seat_id
        .as_deref()
        .is_some_and(|leader| leader == event.actor_seat_id);
    if actor_leads {
        context.chaser_seat_id.clone()
    } else {
        context.leader_seat_id.clone()
    }
}

/// Weighted-random pick of up to three distinct lines from the ranked head.
fn pick_suggestions(
    ranked: &[(&CatalogLine, Emotion)],
    event: &TauntEventInput,
    rng: &mut Rng,
) -> Vec<TauntSuggestion> {
    let mut pool: Vec<usize> = (0..ranked.len()).collect();
    let mut suggestions = Vec::new();
    while suggestions.len() < SUGGESTION_COUNT && !pool.is_empty() {
        // Bias toward the front of the ranking.
        let pick = if pool.len() > 1 && rng.bool(0.65) {
            0
        } else {
            rng.pick_index(pool.len())
        };
        let (line, emotion) = ranked[pool.remove(pick)];
        suggestions.push(TauntSuggestion {
            line_id: line.id,
            text: line.text,
            emotion,
            trigger: event.trigger,
        });
    }
    suggestions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::shared::MemoryCache;

    fn director(options: TauntOptions) -> TauntDirector {
        TauntDirector::new(Arc::new(MemoryCache::new()), options)
    }

    fn event(trigger: TauntTrigger, actor: &str) -> TauntEventInput {
        TauntEventInput {
            trigger,
            actor_seat_id: actor.to_string(),
            actor_user_id: format!("user-{actor}"),
            actor_name: format!("Player {actor}"),
            target_seat_id: None,
            meta: TauntEventMeta::default(),
        }
    }

    fn context() -> TauntRoomContext {
        TauntRoomContext {
            leader_seat_id: Some("s-leader".to_string()),
            chaser_seat_id: Some("s-chaser".to_string()),
            story_phase: StoryPhase::Fights,
        }
    }

    #[tokio::test]
    async fn suggestion_mode_returns_distinct_suggestions() {
        let director = director(TauntOptions::default());
        let mut rng = Rng::new(5);
        let dispatches = director
            .process_events(
                "r1",
                TauntMode::Suggestion,
                &context(),
                &[event(TauntTrigger::Captured, "s1")],
                1_000,
                &mut rng,
            )
            .await;

        assert_eq!(dispatches.len(), 1);
        match &dispatches[0] {
            TauntDispatch::Suggestions {
                actor_user_id,
                suggestions,
            } => {
                assert_eq!(actor_user_id, "user-s1");
                assert!(!suggestions.is_empty() && suggestions.len() <= 3);
                let mut ids: Vec<&str> =
                    suggestions.iter().map(|suggestion| suggestion.line_id).collect();
                ids.sort_unstable();
                ids.dedup();
                assert_eq!(ids.len(), suggestions.len(), "suggestions must be distinct");
            }
            TauntDispatch::Auto(_) => panic!("suggestion mode must not auto-send"),
        }
    }

    #[tokio::test]
    async fn auto_mode_respects_the_actor_cooldown() {
        let director = director(TauntOptions::default());
        let mut rng = Rng::new(7);

        let first = director
            .process_events(
                "r1",
                TauntMode::Auto,
                &context(),
                &[event(TauntTrigger::Captured, "s1")],
                10_000,
                &mut rng,
            )
            .await;
        assert!(matches!(first.as_slice(), [TauntDispatch::Auto(_)]));

        // Within the 5s cooldown nothing fires.
        let second = director
            .process_events(
                "r1",
                TauntMode::Auto,
                &context(),
                &[event(TauntTrigger::Captured, "s1")],
                12_000,
                &mut rng,
            )
            .await;
        assert!(second.is_empty());

        let third = director
            .process_events(
                "r1",
                TauntMode::Auto,
                &context(),
                &[event(TauntTrigger::Captured, "s1")],
                16_000,
                &mut rng,
            )
            .await;
        assert_eq!(third.len(), 1);
    }

    #[tokio::test]
    async fn per_minute_limit_caps_an_actor() {
        let options = TauntOptions {
            cooldown_ms: 0,
            ..TauntOptions::default()
        };
        let director = director(options);
        let mut rng = Rng::new(11);

        let mut sent = 0;
        for index in 0..10u64 {
            // Spread sends so the room burst window stays clear.
            let dispatches = director
                .process_events(
                    "r1",
                    TauntMode::Auto,
                    &context(),
                    &[event(TauntTrigger::Captured, "s1")],
                    index * 4_000,
                    &mut rng,
                )
                .await;
            sent += dispatches
                .iter()
                .filter(|dispatch| matches!(dispatch, TauntDispatch::Auto(_)))
                .count();
        }
        assert_eq!(sent, TauntOptions::default().limit_per_min);
    }

    #[tokio::test]
    async fn room_burst_limit_holds_across_actors() {
        let options = TauntOptions {
            cooldown_ms: 0,
            limit_per_min: 100,
            ..TauntOptions::default()
        };
        let director = director(options);
        let mut rng = Rng::new(13);

        let events: Vec<TauntEventInput> = (0..5)
            .map(|index| event(TauntTrigger::Captured, &format!("s{index}")))
            .collect();
        let dispatches = director
            .process_events("r1", TauntMode::Auto, &context(), &events, 1_000, &mut rng)
            .await;
        let autos = dispatches
            .iter()
            .filter(|dispatch| matches!(dispatch, TauntDispatch::Auto(_)))
            .count();
        assert_eq!(autos, 2);
    }

    #[tokio::test]
    async fn hybrid_mode_auto_fires_only_on_the_restricted_set() {
        let director = director(TauntOptions::default());
        let mut rng = Rng::new(17);

        let dispatches = director
            .process_events(
                "r1",
                TauntMode::Hybrid,
                &context(),
                &[event(TauntTrigger::RolledSix, "s1")],
                1_000,
                &mut rng,
            )
            .await;
        assert!(dispatches
            .iter()
            .all(|dispatch| matches!(dispatch, TauntDispatch::Suggestions { .. })));

        let dispatches = director
            .process_events(
                "r1",
                TauntMode::Hybrid,
                &context(),
                &[event(TauntTrigger::RevengeKill, "s2")],
                60_000,
                &mut rng,
            )
            .await;
        assert!(dispatches
            .iter()
            .any(|dispatch| matches!(dispatch, TauntDispatch::Auto(_))));
    }

    #[tokio::test]
    async fn capture_memory_upgrades_payback_to_revenge() {
        let director = director(TauntOptions::default());
        assert!(!director.note_capture("r1", "s1", "s2", 1_000).await);
        // The former victim strikes back within the window.
        assert!(director.note_capture("r1", "s2", "s1", 100_000).await);
        // Outside the four-minute window the memory is gone.
        assert!(!director.note_capture("r2", "s1", "s2", 1_000).await);
        assert!(
            !director
                .note_capture("r2", "s2", "s1", 1_000 + REVENGE_MEMORY_MS + 1)
                .await
        );
    }

    #[tokio::test]
    async fn untargeted_events_aim_at_leader_or_chaser() {
        let director = director(TauntOptions::default());
        let mut rng = Rng::new(23);

        let mut leader_event = event(TauntTrigger::Captured, "s-leader");
        leader_event.target_seat_id = None;
        let dispatches = director
            .process_events(
                "r1",
                TauntMode::Auto,
                &context(),
                &[leader_event],
                1_000,
                &mut rng,
            )
            .await;
        match &dispatches[0] {
            TauntDispatch::Auto(message) => {
                assert_eq!(message.target_seat_id.as_deref(), Some("s-chaser"));
            }
            TauntDispatch::Suggestions { .. } => panic!("expected auto message"),
        }

        let dispatches = director
            .process_events(
                "r1",
                TauntMode::Auto,
                &context(),
                &[event(TauntTrigger::Captured, "s-other")],
                20_000,
                &mut rng,
            )
            .await;
        match &dispatches[0] {
            TauntDispatch::Auto(message) => {
                assert_eq!(message.target_seat_id.as_deref(), Some("s-leader"));
            }
            TauntDispatch::Suggestions { .. } => panic!("expected auto message"),
        }
    }

    #[tokio::test]
    async fn disabled_director_stays_silent() {
        let options = TauntOptions {
            enabled: false,
            ..TauntOptions::default()
        };
        let director = director(options);
        let mut rng = Rng::new(29);
        let dispatches = director
            .process_events(
                "r1",
                TauntMode::Auto,
                &context(),
                &[event(TauntTrigger::Captured, "s1")],
                1_000,
                &mut rng,
            )
            .await;
        assert!(dispatches.is_empty());
        assert!(!director.note_capture("r1", "s1", "s2", 1_000).await);
    }

    #[test]
    fn every_trigger_has_at_least_one_line() {
        for trigger in [
            TauntTrigger::RolledSix,
            TauntTrigger::ReleasedToken,
            TauntTrigger::Captured,
            TauntTrigger::GotCaptured,
            TauntTrigger::EnteredSafe,
            TauntTrigger::NearWin,
            TauntTrigger::LeadChange,
            TauntTrigger::LastPlace,
            TauntTrigger::RevengeKill,
            TauntTrigger::ClutchRoll,
        ] {
            assert!(
                CATALOG.iter().any(|line| line.triggers.contains(&trigger)),
                "no catalog line for {trigger:?}"
            );
        }
    }
}
