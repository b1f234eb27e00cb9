//! Offline Monte-Carlo harness for the engagement dice engine. Replays a
//! fixed scenario for N rolls and prints the empirical face distribution,
//! used to sanity-check profile changes against the fairness ceilings.

use std::sync::Arc;

use clap::Parser;
use ludo_arena_server::cache::shared::MemoryCache;
use ludo_arena_server::engagement::momentum::RollReport;
use ludo_arena_server::engagement::{DiceRequest, EngagementEngine};
use ludo_arena_server::rng::Rng;
use ludo_arena_server::rules::TokenMap;
use ludo_arena_server::types::{Color, RoomMode, Token, TokenStatus};

#[derive(Debug, Parser)]
#[command(about = "Replay the engagement dice engine against a fixed scenario")]
struct Args {
    /// Number of rolls to simulate.
    #[arg(long, default_value_t = 100_000)]
    rolls: u32,

    /// RNG seed for reproducible runs.
    #[arg(long, default_value_t = 424_242)]
    seed: u32,

    /// Scenario: all-base, midgame or behind.
    #[arg(long, default_value = "midgame")]
    scenario: String,
}

fn board_all_base() -> TokenMap {
    let mut tokens = TokenMap::new();
    for color in [Color::Red, Color::Yellow] {
        tokens.insert(
            color,
            (0..4u8).map(|id| Token::at_base(id, color)).collect(),
        );
    }
    tokens
}

fn place(tokens: &mut TokenMap, color: Color, id: u8, position: i16, steps: i32) {
    if let Some(token) = tokens
        .get_mut(&color)
        .and_then(|list| list.iter_mut().find(|token| token.id == id))
    {
        token.position = position;
        token.steps = steps;
        token.status = TokenStatus::Active;
    }
}

fn board_for_scenario(scenario: &str) -> TokenMap {
    let mut tokens = board_all_base();
    match scenario {
        "all-base" => {}
        "behind" => {
            // Roller far back, opponent walking the last stretch.
            place(&mut tokens, Color::Red, 0, 3, 3);
            place(&mut tokens, Color::Yellow, 0, 20, 46);
            place(&mut tokens, Color::Yellow, 1, 10, 36);
        }
        _ => {
            place(&mut tokens, Color::Red, 0, 5, 5);
            place(&mut tokens, Color::Red, 1, 18, 18);
            place(&mut tokens, Color::Yellow, 0, 30, 4);
            place(&mut tokens, Color::Yellow, 1, 40, 14);
        }
    }
    tokens
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    let tokens = board_for_scenario(&args.scenario);
    let controlled = [Color::Red];

    let engine = EngagementEngine::new(Arc::new(MemoryCache::new()), true);
    let mut rng = Rng::new(args.seed);

    let mut counts = [0u64; 6];
    let mut forced = 0u64;
    let mut six_streak = 0u32;
    let mut triple_sixes = 0u64;

    for _ in 0..args.rolls {
        let result = engine
            .roll(
                &DiceRequest {
                    room_id: "sim",
                    seat_id: "seat-sim",
                    player_color: Color::Red,
                    controlled: &controlled,
                    tokens: &tokens,
                    mode: RoomMode::Individual,
                    max_players: 2,
                    elapsed_ms: 300_000,
                },
                &mut rng,
            )
            .await;

        counts[(result.face - 1) as usize] += 1;
        if result.forced {
            forced += 1;
        }
        if result.face == 6 {
            six_streak += 1;
            if six_streak >= 3 {
                triple_sixes += 1;
            }
        } else {
            six_streak = 0;
        }

        engine
            .report_outcome(
                "sim",
                "seat-sim",
                RollReport {
                    rolled_value: result.face,
                    had_valid_move: true,
                    all_in_base: args.scenario == "all-base",
                    was_forced: result.forced,
                },
            )
            .await;
    }

    let total = f64::from(args.rolls).max(1.0);
    println!("scenario: {} ({} rolls)", args.scenario, args.rolls);
    for (index, count) in counts.iter().enumerate() {
        let share = *count as f64 / total;
        println!("  face {}: {:>8}  ({:.2}%)", index + 1, count, share * 100.0);
    }
    println!("  forced: {forced}");
    println!(
        "  triple sixes: {} ({:.4}% of rolls, uniform dice ~0.46%)",
        triple_sixes,
        triple_sixes as f64 / total * 100.0
    );
    let low_share = (counts[0] + counts[1]) as f64 / total;
    println!("  low faces (1-2): {:.2}%", low_share * 100.0);
}
