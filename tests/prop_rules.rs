//! Property-based rule engine invariants.

use std::collections::BTreeMap;

use ludo_arena_server::constants::{
    in_home_run, is_safe_index, BASE_POS, FINISH_POS,
};
use ludo_arena_server::engagement::weights::{normalize_with_floor, EngagementProfile};
use ludo_arena_server::rules::{
    advance_turn, apply_move, effective_dice_for, find_valid_moves, send_to_base, TokenMap,
};
use ludo_arena_server::types::{Color, Token, TokenStatus, WinnerEntry};
use proptest::prelude::*;

fn status_for(position: i16) -> TokenStatus {
    if position == BASE_POS {
        TokenStatus::Base
    } else if position >= FINISH_POS {
        TokenStatus::Home
    } else if is_safe_index(position) || in_home_run(position) {
        TokenStatus::Safe
    } else {
        TokenStatus::Active
    }
}

fn token_invariants_hold(token: &Token) -> bool {
    let position_band = (BASE_POS..=FINISH_POS).contains(&token.position);
    let base_iff = (token.status == TokenStatus::Base) == (token.position == BASE_POS);
    let home_iff = matches!(token.status, TokenStatus::Home | TokenStatus::Finished)
        == (token.position == FINISH_POS);
    position_band && base_iff && home_iff
}

/// Arbitrary-but-consistent board: two colors, four tokens each, positions
/// anywhere in the legal band with plausible step counters.
fn board_strategy() -> impl Strategy<Value = TokenMap> {
    proptest::collection::vec((-1i16..=58, 0i32..=60), 8).prop_map(|cells| {
        let mut tokens = TokenMap::new();
        for (color_index, color) in [Color::Red, Color::Yellow].into_iter().enumerate() {
            let list: Vec<Token> = (0..4u8)
                .map(|id| {
                    let (position, steps) = cells[color_index * 4 + id as usize];
                    Token {
                        id,
                        color,
                        position,
                        status: status_for(position),
                        // Base tokens carry no walked distance.
                        steps: if position == BASE_POS { 0 } else { steps },
                    }
                })
                .collect();
            tokens.insert(color, list);
        }
        tokens
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2000))]

    /// Every move the engine enumerates must be applicable: the token
    /// changes and all token invariants survive the application.
    #[test]
    fn valid_moves_apply_cleanly(tokens in board_strategy(), dice in 1u8..=6) {
        for color in [Color::Red, Color::Yellow] {
            let controlled = [color];
            for candidate in find_valid_moves(&tokens, color, dice, &controlled) {
                let token = tokens[&candidate.color]
                    .iter()
                    .find(|token| token.id == candidate.token_id)
                    .copied()
                    .expect("enumerated token exists");
                let (effective, stack) =
                    effective_dice_for(&tokens, &token, dice, &controlled)
                        .expect("legal move must resolve an effective dice");
                let outcome = apply_move(&token, effective, &tokens, &controlled, stack);

                prop_assert!(
                    outcome.token.position != token.position
                        || outcome.token.status != token.status,
                    "move {:?} dice {} left the token unchanged",
                    candidate,
                    dice
                );
                prop_assert!(
                    token_invariants_hold(&outcome.token),
                    "invariants broken: {:?}",
                    outcome.token
                );
                // Steps only grow while a token walks.
                prop_assert!(outcome.token.steps >= token.steps);
            }
        }
    }

    /// Captures always land the victim back on base with the sentinel.
    #[test]
    fn capture_reset_is_total(tokens in board_strategy(), dice in 1u8..=6) {
        let controlled = [Color::Yellow];
        for candidate in find_valid_moves(&tokens, Color::Yellow, dice, &controlled) {
            let token = tokens[&candidate.color]
                .iter()
                .find(|token| token.id == candidate.token_id)
                .copied()
                .expect("token");
            let Some((effective, stack)) =
                effective_dice_for(&tokens, &token, dice, &controlled)
            else {
                continue;
            };
            let outcome = apply_move(&token, effective, &tokens, &controlled, stack);
            for victim in outcome.captured {
                let mut captured_token = tokens[&victim.color]
                    .iter()
                    .find(|token| token.id == victim.token_id)
                    .copied()
                    .expect("victim exists");
                // Victims are never on safe cells and never the mover's own.
                prop_assert!(!is_safe_index(outcome.token.position));
                prop_assert!(victim.color != Color::Yellow);
                send_to_base(&mut captured_token);
                prop_assert_eq!(captured_token.position, BASE_POS);
                prop_assert_eq!(captured_token.status, TokenStatus::Base);
                prop_assert_eq!(captured_token.steps, -1);
            }
        }
    }

    /// Turn rotation stays within bounds and never lands on a finished
    /// seat while skipping is on.
    #[test]
    fn rotation_never_selects_a_winner(
        seat_count in 2usize..=6,
        current in 0usize..=5,
        winner_mask in 0u8..63,
    ) {
        let seats: Vec<String> = (0..seat_count).map(|index| format!("s{index}")).collect();
        let winners: Vec<WinnerEntry> = seats
            .iter()
            .enumerate()
            .filter(|(index, _)| winner_mask & (1 << index) != 0)
            .map(|(index, seat)| WinnerEntry {
                seat_id: seat.clone(),
                rank: index as u32 + 1,
            })
            .collect();

        let next = advance_turn(current.min(seat_count - 1), &seats, &winners, true);
        prop_assert!(next < seat_count);
        if winners.len() < seat_count {
            prop_assert!(
                !winners.iter().any(|winner| winner.seat_id == seats[next]),
                "picked finished seat {}",
                seats[next]
            );
        }
    }

    /// The shaped distribution primitive keeps every face at or above the
    /// entropy floor and sums to one for arbitrary weight vectors.
    #[test]
    fn normalization_respects_the_entropy_floor(
        weights in proptest::collection::vec(0.0f64..50.0, 6)
    ) {
        let mut array = [0.0f64; 6];
        array.copy_from_slice(&weights);
        let floor = EngagementProfile::default().entropy_floor;
        let probabilities = normalize_with_floor(&array, floor);
        let sum: f64 = probabilities.iter().sum();
        prop_assert!((sum - 1.0).abs() < 1e-9);
        for probability in probabilities {
            prop_assert!(probability >= floor - 1e-9);
        }
    }
}

#[test]
fn fresh_boards_satisfy_token_invariants() {
    let mut tokens: BTreeMap<Color, Vec<Token>> = BTreeMap::new();
    tokens.insert(
        Color::Red,
        (0..4u8).map(|id| Token::at_base(id, Color::Red)).collect(),
    );
    for token in tokens.values().flatten() {
        assert!(token_invariants_hold(token));
    }
}
