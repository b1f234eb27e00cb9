use crate::constants::{
    HOME_ENTRY_OFFSET, HOME_RUN_CELLS, SAFE_INDICES, TRACK_LEN,
};
use crate::types::Color;

/// Grid cell on the 15x15 client board, `(row, col)`.
pub type Coord = (u8, u8);

/// Canonical 52-cell circuit. Index 0 is the red entry cell; the loop runs
/// clockwise through the four arms of the cross.
pub fn track_coords() -> [Coord; TRACK_LEN as usize] {
    let mut coords = [(0u8, 0u8); TRACK_LEN as usize];
    let mut index = 0;
    let mut push = |cell: (u8, u8), index: &mut usize| {
        coords[*index] = cell;
        *index += 1;
    };

    // left arm, entering at red's start
    for col in 1..=5 {
        push((6, col), &mut index);
    }
    // up the west side of the top arm
    for row in (0..=5).rev() {
        push((row, 6), &mut index);
    }
    push((0, 7), &mut index);
    // down the east side of the top arm
    for row in 0..=5 {
        push((row, 8), &mut index);
    }
    // right arm, west to east
    for col in 9..=14 {
        push((6, col), &mut index);
    }
    push((7, 14), &mut index);
    for col in (9..=14).rev() {
        push((8, col), &mut index);
    }
    // down the east side of the bottom arm
    for row in 9..=14 {
        push((row, 8), &mut index);
    }
    push((14, 7), &mut index);
    // up the west side of the bottom arm
    for row in (9..=14).rev() {
        push((row, 6), &mut index);
    }
    // left arm, east to west, closing the loop
    for col in (0..=5).rev() {
        push((8, col), &mut index);
    }
    push((7, 0), &mut index);
    push((6, 0), &mut index);

    debug_assert_eq!(index, TRACK_LEN as usize);
    coords
}

/// Absolute track index where a color's tokens enter from base.
pub fn home_start(color: Color) -> i16 {
    match color {
        Color::Red => 0,
        Color::Green => 13,
        Color::Yellow => 26,
        Color::Blue => 39,
        Color::Purple => 43,
        Color::Orange => 47,
    }
}

/// Track index of the home-entry arrow. The two-cell offset against the
/// entry index is load-bearing: it aligns entry timing with the coordinate
/// table and is relied on by deployed clients.
pub fn home_entry_index(color: Color) -> i16 {
    (home_start(color) - HOME_ENTRY_OFFSET + TRACK_LEN) % TRACK_LEN
}

pub fn home_entrance_coord(color: Color) -> Coord {
    track_coords()[home_entry_index(color) as usize]
}

/// Six home-run cells per color, walking from the entrance arrow toward the
/// board center. For the four cardinal colors this reproduces the printed
/// lanes exactly; the two extended colors interpolate toward the center.
pub fn home_run_coords(color: Color) -> [Coord; HOME_RUN_CELLS] {
    let (entry_row, entry_col) = home_entrance_coord(color);
    let mut cells = [(0u8, 0u8); HOME_RUN_CELLS];
    let mut row = entry_row as i16;
    let mut col = entry_col as i16;
    for cell in cells.iter_mut() {
        row += (7 - row).signum();
        col += (7 - col).signum();
        *cell = (row as u8, col as u8);
    }
    cells
}

/// Colors in turn order for a given room size. Rotation and the team
/// partition derive from this table only, never from storage order.
pub fn color_order(max_players: u8) -> &'static [Color] {
    match max_players {
        2 => &[Color::Red, Color::Yellow],
        3 => &[Color::Red, Color::Green, Color::Blue],
        4 => &[Color::Red, Color::Green, Color::Yellow, Color::Blue],
        5 => &[
            Color::Red,
            Color::Green,
            Color::Yellow,
            Color::Blue,
            Color::Orange,
        ],
        _ => &[
            Color::Red,
            Color::Green,
            Color::Yellow,
            Color::Blue,
            Color::Purple,
            Color::Orange,
        ],
    }
}

/// The partner color in team mode: the seat opposite in the color order.
pub fn partner_color(color: Color, max_players: u8) -> Option<Color> {
    let order = color_order(max_players);
    let index = order.iter().position(|&candidate| candidate == color)?;
    Some(order[(index + order.len() / 2) % order.len()])
}

/// Team index for a slot position: teams pair slot `i` with `i + n/2`.
pub fn team_index_for_slot(slot: u8, max_players: u8) -> u8 {
    slot % (max_players / 2)
}

pub fn is_safe_coordinate_index(track_index: i16) -> bool {
    SAFE_INDICES.contains(&track_index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn track_has_fifty_two_distinct_cells() {
        let coords = track_coords();
        let distinct: HashSet<Coord> = coords.iter().copied().collect();
        assert_eq!(distinct.len(), TRACK_LEN as usize);
    }

    #[test]
    fn entry_cells_sit_on_safe_indices_for_primary_colors() {
        for color in [Color::Red, Color::Green, Color::Yellow, Color::Blue, Color::Orange] {
            assert!(
                is_safe_coordinate_index(home_start(color)),
                "{} entry should be a safe cell",
                color.as_str()
            );
        }
    }

    #[test]
    fn entry_arrow_applies_two_cell_offset() {
        assert_eq!(home_entry_index(Color::Red), 50);
        assert_eq!(home_entry_index(Color::Green), 11);
        assert_eq!(home_entry_index(Color::Yellow), 24);
        assert_eq!(home_entry_index(Color::Blue), 37);
    }

    #[test]
    fn cardinal_home_runs_match_the_printed_lanes() {
        assert_eq!(
            home_run_coords(Color::Red),
            [(7, 1), (7, 2), (7, 3), (7, 4), (7, 5), (7, 6)]
        );
        assert_eq!(
            home_run_coords(Color::Green),
            [(1, 7), (2, 7), (3, 7), (4, 7), (5, 7), (6, 7)]
        );
        assert_eq!(
            home_run_coords(Color::Yellow),
            [(7, 13), (7, 12), (7, 11), (7, 10), (7, 9), (7, 8)]
        );
        assert_eq!(
            home_run_coords(Color::Blue),
            [(13, 7), (12, 7), (11, 7), (10, 7), (9, 7), (8, 7)]
        );
    }

    #[test]
    fn color_order_is_ascending_by_entry_index() {
        for max_players in 2..=6u8 {
            let order = color_order(max_players);
            assert_eq!(order.len(), max_players as usize);
            let entries: Vec<i16> = order.iter().map(|&color| home_start(color)).collect();
            let mut sorted = entries.clone();
            sorted.sort_unstable();
            assert_eq!(entries, sorted, "order for {max_players} players");
        }
    }

    #[test]
    fn partners_are_opposite_in_four_player_games() {
        assert_eq!(partner_color(Color::Red, 4), Some(Color::Yellow));
        assert_eq!(partner_color(Color::Green, 4), Some(Color::Blue));
        assert_eq!(partner_color(Color::Yellow, 4), Some(Color::Red));
        assert_eq!(partner_color(Color::Blue, 4), Some(Color::Green));
    }

    #[test]
    fn partners_pair_across_halves_in_six_player_games() {
        assert_eq!(partner_color(Color::Red, 6), Some(Color::Blue));
        assert_eq!(partner_color(Color::Green, 6), Some(Color::Purple));
        assert_eq!(partner_color(Color::Yellow, 6), Some(Color::Orange));
    }

    #[test]
    fn team_slots_pair_i_with_i_plus_half() {
        assert_eq!(team_index_for_slot(0, 4), 0);
        assert_eq!(team_index_for_slot(2, 4), 0);
        assert_eq!(team_index_for_slot(1, 4), 1);
        assert_eq!(team_index_for_slot(3, 4), 1);
        assert_eq!(team_index_for_slot(5, 6), 2);
    }
}
