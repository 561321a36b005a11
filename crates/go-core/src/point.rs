//! Board point representation.

use crate::{BoardSize, GameError};
use std::fmt;
use std::str::FromStr;

/// Column letters in GTP notation. The letter `I` is never used.
const COLUMNS: &[u8; 25] = b"ABCDEFGHJKLMNOPQRSTUVWXYZ";

/// An intersection on the board.
///
/// Columns count from the left edge, rows count from the bottom edge, both
/// starting at zero. This matches GTP notation, so `D4` is `Point { col: 3, row: 3 }`
/// regardless of board size.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub col: u8,
    pub row: u8,
}

impl Point {
    /// Creates a point from column and row (row 0 = bottom edge).
    #[inline]
    pub const fn new(col: u8, row: u8) -> Self {
        Point { col, row }
    }

    /// Creates a point from a top-left based `(row, col)` pair, the layout a
    /// board widget uses.
    pub fn from_top_left(row: u8, col: u8, board: BoardSize) -> Option<Self> {
        if row >= board.y || col >= board.x {
            return None;
        }
        Some(Point::new(col, board.y - 1 - row))
    }

    /// Returns the top-left based `(row, col)` pair for this point.
    pub fn to_top_left(self, board: BoardSize) -> Option<(u8, u8)> {
        if !self.is_on(board) {
            return None;
        }
        Some((board.y - 1 - self.row, self.col))
    }

    /// Returns true if the point lies on a board of the given size.
    #[inline]
    pub const fn is_on(self, board: BoardSize) -> bool {
        self.col < board.x && self.row < board.y
    }

    /// Parses GTP notation such as `"D4"` or `"q16"`.
    pub fn from_gtp(s: &str) -> Option<Self> {
        let mut chars = s.chars();
        let letter = chars.next()?.to_ascii_uppercase();
        let col = COLUMNS.iter().position(|&c| c as char == letter)?;
        let number: u8 = chars.as_str().parse().ok()?;
        if number == 0 || number > COLUMNS.len() as u8 {
            return None;
        }
        Some(Point::new(col as u8, number - 1))
    }

    /// Returns the GTP notation for this point.
    pub fn to_gtp(self) -> String {
        let letter = COLUMNS.get(self.col as usize).copied().unwrap_or(b'?') as char;
        format!("{}{}", letter, self.row as u32 + 1)
    }
}

impl FromStr for Point {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Point::from_gtp(s).ok_or_else(|| GameError::InvalidCoordinate(s.to_string()))
    }
}

impl fmt::Debug for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Point({})", self.to_gtp())
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_gtp())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_point_from_gtp() {
        assert_eq!(Point::from_gtp("A1"), Some(Point::new(0, 0)));
        assert_eq!(Point::from_gtp("D4"), Some(Point::new(3, 3)));
        assert_eq!(Point::from_gtp("J10"), Some(Point::new(8, 9)));
        assert_eq!(Point::from_gtp("t19"), Some(Point::new(18, 18)));
        assert_eq!(Point::from_gtp("I5"), None);
        assert_eq!(Point::from_gtp("A0"), None);
        assert_eq!(Point::from_gtp("A"), None);
        assert_eq!(Point::from_gtp(""), None);
    }

    #[test]
    fn test_point_to_gtp_skips_i() {
        assert_eq!(Point::new(7, 0).to_gtp(), "H1");
        assert_eq!(Point::new(8, 0).to_gtp(), "J1");
        assert_eq!(Point::new(15, 15).to_gtp(), "Q16");
    }

    #[test]
    fn test_top_left_conversion_depends_on_board_size() {
        let nine = BoardSize::square(9);
        let nineteen = BoardSize::square(19);

        assert_eq!(Point::from_top_left(0, 0, nine), Some(Point::new(0, 8)));
        assert_eq!(Point::from_top_left(0, 0, nineteen), Some(Point::new(0, 18)));
        assert_eq!(Point::new(2, 6).to_top_left(nine), Some((2, 2)));
        assert_eq!(Point::from_top_left(9, 0, nine), None);
        assert_eq!(Point::new(10, 0).to_top_left(nine), None);
    }

    proptest! {
        #[test]
        fn prop_gtp_text_identifies_point(col in 0u8..25, row in 0u8..25) {
            let point = Point::new(col, row);
            prop_assert_eq!(Point::from_gtp(&point.to_gtp()), Some(point));
        }
    }
}
