//! Lookup of the move sequence leading to a position.

use go_core::{GameError, GameRecord};

use crate::protocol::PositionSetup;

/// Supplies the moves and board parameters for each position of a game.
///
/// Lookups are pure and synchronous; the only failure is an index past the
/// end of the game.
pub trait MoveSource {
    /// Number of positions, the empty board included.
    fn position_count(&self) -> usize;

    /// Moves from the empty board to position `index`, plus board parameters.
    fn setup(&self, index: usize) -> Result<PositionSetup, GameError>;
}

impl MoveSource for GameRecord {
    fn position_count(&self) -> usize {
        GameRecord::position_count(self)
    }

    fn setup(&self, index: usize) -> Result<PositionSetup, GameError> {
        Ok(PositionSetup {
            moves: self.prefix(index)?.to_vec(),
            board: self.board,
            komi: self.komi,
            rules: self.rules,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use go_core::{BoardSize, Move, Point, Ruleset, Stone};

    #[test]
    fn test_setup_from_game_record() {
        let mut game = GameRecord::new(BoardSize::square(13), 7.5, Ruleset::Chinese);
        game.moves = vec![
            Move::play(Stone::Black, Point::new(3, 3)),
            Move::play(Stone::White, Point::new(9, 9)),
        ];

        assert_eq!(MoveSource::position_count(&game), 3);
        let setup = game.setup(1).unwrap();
        assert_eq!(setup.moves, vec![Move::play(Stone::Black, Point::new(3, 3))]);
        assert_eq!(setup.board, BoardSize::square(13));
        assert_eq!(setup.komi, 7.5);
        assert_eq!(setup.rules, Ruleset::Chinese);
        assert_eq!(setup.to_move(), Stone::White);

        assert!(matches!(
            game.setup(3),
            Err(GameError::PositionOutOfRange { index: 3, count: 3 })
        ));
    }
}
