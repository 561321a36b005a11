//! Game records: board parameters plus the main-line move list.

use crate::Move;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Largest board edge expressible in GTP coordinates.
pub const MAX_BOARD_SIZE: u8 = 25;

/// Errors that can occur when building or querying a game record.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GameError {
    /// A coordinate was not valid GTP notation.
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),
    /// A stone color was neither "B" nor "W".
    #[error("Invalid stone color: {0}")]
    InvalidStone(String),
    /// A ruleset identifier was not recognized.
    #[error("Unknown ruleset: {0}")]
    UnknownRuleset(String),
    /// Board dimensions outside 1..=25.
    #[error("Unsupported board size {x}x{y}")]
    UnsupportedBoardSize { x: u8, y: u8 },
    /// A move lies outside the board.
    #[error("Move {number} ({mv}) is off the {x}x{y} board")]
    MoveOffBoard { number: usize, mv: Move, x: u8, y: u8 },
    /// A position index past the end of the game was requested.
    #[error("Position {index} out of range (game has {count} positions)")]
    PositionOutOfRange { index: usize, count: usize },
}

/// Board dimensions.
///
/// Deserializes from either a single number (`19`) or an object
/// (`{"x": 19, "y": 13}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "BoardSizeRepr")]
pub struct BoardSize {
    pub x: u8,
    pub y: u8,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoardSizeRepr {
    Square(u8),
    Rect { x: u8, y: u8 },
}

impl TryFrom<BoardSizeRepr> for BoardSize {
    type Error = GameError;

    fn try_from(repr: BoardSizeRepr) -> Result<Self, Self::Error> {
        match repr {
            BoardSizeRepr::Square(n) => BoardSize::new(n, n),
            BoardSizeRepr::Rect { x, y } => BoardSize::new(x, y),
        }
    }
}

impl BoardSize {
    /// Creates a board size, rejecting edges outside 1..=25.
    pub fn new(x: u8, y: u8) -> Result<Self, GameError> {
        if x == 0 || y == 0 || x > MAX_BOARD_SIZE || y > MAX_BOARD_SIZE {
            return Err(GameError::UnsupportedBoardSize { x, y });
        }
        Ok(BoardSize { x, y })
    }

    /// Creates an `n`x`n` board. Callers pass one of the usual sizes.
    pub const fn square(n: u8) -> Self {
        BoardSize { x: n, y: n }
    }
}

impl Default for BoardSize {
    fn default() -> Self {
        BoardSize::square(19)
    }
}

impl fmt::Display for BoardSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.x, self.y)
    }
}

/// Scoring and ko rules, named the way the analysis engine expects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Ruleset {
    TrompTaylor,
    Chinese,
    #[default]
    Japanese,
    Korean,
    Aga,
    NewZealand,
    StoneScoring,
}

impl Ruleset {
    /// Returns the engine identifier for this ruleset.
    pub const fn as_str(self) -> &'static str {
        match self {
            Ruleset::TrompTaylor => "tromp-taylor",
            Ruleset::Chinese => "chinese",
            Ruleset::Japanese => "japanese",
            Ruleset::Korean => "korean",
            Ruleset::Aga => "aga",
            Ruleset::NewZealand => "new-zealand",
            Ruleset::StoneScoring => "stone-scoring",
        }
    }
}

impl fmt::Display for Ruleset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Ruleset {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "tromp-taylor" => Ok(Ruleset::TrompTaylor),
            "chinese" => Ok(Ruleset::Chinese),
            "japanese" => Ok(Ruleset::Japanese),
            "korean" => Ok(Ruleset::Korean),
            "aga" => Ok(Ruleset::Aga),
            "new-zealand" => Ok(Ruleset::NewZealand),
            "stone-scoring" => Ok(Ruleset::StoneScoring),
            _ => Err(GameError::UnknownRuleset(s.to_string())),
        }
    }
}

fn default_komi() -> f64 {
    6.5
}

/// The main line of a game together with the parameters needed to replay it.
///
/// Position `0` is the empty board; position `n` is the board after the first
/// `n` moves, so a game with `m` moves has `m + 1` positions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameRecord {
    #[serde(default)]
    pub board: BoardSize,
    #[serde(default = "default_komi")]
    pub komi: f64,
    #[serde(default)]
    pub rules: Ruleset,
    #[serde(default)]
    pub moves: Vec<Move>,
}

impl Default for GameRecord {
    fn default() -> Self {
        GameRecord {
            board: BoardSize::default(),
            komi: default_komi(),
            rules: Ruleset::default(),
            moves: Vec::new(),
        }
    }
}

impl GameRecord {
    /// Creates a record with the given parameters and no moves.
    pub fn new(board: BoardSize, komi: f64, rules: Ruleset) -> Self {
        GameRecord {
            board,
            komi,
            rules,
            moves: Vec::new(),
        }
    }

    /// Number of positions in the main line, including the empty board.
    #[inline]
    pub fn position_count(&self) -> usize {
        self.moves.len() + 1
    }

    /// Moves leading from the empty board to position `index`.
    pub fn prefix(&self, index: usize) -> Result<&[Move], GameError> {
        if index > self.moves.len() {
            return Err(GameError::PositionOutOfRange {
                index,
                count: self.position_count(),
            });
        }
        Ok(&self.moves[..index])
    }

    /// The move played from position `index`, if the game continues past it.
    #[inline]
    pub fn played_move(&self, index: usize) -> Option<Move> {
        self.moves.get(index).copied()
    }

    /// Checks that every move lies on the board.
    pub fn validate(&self) -> Result<(), GameError> {
        for (i, mv) in self.moves.iter().enumerate() {
            if let Some(point) = mv.vertex.point() {
                if !point.is_on(self.board) {
                    return Err(GameError::MoveOffBoard {
                        number: i + 1,
                        mv: *mv,
                        x: self.board.x,
                        y: self.board.y,
                    });
                }
            }
        }
        Ok(())
    }
}
