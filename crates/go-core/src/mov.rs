//! Move representation.

use crate::{GameError, Point, Stone};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a move goes: an intersection, or nowhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vertex {
    Play(Point),
    Pass,
}

impl Vertex {
    /// Returns true for a pass.
    #[inline]
    pub const fn is_pass(self) -> bool {
        matches!(self, Vertex::Pass)
    }

    /// Returns the point, if this is not a pass.
    #[inline]
    pub const fn point(self) -> Option<Point> {
        match self {
            Vertex::Play(p) => Some(p),
            Vertex::Pass => None,
        }
    }
}

impl FromStr for Vertex {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("pass") {
            return Ok(Vertex::Pass);
        }
        s.parse().map(Vertex::Play)
    }
}

impl fmt::Display for Vertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vertex::Play(p) => write!(f, "{}", p),
            Vertex::Pass => f.write_str("pass"),
        }
    }
}

/// A Go move: a stone color plus the vertex it is played on.
///
/// Serialized as a `["B", "D4"]` pair, which is also the analysis engine's
/// wire representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "(String, String)", into = "(String, String)")]
pub struct Move {
    pub stone: Stone,
    pub vertex: Vertex,
}

impl Move {
    /// Creates a stone placement.
    #[inline]
    pub const fn play(stone: Stone, point: Point) -> Self {
        Move {
            stone,
            vertex: Vertex::Play(point),
        }
    }

    /// Creates a pass.
    #[inline]
    pub const fn pass(stone: Stone) -> Self {
        Move {
            stone,
            vertex: Vertex::Pass,
        }
    }

    /// Returns true for a pass.
    #[inline]
    pub const fn is_pass(self) -> bool {
        self.vertex.is_pass()
    }
}

impl TryFrom<(String, String)> for Move {
    type Error = GameError;

    fn try_from((stone, vertex): (String, String)) -> Result<Self, Self::Error> {
        Ok(Move {
            stone: stone.parse()?,
            vertex: vertex.parse()?,
        })
    }
}

impl From<Move> for (String, String) {
    fn from(mv: Move) -> Self {
        (mv.stone.to_string(), mv.vertex.to_string())
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.stone, self.vertex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_parses_pass_in_any_case() {
        assert_eq!("pass".parse::<Vertex>().unwrap(), Vertex::Pass);
        assert_eq!("PASS".parse::<Vertex>().unwrap(), Vertex::Pass);
        assert_eq!(
            "C3".parse::<Vertex>().unwrap(),
            Vertex::Play(Point::new(2, 2))
        );
        assert!("Z99".parse::<Vertex>().is_err());
    }

    #[test]
    fn test_move_serializes_as_pair() {
        let mv = Move::play(Stone::Black, Point::new(3, 15));
        let json = serde_json::to_string(&mv).unwrap();
        assert_eq!(json, r#"["B","D16"]"#);

        let pass = Move::pass(Stone::White);
        assert_eq!(serde_json::to_string(&pass).unwrap(), r#"["W","pass"]"#);
    }

    #[test]
    fn test_move_deserialize_rejects_bad_stone() {
        let err = serde_json::from_str::<Move>(r#"["G","D4"]"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_move_display() {
        assert_eq!(Move::pass(Stone::Black).to_string(), "B pass");
        assert_eq!(
            Move::play(Stone::White, Point::new(16, 3)).to_string(),
            "W R4"
        );
    }
}
