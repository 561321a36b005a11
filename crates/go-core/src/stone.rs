//! Player color representation.

use crate::GameError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Represents the two players in Go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Stone {
    #[serde(rename = "B")]
    Black = 0,
    #[serde(rename = "W")]
    White = 1,
}

impl Stone {
    /// Returns the opposite color.
    #[inline]
    pub const fn opposite(self) -> Self {
        match self {
            Stone::Black => Stone::White,
            Stone::White => Stone::Black,
        }
    }

    /// Returns the single-letter protocol form ("B" or "W").
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Stone::Black => "B",
            Stone::White => "W",
        }
    }
}

impl std::fmt::Display for Stone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stone {
    type Err = GameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "B" | "b" => Ok(Stone::Black),
            "W" | "w" => Ok(Stone::White),
            other => Err(GameError::InvalidStone(other.to_string())),
        }
    }
}
