//! Core types for Go game records.
//!
//! This crate provides the value types exchanged with an analysis engine:
//! - [`Stone`] for player colors
//! - [`Point`], [`Vertex`] and [`BoardSize`] for board coordinates
//! - [`Move`] for a stone placement or a pass
//! - [`Ruleset`] and [`GameRecord`] for a complete main line

mod game;
mod mov;
mod point;
mod stone;

pub use game::{BoardSize, GameError, GameRecord, Ruleset};
pub use mov::{Move, Vertex};
pub use point::Point;
pub use stone::Stone;
