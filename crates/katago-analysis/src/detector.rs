//! Flagging of moves that lose points.
//!
//! The engine's best line at position N is compared with its best line at
//! position N+1, after the move actually played. The difference, seen from
//! the player who made that move, is the move's point loss.

use std::collections::BTreeMap;

use go_core::{Move, Stone};
use serde::Serialize;

use crate::analyzer::PositionSlot;
use crate::config::{AnalysisSettings, EngineConfig, ScorePerspective};
use crate::protocol::EvaluationResult;

/// A move whose point loss was measured.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    /// 1-based number of the move; it leads from position `move_number - 1`.
    pub move_number: usize,
    pub played_move: Move,
    /// The engine's first choice before the move.
    pub recommended_move: String,
    pub point_loss: f64,
    /// Score of the recommended line for the mover.
    pub expected_score: f64,
    /// Score after the played move for the mover.
    pub actual_score: f64,
    /// Evaluation of the position before the move.
    #[serde(skip)]
    pub evaluation: EvaluationResult,
}

/// Compares adjacent evaluations against a point-loss threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorDetector {
    pub threshold: f64,
    pub perspective: ScorePerspective,
}

impl ErrorDetector {
    pub fn new(threshold: f64, perspective: ScorePerspective) -> Self {
        Self {
            threshold,
            perspective,
        }
    }

    pub fn from_settings(settings: &AnalysisSettings, engine: &EngineConfig) -> Self {
        Self::new(settings.error_threshold, engine.score_perspective)
    }

    /// Moves whose point loss exceeds the threshold, ordered by move number.
    ///
    /// `slots` may be in any order; `played_moves[n]` is the move played from
    /// position `n`.
    pub fn detect(&self, slots: &[PositionSlot], played_moves: &[Move]) -> Vec<ErrorRecord> {
        self.assess(slots, played_moves)
            .into_iter()
            .filter(|record| record.point_loss > self.threshold)
            .collect()
    }

    /// Point loss of every move that has an evaluation on both sides.
    ///
    /// A move is skipped when either evaluation is missing or has no
    /// candidate moves.
    pub fn assess(&self, slots: &[PositionSlot], played_moves: &[Move]) -> Vec<ErrorRecord> {
        let evaluated: BTreeMap<usize, &EvaluationResult> = slots
            .iter()
            .filter_map(|slot| slot.result().map(|r| (slot.position_index, r)))
            .filter(|(_, r)| r.best().is_some())
            .collect();

        let mut records = Vec::new();
        for (&index, before) in &evaluated {
            let (Some(after), Some(played)) =
                (evaluated.get(&(index + 1)), played_moves.get(index))
            else {
                continue;
            };
            let (Some(best_before), Some(best_after)) = (before.best(), after.best()) else {
                continue;
            };

            let mover = played.stone;
            let expected_score = self.perspective.for_player(
                best_before.score_lead,
                to_move(played_moves, index),
                mover,
            );
            let actual_score = self.perspective.for_player(
                best_after.score_lead,
                to_move(played_moves, index + 1),
                mover,
            );

            records.push(ErrorRecord {
                move_number: index + 1,
                played_move: *played,
                recommended_move: best_before.mv.clone(),
                point_loss: expected_score - actual_score,
                expected_score,
                actual_score,
                evaluation: (*before).clone(),
            });
        }
        records
    }
}

/// Player to move at `position`: Black first, then the opponent of the last mover.
fn to_move(played_moves: &[Move], position: usize) -> Stone {
    position
        .checked_sub(1)
        .and_then(|last| played_moves.get(last))
        .map(|mv| mv.stone.opposite())
        .unwrap_or(Stone::Black)
}

/// Error totals for one player.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlayerErrors {
    pub errors: usize,
    pub total_point_loss: f64,
    pub mean_point_loss: f64,
    pub largest_point_loss: f64,
}

/// Error totals per player.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorSummary {
    pub black: PlayerErrors,
    pub white: PlayerErrors,
}

impl ErrorSummary {
    pub fn from_records(records: &[ErrorRecord]) -> Self {
        let mut summary = ErrorSummary::default();
        for record in records {
            let player = match record.played_move.stone {
                Stone::Black => &mut summary.black,
                Stone::White => &mut summary.white,
            };
            player.errors += 1;
            player.total_point_loss += record.point_loss;
            player.largest_point_loss = player.largest_point_loss.max(record.point_loss);
        }
        for player in [&mut summary.black, &mut summary.white] {
            if player.errors > 0 {
                player.mean_point_loss = player.total_point_loss / player.errors as f64;
            }
        }
        summary
    }

    pub fn for_player(&self, stone: Stone) -> &PlayerErrors {
        match stone {
            Stone::Black => &self.black,
            Stone::White => &self.white,
        }
    }
}
