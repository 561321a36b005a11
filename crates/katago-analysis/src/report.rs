//! JSON export of a finished review.
//!
//! The report carries the game parameters, one entry per analyzed position
//! with the engine's top candidates and the point loss of the move played
//! from it, the flagged moves, and per-player totals.

use std::path::Path;

use chrono::Utc;
use go_core::{BoardSize, GameRecord, Move, Ruleset};
use serde::Serialize;

use crate::analyzer::{AnalysisFailure, BatchOutcome, BatchStatus};
use crate::detector::{ErrorDetector, ErrorRecord, ErrorSummary};
use crate::protocol::CandidateMove;

/// Longest principal variation written per candidate.
const MAX_PV_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameInfo {
    pub board_size: BoardSize,
    pub komi: f64,
    pub rules: Ruleset,
    pub total_moves: usize,
    pub max_visits: u32,
    pub error_threshold: f64,
    pub status: BatchStatus,
    /// RFC 3339 timestamp of when the report was built.
    pub analysis_date: String,
}

/// Report entry for one analyzed position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionReport {
    pub position_index: usize,
    /// The move played from this position, if the game continues.
    pub played_move: Option<Move>,
    pub top_moves: Vec<CandidateMove>,
    /// Loss of the played move, when both neighbouring evaluations exist.
    pub point_loss: Option<f64>,
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<AnalysisFailure>,
}

/// A complete review of one game.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub game_info: GameInfo,
    pub positions: Vec<PositionReport>,
    pub errors: Vec<ErrorRecord>,
    pub summary: ErrorSummary,
}

impl AnalysisReport {
    /// Assembles a report from a batch outcome.
    ///
    /// Keeps at most `top_moves` candidates per position, in engine order.
    pub fn build(
        game: &GameRecord,
        outcome: &BatchOutcome,
        detector: &ErrorDetector,
        top_moves: usize,
        max_visits: u32,
    ) -> Self {
        let assessed = detector.assess(&outcome.slots, &game.moves);
        let errors: Vec<ErrorRecord> = assessed
            .iter()
            .filter(|r| r.point_loss > detector.threshold)
            .cloned()
            .collect();

        let positions = outcome
            .slots
            .iter()
            .map(|slot| {
                let index = slot.position_index;
                let point_loss = assessed
                    .iter()
                    .find(|r| r.move_number == index + 1)
                    .map(|r| r.point_loss);
                PositionReport {
                    position_index: index,
                    played_move: game.played_move(index),
                    top_moves: slot
                        .result()
                        .map(|r| r.candidates.iter().take(top_moves).map(trim_pv).collect::<Vec<_>>())
                        .unwrap_or_default(),
                    point_loss,
                    is_error: point_loss.is_some_and(|loss| loss > detector.threshold),
                    failure: slot.failure().cloned(),
                }
            })
            .collect();

        AnalysisReport {
            game_info: GameInfo {
                board_size: game.board,
                komi: game.komi,
                rules: game.rules,
                total_moves: game.moves.len(),
                max_visits,
                error_threshold: detector.threshold,
                status: outcome.status,
                analysis_date: Utc::now().to_rfc3339(),
            },
            summary: ErrorSummary::from_records(&errors),
            positions,
            errors,
        }
    }

    /// Writes the report as pretty-printed JSON.
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}

fn trim_pv(candidate: &CandidateMove) -> CandidateMove {
    let mut candidate = candidate.clone();
    candidate.pv.truncate(MAX_PV_LEN);
    candidate
}
