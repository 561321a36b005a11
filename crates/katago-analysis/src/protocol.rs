//! JSON-lines wire protocol spoken by the analysis engine.
//!
//! Each request and each response is one JSON object on one line.
//!
//! Request:
//! ```json
//! {"id":"7","moves":[["B","D4"],["W","Q16"]],"rules":"japanese","komi":6.5,
//!  "boardXSize":19,"boardYSize":19,"analyzeTurns":[2],"maxVisits":200}
//! ```
//!
//! Response:
//! ```json
//! {"id":"7","turnNumber":2,"moveInfos":[{"move":"D16","winrate":0.48,
//!  "scoreLead":-0.3,"visits":120,"order":0,"pv":["D16","C17"]}]}
//! ```
//!
//! The engine may also emit `{"id":..,"error":..}` for a rejected query,
//! `{"id":..,"warning":..}` for a non-fatal problem, and partial reports
//! flagged with `"isDuringSearch": true`.

use go_core::{BoardSize, Move, Ruleset, Stone};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Identifier of one query, unique and increasing within one engine process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueryId(pub u64);

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything the engine needs to know about a position: the moves from the
/// empty board plus the board parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSetup {
    pub moves: Vec<Move>,
    pub board: BoardSize,
    pub komi: f64,
    pub rules: Ruleset,
}

impl PositionSetup {
    /// The player to move in this position.
    ///
    /// Black starts; afterwards the opponent of the last mover is to move.
    pub fn to_move(&self) -> Stone {
        self.moves
            .last()
            .map(|mv| mv.stone.opposite())
            .unwrap_or(Stone::Black)
    }
}

/// One analysis request. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub id: QueryId,
    pub position_index: usize,
    pub setup: PositionSetup,
    pub max_visits: u32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireRequest<'a> {
    id: String,
    moves: &'a [Move],
    rules: &'static str,
    komi: f64,
    board_x_size: u8,
    board_y_size: u8,
    analyze_turns: [usize; 1],
    max_visits: u32,
}

impl Query {
    /// Turn number the engine is asked to analyze: the last turn of the
    /// move list, which is the position itself.
    pub fn turn_number(&self) -> usize {
        self.setup.moves.len()
    }

    /// Serializes the query as a single line (without the trailing newline).
    pub fn to_wire_line(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&WireRequest {
            id: self.id.to_string(),
            moves: &self.setup.moves,
            rules: self.setup.rules.as_str(),
            komi: self.setup.komi,
            board_x_size: self.setup.board.x,
            board_y_size: self.setup.board.y,
            analyze_turns: [self.turn_number()],
            max_visits: self.max_visits,
        })
    }
}

/// One candidate move as ranked by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateMove {
    #[serde(rename = "move")]
    pub mv: String,
    pub winrate: f64,
    pub score_lead: f64,
    pub visits: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pv: Vec<String>,
}

/// Engine statistics for the position as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootInfo {
    pub winrate: f64,
    pub score_lead: f64,
    pub visits: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_player: Option<Stone>,
}

/// A completed evaluation of one position.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub position_index: usize,
    pub query_id: QueryId,
    /// Candidates in the engine's own order, best first. Never re-sorted.
    pub candidates: Vec<CandidateMove>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<RootInfo>,
}

impl EvaluationResult {
    /// The engine's top-ranked candidate.
    pub fn best(&self) -> Option<&CandidateMove> {
        self.candidates.first()
    }
}

/// A line the engine sent that could not be understood.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{0}")]
pub struct ProtocolError(pub String);

/// A decoded response line.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Final analysis of one turn.
    Analysis {
        id: String,
        turn_number: usize,
        move_infos: Vec<CandidateMove>,
        root_info: Option<RootInfo>,
    },
    /// Intermediate report sent while the search is still running.
    Partial { id: String },
    /// The engine refused the query.
    Error { id: Option<String>, message: String },
    /// Non-fatal notice about a query.
    Warning { id: Option<String>, message: String },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResponse {
    id: Option<String>,
    error: Option<String>,
    warning: Option<String>,
    field: Option<String>,
    turn_number: Option<usize>,
    move_infos: Option<Vec<CandidateMove>>,
    root_info: Option<RootInfo>,
    #[serde(default)]
    is_during_search: bool,
}

/// Parses one response line.
///
/// # Errors
///
/// Returns [`ProtocolError`] for invalid JSON, wrongly typed fields, or an
/// analysis response missing `id`, `turnNumber` or `moveInfos`.
pub fn parse_response(line: &str) -> Result<Response, ProtocolError> {
    let raw: RawResponse = serde_json::from_str(line)
        .map_err(|e| ProtocolError(format!("invalid response JSON: {e}")))?;

    if let Some(error) = raw.error {
        let message = match raw.field {
            Some(field) => format!("{error} (field {field})"),
            None => error,
        };
        return Ok(Response::Error {
            id: raw.id,
            message,
        });
    }
    if let Some(message) = raw.warning {
        return Ok(Response::Warning { id: raw.id, message });
    }

    let id = raw
        .id
        .ok_or_else(|| ProtocolError("response has no id".to_string()))?;
    if raw.is_during_search {
        return Ok(Response::Partial { id });
    }
    let turn_number = raw
        .turn_number
        .ok_or_else(|| ProtocolError(format!("response {id} has no turnNumber")))?;
    let move_infos = raw
        .move_infos
        .ok_or_else(|| ProtocolError(format!("response {id} has no moveInfos")))?;

    Ok(Response::Analysis {
        id,
        turn_number,
        move_infos,
        root_info: raw.root_info,
    })
}
