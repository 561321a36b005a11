//! Go game analysis with a pool of KataGo analysis-engine processes.
//!
//! This crate drives external `katago analysis` processes over their JSON-lines
//! protocol, spreads the positions of a game across several of them, and
//! flags the moves that lost points.
//!
//! # Overview
//!
//! - [`EngineProcess`] - One engine subprocess and its request/response protocol
//! - [`EnginePool`] - The primary engine plus on-demand batch engines
//! - [`GameAnalyzer`] - Batch and single-position analysis over the pool
//! - [`ErrorDetector`] - Point loss of each played move against a threshold
//! - [`AnalysisReport`] - JSON export of a finished review
//!
//! # Example
//!
//! ```ignore
//! use katago_analysis::{
//!     AnalysisSettings, CancellationToken, EngineConfig, ErrorDetector, GameAnalyzer,
//! };
//!
//! let engine = EngineConfig::new("katago", "analysis.cfg", "model.bin.gz");
//! let settings = AnalysisSettings::default();
//! let detector = ErrorDetector::from_settings(&settings, &engine);
//! let analyzer = GameAnalyzer::new(engine, settings);
//!
//! let positions: Vec<usize> = (0..game.position_count()).collect();
//! let outcome = analyzer.analyze_batch(&positions, &game, &CancellationToken::new())?;
//! for error in detector.detect(&outcome.slots, &game.moves) {
//!     println!("move {}: {:.1} points", error.move_number, error.point_loss);
//! }
//! ```

pub mod analyzer;
pub mod config;
pub mod detector;
pub mod engine;
pub mod pool;
pub mod position;
pub mod protocol;
pub mod report;

pub use analyzer::{
    AnalysisFailure, AnalyzerError, BatchOutcome, BatchStatus, CancellationToken, GameAnalyzer,
    PositionSlot,
};
pub use config::{AnalysisSettings, ConfigError, EngineConfig, ScorePerspective};
pub use detector::{ErrorDetector, ErrorRecord, ErrorSummary, PlayerErrors};
pub use engine::{EngineError, EngineProcess};
pub use pool::{EngineHandle, EnginePool, PoolError, MAX_ENGINES};
pub use position::MoveSource;
pub use protocol::{CandidateMove, EvaluationResult, PositionSetup, Query, QueryId, RootInfo};
pub use report::{AnalysisReport, GameInfo, PositionReport};
