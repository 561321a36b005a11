//! Batch and single-position analysis across the engine pool.
//!
//! This module provides the [`GameAnalyzer`], which turns "analyze these
//! positions" into work for the pooled engines and reassembles the results
//! in position order.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use go_core::GameError;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{AnalysisSettings, ConfigError, EngineConfig};
use crate::engine::EngineError;
use crate::pool::{EngineHandle, EnginePool, PoolError};
use crate::position::MoveSource;
use crate::protocol::{EvaluationResult, PositionSetup};

/// How often the collecting thread checks for cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// Errors surfaced to callers of [`GameAnalyzer`].
#[derive(Error, Debug)]
pub enum AnalyzerError {
    /// Analysis settings are invalid.
    #[error("Invalid analysis settings: {0}")]
    Config(#[from] ConfigError),
    /// Engines could not be started or lent out.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// The requested position does not exist.
    #[error("Invalid position: {0}")]
    Position(#[from] GameError),
    /// The primary engine is serving another request.
    #[error("Primary engine is busy")]
    PrimaryBusy,
    /// A single-position analysis failed.
    #[error("Analysis of position {position} failed: {failure}")]
    Failed {
        position: usize,
        failure: AnalysisFailure,
    },
}

/// Why a position in a batch has no evaluation.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum AnalysisFailure {
    #[error("timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },
    #[error("malformed engine response: {0}")]
    MalformedResponse(String),
    #[error("engine crashed: {0}")]
    EngineCrashed(String),
    /// The batch was cancelled before this position finished.
    #[error("cancelled")]
    Cancelled,
    #[error("invalid position: {0}")]
    InvalidPosition(String),
}

impl AnalysisFailure {
    /// Short machine-readable tag.
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisFailure::Timeout { .. } => "timeout",
            AnalysisFailure::MalformedResponse(_) => "malformed_response",
            AnalysisFailure::EngineCrashed(_) => "engine_crashed",
            AnalysisFailure::Cancelled => "cancelled",
            AnalysisFailure::InvalidPosition(_) => "invalid_position",
        }
    }
}

impl From<EngineError> for AnalysisFailure {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Timeout { after, .. } => AnalysisFailure::Timeout {
                after_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
            },
            EngineError::MalformedResponse(msg) => AnalysisFailure::MalformedResponse(msg),
            EngineError::EngineCrashed(msg) => AnalysisFailure::EngineCrashed(msg),
            EngineError::Encode(e) => AnalysisFailure::InvalidPosition(e.to_string()),
            e @ (EngineError::ProcessStartFailure { .. } | EngineError::Io(_)) => {
                AnalysisFailure::EngineCrashed(e.to_string())
            }
        }
    }
}

/// Cooperative cancellation signal for a batch.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the signal. Cannot be undone.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Terminal status of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Every position has a result or a failure of its own.
    Complete,
    /// Cancelled; unfinished positions are marked [`AnalysisFailure::Cancelled`].
    Cancelled,
}

/// The outcome for one requested position.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSlot {
    pub position_index: usize,
    pub outcome: Result<EvaluationResult, AnalysisFailure>,
}

impl PositionSlot {
    pub fn result(&self) -> Option<&EvaluationResult> {
        self.outcome.as_ref().ok()
    }

    pub fn failure(&self) -> Option<&AnalysisFailure> {
        self.outcome.as_ref().err()
    }
}

/// Ordered results of a batch: one slot per distinct requested position,
/// ascending by position index.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub status: BatchStatus,
    pub slots: Vec<PositionSlot>,
}

impl BatchOutcome {
    fn empty() -> Self {
        Self {
            status: BatchStatus::Complete,
            slots: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == BatchStatus::Complete
    }

    /// Number of positions that were evaluated successfully.
    pub fn evaluated(&self) -> usize {
        self.slots.iter().filter(|s| s.outcome.is_ok()).count()
    }

    /// Slots that ended in failure.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &AnalysisFailure)> {
        self.slots
            .iter()
            .filter_map(|s| s.failure().map(|f| (s.position_index, f)))
    }

    /// Looks up the slot for `position_index`.
    pub fn slot(&self, position_index: usize) -> Option<&PositionSlot> {
        self.slots
            .binary_search_by_key(&position_index, |s| s.position_index)
            .ok()
            .map(|i| &self.slots[i])
    }
}

struct Job {
    position_index: usize,
    setup: PositionSetup,
}

type Delivery = (usize, Result<EvaluationResult, AnalysisFailure>);

/// What a worker needs besides its engine.
#[derive(Clone)]
struct WorkerContext {
    queue: Arc<Mutex<VecDeque<Job>>>,
    cancel: CancellationToken,
    timeout: Duration,
    max_visits: u32,
    results: Sender<Delivery>,
}

/// Analyzes positions of a game with a pool of engines.
///
/// Owns the [`EnginePool`] for the session, so the primary engine lives as
/// long as the analyzer.
///
/// # Examples
///
/// ```ignore
/// use katago_analysis::{AnalysisSettings, CancellationToken, EngineConfig, GameAnalyzer};
///
/// let engine = EngineConfig::new("katago", "analysis.cfg", "model.bin.gz");
/// let analyzer = GameAnalyzer::new(engine, AnalysisSettings::default());
/// let positions: Vec<usize> = (0..game.position_count()).collect();
/// let outcome = analyzer.analyze_batch(&positions, &game, &CancellationToken::new())?;
/// ```
pub struct GameAnalyzer {
    engine: EngineConfig,
    settings: AnalysisSettings,
    pool: EnginePool,
}

impl GameAnalyzer {
    /// Creates an analyzer. No engine is started until the first request.
    pub fn new(engine: EngineConfig, settings: AnalysisSettings) -> Self {
        Self {
            engine,
            settings,
            pool: EnginePool::default(),
        }
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    /// The pool backing this analyzer.
    pub fn pool(&self) -> &EnginePool {
        &self.pool
    }

    /// Evaluates `positions` concurrently and returns one slot per position.
    ///
    /// See [`GameAnalyzer::analyze_batch_with_progress`].
    pub fn analyze_batch(
        &self,
        positions: &[usize],
        source: &dyn MoveSource,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome, AnalyzerError> {
        self.analyze_batch_with_progress(positions, source, cancel, &mut |_, _| {})
    }

    /// Evaluates `positions` concurrently, reporting `(finished, total)` after
    /// each position completes.
    ///
    /// Engines come from [`EnginePool::acquire_batch`]; each one drains a
    /// shared queue of pending positions, one query at a time. Failures stay
    /// in their own slot. An engine that crashes stops taking work; if every
    /// engine is gone, the positions still queued fail with
    /// [`AnalysisFailure::EngineCrashed`].
    ///
    /// When `cancel` is raised the call returns promptly: queries in flight
    /// are left to finish or time out in the background, their results are
    /// discarded, and unfinished slots are marked [`AnalysisFailure::Cancelled`].
    ///
    /// # Errors
    ///
    /// Returns an error if settings are invalid or no engine can be started.
    pub fn analyze_batch_with_progress(
        &self,
        positions: &[usize],
        source: &dyn MoveSource,
        cancel: &CancellationToken,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<BatchOutcome, AnalyzerError> {
        self.settings.validate()?;
        let requested: BTreeSet<usize> = positions.iter().copied().collect();
        if requested.is_empty() {
            return Ok(BatchOutcome::empty());
        }
        let total = requested.len();

        let mut collected: BTreeMap<usize, Result<EvaluationResult, AnalysisFailure>> =
            BTreeMap::new();
        let mut jobs = VecDeque::with_capacity(total);
        for &position_index in &requested {
            match source.setup(position_index) {
                Ok(setup) => jobs.push_back(Job {
                    position_index,
                    setup,
                }),
                Err(e) => {
                    collected.insert(
                        position_index,
                        Err(AnalysisFailure::InvalidPosition(e.to_string())),
                    );
                }
            }
        }

        let desired = self.settings.threads().min(jobs.len());
        let handles = self.pool.acquire_batch(&self.engine, desired)?;
        info!(positions = total, engines = handles.len(), "batch analysis started");
        if !collected.is_empty() {
            progress(collected.len(), total);
        }

        let (tx, rx) = mpsc::channel();
        let context = WorkerContext {
            queue: Arc::new(Mutex::new(jobs)),
            cancel: cancel.clone(),
            timeout: self.settings.query_timeout(&self.engine),
            max_visits: self.engine.max_visits,
            results: tx,
        };
        for handle in handles {
            let name = format!("analysis-{}", handle.label());
            let ctx = context.clone();
            if let Err(e) = thread::Builder::new()
                .name(name)
                .spawn(move || run_worker(handle, ctx))
            {
                warn!(error = %e, "failed to spawn analysis worker");
            }
        }
        drop(context);

        let mut status = BatchStatus::Complete;
        while collected.len() < total {
            if cancel.is_cancelled() {
                status = BatchStatus::Cancelled;
                break;
            }
            match rx.recv_timeout(CANCEL_POLL) {
                Ok((index, outcome)) => {
                    collected.insert(index, outcome);
                    progress(collected.len(), total);
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        // Keep results delivered before the loop stopped.
        while let Ok((index, outcome)) = rx.try_recv() {
            collected.entry(index).or_insert(outcome);
        }
        if status == BatchStatus::Complete && cancel.is_cancelled() && collected.len() < total {
            status = BatchStatus::Cancelled;
        }

        let slots: Vec<PositionSlot> = requested
            .into_iter()
            .map(|position_index| {
                let outcome = collected.remove(&position_index).unwrap_or_else(|| {
                    Err(match status {
                        BatchStatus::Cancelled => AnalysisFailure::Cancelled,
                        BatchStatus::Complete => AnalysisFailure::EngineCrashed(
                            "no engine left to analyze this position".to_string(),
                        ),
                    })
                });
                PositionSlot {
                    position_index,
                    outcome,
                }
            })
            .collect();

        self.pool.release_batch();
        let outcome = BatchOutcome { status, slots };
        info!(
            evaluated = outcome.evaluated(),
            positions = total,
            status = ?outcome.status,
            "batch analysis finished"
        );
        Ok(outcome)
    }

    /// Evaluates one position with the primary engine.
    ///
    /// # Errors
    ///
    /// - [`AnalyzerError::Position`] if `index` is out of range
    /// - [`AnalyzerError::Pool`] if the primary cannot be started
    /// - [`AnalyzerError::PrimaryBusy`] if the primary is checked out
    /// - [`AnalyzerError::Failed`] if the query itself fails
    pub fn analyze_one(
        &self,
        index: usize,
        source: &dyn MoveSource,
    ) -> Result<EvaluationResult, AnalyzerError> {
        self.settings.validate()?;
        let setup = source.setup(index)?;
        self.pool.ensure_primary(&self.engine)?;
        let handle = self
            .pool
            .checkout_primary()
            .ok_or(AnalyzerError::PrimaryBusy)?;

        let query = handle.next_query(setup, index, self.engine.max_visits);
        handle
            .evaluate(&query, self.settings.query_timeout(&self.engine))
            .map_err(|e| AnalyzerError::Failed {
                position: index,
                failure: e.into(),
            })
    }

    /// Stops every engine, the primary included.
    pub fn shutdown(&self) {
        self.pool.shutdown_all();
    }
}

fn run_worker(handle: EngineHandle, ctx: WorkerContext) {
    loop {
        if ctx.cancel.is_cancelled() {
            break;
        }
        let job = ctx
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let Some(job) = job else { break };

        let query = handle.next_query(job.setup, job.position_index, ctx.max_visits);
        let outcome = handle
            .evaluate(&query, ctx.timeout)
            .map_err(AnalysisFailure::from);
        let crashed =
            matches!(outcome, Err(AnalysisFailure::EngineCrashed(_))) || !handle.is_alive();
        match &outcome {
            Ok(_) => debug!(engine = handle.label(), position = job.position_index, "position analyzed"),
            Err(failure) => warn!(
                engine = handle.label(),
                position = job.position_index,
                %failure,
                "position analysis failed"
            ),
        }

        if ctx.cancel.is_cancelled() || ctx.results.send((job.position_index, outcome)).is_err() {
            break;
        }
        if crashed {
            warn!(engine = handle.label(), "engine lost, worker retiring");
            break;
        }
    }
    // Check in before the sender goes away.
    drop(handle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::QueryId;
    use go_core::{BoardSize, GameRecord, Ruleset};

    fn unusable_engine() -> EngineConfig {
        EngineConfig::new("/nonexistent/katago", "a.cfg", "m.bin.gz")
    }

    #[test]
    fn test_cancellation_token_is_shared() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_failure_from_engine_error() {
        let timeout = EngineError::Timeout {
            query: QueryId(1),
            after: Duration::from_millis(10),
        };
        assert_eq!(
            AnalysisFailure::from(timeout),
            AnalysisFailure::Timeout { after_ms: 10 }
        );
        assert_eq!(
            AnalysisFailure::from(EngineError::MalformedResponse("x".into())).kind(),
            "malformed_response"
        );
        assert_eq!(
            AnalysisFailure::from(EngineError::EngineCrashed("gone".into())),
            AnalysisFailure::EngineCrashed("gone".into())
        );
    }

    #[test]
    fn test_failure_serializes_with_tag() {
        let json = serde_json::to_value(AnalysisFailure::Timeout { after_ms: 250 }).unwrap();
        assert_eq!(json["kind"], "timeout");
        assert_eq!(json["detail"]["after_ms"], 250);

        let json = serde_json::to_value(AnalysisFailure::Cancelled).unwrap();
        assert_eq!(json["kind"], "cancelled");
    }

    #[test]
    fn test_empty_batch_needs_no_engine() {
        let analyzer = GameAnalyzer::new(unusable_engine(), AnalysisSettings::default());
        let game = GameRecord::new(BoardSize::square(9), 7.0, Ruleset::Chinese);
        let outcome = analyzer
            .analyze_batch(&[], &game, &CancellationToken::new())
            .unwrap();
        assert!(outcome.is_complete());
        assert!(outcome.slots.is_empty());
        assert_eq!(analyzer.pool().engine_count(), 0);
    }

    #[test]
    fn test_batch_configuration_error_is_surfaced() {
        let analyzer = GameAnalyzer::new(unusable_engine(), AnalysisSettings::default());
        let game = GameRecord::default();
        let err = analyzer
            .analyze_batch(&[0], &game, &CancellationToken::new())
            .unwrap_err();
        assert!(matches!(
            err,
            AnalyzerError::Pool(PoolError::Configuration(ConfigError::MissingExecutable(_)))
        ));
    }

    #[test]
    fn test_invalid_settings_are_rejected() {
        let settings = AnalysisSettings {
            error_threshold: -1.0,
            ..AnalysisSettings::default()
        };
        let analyzer = GameAnalyzer::new(unusable_engine(), settings);
        let game = GameRecord::default();
        assert!(matches!(
            analyzer.analyze_batch(&[0], &game, &CancellationToken::new()),
            Err(AnalyzerError::Config(ConfigError::InvalidThreshold(_)))
        ));
    }

    #[test]
    fn test_analyze_one_checks_position_first() {
        let analyzer = GameAnalyzer::new(unusable_engine(), AnalysisSettings::default());
        let game = GameRecord::default();
        assert!(matches!(
            analyzer.analyze_one(5, &game),
            Err(AnalyzerError::Position(GameError::PositionOutOfRange { index: 5, count: 1 }))
        ));
    }

    #[test]
    fn test_batch_outcome_lookup() {
        let outcome = BatchOutcome {
            status: BatchStatus::Cancelled,
            slots: vec![
                PositionSlot {
                    position_index: 2,
                    outcome: Err(AnalysisFailure::Cancelled),
                },
                PositionSlot {
                    position_index: 5,
                    outcome: Err(AnalysisFailure::Timeout { after_ms: 1 }),
                },
            ],
        };
        assert!(!outcome.is_complete());
        assert_eq!(outcome.evaluated(), 0);
        assert_eq!(outcome.slot(5).unwrap().position_index, 5);
        assert!(outcome.slot(3).is_none());
        assert_eq!(outcome.failures().count(), 2);
    }
}
