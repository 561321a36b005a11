//! Engine and analysis configuration.
//!
//! [`EngineConfig`] describes how to launch one analysis engine process and
//! [`AnalysisSettings`] bounds a review run. Both deserialize from the
//! `[engine]` and `[analysis]` sections of a TOML file; paths are checked
//! lazily by [`EngineConfig::validate`] when an engine is first started.

use go_core::Stone;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::pool::MAX_ENGINES;

/// Errors found while validating engine or analysis configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// The engine executable could not be found.
    #[error("Engine executable not found: {}", .0.display())]
    MissingExecutable(PathBuf),
    /// The engine configuration file does not exist.
    #[error("Engine config file not found: {}", .0.display())]
    MissingConfigFile(PathBuf),
    /// The neural network model file does not exist.
    #[error("Engine model file not found: {}", .0.display())]
    MissingModelFile(PathBuf),
    /// A timeout was zero, negative or not a number.
    #[error("Invalid timeout: {0} seconds")]
    InvalidTimeout(f64),
    /// The visit budget was zero.
    #[error("maxVisits must be at least 1")]
    InvalidVisits,
    /// The error threshold was negative or not a number.
    #[error("Invalid error threshold: {0} points")]
    InvalidThreshold(f64),
}

/// Which side the engine's `scoreLead` and `winrate` values are reported for.
///
/// Must match the engine's `reportAnalysisWinratesAs` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScorePerspective {
    /// Positive values favour the player to move in the analyzed position.
    #[default]
    SideToMove,
    /// Positive values favour Black.
    Black,
    /// Positive values favour White.
    White,
}

impl ScorePerspective {
    /// Re-expresses `value`, reported for a position where `to_move` is the
    /// player to move, from `player`'s point of view.
    pub fn for_player(self, value: f64, to_move: Stone, player: Stone) -> f64 {
        let reported_for = match self {
            ScorePerspective::SideToMove => to_move,
            ScorePerspective::Black => Stone::Black,
            ScorePerspective::White => Stone::White,
        };
        if reported_for == player {
            value
        } else {
            -value
        }
    }
}

/// How to launch and talk to one analysis engine process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine executable, either a path or a bare name looked up in `PATH`.
    #[serde(default = "default_executable")]
    pub executable: PathBuf,
    /// Engine configuration file passed as `-config`.
    #[serde(default)]
    pub config_file: PathBuf,
    /// Neural network file passed as `-model`.
    #[serde(default)]
    pub model_file: PathBuf,
    /// Visit budget per query.
    #[serde(default = "default_max_visits")]
    pub max_visits: u32,
    /// Per-query timeout in seconds.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: f64,
    /// How long a freshly spawned process must stay up to count as started.
    #[serde(default = "default_startup_grace_ms")]
    pub startup_grace_ms: u64,
    /// How long `stop` waits for a clean exit before killing the process.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    #[serde(default)]
    pub score_perspective: ScorePerspective,
}

fn default_executable() -> PathBuf {
    PathBuf::from("katago")
}

fn default_max_visits() -> u32 {
    200
}

fn default_query_timeout_secs() -> f64 {
    30.0
}

fn default_startup_grace_ms() -> u64 {
    250
}

fn default_shutdown_grace_ms() -> u64 {
    2000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            executable: default_executable(),
            config_file: PathBuf::new(),
            model_file: PathBuf::new(),
            max_visits: default_max_visits(),
            query_timeout_secs: default_query_timeout_secs(),
            startup_grace_ms: default_startup_grace_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            score_perspective: ScorePerspective::default(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration for the given executable, config and model files.
    pub fn new(
        executable: impl Into<PathBuf>,
        config_file: impl Into<PathBuf>,
        model_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            executable: executable.into(),
            config_file: config_file.into(),
            model_file: model_file.into(),
            ..Self::default()
        }
    }

    /// Checks paths, visit budget and timeout.
    ///
    /// # Errors
    ///
    /// Returns the first problem found, executable first.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolve_executable().is_none() {
            return Err(ConfigError::MissingExecutable(self.executable.clone()));
        }
        if !self.config_file.is_file() {
            return Err(ConfigError::MissingConfigFile(self.config_file.clone()));
        }
        if !self.model_file.is_file() {
            return Err(ConfigError::MissingModelFile(self.model_file.clone()));
        }
        if self.max_visits == 0 {
            return Err(ConfigError::InvalidVisits);
        }
        if !(self.query_timeout_secs.is_finite() && self.query_timeout_secs > 0.0) {
            return Err(ConfigError::InvalidTimeout(self.query_timeout_secs));
        }
        Ok(())
    }

    /// Locates the executable, searching `PATH` for bare names.
    pub fn resolve_executable(&self) -> Option<PathBuf> {
        let exe = &self.executable;
        if exe.as_os_str().is_empty() {
            return None;
        }
        if exe.components().count() > 1 || exe.is_absolute() {
            return exe.is_file().then(|| exe.clone());
        }
        if exe.is_file() {
            return Some(exe.clone());
        }
        let path_var = std::env::var_os("PATH")?;
        std::env::split_paths(&path_var)
            .map(|dir| dir.join(exe))
            .find(|candidate| candidate.is_file())
    }

    /// Per-query timeout.
    pub fn query_timeout(&self) -> Duration {
        secs_to_duration(self.query_timeout_secs).unwrap_or(Duration::from_secs(30))
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Options that bound a review run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// Number of engine processes used for batch analysis (1..=8).
    #[serde(default = "default_analysis_threads")]
    pub analysis_threads: usize,
    /// Point loss above which a move is flagged.
    #[serde(default = "default_error_threshold")]
    pub error_threshold: f64,
    /// Overrides the engine's per-query timeout when set.
    #[serde(default)]
    pub analysis_timeout_secs: Option<f64>,
    /// Number of candidate moves kept per position in reports.
    #[serde(default = "default_top_moves")]
    pub top_moves: usize,
}

fn default_analysis_threads() -> usize {
    3
}

fn default_error_threshold() -> f64 {
    3.0
}

fn default_top_moves() -> usize {
    5
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            analysis_threads: default_analysis_threads(),
            error_threshold: default_error_threshold(),
            analysis_timeout_secs: None,
            top_moves: default_top_moves(),
        }
    }
}

impl AnalysisSettings {
    /// Configured thread count clamped to `1..=MAX_ENGINES`.
    pub fn threads(&self) -> usize {
        self.analysis_threads.clamp(1, MAX_ENGINES)
    }

    /// Effective per-query timeout: this override, else the engine's own.
    pub fn query_timeout(&self, engine: &EngineConfig) -> Duration {
        self.analysis_timeout_secs
            .and_then(secs_to_duration)
            .unwrap_or_else(|| engine.query_timeout())
    }

    /// Checks the threshold and timeout override.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.error_threshold.is_finite() && self.error_threshold >= 0.0) {
            return Err(ConfigError::InvalidThreshold(self.error_threshold));
        }
        if let Some(secs) = self.analysis_timeout_secs {
            if secs_to_duration(secs).is_none() {
                return Err(ConfigError::InvalidTimeout(secs));
            }
        }
        Ok(())
    }
}

fn secs_to_duration(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs > 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.executable, PathBuf::from("katago"));
        assert_eq!(config.max_visits, 200);
        assert_eq!(config.query_timeout(), Duration::from_secs(30));
        assert_eq!(config.score_perspective, ScorePerspective::SideToMove);
    }

    #[test]
    fn test_validate_reports_missing_paths_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("engine");
        let cfg = dir.path().join("analysis.cfg");
        let model = dir.path().join("model.bin.gz");

        let config = EngineConfig::new(&exe, &cfg, &model);
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingExecutable(exe.clone()))
        );

        File::create(&exe).unwrap();
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingConfigFile(cfg.clone()))
        );

        File::create(&cfg).unwrap();
        assert_eq!(
            config.validate(),
            Err(ConfigError::MissingModelFile(model.clone()))
        );

        File::create(&model).unwrap();
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_validate_rejects_bad_timeout_and_visits() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("engine");
        let cfg = dir.path().join("analysis.cfg");
        let model = dir.path().join("model.bin.gz");
        for path in [&exe, &cfg, &model] {
            File::create(path).unwrap();
        }

        let mut config = EngineConfig::new(&exe, &cfg, &model);
        config.query_timeout_secs = 0.0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidTimeout(0.0)));

        config.query_timeout_secs = 1.0;
        config.max_visits = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidVisits));
    }

    #[test]
    fn test_empty_executable_is_missing() {
        let config = EngineConfig::new("", "a.cfg", "m.bin");
        assert!(config.resolve_executable().is_none());
    }

    #[test]
    fn test_threads_are_clamped() {
        let mut settings = AnalysisSettings::default();
        assert_eq!(settings.threads(), 3);
        settings.analysis_threads = 0;
        assert_eq!(settings.threads(), 1);
        settings.analysis_threads = 64;
        assert_eq!(settings.threads(), MAX_ENGINES);
    }

    #[test]
    fn test_timeout_override() {
        let engine = EngineConfig::default();
        let mut settings = AnalysisSettings::default();
        assert_eq!(settings.query_timeout(&engine), Duration::from_secs(30));

        settings.analysis_timeout_secs = Some(2.5);
        assert_eq!(settings.query_timeout(&engine), Duration::from_millis(2500));

        settings.analysis_timeout_secs = Some(-1.0);
        assert_eq!(settings.query_timeout(&engine), Duration::from_secs(30));
        assert_eq!(settings.validate(), Err(ConfigError::InvalidTimeout(-1.0)));
    }

    #[test]
    fn test_threshold_validation() {
        let mut settings = AnalysisSettings::default();
        assert!(settings.validate().is_ok());
        settings.error_threshold = f64::NAN;
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::InvalidThreshold(_))
        ));
    }

    #[test]
    fn test_score_perspective_for_player() {
        let side = ScorePerspective::SideToMove;
        assert_eq!(side.for_player(2.0, Stone::Black, Stone::Black), 2.0);
        assert_eq!(side.for_player(2.0, Stone::White, Stone::Black), -2.0);

        let black = ScorePerspective::Black;
        assert_eq!(black.for_player(2.0, Stone::White, Stone::Black), 2.0);
        assert_eq!(black.for_player(2.0, Stone::Black, Stone::White), -2.0);

        let white = ScorePerspective::White;
        assert_eq!(white.for_player(1.5, Stone::Black, Stone::White), 1.5);
    }
}
