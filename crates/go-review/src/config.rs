//! Configuration file loading for go-review.
//!
//! The file has an `[engine]` section describing how to launch KataGo and an
//! `[analysis]` section bounding the review. Missing keys take their
//! defaults; a missing file yields the default configuration.

use std::path::{Path, PathBuf};

use katago_analysis::{AnalysisSettings, EngineConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when loading or parsing configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    /// Failed to parse the configuration file as valid TOML.
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Main review configuration.
///
/// ```toml
/// [engine]
/// executable = "katago"
/// config_file = "analysis.cfg"
/// model_file = "kata1-b18c384nbt.bin.gz"
/// max_visits = 200
/// score_perspective = "black"
///
/// [analysis]
/// analysis_threads = 3
/// error_threshold = 3.0
/// ```
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct ReviewConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub analysis: AnalysisSettings,
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Overrides {
    pub threads: Option<usize>,
    pub threshold: Option<f64>,
    pub visits: Option<u32>,
    pub timeout_secs: Option<f64>,
}

impl ReviewConfig {
    /// Loads the configuration from [`Self::config_path()`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ReadError`] if the file exists but cannot be read,
    /// or [`ConfigError::ParseError`] if the file contains invalid TOML.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::config_path())
    }

    /// Loads the configuration from `path`, or the defaults if it does not exist.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Returns `go-review.toml` in the current working directory.
    pub fn config_path() -> PathBuf {
        PathBuf::from("go-review.toml")
    }

    pub fn apply(&mut self, overrides: &Overrides) {
        if let Some(threads) = overrides.threads {
            self.analysis.analysis_threads = threads;
        }
        if let Some(threshold) = overrides.threshold {
            self.analysis.error_threshold = threshold;
        }
        if let Some(visits) = overrides.visits {
            self.engine.max_visits = visits;
        }
        if let Some(secs) = overrides.timeout_secs {
            self.analysis.analysis_timeout_secs = Some(secs);
        }
    }
}
