//! Helpers shared by the integration tests.
//!
//! Every test gets its own temporary directory holding the stub engine's
//! script (passed as `-config`) and an empty model file.

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;

use go_core::{BoardSize, GameRecord, Move, Point, Ruleset, Stone};
use katago_analysis::{EngineConfig, ScorePerspective};
use tempfile::TempDir;

pub struct StubEngine {
    pub dir: TempDir,
    pub config: EngineConfig,
}

impl StubEngine {
    /// Path of a file inside the test directory.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

/// Sets up the stub engine with the given script.
///
/// `{dir}` in the script is replaced with the test directory.
pub fn stub(script: &str) -> StubEngine {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let script = script.replace("{dir}", &dir.path().display().to_string());
    let config_file = dir.path().join("analysis.cfg");
    let model_file = dir.path().join("model.bin.gz");
    fs::write(&config_file, script).expect("Failed to write stub script");
    fs::write(&model_file, b"").expect("Failed to write model file");

    let mut config = EngineConfig::new(env!("CARGO_BIN_EXE_katago-stub"), config_file, model_file);
    config.startup_grace_ms = 150;
    config.shutdown_grace_ms = 1000;
    config.query_timeout_secs = 10.0;
    config.max_visits = 50;
    config.score_perspective = ScorePerspective::Black;
    StubEngine { dir, config }
}

/// A 19x19 game with `count` alternating moves.
pub fn game(count: usize) -> GameRecord {
    let mut game = GameRecord::new(BoardSize::square(19), 6.5, Ruleset::Japanese);
    game.moves = (0..count)
        .map(|i| {
            let stone = if i % 2 == 0 { Stone::Black } else { Stone::White };
            Move::play(stone, Point::new((i % 19) as u8, (i / 19) as u8))
        })
        .collect();
    game
}

/// Returns true while a process with this id exists.
#[cfg(target_os = "linux")]
pub fn process_exists(pid: u32) -> bool {
    std::path::Path::new(&format!("/proc/{pid}")).exists()
}
