//! Support code for the `go-review` command.

pub mod config;

use std::path::Path;

use go_core::{GameError, GameRecord};
use thiserror::Error;

pub use config::{ConfigError, Overrides, ReviewConfig};

/// Errors that can occur when loading a game record.
#[derive(Error, Debug)]
pub enum GameFileError {
    #[error("Failed to read game file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse game file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid game: {0}")]
    Invalid(#[from] GameError),
}

/// Loads a JSON game record and checks that every move is on the board.
pub fn load_game<P: AsRef<Path>>(path: P) -> Result<GameRecord, GameFileError> {
    let content = std::fs::read_to_string(path)?;
    let game: GameRecord = serde_json::from_str(&content)?;
    game.validate()?;
    Ok(game)
}

/// Positions `from..=to` of a game with `position_count` positions, clamped
/// to the game.
pub fn position_range(position_count: usize, from: Option<usize>, to: Option<usize>) -> Vec<usize> {
    let Some(last) = position_count.checked_sub(1) else {
        return Vec::new();
    };
    let to = to.map_or(last, |t| t.min(last));
    let from = from.unwrap_or(0);
    (from..=to).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_range() {
        assert_eq!(position_range(4, None, None), vec![0, 1, 2, 3]);
        assert_eq!(position_range(4, Some(2), None), vec![2, 3]);
        assert_eq!(position_range(4, Some(1), Some(2)), vec![1, 2]);
        assert_eq!(position_range(4, None, Some(10)), vec![0, 1, 2, 3]);
        assert!(position_range(4, Some(3), Some(1)).is_empty());
        assert!(position_range(0, None, None).is_empty());
    }

    #[test]
    fn test_load_game() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("game.json");
        std::fs::write(
            &path,
            r#"{"board": 9, "komi": 7.0, "rules": "chinese", "moves": [["B","E5"],["W","C3"]]}"#,
        )
        .unwrap();
        let game = load_game(&path).unwrap();
        assert_eq!(game.moves.len(), 2);
        assert_eq!(game.position_count(), 3);
    }

    #[test]
    fn test_load_game_errors() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_game(dir.path().join("missing.json")),
            Err(GameFileError::Read(_))
        ));

        let path = dir.path().join("game.json");
        std::fs::write(&path, "{").unwrap();
        assert!(matches!(load_game(&path), Err(GameFileError::Parse(_))));

        std::fs::write(&path, r#"{"board": 9, "moves": [["B","Q16"]]}"#).unwrap();
        assert!(matches!(
            load_game(&path),
            Err(GameFileError::Invalid(GameError::MoveOffBoard { number: 1, .. }))
        ));
    }
}
