use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LevelError {
    #[error("level {level} has an empty grid")]
    EmptyGrid { level: u32 },
    #[error("level {level} row {row} has width {found}, expected {expected}")]
    RaggedRow {
        level: u32,
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error("level {level} has unknown tile '{tile}' at ({x},{y})")]
    UnknownTile { level: u32, x: i32, y: i32, tile: char },
    #[error("level {level} has no start cell")]
    MissingStart { level: u32 },
    #[error("level {level} has more than one start cell")]
    MultipleStarts { level: u32 },
    #[error("level {level} has no finish cell")]
    MissingFinish { level: u32 },
    #[error("level {level} marker at ({x},{y}) is not on an open cell")]
    MarkerOffGrid { level: u32, x: i32, y: i32 },
    #[error("level index must start at 1")]
    ZeroIndex,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScriptError {
    #[error("line {line}:{col}: {message}")]
    Parse { line: u32, col: u32, message: String },
    #[error("'{name}' is not defined")]
    Undefined { name: String },
    #[error("'{name}' is not available on this level")]
    NotAllowed { name: String },
    #[error("line {line}: {message}")]
    Runtime { line: u32, message: String },
    #[error("script interrupted")]
    Interrupted,
    #[error("script thread failed: {0}")]
    Aborted(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode value: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("unknown game '{0}'")]
    UnknownGame(String),
    #[error("level {level} is out of range for game '{game_id}' (1..={level_count})")]
    LevelOutOfRange {
        game_id: String,
        level: u32,
        level_count: u32,
    },
    #[error("progress store lock poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("{0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {key}: '{value}'")]
    InvalidEnv { key: String, value: String },
}
